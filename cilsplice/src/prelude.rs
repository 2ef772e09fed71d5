//! Convenient access to the most commonly used types.
//!
//! Import this module to pull in everything needed for a typical rewrite
//! pass:
//!
//! ```rust,no_run
//! use cilsplice::prelude::*;
//! ```

/// The error type for all library operations
pub use crate::Error;

/// The result type used throughout the library
pub use crate::Result;

/// The in-memory program image and its version identity
pub use crate::image::{ImageResolver, MethodSelector, ModuleImage, TypeSig, Version};

/// Metadata token for referencing table rows
pub use crate::token::{Token, TokenKind};

/// The instruction stream model
pub use crate::il::{InstrId, Instruction, MethodBody, OpCode, Operand};

/// The rewrite pipeline entry points
pub use crate::rewrite::{
    HookWiring, MarkerSpec, ReferenceTable, RewriteSession, SpliceSpec,
};
