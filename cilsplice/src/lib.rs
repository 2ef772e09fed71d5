// Copyright 2025 Johann Kempter
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
//
// SPDX-License-Identifier: Apache-2.0

#![deny(missing_docs)]

//! # cilsplice
//!
//! A binary rewriting toolchain for stack-based intermediate-language program
//! images: load a compiled module, splice hook call sites into its methods,
//! and write the rewritten module back out, loadable and verifiable.
//!
//! The pipeline retrofits three kinds of hook points into compiled methods:
//!
//! - **Prefix** splices run before a method's first instruction and may
//!   short-circuit it, substituting their own return value and mutating
//!   parameters through by-reference holders.
//! - **Postfix** splices wrap *every* exit of a method and may observe or
//!   replace the value being returned.
//! - **Marker** splices fire a notification at a mid-body instruction matched
//!   by content (a string literal load).
//!
//! All of this happens below any source-level abstraction: the rewriter edits
//! the instruction stream directly, preserving exact operand-stack arithmetic,
//! choosing compact opcode forms by slot index, and upgrading short-form
//! branches whose targets are pushed out of reach by the inserted code.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use cilsplice::prelude::*;
//! use std::path::Path;
//!
//! let wiring = HookWiring {
//!     container: "Loader.Hooks".to_string(),
//!     router_type: "Game.Core".to_string(),
//!     router_field: "hooks".to_string(),
//! };
//! let mut session = RewriteSession::open(Path::new("Game.cilm"), wiring)?;
//! session.install_hook_container()?;
//! session.splice(&SpliceSpec {
//!     target_type: "Game.Farmer".to_string(),
//!     method_name: "doEmote".to_string(),
//!     selector: MethodSelector::Any,
//!     suffix: None,
//!     prefix: true,
//!     postfix: true,
//! })?;
//! session.commit(Path::new("Game.cilm"))?;
//! # Ok::<(), cilsplice::Error>(())
//! ```
//!
//! ## Architecture
//!
//! - [`image`] - the in-memory program image: type/method/field tables,
//!   imported references, the user-string heap, container (de)serialization,
//!   and dependency resolution across search directories.
//! - [`il`] - the instruction stream model: id-keyed mutable instruction
//!   streams, opcode encodings, byte-level encode/decode, and operand-stack
//!   depth simulation.
//! - [`rewrite`] - the splicing pipeline: reference resolution, hook slot
//!   synthesis, splice planning, instruction splicing, local slot allocation,
//!   and the module-final short/long branch fix-up, orchestrated by
//!   [`RewriteSession`].
//!
//! The whole pipeline is single-threaded by design: one session owns its
//! image exclusively, applies all splices sequentially, and only writes output
//! after every splice has succeeded. The unit of failure is the entire
//! session; a half-patched image never reaches disk.

#[macro_use]
pub(crate) mod error;

pub mod il;
pub mod image;
pub mod prelude;
pub mod rewrite;
pub mod token;

/// Result alias used by all fallible operations in this crate.
pub type Result<T> = std::result::Result<T, Error>;

pub use error::Error;
pub use image::{ModuleImage, Version};
pub use rewrite::RewriteSession;
pub use token::Token;
