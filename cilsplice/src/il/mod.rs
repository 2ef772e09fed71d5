//! The instruction stream model: opcodes, instructions, mutable method bodies,
//! and the encode/decode machinery that maps streams to and from wire bytes.
//!
//! # Key Types
//! - [`OpCode`] - the supported opcode set with static encoding metadata
//! - [`Instruction`] / [`Operand`] - one operation with its polymorphic operand
//! - [`InstrId`] - body-scoped instruction identity that survives splicing
//! - [`MethodBody`] - ordered mutable stream plus locals and exception handlers
//!
//! Byte offsets never exist in memory; [`encode::layout`] derives them at
//! serialization time, which is what makes insertion and retargeting safe.

mod body;
mod instruction;
mod opcode;

pub mod decode;
pub mod encode;

pub use body::{ExceptionHandler, HandlerKind, LocalVar, MethodBody};
pub use instruction::{InstrId, Instruction, Operand};
pub use opcode::{FlowType, OpCode, OperandKind};
