//! Instruction and operand representation for mutable instruction streams.

use std::fmt;

use crate::{il::OpCode, token::Token};

/// Stable identity of an instruction within one method body.
///
/// Ids survive insertion and reordering; byte offsets are derived only at encode
/// time. Branch operands reference instructions by id, so retargeting a branch is
/// an operand rewrite and never an index fix-up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstrId(pub(crate) u32);

/// An instruction operand. Must match what [`OpCode::operand_kind`] expects.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Operand {
    /// No operand
    None,
    /// Integer immediate (covers both the 8-bit and 32-bit encodings)
    Int32(i32),
    /// 64-bit integer immediate
    Int64(i64),
    /// 64-bit float immediate
    Float64(f64),
    /// Local variable slot index
    Local(u16),
    /// Argument slot index (slot 0 is the receiver for instance methods)
    Argument(u16),
    /// Branch target, by instruction identity within the same body
    Target(InstrId),
    /// Metadata token (member, type, or user string)
    Token(Token),
}

/// One decoded or synthesized bytecode operation.
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    /// Identity within the owning body
    pub id: InstrId,
    /// Semantic operation
    pub opcode: OpCode,
    /// Operand, matching the opcode's [`crate::il::OperandKind`]
    pub operand: Operand,
}

impl Instruction {
    /// Whether this instruction leaves the method.
    #[must_use]
    pub fn is_return(&self) -> bool {
        self.opcode == OpCode::Ret
    }

    /// The branch target, if this is a branch instruction.
    #[must_use]
    pub fn branch_target(&self) -> Option<InstrId> {
        if !self.opcode.is_branch() {
            return None;
        }
        match self.operand {
            Operand::Target(id) => Some(id),
            _ => None,
        }
    }
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operand {
            Operand::None => write!(f, "{}", self.opcode.as_ref()),
            Operand::Int32(v) => write!(f, "{} {}", self.opcode.as_ref(), v),
            Operand::Int64(v) => write!(f, "{} {}", self.opcode.as_ref(), v),
            Operand::Float64(v) => write!(f, "{} {}", self.opcode.as_ref(), v),
            Operand::Local(v) => write!(f, "{} V_{}", self.opcode.as_ref(), v),
            Operand::Argument(v) => write!(f, "{} A_{}", self.opcode.as_ref(), v),
            Operand::Target(id) => write!(f, "{} -> #{}", self.opcode.as_ref(), id.0),
            Operand::Token(t) => write!(f, "{} {}", self.opcode.as_ref(), t),
        }
    }
}
