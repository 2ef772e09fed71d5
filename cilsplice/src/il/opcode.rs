//! Opcode definitions for the supported subset of the stack-machine instruction set.
//!
//! Each opcode carries enough static metadata for the rest of the crate to lay out,
//! encode, decode, and splice instruction streams: its wire encoding, the kind of
//! operand it expects, its control-flow class, and (for branches) the pairing between
//! short single-byte-displacement forms and long four-byte forms.

use strum::AsRefStr;

/// How an instruction affects control flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowType {
    /// Falls through to the next instruction
    Next,
    /// Calls another method, then falls through
    Call,
    /// Always transfers control to the branch target
    Branch,
    /// Transfers control to the target or falls through
    CondBranch,
    /// Leaves the method
    Return,
}

/// The wire shape of an instruction's operand.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperandKind {
    /// No operand bytes
    None,
    /// Signed 8-bit immediate
    Int8,
    /// Signed 32-bit immediate
    Int32,
    /// Signed 64-bit immediate
    Int64,
    /// 64-bit float immediate
    Float64,
    /// Unsigned 8-bit local variable index
    Local8,
    /// Unsigned 8-bit argument index
    Argument8,
    /// Signed 8-bit branch displacement
    Target8,
    /// Signed 32-bit branch displacement
    Target32,
    /// 32-bit metadata token
    Token,
}

impl OperandKind {
    /// Number of operand bytes on the wire.
    #[must_use]
    pub fn byte_size(&self) -> u32 {
        match self {
            OperandKind::None => 0,
            OperandKind::Int8
            | OperandKind::Local8
            | OperandKind::Argument8
            | OperandKind::Target8 => 1,
            OperandKind::Int32 | OperandKind::Target32 | OperandKind::Token => 4,
            OperandKind::Int64 | OperandKind::Float64 => 8,
        }
    }
}

/// A single opcode of the supported instruction set.
///
/// The numeric encodings follow the ECMA-335 CIL opcode map so that decoded and
/// emitted containers stay recognizable to anyone who has stared at IL dumps.
#[allow(missing_docs)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, AsRefStr)]
pub enum OpCode {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "ldarg.0")]
    LdArg0,
    #[strum(serialize = "ldarg.1")]
    LdArg1,
    #[strum(serialize = "ldarg.2")]
    LdArg2,
    #[strum(serialize = "ldarg.3")]
    LdArg3,
    #[strum(serialize = "ldloc.0")]
    LdLoc0,
    #[strum(serialize = "ldloc.1")]
    LdLoc1,
    #[strum(serialize = "ldloc.2")]
    LdLoc2,
    #[strum(serialize = "ldloc.3")]
    LdLoc3,
    #[strum(serialize = "stloc.0")]
    StLoc0,
    #[strum(serialize = "stloc.1")]
    StLoc1,
    #[strum(serialize = "stloc.2")]
    StLoc2,
    #[strum(serialize = "stloc.3")]
    StLoc3,
    #[strum(serialize = "ldarg.s")]
    LdArgS,
    #[strum(serialize = "starg.s")]
    StArgS,
    #[strum(serialize = "ldloc.s")]
    LdLocS,
    #[strum(serialize = "ldloca.s")]
    LdLocaS,
    #[strum(serialize = "stloc.s")]
    StLocS,
    #[strum(serialize = "ldnull")]
    LdNull,
    #[strum(serialize = "ldc.i4.m1")]
    LdcI4M1,
    #[strum(serialize = "ldc.i4.0")]
    LdcI40,
    #[strum(serialize = "ldc.i4.1")]
    LdcI41,
    #[strum(serialize = "ldc.i4.2")]
    LdcI42,
    #[strum(serialize = "ldc.i4.3")]
    LdcI43,
    #[strum(serialize = "ldc.i4.4")]
    LdcI44,
    #[strum(serialize = "ldc.i4.5")]
    LdcI45,
    #[strum(serialize = "ldc.i4.6")]
    LdcI46,
    #[strum(serialize = "ldc.i4.7")]
    LdcI47,
    #[strum(serialize = "ldc.i4.8")]
    LdcI48,
    #[strum(serialize = "ldc.i4.s")]
    LdcI4S,
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    #[strum(serialize = "ldc.i8")]
    LdcI8,
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    #[strum(serialize = "dup")]
    Dup,
    #[strum(serialize = "pop")]
    Pop,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "ret")]
    Ret,
    #[strum(serialize = "br.s")]
    BrS,
    #[strum(serialize = "brfalse.s")]
    BrFalseS,
    #[strum(serialize = "brtrue.s")]
    BrTrueS,
    #[strum(serialize = "beq.s")]
    BeqS,
    #[strum(serialize = "bge.s")]
    BgeS,
    #[strum(serialize = "bgt.s")]
    BgtS,
    #[strum(serialize = "ble.s")]
    BleS,
    #[strum(serialize = "blt.s")]
    BltS,
    #[strum(serialize = "bne.un.s")]
    BneUnS,
    #[strum(serialize = "br")]
    Br,
    #[strum(serialize = "brfalse")]
    BrFalse,
    #[strum(serialize = "brtrue")]
    BrTrue,
    #[strum(serialize = "beq")]
    Beq,
    #[strum(serialize = "bge")]
    Bge,
    #[strum(serialize = "bgt")]
    Bgt,
    #[strum(serialize = "ble")]
    Ble,
    #[strum(serialize = "blt")]
    Blt,
    #[strum(serialize = "bne.un")]
    BneUn,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "div")]
    Div,
    #[strum(serialize = "callvirt")]
    CallVirt,
    #[strum(serialize = "ldstr")]
    LdStr,
    #[strum(serialize = "castclass")]
    CastClass,
    #[strum(serialize = "ldfld")]
    LdFld,
    #[strum(serialize = "stfld")]
    StFld,
    #[strum(serialize = "ldsfld")]
    LdSFld,
    #[strum(serialize = "stsfld")]
    StSFld,
    #[strum(serialize = "box")]
    Box,
    #[strum(serialize = "unbox.any")]
    UnboxAny,
    #[strum(serialize = "ceq")]
    Ceq,
    #[strum(serialize = "cgt")]
    Cgt,
    #[strum(serialize = "clt")]
    Clt,
}

impl OpCode {
    /// Wire encoding: optional `0xFE` prefix byte and the opcode byte.
    #[must_use]
    pub fn encoding(&self) -> (Option<u8>, u8) {
        match self {
            OpCode::Nop => (None, 0x00),
            OpCode::LdArg0 => (None, 0x02),
            OpCode::LdArg1 => (None, 0x03),
            OpCode::LdArg2 => (None, 0x04),
            OpCode::LdArg3 => (None, 0x05),
            OpCode::LdLoc0 => (None, 0x06),
            OpCode::LdLoc1 => (None, 0x07),
            OpCode::LdLoc2 => (None, 0x08),
            OpCode::LdLoc3 => (None, 0x09),
            OpCode::StLoc0 => (None, 0x0A),
            OpCode::StLoc1 => (None, 0x0B),
            OpCode::StLoc2 => (None, 0x0C),
            OpCode::StLoc3 => (None, 0x0D),
            OpCode::LdArgS => (None, 0x0E),
            OpCode::StArgS => (None, 0x10),
            OpCode::LdLocS => (None, 0x11),
            OpCode::LdLocaS => (None, 0x12),
            OpCode::StLocS => (None, 0x13),
            OpCode::LdNull => (None, 0x14),
            OpCode::LdcI4M1 => (None, 0x15),
            OpCode::LdcI40 => (None, 0x16),
            OpCode::LdcI41 => (None, 0x17),
            OpCode::LdcI42 => (None, 0x18),
            OpCode::LdcI43 => (None, 0x19),
            OpCode::LdcI44 => (None, 0x1A),
            OpCode::LdcI45 => (None, 0x1B),
            OpCode::LdcI46 => (None, 0x1C),
            OpCode::LdcI47 => (None, 0x1D),
            OpCode::LdcI48 => (None, 0x1E),
            OpCode::LdcI4S => (None, 0x1F),
            OpCode::LdcI4 => (None, 0x20),
            OpCode::LdcI8 => (None, 0x21),
            OpCode::LdcR8 => (None, 0x23),
            OpCode::Dup => (None, 0x25),
            OpCode::Pop => (None, 0x26),
            OpCode::Call => (None, 0x28),
            OpCode::Ret => (None, 0x2A),
            OpCode::BrS => (None, 0x2B),
            OpCode::BrFalseS => (None, 0x2C),
            OpCode::BrTrueS => (None, 0x2D),
            OpCode::BeqS => (None, 0x2E),
            OpCode::BgeS => (None, 0x2F),
            OpCode::BgtS => (None, 0x30),
            OpCode::BleS => (None, 0x31),
            OpCode::BltS => (None, 0x32),
            OpCode::BneUnS => (None, 0x33),
            OpCode::Br => (None, 0x38),
            OpCode::BrFalse => (None, 0x39),
            OpCode::BrTrue => (None, 0x3A),
            OpCode::Beq => (None, 0x3B),
            OpCode::Bge => (None, 0x3C),
            OpCode::Bgt => (None, 0x3D),
            OpCode::Ble => (None, 0x3E),
            OpCode::Blt => (None, 0x3F),
            OpCode::BneUn => (None, 0x40),
            OpCode::Add => (None, 0x58),
            OpCode::Sub => (None, 0x59),
            OpCode::Mul => (None, 0x5A),
            OpCode::Div => (None, 0x5B),
            OpCode::CallVirt => (None, 0x6F),
            OpCode::LdStr => (None, 0x72),
            OpCode::CastClass => (None, 0x74),
            OpCode::LdFld => (None, 0x7B),
            OpCode::StFld => (None, 0x7D),
            OpCode::LdSFld => (None, 0x7E),
            OpCode::StSFld => (None, 0x80),
            OpCode::Box => (None, 0x8C),
            OpCode::UnboxAny => (None, 0xA5),
            OpCode::Ceq => (Some(0xFE), 0x01),
            OpCode::Cgt => (Some(0xFE), 0x02),
            OpCode::Clt => (Some(0xFE), 0x04),
        }
    }

    /// Decode an opcode from its wire bytes. `prefixed` selects the `0xFE` page.
    #[must_use]
    pub fn from_bytes(prefixed: bool, byte: u8) -> Option<OpCode> {
        if prefixed {
            return match byte {
                0x01 => Some(OpCode::Ceq),
                0x02 => Some(OpCode::Cgt),
                0x04 => Some(OpCode::Clt),
                _ => None,
            };
        }
        match byte {
            0x00 => Some(OpCode::Nop),
            0x02 => Some(OpCode::LdArg0),
            0x03 => Some(OpCode::LdArg1),
            0x04 => Some(OpCode::LdArg2),
            0x05 => Some(OpCode::LdArg3),
            0x06 => Some(OpCode::LdLoc0),
            0x07 => Some(OpCode::LdLoc1),
            0x08 => Some(OpCode::LdLoc2),
            0x09 => Some(OpCode::LdLoc3),
            0x0A => Some(OpCode::StLoc0),
            0x0B => Some(OpCode::StLoc1),
            0x0C => Some(OpCode::StLoc2),
            0x0D => Some(OpCode::StLoc3),
            0x0E => Some(OpCode::LdArgS),
            0x10 => Some(OpCode::StArgS),
            0x11 => Some(OpCode::LdLocS),
            0x12 => Some(OpCode::LdLocaS),
            0x13 => Some(OpCode::StLocS),
            0x14 => Some(OpCode::LdNull),
            0x15 => Some(OpCode::LdcI4M1),
            0x16 => Some(OpCode::LdcI40),
            0x17 => Some(OpCode::LdcI41),
            0x18 => Some(OpCode::LdcI42),
            0x19 => Some(OpCode::LdcI43),
            0x1A => Some(OpCode::LdcI44),
            0x1B => Some(OpCode::LdcI45),
            0x1C => Some(OpCode::LdcI46),
            0x1D => Some(OpCode::LdcI47),
            0x1E => Some(OpCode::LdcI48),
            0x1F => Some(OpCode::LdcI4S),
            0x20 => Some(OpCode::LdcI4),
            0x21 => Some(OpCode::LdcI8),
            0x23 => Some(OpCode::LdcR8),
            0x25 => Some(OpCode::Dup),
            0x26 => Some(OpCode::Pop),
            0x28 => Some(OpCode::Call),
            0x2A => Some(OpCode::Ret),
            0x2B => Some(OpCode::BrS),
            0x2C => Some(OpCode::BrFalseS),
            0x2D => Some(OpCode::BrTrueS),
            0x2E => Some(OpCode::BeqS),
            0x2F => Some(OpCode::BgeS),
            0x30 => Some(OpCode::BgtS),
            0x31 => Some(OpCode::BleS),
            0x32 => Some(OpCode::BltS),
            0x33 => Some(OpCode::BneUnS),
            0x38 => Some(OpCode::Br),
            0x39 => Some(OpCode::BrFalse),
            0x3A => Some(OpCode::BrTrue),
            0x3B => Some(OpCode::Beq),
            0x3C => Some(OpCode::Bge),
            0x3D => Some(OpCode::Bgt),
            0x3E => Some(OpCode::Ble),
            0x3F => Some(OpCode::Blt),
            0x40 => Some(OpCode::BneUn),
            0x58 => Some(OpCode::Add),
            0x59 => Some(OpCode::Sub),
            0x5A => Some(OpCode::Mul),
            0x5B => Some(OpCode::Div),
            0x6F => Some(OpCode::CallVirt),
            0x72 => Some(OpCode::LdStr),
            0x74 => Some(OpCode::CastClass),
            0x7B => Some(OpCode::LdFld),
            0x7D => Some(OpCode::StFld),
            0x7E => Some(OpCode::LdSFld),
            0x80 => Some(OpCode::StSFld),
            0x8C => Some(OpCode::Box),
            0xA5 => Some(OpCode::UnboxAny),
            _ => None,
        }
    }

    /// The operand shape this opcode expects on the wire.
    #[must_use]
    pub fn operand_kind(&self) -> OperandKind {
        match self {
            OpCode::LdArgS | OpCode::StArgS => OperandKind::Argument8,
            OpCode::LdLocS | OpCode::LdLocaS | OpCode::StLocS => OperandKind::Local8,
            OpCode::LdcI4S => OperandKind::Int8,
            OpCode::LdcI4 => OperandKind::Int32,
            OpCode::LdcI8 => OperandKind::Int64,
            OpCode::LdcR8 => OperandKind::Float64,
            OpCode::Call
            | OpCode::CallVirt
            | OpCode::LdStr
            | OpCode::CastClass
            | OpCode::LdFld
            | OpCode::StFld
            | OpCode::LdSFld
            | OpCode::StSFld
            | OpCode::Box
            | OpCode::UnboxAny => OperandKind::Token,
            OpCode::BrS
            | OpCode::BrFalseS
            | OpCode::BrTrueS
            | OpCode::BeqS
            | OpCode::BgeS
            | OpCode::BgtS
            | OpCode::BleS
            | OpCode::BltS
            | OpCode::BneUnS => OperandKind::Target8,
            OpCode::Br
            | OpCode::BrFalse
            | OpCode::BrTrue
            | OpCode::Beq
            | OpCode::Bge
            | OpCode::Bgt
            | OpCode::Ble
            | OpCode::Blt
            | OpCode::BneUn => OperandKind::Target32,
            _ => OperandKind::None,
        }
    }

    /// Control-flow class of this opcode.
    #[must_use]
    pub fn flow(&self) -> FlowType {
        match self {
            OpCode::Ret => FlowType::Return,
            OpCode::Call | OpCode::CallVirt => FlowType::Call,
            OpCode::Br | OpCode::BrS => FlowType::Branch,
            OpCode::BrFalse
            | OpCode::BrFalseS
            | OpCode::BrTrue
            | OpCode::BrTrueS
            | OpCode::Beq
            | OpCode::BeqS
            | OpCode::Bge
            | OpCode::BgeS
            | OpCode::Bgt
            | OpCode::BgtS
            | OpCode::Ble
            | OpCode::BleS
            | OpCode::Blt
            | OpCode::BltS
            | OpCode::BneUn
            | OpCode::BneUnS => FlowType::CondBranch,
            _ => FlowType::Next,
        }
    }

    /// Whether this opcode is any kind of branch (conditional or not).
    #[must_use]
    pub fn is_branch(&self) -> bool {
        matches!(self.flow(), FlowType::Branch | FlowType::CondBranch)
    }

    /// Whether this is a short-form branch with a single-byte displacement.
    #[must_use]
    pub fn is_short_branch(&self) -> bool {
        self.is_branch() && self.operand_kind() == OperandKind::Target8
    }

    /// The four-byte-displacement equivalent of a short-form branch.
    ///
    /// Returns the opcode unchanged if it is not a short branch; upgrades are
    /// monotonic so a long form is already terminal.
    #[must_use]
    pub fn long_form(&self) -> OpCode {
        match self {
            OpCode::BrS => OpCode::Br,
            OpCode::BrFalseS => OpCode::BrFalse,
            OpCode::BrTrueS => OpCode::BrTrue,
            OpCode::BeqS => OpCode::Beq,
            OpCode::BgeS => OpCode::Bge,
            OpCode::BgtS => OpCode::Bgt,
            OpCode::BleS => OpCode::Ble,
            OpCode::BltS => OpCode::Blt,
            OpCode::BneUnS => OpCode::BneUn,
            other => *other,
        }
    }

    /// Total encoded size of an instruction with this opcode, in bytes.
    #[must_use]
    pub fn encoded_size(&self) -> u32 {
        let prefix = u32::from(self.encoding().0.is_some());
        prefix + 1 + self.operand_kind().byte_size()
    }
}
