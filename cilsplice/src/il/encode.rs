//! Layout and byte emission for instruction streams.
//!
//! Offsets exist only here: the in-memory stream references instructions by id, and
//! this module derives byte offsets, checks short-form branch reach, and computes
//! the operand stack depth bound right before serialization.

use std::collections::HashMap;

use crate::{
    il::{FlowType, InstrId, MethodBody, OpCode, Operand, OperandKind},
    image::{MemberSig, ModuleImage, TypeSig},
    token::{Token, TokenKind},
    Result,
};

/// Byte layout of a body under its current opcode forms.
#[derive(Debug)]
pub struct Layout {
    /// Byte offset of each instruction
    pub offsets: HashMap<InstrId, u32>,
    /// Total code size in bytes
    pub code_size: u32,
}

/// Compute the byte offset of every instruction.
#[must_use]
pub fn layout(body: &MethodBody) -> Layout {
    let mut offsets = HashMap::with_capacity(body.len());
    let mut offset = 0u32;
    for instr in body.instructions() {
        offsets.insert(instr.id, offset);
        offset += instr.opcode.encoded_size();
    }
    Layout {
        offsets,
        code_size: offset,
    }
}

/// Displacement of a branch relative to the end of the instruction.
fn displacement(layout: &Layout, instr_offset: u32, size: u32, target: InstrId) -> Result<i64> {
    let target_offset = layout
        .offsets
        .get(&target)
        .ok_or_else(|| malformed_error!("branch target #{} has no layout offset", target.0))?;
    Ok(i64::from(*target_offset) - i64::from(instr_offset + size))
}

/// Encode the instruction stream to its wire bytes.
///
/// # Errors
///
/// Returns [`crate::Error::BranchOutOfRange`] if a short-form branch displacement does
/// not fit its single-byte encoding. After [`crate::rewrite::upgrade_branches`] this
/// cannot happen; the check is the writer-side assertion of that invariant.
pub fn encode(body: &MethodBody) -> Result<Vec<u8>> {
    let layout = layout(body);
    let mut bytes = Vec::with_capacity(layout.code_size as usize);

    for instr in body.instructions() {
        let offset = layout.offsets[&instr.id];
        let size = instr.opcode.encoded_size();
        let (prefix, opcode_byte) = instr.opcode.encoding();
        if let Some(prefix) = prefix {
            bytes.push(prefix);
        }
        bytes.push(opcode_byte);

        match (instr.opcode.operand_kind(), &instr.operand) {
            (OperandKind::None, Operand::None) => {}
            (OperandKind::Int8, Operand::Int32(v)) => {
                let value = i8::try_from(*v)
                    .map_err(|_| malformed_error!("immediate {} exceeds i8 at {}", v, instr))?;
                bytes.push(value as u8);
            }
            (OperandKind::Int32, Operand::Int32(v)) => bytes.extend_from_slice(&v.to_le_bytes()),
            (OperandKind::Int64, Operand::Int64(v)) => bytes.extend_from_slice(&v.to_le_bytes()),
            (OperandKind::Float64, Operand::Float64(v)) => {
                bytes.extend_from_slice(&v.to_le_bytes());
            }
            (OperandKind::Local8, Operand::Local(v)) | (OperandKind::Argument8, Operand::Argument(v)) => {
                let value = u8::try_from(*v)
                    .map_err(|_| malformed_error!("slot index {} exceeds u8 at {}", v, instr))?;
                bytes.push(value);
            }
            (OperandKind::Target8, Operand::Target(target)) => {
                let disp = displacement(&layout, offset, size, *target)?;
                let value = i8::try_from(disp).map_err(|_| crate::Error::BranchOutOfRange {
                    offset,
                    displacement: disp,
                })?;
                bytes.push(value as u8);
            }
            (OperandKind::Target32, Operand::Target(target)) => {
                let disp = displacement(&layout, offset, size, *target)?;
                let value = i32::try_from(disp)
                    .map_err(|_| malformed_error!("branch displacement {} exceeds i32", disp))?;
                bytes.extend_from_slice(&value.to_le_bytes());
            }
            (OperandKind::Token, Operand::Token(token)) => {
                bytes.extend_from_slice(&token.raw().to_le_bytes());
            }
            (kind, operand) => {
                return Err(malformed_error!(
                    "opcode {} expects {:?} operand, found {:?}",
                    instr.opcode.as_ref(),
                    kind,
                    operand
                ));
            }
        }
    }

    Ok(bytes)
}

/// Stack pops and pushes of one instruction, given its call-target signatures.
fn stack_effect(
    image: &ModuleImage,
    opcode: OpCode,
    operand: &Operand,
    return_type: &TypeSig,
) -> Result<(u16, u16)> {
    let effect = match opcode {
        OpCode::Nop => (0, 0),
        OpCode::LdArg0
        | OpCode::LdArg1
        | OpCode::LdArg2
        | OpCode::LdArg3
        | OpCode::LdArgS
        | OpCode::LdLoc0
        | OpCode::LdLoc1
        | OpCode::LdLoc2
        | OpCode::LdLoc3
        | OpCode::LdLocS
        | OpCode::LdLocaS
        | OpCode::LdNull
        | OpCode::LdcI4M1
        | OpCode::LdcI40
        | OpCode::LdcI41
        | OpCode::LdcI42
        | OpCode::LdcI43
        | OpCode::LdcI44
        | OpCode::LdcI45
        | OpCode::LdcI46
        | OpCode::LdcI47
        | OpCode::LdcI48
        | OpCode::LdcI4S
        | OpCode::LdcI4
        | OpCode::LdcI8
        | OpCode::LdcR8
        | OpCode::LdStr
        | OpCode::LdSFld => (0, 1),
        OpCode::Dup => (1, 2),
        OpCode::StLoc0
        | OpCode::StLoc1
        | OpCode::StLoc2
        | OpCode::StLoc3
        | OpCode::StLocS
        | OpCode::StArgS
        | OpCode::Pop
        | OpCode::StSFld
        | OpCode::BrFalse
        | OpCode::BrFalseS
        | OpCode::BrTrue
        | OpCode::BrTrueS => (1, 0),
        OpCode::Beq
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
        | OpCode::BneUnS
        | OpCode::StFld => (2, 0),
        OpCode::Add
        | OpCode::Sub
        | OpCode::Mul
        | OpCode::Div
        | OpCode::Ceq
        | OpCode::Cgt
        | OpCode::Clt => (2, 1),
        OpCode::Box | OpCode::UnboxAny | OpCode::CastClass | OpCode::LdFld => (1, 1),
        OpCode::Br | OpCode::BrS => (0, 0),
        OpCode::Ret => (u16::from(!return_type.is_void()), 0),
        OpCode::Call | OpCode::CallVirt => {
            let Operand::Token(token) = operand else {
                return Err(malformed_error!("call without a method token operand"));
            };
            call_effect(image, *token)?
        }
    };
    Ok(effect)
}

/// Pops and pushes of a call, resolved through the callee's signature.
fn call_effect(image: &ModuleImage, token: Token) -> Result<(u16, u16)> {
    let (instance, param_count, returns_value) = match token.kind() {
        TokenKind::MethodDef => {
            let method = image.method(token)?;
            (
                !method.is_static(),
                method.params.len(),
                !method.return_type.is_void(),
            )
        }
        TokenKind::MemberRef => {
            let member = image.member_ref(token)?;
            match &member.sig {
                MemberSig::Method {
                    instance,
                    params,
                    ret,
                } => (*instance, params.len(), !ret.is_void()),
                MemberSig::Field(_) => {
                    return Err(malformed_error!(
                        "call token {} resolves to a field reference",
                        token
                    ));
                }
            }
        }
        kind => {
            return Err(malformed_error!(
                "call token {} has non-method kind {:?}",
                token,
                kind
            ));
        }
    };

    let pops = u16::try_from(param_count)
        .map_err(|_| malformed_error!("callee of {} has too many parameters", token))?
        + u16::from(instance);
    Ok((pops, u16::from(returns_value)))
}

/// Compute the operand stack depth bound of a body by control-flow simulation.
///
/// Work-list propagation over the instruction stream: every instruction records
/// its entry depth, successors inherit the post-instruction depth, and branch
/// joins must agree. Catch handler entries start at depth 1 (the exception
/// object), finally handlers at 0.
pub fn compute_max_stack(
    body: &MethodBody,
    image: &ModuleImage,
    return_type: &TypeSig,
) -> Result<u16> {
    if body.is_empty() {
        return Ok(0);
    }

    let index_of: HashMap<InstrId, usize> = body
        .instructions()
        .iter()
        .enumerate()
        .map(|(index, instr)| (instr.id, index))
        .collect();

    let mut entry_depth: Vec<Option<u16>> = vec![None; body.len()];
    let mut worklist: Vec<(usize, u16)> = vec![(0, 0)];

    for handler in &body.exception_handlers {
        let depth = match handler.kind {
            crate::il::HandlerKind::Catch => 1,
            crate::il::HandlerKind::Finally => 0,
        };
        if let Some(&index) = index_of.get(&handler.handler_start) {
            worklist.push((index, depth));
        }
    }

    let mut max_depth = 0u16;

    while let Some((index, depth)) = worklist.pop() {
        match entry_depth[index] {
            Some(existing) if existing == depth => continue,
            Some(existing) => {
                return Err(malformed_error!(
                    "stack depth mismatch at instruction {}: {} vs {}",
                    index,
                    existing,
                    depth
                ));
            }
            None => entry_depth[index] = Some(depth),
        }

        let instr = &body.instructions()[index];
        let (pops, pushes) = stack_effect(image, instr.opcode, &instr.operand, return_type)?;
        let after = depth
            .checked_sub(pops)
            .ok_or_else(|| malformed_error!("stack underflow at {}", instr))?
            + pushes;
        max_depth = max_depth.max(depth.max(after));

        match instr.opcode.flow() {
            FlowType::Return => {}
            FlowType::Branch => {
                let target = instr
                    .branch_target()
                    .ok_or_else(|| malformed_error!("branch {} without target", instr))?;
                worklist.push((index_of[&target], after));
            }
            FlowType::CondBranch => {
                let target = instr
                    .branch_target()
                    .ok_or_else(|| malformed_error!("branch {} without target", instr))?;
                worklist.push((index_of[&target], after));
                if index + 1 < body.len() {
                    worklist.push((index + 1, after));
                }
            }
            FlowType::Next | FlowType::Call => {
                if index + 1 < body.len() {
                    worklist.push((index + 1, after));
                } else {
                    return Err(malformed_error!("instruction stream falls off the end"));
                }
            }
        }
    }

    Ok(max_depth)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::Version;

    fn empty_image() -> ModuleImage {
        ModuleImage::new("Test", Version::new(1, 0, 0, 0))
    }

    #[test]
    fn test_layout_offsets() {
        let mut body = MethodBody::new();
        body.push(OpCode::Nop, Operand::None); // 1 byte
        body.push(OpCode::LdcI4, Operand::Int32(7)); // 5 bytes
        let ret = body.push(OpCode::Ret, Operand::None);

        let layout = layout(&body);
        assert_eq!(layout.code_size, 7);
        assert_eq!(layout.offsets[&ret], 6);
    }

    #[test]
    fn test_encode_simple_body() {
        let mut body = MethodBody::new();
        body.push(OpCode::LdcI41, Operand::None);
        body.push(OpCode::Ret, Operand::None);

        let bytes = encode(&body).unwrap();
        assert_eq!(bytes, vec![0x17, 0x2A]);
    }

    #[test]
    fn test_encode_short_branch_displacement() {
        let mut body = MethodBody::new();
        let branch = body.push(OpCode::Nop, Operand::None);
        body.push(OpCode::Nop, Operand::None);
        let ret = body.push(OpCode::Ret, Operand::None);
        body.replace(branch, OpCode::BrS, Operand::Target(ret)).unwrap();

        let bytes = encode(&body).unwrap();
        // br.s(2 bytes) + nop(1) then ret: displacement from end of br.s is 1
        assert_eq!(bytes, vec![0x2B, 0x01, 0x00, 0x2A]);
    }

    #[test]
    fn test_encode_rejects_out_of_range_short_branch() {
        let mut body = MethodBody::new();
        let branch = body.push(OpCode::BrS, Operand::None);
        for _ in 0..200 {
            body.push(OpCode::Nop, Operand::None);
        }
        let ret = body.push(OpCode::Ret, Operand::None);
        body.replace(branch, OpCode::BrS, Operand::Target(ret)).unwrap();

        match encode(&body) {
            Err(crate::Error::BranchOutOfRange { .. }) => {}
            other => panic!("expected BranchOutOfRange, got {other:?}"),
        }
    }

    #[test]
    fn test_max_stack_linear() {
        let image = empty_image();
        let mut body = MethodBody::new();
        body.push(OpCode::LdcI41, Operand::None);
        body.push(OpCode::LdcI42, Operand::None);
        body.push(OpCode::Add, Operand::None);
        body.push(OpCode::Dup, Operand::None);
        body.push(OpCode::Pop, Operand::None);
        body.push(OpCode::Ret, Operand::None);

        let depth = compute_max_stack(&body, &image, &TypeSig::I4).unwrap();
        assert_eq!(depth, 2);
    }

    #[test]
    fn test_max_stack_branch_join() {
        let image = empty_image();
        let mut body = MethodBody::new();
        // ldarg.0; brtrue.s L; ldc.i4.1; ret; L: ldc.i4.2; ret
        body.push(OpCode::LdArg0, Operand::None);
        let branch = body.push(OpCode::BrTrueS, Operand::None);
        body.push(OpCode::LdcI41, Operand::None);
        body.push(OpCode::Ret, Operand::None);
        let label = body.push(OpCode::LdcI42, Operand::None);
        body.push(OpCode::Ret, Operand::None);
        body.replace(branch, OpCode::BrTrueS, Operand::Target(label))
            .unwrap();

        let depth = compute_max_stack(&body, &image, &TypeSig::I4).unwrap();
        assert_eq!(depth, 1);
    }

    #[test]
    fn test_max_stack_underflow_detected() {
        let image = empty_image();
        let mut body = MethodBody::new();
        body.push(OpCode::Pop, Operand::None);
        body.push(OpCode::Ret, Operand::None);

        assert!(compute_max_stack(&body, &image, &TypeSig::Void).is_err());
    }
}
