//! Decoding wire bytes back into a mutable instruction stream.

use std::collections::HashMap;

use crate::{
    il::{InstrId, MethodBody, OpCode, Operand, OperandKind},
    token::Token,
    Result,
};

/// Decode a code section into `body`, resolving branch displacements to instruction ids.
///
/// Returns the byte-offset-to-id map so callers can resolve exception handler
/// boundaries recorded as offsets in the container.
///
/// # Errors
///
/// Fails on unknown opcodes, truncated operands, or branch targets that do not land
/// on an instruction boundary.
pub fn decode_into(body: &mut MethodBody, code: &[u8]) -> Result<HashMap<u32, InstrId>> {
    // First pass: decode opcodes and raw operands, remembering branch displacements.
    let mut offset_to_id = HashMap::new();
    let mut pending_branches: Vec<(InstrId, u32)> = Vec::new();
    let mut pos = 0usize;

    while pos < code.len() {
        #[allow(clippy::cast_possible_truncation)]
        let instr_offset = pos as u32;
        let mut byte = code[pos];
        pos += 1;

        let prefixed = byte == 0xFE;
        if prefixed {
            byte = *code
                .get(pos)
                .ok_or_else(|| malformed_error!("truncated prefixed opcode at {}", instr_offset))?;
            pos += 1;
        }

        let opcode = OpCode::from_bytes(prefixed, byte).ok_or_else(|| {
            malformed_error!("unknown opcode 0x{:02X} at offset {}", byte, instr_offset)
        })?;

        let kind = opcode.operand_kind();
        let operand_size = kind.byte_size() as usize;
        let operand_bytes = code
            .get(pos..pos + operand_size)
            .ok_or_else(|| malformed_error!("truncated operand at offset {}", instr_offset))?;
        pos += operand_size;

        #[allow(clippy::cast_possible_truncation)]
        let next_offset = pos as u32;

        let mut pending_target = None;
        let operand = match kind {
            OperandKind::None => Operand::None,
            OperandKind::Int8 => Operand::Int32(i32::from(operand_bytes[0] as i8)),
            OperandKind::Int32 => {
                Operand::Int32(i32::from_le_bytes(operand_bytes.try_into().unwrap()))
            }
            OperandKind::Int64 => {
                Operand::Int64(i64::from_le_bytes(operand_bytes.try_into().unwrap()))
            }
            OperandKind::Float64 => {
                Operand::Float64(f64::from_le_bytes(operand_bytes.try_into().unwrap()))
            }
            OperandKind::Local8 => Operand::Local(u16::from(operand_bytes[0])),
            OperandKind::Argument8 => Operand::Argument(u16::from(operand_bytes[0])),
            OperandKind::Token => {
                let raw = u32::from_le_bytes(operand_bytes.try_into().unwrap());
                let token = Token::from_raw(raw).ok_or_else(|| {
                    malformed_error!("invalid token 0x{:08X} at offset {}", raw, instr_offset)
                })?;
                Operand::Token(token)
            }
            OperandKind::Target8 | OperandKind::Target32 => {
                let disp = if kind == OperandKind::Target8 {
                    i64::from(operand_bytes[0] as i8)
                } else {
                    i64::from(i32::from_le_bytes(operand_bytes.try_into().unwrap()))
                };
                let target = i64::from(next_offset) + disp;
                let target = u32::try_from(target).map_err(|_| {
                    malformed_error!("branch at offset {} targets {}", instr_offset, target)
                })?;
                pending_target = Some(target);
                // Placeholder id; patched in the second pass once all offsets are known.
                Operand::Target(InstrId(u32::MAX))
            }
        };

        let id = body.push(opcode, operand);
        offset_to_id.insert(instr_offset, id);
        if let Some(target_offset) = pending_target {
            pending_branches.push((id, target_offset));
        }
    }

    // Second pass: resolve branch displacements to instruction identities.
    for (branch_id, target_offset) in pending_branches {
        let target_id = *offset_to_id.get(&target_offset).ok_or_else(|| {
            malformed_error!(
                "branch #{} targets offset {} which is not an instruction boundary",
                branch_id.0,
                target_offset
            )
        })?;
        body.replace(
            branch_id,
            body.instr(branch_id)
                .ok_or_else(|| malformed_error!("lost branch #{}", branch_id.0))?
                .opcode,
            Operand::Target(target_id),
        )?;
    }

    Ok(offset_to_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::encode;

    #[test]
    fn test_decode_simple_body() {
        let mut body = MethodBody::new();
        let map = decode_into(&mut body, &[0x17, 0x2A]).unwrap(); // ldc.i4.1; ret

        assert_eq!(body.len(), 2);
        assert_eq!(body.instructions()[0].opcode, OpCode::LdcI41);
        assert_eq!(body.instructions()[1].opcode, OpCode::Ret);
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_decode_resolves_branches() {
        // br.s +1; nop; ret
        let mut body = MethodBody::new();
        decode_into(&mut body, &[0x2B, 0x01, 0x00, 0x2A]).unwrap();

        let branch = &body.instructions()[0];
        let ret = &body.instructions()[2];
        assert_eq!(branch.branch_target(), Some(ret.id));
    }

    #[test]
    fn test_decode_rejects_misaligned_branch() {
        // br.s targeting the middle of the ldc.i4 immediate
        let result = decode_into(&mut MethodBody::new(), &[0x2B, 0x02, 0x20, 0x01, 0x00, 0x00, 0x00, 0x2A]);
        assert!(result.is_err());
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let mut body = MethodBody::new();
        body.push(OpCode::LdArg0, Operand::None);
        let cond = body.push(OpCode::Nop, Operand::None);
        body.push(OpCode::LdcI4, Operand::Int32(1234));
        body.push(OpCode::Ret, Operand::None);
        let tail = body.push(OpCode::LdcI4M1, Operand::None);
        body.push(OpCode::Ret, Operand::None);
        body.replace(cond, OpCode::BrTrueS, Operand::Target(tail)).unwrap();

        let bytes = encode::encode(&body).unwrap();
        let mut reloaded = MethodBody::new();
        decode_into(&mut reloaded, &bytes).unwrap();

        assert_eq!(reloaded.len(), body.len());
        let opcodes: Vec<OpCode> = reloaded.instructions().iter().map(|i| i.opcode).collect();
        assert_eq!(
            opcodes,
            vec![
                OpCode::LdArg0,
                OpCode::BrTrueS,
                OpCode::LdcI4,
                OpCode::Ret,
                OpCode::LdcI4M1,
                OpCode::Ret
            ]
        );
        assert_eq!(
            reloaded.instructions()[1].branch_target(),
            Some(reloaded.instructions()[4].id)
        );
    }
}
