//! Module-final short/long branch repair.
//!
//! Splicing grows method bodies, which can push a short-form branch's target
//! past the reach of its single-byte displacement. This pass recomputes the
//! byte layout and upgrades every out-of-reach short branch to its long form.
//! Upgrades are monotonic (a long form is never downgraded), and each upgrade
//! grows the body by 3 bytes, which can push further branches out of reach, so
//! the pass iterates to a fixed point. It runs once per module after all
//! splices, not per splice.

use crate::{
    il::{encode, InstrId, MethodBody, Operand},
    image::ModuleImage,
    Result,
};

/// Upgrade out-of-reach short branches in one body to their long forms.
/// Returns the number of upgrades performed.
pub fn upgrade_branches(body: &mut MethodBody) -> Result<usize> {
    let mut upgrades = 0;
    loop {
        let layout = encode::layout(body);
        let mut pending: Vec<InstrId> = Vec::new();

        for instr in body.instructions() {
            if !instr.opcode.is_short_branch() {
                continue;
            }
            let Operand::Target(target) = instr.operand else {
                return Err(malformed_error!("branch {} has no target operand", instr));
            };
            let instr_offset = layout.offsets[&instr.id];
            let target_offset = *layout
                .offsets
                .get(&target)
                .ok_or_else(|| malformed_error!("branch target #{} is not in the body", target.0))?;
            let displacement = i64::from(target_offset)
                - i64::from(instr_offset + instr.opcode.encoded_size());
            if i8::try_from(displacement).is_err() {
                pending.push(instr.id);
            }
        }

        if pending.is_empty() {
            return Ok(upgrades);
        }
        for id in pending {
            if let Some(instr) = body.instr_mut(id) {
                instr.opcode = instr.opcode.long_form();
                upgrades += 1;
            }
        }
    }
}

/// Run branch repair over every method body of a module. Returns the total
/// number of upgraded branches.
pub fn run(image: &mut ModuleImage) -> Result<usize> {
    let mut upgrades = 0;
    for method in image.methods_mut() {
        if let Some(body) = &mut method.body {
            upgrades += upgrade_branches(body)?;
        }
    }
    if upgrades > 0 {
        log::debug!("upgraded {upgrades} short branches to long form");
    }
    Ok(upgrades)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::il::OpCode;

    /// A short forward branch over `padding` single-byte instructions.
    fn body_with_padding(padding: usize) -> MethodBody {
        let mut body = MethodBody::new();
        let branch = body.push(OpCode::BrS, Operand::Target(InstrId(0)));
        for _ in 0..padding {
            body.push(OpCode::Nop, Operand::None);
        }
        let ret = body.push(OpCode::Ret, Operand::None);
        body.instr_mut(branch).unwrap().operand = Operand::Target(ret);
        body
    }

    #[test]
    fn test_in_reach_branch_untouched() {
        let mut body = body_with_padding(100);
        assert_eq!(upgrade_branches(&mut body).unwrap(), 0);
        assert_eq!(body.instructions()[0].opcode, OpCode::BrS);
    }

    #[test]
    fn test_out_of_reach_branch_upgraded() {
        let mut body = body_with_padding(200);
        assert_eq!(upgrade_branches(&mut body).unwrap(), 1);
        assert_eq!(body.instructions()[0].opcode, OpCode::Br);
        // after the upgrade the body encodes cleanly
        assert!(encode::encode(&body).is_ok());
    }

    #[test]
    fn test_cascading_upgrades_reach_fixed_point() {
        // A backward branch sits exactly at its -128 reach limit across a
        // forward branch that must be upgraded; the 3-byte growth pushes the
        // backward branch out of reach too.
        let mut body = MethodBody::new();
        let anchor = body.push(OpCode::Nop, Operand::None);
        let forward = body.push(OpCode::BrS, Operand::Target(InstrId(0)));
        for _ in 0..123 {
            body.push(OpCode::Nop, Operand::None);
        }
        // offset 126, displacement to anchor = -(126 + 2) = -128
        let backward = body.push(OpCode::BrTrueS, Operand::Target(anchor));
        for _ in 0..10 {
            body.push(OpCode::Nop, Operand::None);
        }
        // offset 138, forward displacement = 138 - 3 = 135, out of reach
        let far = body.push(OpCode::Ret, Operand::None);
        body.instr_mut(forward).unwrap().operand = Operand::Target(far);

        assert_eq!(upgrade_branches(&mut body).unwrap(), 2);
        assert_eq!(body.instr(forward).unwrap().opcode, OpCode::Br);
        assert_eq!(body.instr(backward).unwrap().opcode, OpCode::BrTrue);
        assert!(encode::encode(&body).is_ok());
    }
}
