//! Physical instruction stream edits: insertion, branch retargeting, and
//! return redirection.
//!
//! All edits are expressed against instruction ids, never byte offsets, so an
//! edit can never invalidate another edit's anchor by moving it. The one
//! hazard left is identity staleness: an anchor replaced earlier in the same
//! pass no longer exists, and [`MethodBody::insert_before`] rejects it instead
//! of corrupting the body. Callers re-derive anchors fresh per splice.

use crate::{
    il::{InstrId, MethodBody, OpCode, Operand},
    Result,
};

/// Insert instructions immediately before an anchor, preserving their relative
/// order. Returns the ids of the inserted instructions.
///
/// # Errors
/// Fails if the anchor id is not in the body (stale identity from an earlier
/// edit).
pub fn insert_before(
    body: &mut MethodBody,
    anchor: InstrId,
    instructions: Vec<(OpCode, Operand)>,
) -> Result<Vec<InstrId>> {
    body.insert_before(anchor, instructions)
}

/// Point every branch that targets `old` at `new` instead. Returns the number
/// of branches rewritten.
pub fn retarget_branches(body: &mut MethodBody, old: InstrId, new: InstrId) -> usize {
    let mut rewritten = 0;
    for index in 0..body.len() {
        let instr = &body.instructions()[index];
        if !instr.opcode.is_branch() {
            continue;
        }
        let id = instr.id;
        if instr.operand == Operand::Target(old) {
            if let Some(instr) = body.instr_mut(id) {
                instr.operand = Operand::Target(new);
                rewritten += 1;
            }
        }
    }
    rewritten
}

/// Redirect every exit of the body through an injected entry sequence.
///
/// Every `ret` becomes an unconditional branch to `entry`, and every branch
/// whose target is a `ret` is rewritten in place to target `entry` directly
/// with its original opcode, avoiding double indirection. Covers all exit
/// paths, not just the first found. Returns the number of instructions
/// rewritten.
///
/// This is the single-trailer alternative to the per-exit insertion the
/// session's postfix path uses: instead of one injected sequence in front of
/// each `ret`, all exits are funneled through one shared epilogue at `entry`.
/// Callers building a shared epilogue use this; callers that need per-exit
/// state (like the postfix planner) insert at each exit instead.
///
/// Short branch forms are kept; the module-final fix-up pass upgrades any that
/// end up out of reach.
pub fn redirect_returns_to_entry(body: &mut MethodBody, entry: InstrId) -> Result<usize> {
    let returns: Vec<InstrId> = body
        .instructions()
        .iter()
        .filter(|instr| instr.is_return() && instr.id != entry)
        .map(|instr| instr.id)
        .collect();

    let mut rewritten = 0;
    for index in 0..body.len() {
        let instr = &body.instructions()[index];
        if !instr.opcode.is_branch() {
            continue;
        }
        if let Operand::Target(target) = instr.operand {
            if returns.contains(&target) {
                let id = instr.id;
                if let Some(instr) = body.instr_mut(id) {
                    instr.operand = Operand::Target(entry);
                    rewritten += 1;
                }
            }
        }
    }

    for id in returns {
        body.replace(id, OpCode::BrS, Operand::Target(entry))?;
        rewritten += 1;
    }

    Ok(rewritten)
}
