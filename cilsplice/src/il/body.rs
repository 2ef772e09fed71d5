//! Mutable method body: the instruction stream model.
//!
//! A [`MethodBody`] owns an ordered instruction list plus the local variable table and
//! exception handler regions. Instructions carry body-scoped stable ids; every branch
//! operand must name an instruction that is currently a member of the same body, which
//! [`MethodBody::validate`] checks before serialization.

use std::collections::HashSet;

use crate::{
    il::{Instruction, InstrId, OpCode, Operand},
    image::TypeSig,
    token::Token,
    Result,
};

/// One slot in the method's local variable table.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalVar {
    /// Declared type of the slot
    pub ty: TypeSig,
}

/// Kind of an exception handler region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Typed catch handler
    Catch,
    /// Finally handler
    Finally,
}

/// A protected region and its handler, pinned to instructions by id.
///
/// Byte offsets are re-derived from the final layout at write time, so splices
/// that grow the body never corrupt handler ranges.
#[derive(Debug, Clone, PartialEq)]
pub struct ExceptionHandler {
    /// Catch or finally
    pub kind: HandlerKind,
    /// First instruction of the protected region
    pub try_start: InstrId,
    /// First instruction after the protected region (`None` = end of body)
    pub try_end: Option<InstrId>,
    /// First instruction of the handler
    pub handler_start: InstrId,
    /// First instruction after the handler (`None` = end of body)
    pub handler_end: Option<InstrId>,
    /// Exception type for catch handlers
    pub catch_type: Option<Token>,
}

/// A mutable, ordered instruction stream with locals and exception handlers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MethodBody {
    instructions: Vec<Instruction>,
    /// Local variable table; splices append, never reuse
    pub locals: Vec<LocalVar>,
    /// Exception handler regions
    pub exception_handlers: Vec<ExceptionHandler>,
    /// Operand stack depth bound; recomputed before serialization
    pub max_stack: u16,
    next_id: u32,
}

impl MethodBody {
    /// Create an empty body.
    #[must_use]
    pub fn new() -> Self {
        MethodBody::default()
    }

    /// The instruction stream in execution order.
    #[must_use]
    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    /// Number of instructions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// Whether the body has no instructions yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Identity of the first instruction, the prefix-splice anchor.
    #[must_use]
    pub fn first_id(&self) -> Option<InstrId> {
        self.instructions.first().map(|i| i.id)
    }

    /// Allocate a fresh instruction id, unique within this body.
    pub(crate) fn fresh_id(&mut self) -> InstrId {
        let id = InstrId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Append an instruction and return its id.
    pub fn push(&mut self, opcode: OpCode, operand: Operand) -> InstrId {
        let id = self.fresh_id();
        self.instructions.push(Instruction {
            id,
            opcode,
            operand,
        });
        id
    }

    /// Position of an instruction in the stream.
    #[must_use]
    pub fn index_of(&self, id: InstrId) -> Option<usize> {
        self.instructions.iter().position(|i| i.id == id)
    }

    /// Look up an instruction by id.
    #[must_use]
    pub fn instr(&self, id: InstrId) -> Option<&Instruction> {
        self.instructions.iter().find(|i| i.id == id)
    }

    /// Mutable lookup by id.
    pub fn instr_mut(&mut self, id: InstrId) -> Option<&mut Instruction> {
        self.instructions.iter_mut().find(|i| i.id == id)
    }

    /// Replace an instruction's operation in place, keeping its identity.
    ///
    /// Branches elsewhere in the body that target `id` keep targeting it; this is
    /// how a `ret` becomes a branch without disturbing anything that jumps to it.
    pub fn replace(&mut self, id: InstrId, opcode: OpCode, operand: Operand) -> Result<()> {
        let instr = self
            .instr_mut(id)
            .ok_or_else(|| malformed_error!("instruction #{} not found in body", id.0))?;
        instr.opcode = opcode;
        instr.operand = operand;
        Ok(())
    }

    /// Insert a sequence immediately before `anchor`, preserving relative order.
    ///
    /// Returns the ids of the inserted instructions. Branches that target the anchor
    /// are left alone; callers that need them to land on the injected sequence use
    /// [`crate::rewrite::retarget_branches`] afterwards.
    ///
    /// # Errors
    ///
    /// Fails if `anchor` is not a member of this body - a stale anchor from an earlier
    /// splice pass would otherwise corrupt the stream.
    pub fn insert_before(
        &mut self,
        anchor: InstrId,
        sequence: Vec<(OpCode, Operand)>,
    ) -> Result<Vec<InstrId>> {
        let index = self
            .index_of(anchor)
            .ok_or_else(|| malformed_error!("stale splice anchor #{}", anchor.0))?;

        let mut ids = Vec::with_capacity(sequence.len());
        let instrs: Vec<Instruction> = sequence
            .into_iter()
            .map(|(opcode, operand)| {
                let id = self.fresh_id();
                ids.push(id);
                Instruction {
                    id,
                    opcode,
                    operand,
                }
            })
            .collect();

        self.instructions.splice(index..index, instrs);
        Ok(ids)
    }

    /// Ids of every `ret` instruction, snapshotted for two-phase mutation.
    ///
    /// Collect first, then mutate - the stream must never be iterated live while a
    /// splice grows it.
    #[must_use]
    pub fn return_ids(&self) -> Vec<InstrId> {
        self.instructions
            .iter()
            .filter(|i| i.is_return())
            .map(|i| i.id)
            .collect()
    }

    /// Check the body's structural invariants.
    ///
    /// Every branch operand and every exception handler boundary must name an
    /// instruction that is a member of this body. Violations would produce an
    /// unloadable output image, so the writer refuses to serialize them.
    pub fn validate(&self) -> Result<()> {
        let members: HashSet<InstrId> = self.instructions.iter().map(|i| i.id).collect();

        for instr in &self.instructions {
            if instr.opcode.is_branch() {
                match instr.operand {
                    Operand::Target(target) if members.contains(&target) => {}
                    Operand::Target(target) => {
                        return Err(malformed_error!(
                            "branch {} targets #{} which is not in the body",
                            instr,
                            target.0
                        ));
                    }
                    _ => {
                        return Err(malformed_error!(
                            "branch opcode {} carries a non-target operand",
                            instr.opcode.as_ref()
                        ));
                    }
                }
            }
        }

        for handler in &self.exception_handlers {
            for id in [Some(handler.try_start), handler.try_end, Some(handler.handler_start), handler.handler_end]
                .into_iter()
                .flatten()
            {
                if !members.contains(&id) {
                    return Err(malformed_error!(
                        "exception handler references #{} which is not in the body",
                        id.0
                    ));
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_instr_body() -> MethodBody {
        let mut body = MethodBody::new();
        body.push(OpCode::Nop, Operand::None);
        body.push(OpCode::Ret, Operand::None);
        body
    }

    #[test]
    fn test_push_assigns_unique_ids() {
        let body = two_instr_body();
        assert_ne!(body.instructions()[0].id, body.instructions()[1].id);
    }

    #[test]
    fn test_insert_before_preserves_order() {
        let mut body = two_instr_body();
        let anchor = body.first_id().unwrap();
        let ids = body
            .insert_before(
                anchor,
                vec![
                    (OpCode::LdcI41, Operand::None),
                    (OpCode::Pop, Operand::None),
                ],
            )
            .unwrap();

        assert_eq!(body.len(), 4);
        assert_eq!(body.index_of(ids[0]), Some(0));
        assert_eq!(body.index_of(ids[1]), Some(1));
        assert_eq!(body.index_of(anchor), Some(2));
    }

    #[test]
    fn test_insert_before_stale_anchor_fails() {
        let mut body = two_instr_body();
        let stale = InstrId(999);
        assert!(body.insert_before(stale, vec![]).is_err());
    }

    #[test]
    fn test_replace_keeps_identity() {
        let mut body = two_instr_body();
        let ret = body.return_ids()[0];
        let first = body.first_id().unwrap();
        body.replace(ret, OpCode::BrS, Operand::Target(first)).unwrap();

        let instr = body.instr(ret).unwrap();
        assert_eq!(instr.opcode, OpCode::BrS);
        assert_eq!(instr.id, ret);
    }

    #[test]
    fn test_validate_rejects_foreign_target() {
        let mut body = two_instr_body();
        let ret = body.return_ids()[0];
        body.replace(ret, OpCode::BrS, Operand::Target(InstrId(999)))
            .unwrap();
        assert!(body.validate().is_err());
    }

    #[test]
    fn test_return_ids_snapshot() {
        let mut body = MethodBody::new();
        body.push(OpCode::Ret, Operand::None);
        body.push(OpCode::Nop, Operand::None);
        body.push(OpCode::Ret, Operand::None);
        assert_eq!(body.return_ids().len(), 2);
    }
}
