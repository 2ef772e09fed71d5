//! Local variable slot allocation for splice-injected code.
//!
//! Splices never reuse the target method's existing locals; every value a hook
//! sequence needs gets a fresh slot appended to the table. Existing slot
//! indices are therefore never renumbered, and existing load/store instructions
//! stay valid without rewriting. The cost is table growth, bounded by the
//! 8-bit indexed load/store forms at 256 slots.

use crate::{
    il::{LocalVar, MethodBody, OpCode, Operand},
    image::TypeSig,
    Error, Result,
};

/// Highest slot count addressable by the 8-bit indexed instruction forms.
const MAX_LOCAL_SLOTS: usize = 256;

/// Appends fresh local slots to one method body.
pub struct SlotAllocator<'a> {
    body: &'a mut MethodBody,
}

impl<'a> SlotAllocator<'a> {
    /// Wrap a body for allocation.
    pub fn new(body: &'a mut MethodBody) -> Self {
        SlotAllocator { body }
    }

    /// Append a fresh slot of the given type and return its index.
    ///
    /// # Errors
    /// Returns [`Error::LocalSlotLimit`] when the table is full; the splice
    /// must be abandoned rather than emitted with an unencodable index.
    pub fn alloc(&mut self, ty: TypeSig) -> Result<u16> {
        if self.body.locals.len() >= MAX_LOCAL_SLOTS {
            return Err(Error::LocalSlotLimit);
        }
        self.body.locals.push(LocalVar { ty });
        #[allow(clippy::cast_possible_truncation)]
        Ok((self.body.locals.len() - 1) as u16)
    }
}

/// Load a local, preferring the compact zero-operand forms for slots 0-3.
#[must_use]
pub fn load_local(slot: u16) -> (OpCode, Operand) {
    match slot {
        0 => (OpCode::LdLoc0, Operand::None),
        1 => (OpCode::LdLoc1, Operand::None),
        2 => (OpCode::LdLoc2, Operand::None),
        3 => (OpCode::LdLoc3, Operand::None),
        _ => (OpCode::LdLocS, Operand::Local(slot)),
    }
}

/// Store to a local, preferring the compact zero-operand forms for slots 0-3.
#[must_use]
pub fn store_local(slot: u16) -> (OpCode, Operand) {
    match slot {
        0 => (OpCode::StLoc0, Operand::None),
        1 => (OpCode::StLoc1, Operand::None),
        2 => (OpCode::StLoc2, Operand::None),
        3 => (OpCode::StLoc3, Operand::None),
        _ => (OpCode::StLocS, Operand::Local(slot)),
    }
}

/// Load the address of a local. Only the 8-bit indexed form exists in the
/// supported subset.
#[must_use]
pub fn load_local_addr(slot: u16) -> (OpCode, Operand) {
    (OpCode::LdLocaS, Operand::Local(slot))
}

/// Load an argument, preferring the compact zero-operand forms for slots 0-3.
#[must_use]
pub fn load_arg(index: u16) -> (OpCode, Operand) {
    match index {
        0 => (OpCode::LdArg0, Operand::None),
        1 => (OpCode::LdArg1, Operand::None),
        2 => (OpCode::LdArg2, Operand::None),
        3 => (OpCode::LdArg3, Operand::None),
        _ => (OpCode::LdArgS, Operand::Argument(index)),
    }
}

/// Store to an argument slot.
#[must_use]
pub fn store_arg(index: u16) -> (OpCode, Operand) {
    (OpCode::StArgS, Operand::Argument(index))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_appends_without_renumbering() {
        let mut body = MethodBody::new();
        body.locals.push(LocalVar { ty: TypeSig::I4 });

        let mut alloc = SlotAllocator::new(&mut body);
        assert_eq!(alloc.alloc(TypeSig::Object).unwrap(), 1);
        assert_eq!(alloc.alloc(TypeSig::Bool).unwrap(), 2);
        assert_eq!(body.locals[0].ty, TypeSig::I4);
    }

    #[test]
    fn test_slot_limit_enforced() {
        let mut body = MethodBody::new();
        for _ in 0..MAX_LOCAL_SLOTS {
            body.locals.push(LocalVar { ty: TypeSig::I4 });
        }
        let mut alloc = SlotAllocator::new(&mut body);
        assert!(matches!(
            alloc.alloc(TypeSig::Object),
            Err(Error::LocalSlotLimit)
        ));
    }

    #[test]
    fn test_compact_forms_for_low_slots() {
        assert_eq!(load_local(2), (OpCode::LdLoc2, Operand::None));
        assert_eq!(store_local(0), (OpCode::StLoc0, Operand::None));
        assert_eq!(load_local(4), (OpCode::LdLocS, Operand::Local(4)));
        assert_eq!(store_local(200), (OpCode::StLocS, Operand::Local(200)));
        assert_eq!(load_arg(1), (OpCode::LdArg1, Operand::None));
        assert_eq!(load_arg(5), (OpCode::LdArgS, Operand::Argument(5)));
    }
}
