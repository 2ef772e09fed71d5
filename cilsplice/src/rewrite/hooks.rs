//! Hook slot synthesis on the hook-container type.
//!
//! A hook slot is a public virtual method the rewritten code calls into at run
//! time. Slots are synthesized with a trivial default body so a patched image
//! stays loadable and runnable even when no real hook implementation is wired
//! up behind the router.
//!
//! To bound the number of distinct signatures, slots come from a small fixed
//! catalog of families differing only in forwarded-parameter capacity (4 or
//! 10), role (prefix or postfix), and staticness of the patched target. All
//! forwarded parameters travel as by-reference `Object` so one family serves
//! targets of any parameter types.

use crate::{
    il::{MethodBody, OpCode, Operand},
    image::{MethodDef, MethodFlags, ModuleImage, Param, TypeSig},
    token::Token,
    Error, Result,
};

/// Forwarded-parameter capacities of the catalog families.
pub const FAMILY_CAPACITIES: [usize; 2] = [4, 10];

/// Name of the mid-body marker hook slot.
pub const MARKER_HOOK: &str = "OnMarkerReached";

/// Which end of the target method a hook family wraps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookRole {
    /// Runs before the original first instruction; may short-circuit
    Prefix,
    /// Runs before every exit; may replace the return value
    Postfix,
}

/// One entry of the hook slot catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HookFamily {
    /// Prefix or postfix
    pub role: HookRole,
    /// Shape for static targets (no receiver parameter)
    pub is_static: bool,
    /// Forwarded parameter capacity
    pub capacity: usize,
}

impl HookFamily {
    /// Slot name, e.g. `OnCommonPrefix4` or `OnCommonStaticPostfix10`.
    #[must_use]
    pub fn name(&self) -> String {
        format!(
            "OnCommon{}{}{}",
            if self.is_static { "Static" } else { "" },
            match self.role {
                HookRole::Prefix => "Prefix",
                HookRole::Postfix => "Postfix",
            },
            self.capacity
        )
    }

    /// Parameter list and return type of this family's slot.
    ///
    /// Prefix: `(String name, Object target?, ref Object p1..pC, ref Object result) -> Bool`.
    /// Postfix: `(String name, Object target?, ref Object p1..pC, Bool state, ref Object result) -> Void`.
    /// The receiver parameter is omitted for static shapes.
    #[must_use]
    pub fn signature(&self) -> (Vec<Param>, TypeSig) {
        let by_ref_object = TypeSig::ByRef(Box::new(TypeSig::Object));
        let mut params = vec![Param {
            name: "hookName".to_string(),
            ty: TypeSig::String,
        }];
        if !self.is_static {
            params.push(Param {
                name: "target".to_string(),
                ty: TypeSig::Object,
            });
        }
        for index in 1..=self.capacity {
            params.push(Param {
                name: format!("p{index}"),
                ty: by_ref_object.clone(),
            });
        }
        match self.role {
            HookRole::Prefix => {
                params.push(Param {
                    name: "result".to_string(),
                    ty: by_ref_object,
                });
                (params, TypeSig::Bool)
            }
            HookRole::Postfix => {
                params.push(Param {
                    name: "state".to_string(),
                    ty: TypeSig::Bool,
                });
                params.push(Param {
                    name: "result".to_string(),
                    ty: by_ref_object,
                });
                (params, TypeSig::Void)
            }
        }
    }
}

/// The full family catalog: both roles, both staticness variants, both capacities.
#[must_use]
pub fn catalog() -> Vec<HookFamily> {
    let mut families = Vec::with_capacity(8);
    for role in [HookRole::Prefix, HookRole::Postfix] {
        for is_static in [false, true] {
            for capacity in FAMILY_CAPACITIES {
                families.push(HookFamily {
                    role,
                    is_static,
                    capacity,
                });
            }
        }
    }
    families
}

/// Parameter list and return type of the mid-body marker slot:
/// `(String name) -> Void`.
#[must_use]
pub fn marker_signature() -> (Vec<Param>, TypeSig) {
    (
        vec![Param {
            name: "hookName".to_string(),
            ty: TypeSig::String,
        }],
        TypeSig::Void,
    )
}

/// Default body by return type: `void` returns immediately, booleans and
/// integrals return a truthy `1`, reference types return null.
fn default_body(return_type: &TypeSig) -> Result<MethodBody> {
    let mut body = MethodBody::new();
    match return_type {
        TypeSig::Void => {}
        TypeSig::Bool | TypeSig::I4 => {
            body.push(OpCode::LdcI41, Operand::None);
        }
        TypeSig::I8 => {
            body.push(OpCode::LdcI8, Operand::Int64(1));
        }
        TypeSig::R8 => {
            body.push(OpCode::LdcR8, Operand::Float64(1.0));
        }
        TypeSig::String | TypeSig::Object | TypeSig::Class(_) => {
            body.push(OpCode::LdNull, Operand::None);
        }
        TypeSig::ValueType(_) | TypeSig::ByRef(_) => {
            return Err(malformed_error!(
                "no default body for hook return type {}",
                return_type
            ));
        }
    }
    body.push(OpCode::Ret, Operand::None);
    Ok(body)
}

/// Define a hook slot on the container type.
///
/// Idempotent: if a method of that name already exists on the container, its
/// token is returned unchanged and nothing is added. New slots are public,
/// virtual, new-slot methods carrying the default body for their return type.
///
/// # Errors
/// Returns [`Error::MissingReference`] if the container type does not exist,
/// or a malformed error for a return type with no default body.
pub fn define_hook(
    image: &mut ModuleImage,
    container: &str,
    name: &str,
    params: Vec<Param>,
    return_type: TypeSig,
) -> Result<Token> {
    let declaring = image
        .type_token(container)
        .ok_or_else(|| Error::MissingReference {
            kind: "type",
            declaring_type: container.to_string(),
            name: String::new(),
        })?;

    if let Some(existing) = image.find_method(container, name, None) {
        return Ok(existing);
    }

    let body = default_body(&return_type)?;
    Ok(image.add_method(MethodDef {
        declaring,
        name: name.to_string(),
        flags: MethodFlags::PUBLIC | MethodFlags::VIRTUAL | MethodFlags::NEW_SLOT,
        params,
        return_type,
        body: Some(body),
    }))
}
