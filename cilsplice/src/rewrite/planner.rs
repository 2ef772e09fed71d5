//! Splice planning: turning a symbolic "hook this method" request into concrete
//! anchors and instruction sequences.
//!
//! A plan is computed in two phases. Resolution first: every token the emitted
//! code will carry (router field, hook slot, interned hook-name string, box and
//! cast types) is resolved before anything is allocated, so a fatal
//! missing-reference error surfaces before the body is touched. Emission
//! second: fresh local slots are allocated and the instruction sequences are
//! built against them. A missing hook slot is the one non-fatal outcome; the
//! plan comes back `None` and the caller skips that splice.
//!
//! All value traffic between the target method and a hook slot travels as
//! boxed `Object` through by-reference holder slots, which is what lets one
//! hook family shape serve targets of unrelated signatures.

use crate::{
    il::{InstrId, MethodBody, OpCode, Operand},
    image::{MethodSelector, ModuleImage, TypeSig},
    rewrite::{
        hooks::{HookFamily, HookRole, FAMILY_CAPACITIES},
        locals::{self, SlotAllocator},
        references::ReferenceTable,
    },
    token::Token,
    Error, Result,
};

/// Where the hook router is reachable from patched call sites.
///
/// The router is a single instance visible to every patched method for the
/// process lifetime. Call sites load it through a static field; which type
/// carries that field is wiring configuration, not part of the splice plans.
#[derive(Debug, Clone)]
pub struct HookWiring {
    /// Full name of the hook-container type whose slots are called
    pub container: String,
    /// Full name of the type declaring the router accessor field
    pub router_type: String,
    /// Name of the static field holding the router instance
    pub router_field: String,
}

/// A request to splice one target method.
#[derive(Debug, Clone)]
pub struct SpliceSpec {
    /// Full name of the type declaring the target method
    pub target_type: String,
    /// Name of the target method
    pub method_name: String,
    /// Disambiguation among overloaded targets
    pub selector: MethodSelector,
    /// Disambiguation suffix appended to the hook identity string
    pub suffix: Option<String>,
    /// Inject a prefix splice
    pub prefix: bool,
    /// Inject a postfix splice
    pub postfix: bool,
}

/// A request to splice a mid-body marker into one target method.
#[derive(Debug, Clone)]
pub struct MarkerSpec {
    /// Full name of the type declaring the target method
    pub target_type: String,
    /// Name of the target method
    pub method_name: String,
    /// Disambiguation among overloaded targets
    pub selector: MethodSelector,
    /// The anchor is the instruction loading this string literal
    pub literal: String,
}

/// Shape facts about the target method, snapshotted before its body is edited.
#[derive(Debug, Clone)]
pub struct TargetInfo {
    /// Full name of the declaring type
    pub declaring_full_name: String,
    /// Method name
    pub method_name: String,
    /// Whether the target is static (no implicit receiver in slot 0)
    pub is_static: bool,
    /// Whether the declaring type has value semantics (receiver must be boxed)
    pub declaring_is_value_type: bool,
    /// Declared parameter types, excluding the receiver
    pub param_types: Vec<TypeSig>,
    /// Return type
    pub return_type: TypeSig,
}

impl TargetInfo {
    /// The hook identity string dispatched on at run time:
    /// `{DeclaringType}.{MethodName}` plus the optional suffix.
    #[must_use]
    pub fn hook_name(&self, suffix: Option<&str>) -> String {
        format!(
            "{}.{}{}",
            self.declaring_full_name,
            self.method_name,
            suffix.unwrap_or("")
        )
    }
}

/// One planned injection: the anchor, the instructions to insert before it,
/// and whether branches to the anchor must be retargeted to the injected entry.
#[derive(Debug)]
pub struct SpliceSite {
    /// The instruction the sequence is inserted before
    pub anchor: InstrId,
    /// Instructions in insertion order
    pub instructions: Vec<(OpCode, Operand)>,
    /// Retarget branches-to-anchor at the injected entry
    pub retarget: bool,
}

/// A planned prefix splice: its site plus the state flag slot the matching
/// postfix splice reads.
#[derive(Debug)]
pub struct PrefixPlan {
    /// The injection site at the method entry
    pub site: SpliceSite,
    /// Local slot of the boolean short-circuit state flag
    pub state_slot: u16,
}

/// Pick the family serving `param_count` forwarded parameters: the smallest
/// capacity that fits, or the largest with truncation.
fn family_for(role: HookRole, is_static: bool, param_count: usize) -> (HookFamily, usize) {
    for capacity in FAMILY_CAPACITIES {
        if param_count <= capacity {
            return (
                HookFamily {
                    role,
                    is_static,
                    capacity,
                },
                param_count,
            );
        }
    }
    let capacity = FAMILY_CAPACITIES[FAMILY_CAPACITIES.len() - 1];
    (
        HookFamily {
            role,
            is_static,
            capacity,
        },
        capacity,
    )
}

/// Conversion from a boxed `Object` back to the declared type. `Object`
/// itself crosses the surface unconverted.
fn conversion_from_object(token: Option<Token>, ty: &TypeSig) -> Vec<(OpCode, Operand)> {
    match token {
        None => Vec::new(),
        Some(token) if ty.is_value_type() => {
            vec![(OpCode::UnboxAny, Operand::Token(token))]
        }
        Some(token) => vec![(OpCode::CastClass, Operand::Token(token))],
    }
}

/// Tokens a splice needs for one typed value crossing the object surface.
/// `None` when the type is `Object` and crosses unconverted.
fn surface_token(
    image: &mut ModuleImage,
    refs: &mut ReferenceTable,
    ty: &TypeSig,
) -> Result<Option<Token>> {
    match ty {
        TypeSig::Object => Ok(None),
        TypeSig::Void => Ok(None),
        TypeSig::ByRef(_) => Err(Error::NotSupported),
        _ => Ok(Some(refs.type_token_for(image, ty)?)),
    }
}

/// Context shared by the prefix and postfix emitters of one target method.
struct SpliceContext {
    router_field: Token,
    hook_method: Token,
    hook_name_string: Token,
    receiver_box: Option<Token>,
    /// Box/unbox type token per forwarded parameter; `None` for `Object`
    param_tokens: Vec<Option<Token>>,
    return_token: Option<Token>,
    forwarded: usize,
    capacity: usize,
}

fn resolve_context(
    image: &mut ModuleImage,
    refs: &mut ReferenceTable,
    wiring: &HookWiring,
    target: &TargetInfo,
    suffix: Option<&str>,
    role: HookRole,
) -> Result<Option<SpliceContext>> {
    let (family, forwarded) = family_for(role, target.is_static, target.param_types.len());
    if forwarded < target.param_types.len() {
        log::warn!(
            "{}.{}: forwarding only the first {} of {} parameters",
            target.declaring_full_name,
            target.method_name,
            forwarded,
            target.param_types.len()
        );
    }

    let Some(hook_method) = image.find_method(&wiring.container, &family.name(), None) else {
        log::debug!(
            "hook slot {} not present on {}; skipping {}.{}",
            family.name(),
            wiring.container,
            target.declaring_full_name,
            target.method_name
        );
        return Ok(None);
    };

    let router_field = refs.resolve_field(image, &wiring.router_type, &wiring.router_field)?;

    let receiver_box = if !target.is_static && target.declaring_is_value_type {
        Some(refs.resolve_type(image, &target.declaring_full_name)?)
    } else {
        None
    };

    let mut param_tokens = Vec::with_capacity(forwarded);
    for ty in target.param_types.iter().take(forwarded) {
        param_tokens.push(surface_token(image, refs, ty)?);
    }
    let return_token = surface_token(image, refs, &target.return_type)?;

    let hook_name_string = image.add_user_string(&target.hook_name(suffix));

    Ok(Some(SpliceContext {
        router_field,
        hook_method,
        hook_name_string,
        receiver_box,
        param_tokens,
        return_token,
        forwarded,
        capacity: family.capacity,
    }))
}

/// Emit the stash sequence: load each forwarded argument, box value types,
/// store into its holder slot.
fn emit_param_stash(
    out: &mut Vec<(OpCode, Operand)>,
    target: &TargetInfo,
    ctx: &SpliceContext,
    holders: &[u16],
) {
    let arg_offset = u16::from(!target.is_static);
    for (index, ty) in target.param_types.iter().take(ctx.forwarded).enumerate() {
        #[allow(clippy::cast_possible_truncation)]
        out.push(locals::load_arg(arg_offset + index as u16));
        if ty.is_value_type() {
            if let Some(token) = ctx.param_tokens[index] {
                out.push((OpCode::Box, Operand::Token(token)));
            }
        }
        out.push(locals::store_local(holders[index]));
    }
}

/// Emit the common call head: router load, hook-name string, receiver.
fn emit_call_head(out: &mut Vec<(OpCode, Operand)>, target: &TargetInfo, ctx: &SpliceContext) {
    out.push((OpCode::LdSFld, Operand::Token(ctx.router_field)));
    out.push((OpCode::LdStr, Operand::Token(ctx.hook_name_string)));
    if !target.is_static {
        out.push(locals::load_arg(0));
        if let Some(token) = ctx.receiver_box {
            out.push((OpCode::Box, Operand::Token(token)));
        }
    }
}

/// Emit the holder-address arguments, padding unfilled capacity with the dummy
/// holder's address so the call signature is always satisfied.
fn emit_holder_addresses(
    out: &mut Vec<(OpCode, Operand)>,
    ctx: &SpliceContext,
    holders: &[u16],
    dummy: u16,
) {
    for index in 0..ctx.capacity {
        let slot = holders.get(index).copied().unwrap_or(dummy);
        out.push(locals::load_local_addr(slot));
    }
}

/// Emit the write-back of holder values into the original argument slots,
/// cast or unboxed back to the declared parameter types.
fn emit_param_writeback(
    out: &mut Vec<(OpCode, Operand)>,
    target: &TargetInfo,
    ctx: &SpliceContext,
    holders: &[u16],
) {
    let arg_offset = u16::from(!target.is_static);
    for (index, ty) in target.param_types.iter().take(ctx.forwarded).enumerate() {
        out.push(locals::load_local(holders[index]));
        out.extend(conversion_from_object(ctx.param_tokens[index], ty));
        #[allow(clippy::cast_possible_truncation)]
        out.push(locals::store_arg(arg_offset + index as u16));
    }
}

/// Plan a prefix splice at the method entry.
///
/// Emits, before the original first instruction: the parameter stash, the hook
/// call through the router, the state flag store, the parameter write-back, a
/// conditional branch to the original entry when the hook returns true, and an
/// early-return epilogue that surfaces the hook-supplied result when it
/// returns false.
///
/// Branches to the original entry are deliberately not retargeted; a loop back
/// to the first instruction must not re-run the hook.
///
/// # Errors
/// Fatal resolution errors propagate; a missing hook slot yields `Ok(None)`.
pub fn plan_prefix(
    image: &mut ModuleImage,
    refs: &mut ReferenceTable,
    wiring: &HookWiring,
    target: &TargetInfo,
    suffix: Option<&str>,
    body: &mut MethodBody,
) -> Result<Option<PrefixPlan>> {
    let anchor = body
        .first_id()
        .ok_or_else(|| malformed_error!("cannot splice an empty body"))?;

    let Some(ctx) = resolve_context(image, refs, wiring, target, suffix, HookRole::Prefix)?
    else {
        return Ok(None);
    };

    let mut alloc = SlotAllocator::new(body);
    let state_slot = alloc.alloc(TypeSig::Bool)?;
    let result_holder = alloc.alloc(TypeSig::Object)?;
    let dummy = alloc.alloc(TypeSig::Object)?;
    let mut holders = Vec::with_capacity(ctx.forwarded);
    for _ in 0..ctx.forwarded {
        holders.push(alloc.alloc(TypeSig::Object)?);
    }

    let mut out = Vec::new();
    emit_param_stash(&mut out, target, &ctx, &holders);
    emit_call_head(&mut out, target, &ctx);
    emit_holder_addresses(&mut out, &ctx, &holders, dummy);
    out.push(locals::load_local_addr(result_holder));
    out.push((OpCode::CallVirt, Operand::Token(ctx.hook_method)));
    out.push(locals::store_local(state_slot));
    emit_param_writeback(&mut out, target, &ctx, &holders);

    // state true -> continue into the original body
    out.push(locals::load_local(state_slot));
    out.push((OpCode::BrTrueS, Operand::Target(anchor)));

    // state false -> short-circuit with the hook-supplied result
    if !target.return_type.is_void() {
        out.push(locals::load_local(result_holder));
        out.extend(conversion_from_object(ctx.return_token, &target.return_type));
    }
    out.push((OpCode::Ret, Operand::None));

    Ok(Some(PrefixPlan {
        site: SpliceSite {
            anchor,
            instructions: out,
            retarget: false,
        },
        state_slot,
    }))
}

/// Plan a postfix splice covering every return instruction of the body.
///
/// One site per exit: the about-to-be-returned value is boxed into the result
/// holder, the hook is called with the re-stashed parameters and the upstream
/// state flag, and the possibly hook-modified result is restored onto the
/// stack before the original return executes. Branches to each return are
/// retargeted at its injected entry so no exit path bypasses the hook.
///
/// `state_slot` is the matching prefix splice's flag; without one the state
/// passed is constant true (the original body ran).
///
/// # Errors
/// Fatal resolution errors propagate; a missing hook slot yields `Ok(None)`.
pub fn plan_postfix(
    image: &mut ModuleImage,
    refs: &mut ReferenceTable,
    wiring: &HookWiring,
    target: &TargetInfo,
    suffix: Option<&str>,
    state_slot: Option<u16>,
    body: &mut MethodBody,
) -> Result<Option<Vec<SpliceSite>>> {
    let exits = body.return_ids();
    if exits.is_empty() {
        return Err(malformed_error!(
            "{}.{} has no return instruction to wrap",
            target.declaring_full_name,
            target.method_name
        ));
    }

    let Some(ctx) = resolve_context(image, refs, wiring, target, suffix, HookRole::Postfix)?
    else {
        return Ok(None);
    };

    let mut alloc = SlotAllocator::new(body);
    let result_holder = alloc.alloc(TypeSig::Object)?;
    let dummy = alloc.alloc(TypeSig::Object)?;
    let mut holders = Vec::with_capacity(ctx.forwarded);
    for _ in 0..ctx.forwarded {
        holders.push(alloc.alloc(TypeSig::Object)?);
    }

    let mut sites = Vec::with_capacity(exits.len());
    for anchor in exits {
        let mut out = Vec::new();

        // capture the value on the stack at this exit
        if !target.return_type.is_void() {
            if let Some(token) = ctx.return_token {
                if target.return_type.is_value_type() {
                    out.push((OpCode::Box, Operand::Token(token)));
                }
            }
            out.push(locals::store_local(result_holder));
        }

        emit_param_stash(&mut out, target, &ctx, &holders);
        emit_call_head(&mut out, target, &ctx);
        emit_holder_addresses(&mut out, &ctx, &holders, dummy);
        match state_slot {
            Some(slot) => out.push(locals::load_local(slot)),
            None => out.push((OpCode::LdcI41, Operand::None)),
        }
        out.push(locals::load_local_addr(result_holder));
        out.push((OpCode::CallVirt, Operand::Token(ctx.hook_method)));

        // restore the possibly hook-modified value for the original ret
        if !target.return_type.is_void() {
            out.push(locals::load_local(result_holder));
            out.extend(conversion_from_object(ctx.return_token, &target.return_type));
        }

        sites.push(SpliceSite {
            anchor,
            instructions: out,
            retarget: true,
        });
    }

    Ok(Some(sites))
}

/// Plan a mid-body marker splice anchored at the instruction loading the given
/// string literal.
///
/// The emitted sequence is a bare notification: router load, marker identity
/// string, marker slot call. The identity is
/// `{DeclaringType}.{MethodName}:{literal}`.
///
/// # Errors
/// Fatal resolution errors propagate. A missing marker slot yields `Ok(None)`;
/// a literal not present in the body is a fatal shape mismatch.
pub fn plan_marker(
    image: &mut ModuleImage,
    refs: &mut ReferenceTable,
    wiring: &HookWiring,
    target: &TargetInfo,
    literal: &str,
    body: &MethodBody,
) -> Result<Option<SpliceSite>> {
    let anchor = body
        .instructions()
        .iter()
        .find(|instr| {
            instr.opcode == OpCode::LdStr
                && matches!(
                    instr.operand,
                    Operand::Token(token) if image.user_string(token).is_ok_and(|s| s == literal)
                )
        })
        .map(|instr| instr.id)
        .ok_or_else(|| Error::MissingReference {
            kind: "marker literal",
            declaring_type: target.declaring_full_name.clone(),
            name: target.method_name.clone(),
        })?;

    let Some(hook_method) = image.find_method(&wiring.container, super::hooks::MARKER_HOOK, None)
    else {
        log::debug!(
            "marker slot {} not present on {}; skipping {}.{}",
            super::hooks::MARKER_HOOK,
            wiring.container,
            target.declaring_full_name,
            target.method_name
        );
        return Ok(None);
    };

    let router_field = refs.resolve_field(image, &wiring.router_type, &wiring.router_field)?;
    let identity = format!(
        "{}.{}:{}",
        target.declaring_full_name, target.method_name, literal
    );
    let name_string = image.add_user_string(&identity);

    Ok(Some(SpliceSite {
        anchor,
        instructions: vec![
            (OpCode::LdSFld, Operand::Token(router_field)),
            (OpCode::LdStr, Operand::Token(name_string)),
            (OpCode::CallVirt, Operand::Token(hook_method)),
        ],
        retarget: true,
    }))
}
