//! Structural splice properties: exit coverage, idempotent hook definition,
//! reference identity, and branch-reach repair across a write/reload cycle.

use cilsplice::{
    image::{MethodDef, MethodFlags, Param, TypeFlags},
    prelude::*,
    Result,
};

fn wiring() -> HookWiring {
    HookWiring {
        container: "Loader.Hooks".to_string(),
        router_type: "Game.Core".to_string(),
        router_field: "hooks".to_string(),
    }
}

/// `int pick(int x)` with exactly `exits` return instructions: one early
/// return per compared constant, plus the fall-through return.
fn method_with_exits(exits: usize) -> MethodBody {
    let mut body = MethodBody::new();
    let mut compares = Vec::new();
    for i in 0..exits - 1 {
        body.push(OpCode::LdArg0, Operand::None);
        body.push(OpCode::LdcI4S, Operand::Int32(i as i32));
        // placeholder; becomes a beq.s once its target block exists
        compares.push(body.push(OpCode::Nop, Operand::None));
    }
    body.push(OpCode::LdcI4S, Operand::Int32(99));
    body.push(OpCode::Ret, Operand::None);
    for (i, compare) in compares.into_iter().enumerate() {
        let target = body.push(OpCode::LdcI4S, Operand::Int32((i * 10) as i32));
        body.push(OpCode::Ret, Operand::None);
        body.replace(compare, OpCode::BeqS, Operand::Target(target))
            .unwrap();
    }
    body
}

fn image_with_method(name: &str, body: MethodBody) -> ModuleImage {
    let mut image = ModuleImage::new("Game", Version::new(1, 0, 0, 0));
    let declaring = image.add_type("Game.Menu", TypeFlags::PUBLIC);
    image.add_method(MethodDef {
        declaring,
        name: name.to_string(),
        flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
        params: vec![Param {
            name: "x".to_string(),
            ty: TypeSig::I4,
        }],
        return_type: TypeSig::I4,
        body: Some(body),
    });
    image
}

fn splice_spec(method: &str, prefix: bool, postfix: bool) -> SpliceSpec {
    SpliceSpec {
        target_type: "Game.Menu".to_string(),
        method_name: method.to_string(),
        selector: MethodSelector::Any,
        suffix: None,
        prefix,
        postfix,
    }
}

fn opcode_count(image: &ModuleImage, method: &str, opcode: OpCode) -> usize {
    let token = image.find_method("Game.Menu", method, None).unwrap();
    image
        .method(token)
        .unwrap()
        .body
        .as_ref()
        .unwrap()
        .instructions()
        .iter()
        .filter(|i| i.opcode == opcode)
        .count()
}

#[test]
fn test_postfix_covers_every_exit() -> Result<()> {
    for exits in [1usize, 2, 5] {
        let image = image_with_method("pick", method_with_exits(exits));
        let mut session = RewriteSession::new(image, wiring());
        session.install_hook_container()?;
        session.splice(&splice_spec("pick", false, true))?;
        let image = session.finish()?;

        // one hook call in front of each of the original returns, no extras
        assert_eq!(opcode_count(&image, "pick", OpCode::CallVirt), exits);
        assert_eq!(opcode_count(&image, "pick", OpCode::Ret), exits);
        image.write()?;
    }
    Ok(())
}

#[test]
fn test_hook_container_install_is_idempotent() -> Result<()> {
    let image = image_with_method("pick", method_with_exits(2));
    let mut session = RewriteSession::new(image, wiring());
    session.install_hook_container()?;
    session.install_hook_container()?;
    let image = session.finish()?;

    let container = image.type_token("Loader.Hooks").unwrap();
    let slots = image
        .methods()
        .iter()
        .filter(|m| m.declaring == container)
        .count();
    // eight family slots plus the marker slot, defined exactly once
    assert_eq!(slots, 9);
    Ok(())
}

#[test]
fn test_reference_identity_is_stable_across_splices() -> Result<()> {
    let mut image = image_with_method("pick", method_with_exits(2));
    let declaring = image.type_token("Game.Menu").unwrap();
    image.add_method(MethodDef {
        declaring,
        name: "other".to_string(),
        flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
        params: vec![Param {
            name: "x".to_string(),
            ty: TypeSig::I4,
        }],
        return_type: TypeSig::I4,
        body: Some(method_with_exits(1)),
    });

    let mut session = RewriteSession::new(image, wiring());
    session.install_hook_container()?;
    session.splice(&splice_spec("pick", true, false))?;
    session.splice(&splice_spec("other", true, false))?;
    let image = session.finish()?;

    let field_ops = |method: &str| -> Vec<Token> {
        let token = image.find_method("Game.Menu", method, None).unwrap();
        image
            .method(token)
            .unwrap()
            .body
            .as_ref()
            .unwrap()
            .instructions()
            .iter()
            .filter(|i| i.opcode == OpCode::LdSFld)
            .filter_map(|i| match i.operand {
                Operand::Token(t) => Some(t),
                _ => None,
            })
            .collect()
    };
    let pick_fields = field_ops("pick");
    let other_fields = field_ops("other");
    assert_eq!(pick_fields.len(), 1);
    // both splices resolved the router field to the very same token
    assert_eq!(pick_fields, other_fields);
    Ok(())
}

#[test]
fn test_branch_reach_survives_write_and_reload() -> Result<()> {
    // `brfalse.s` jumps over an early-return block and a run of nops; the
    // postfix sequence in front of that return pushes the target out of the
    // eight-bit window, so the branch must come back long-form
    let mut body = MethodBody::new();
    body.push(OpCode::LdArg0, Operand::None);
    let jump = body.push(OpCode::Nop, Operand::None);
    body.push(OpCode::LdcI41, Operand::None);
    body.push(OpCode::Ret, Operand::None);
    for _ in 0..90 {
        body.push(OpCode::Nop, Operand::None);
    }
    let tail = body.push(OpCode::LdcI40, Operand::None);
    body.push(OpCode::Ret, Operand::None);
    body.replace(jump, OpCode::BrFalseS, Operand::Target(tail))?;

    let image = image_with_method("gate", body);
    let mut session = RewriteSession::new(image, wiring());
    session.install_hook_container()?;
    session.splice(&splice_spec("gate", false, true))?;
    let image = session.finish()?;

    assert_eq!(opcode_count(&image, "gate", OpCode::BrFalse), 1);
    assert_eq!(opcode_count(&image, "gate", OpCode::BrFalseS), 0);

    let path = std::env::temp_dir().join("cilsplice-reach-roundtrip.cilm");
    image.write_to_file(&path)?;
    let reloaded = ModuleImage::from_file(&path);
    let _ = std::fs::remove_file(&path);
    let reloaded = reloaded?;

    assert_eq!(opcode_count(&reloaded, "gate", OpCode::BrFalse), 1);
    assert_eq!(
        opcode_count(&image, "gate", OpCode::Ret),
        opcode_count(&reloaded, "gate", OpCode::Ret)
    );
    Ok(())
}
