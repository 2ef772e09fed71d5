//! One rewrite session over one module image.
//!
//! A session owns the image and applies splices sequentially, one target
//! method at a time. Within a method the prefix splice runs before the
//! postfix splice, and the postfix exit snapshot is taken after the prefix is
//! in place, so the prefix's short-circuit return is wrapped like every other
//! exit. The short/long branch fix-up runs once at the end of the session,
//! and output reaches disk only after every splice has succeeded - the unit
//! of failure is the whole session.

use std::path::Path;

use crate::{
    il::MethodBody,
    image::{FieldDef, FieldFlags, ImageSummary, ModuleImage, TypeFlags, TypeSig},
    rewrite::{
        fixup, hooks,
        planner::{self, HookWiring, MarkerSpec, SpliceSpec, SpliceSite, TargetInfo},
        references::ReferenceTable,
        splicer,
    },
    token::Token,
    Result,
};

/// Owns an image for the duration of a rewrite pass.
pub struct RewriteSession {
    image: ModuleImage,
    refs: ReferenceTable,
    wiring: HookWiring,
}

fn apply_site(body: &mut MethodBody, site: SpliceSite) -> Result<()> {
    let anchor = site.anchor;
    let retarget = site.retarget;
    let ids = splicer::insert_before(body, anchor, site.instructions)?;
    if retarget {
        if let Some(&entry) = ids.first() {
            splicer::retarget_branches(body, anchor, entry);
        }
    }
    Ok(())
}

impl RewriteSession {
    /// Start a session over an already loaded image.
    #[must_use]
    pub fn new(image: ModuleImage, wiring: HookWiring) -> Self {
        RewriteSession {
            image,
            refs: ReferenceTable::new(),
            wiring,
        }
    }

    /// Load the image at `path` and start a session over it.
    ///
    /// # Errors
    /// Propagates load and parse errors.
    pub fn open(path: &Path, wiring: HookWiring) -> Result<Self> {
        Ok(RewriteSession::new(ModuleImage::from_file(path)?, wiring))
    }

    /// The image in its current rewritten state.
    #[must_use]
    pub fn image(&self) -> &ModuleImage {
        &self.image
    }

    /// Row counts of the current image.
    #[must_use]
    pub fn summary(&self) -> ImageSummary {
        self.image.summary()
    }

    /// Ensure the hook container type, the router field, and the full slot
    /// catalog exist on the image. Safe to call on an already prepared image;
    /// existing slots are left untouched.
    ///
    /// # Errors
    /// Propagates slot synthesis errors.
    pub fn install_hook_container(&mut self) -> Result<()> {
        if self.image.type_token(&self.wiring.container).is_none() {
            self.image.add_type(&self.wiring.container, TypeFlags::PUBLIC);
        }
        let router_declaring = match self.image.type_token(&self.wiring.router_type) {
            Some(token) => token,
            None => self.image.add_type(&self.wiring.router_type, TypeFlags::PUBLIC),
        };
        if self
            .image
            .find_field(&self.wiring.router_type, &self.wiring.router_field)
            .is_none()
        {
            self.image.add_field(FieldDef {
                declaring: router_declaring,
                name: self.wiring.router_field.clone(),
                flags: FieldFlags::STATIC | FieldFlags::PUBLIC,
                ty: TypeSig::Class(self.wiring.container.clone()),
            });
        }

        for family in hooks::catalog() {
            let (params, ret) = family.signature();
            hooks::define_hook(
                &mut self.image,
                &self.wiring.container,
                &family.name(),
                params,
                ret,
            )?;
        }
        let (params, ret) = hooks::marker_signature();
        hooks::define_hook(
            &mut self.image,
            &self.wiring.container,
            hooks::MARKER_HOOK,
            params,
            ret,
        )?;
        Ok(())
    }

    fn target_info(&self, token: Token) -> Result<TargetInfo> {
        let method = self.image.method(token)?;
        let declaring = self.image.type_def(method.declaring)?;
        Ok(TargetInfo {
            declaring_full_name: declaring.full_name.clone(),
            method_name: method.name.clone(),
            is_static: method.is_static(),
            declaring_is_value_type: declaring.is_value_type(),
            param_types: method.params.iter().map(|p| p.ty.clone()).collect(),
            return_type: method.return_type.clone(),
        })
    }

    fn take_body(&mut self, token: Token, target: &TargetInfo) -> Result<MethodBody> {
        self.image
            .method_mut(token)?
            .body
            .take()
            .ok_or_else(|| {
                malformed_error!(
                    "{}.{} has no body to splice",
                    target.declaring_full_name,
                    target.method_name
                )
            })
    }

    /// Apply prefix and/or postfix splices to one target method.
    ///
    /// A missing target method is fatal for the session; a missing hook slot
    /// skips that splice and leaves the method untouched by it.
    ///
    /// # Errors
    /// Propagates fatal resolution and planning errors.
    pub fn splice(&mut self, spec: &SpliceSpec) -> Result<()> {
        let token = self.refs.resolve_method(
            &self.image,
            &spec.target_type,
            &spec.method_name,
            &spec.selector,
        )?;
        let target = self.target_info(token)?;
        let mut body = self.take_body(token, &target)?;
        let suffix = spec.suffix.as_deref();

        let result = (|| -> Result<()> {
            let mut state_slot = None;
            if spec.prefix {
                if let Some(plan) = planner::plan_prefix(
                    &mut self.image,
                    &mut self.refs,
                    &self.wiring,
                    &target,
                    suffix,
                    &mut body,
                )? {
                    state_slot = Some(plan.state_slot);
                    apply_site(&mut body, plan.site)?;
                }
            }
            if spec.postfix {
                // exits are snapshotted now, after the prefix splice, so its
                // short-circuit return is wrapped too
                if let Some(sites) = planner::plan_postfix(
                    &mut self.image,
                    &mut self.refs,
                    &self.wiring,
                    &target,
                    suffix,
                    state_slot,
                    &mut body,
                )? {
                    for site in sites {
                        apply_site(&mut body, site)?;
                    }
                }
            }
            Ok(())
        })();

        self.image.method_mut(token)?.body = Some(body);
        result
    }

    /// Apply a mid-body marker splice to one target method.
    ///
    /// # Errors
    /// Propagates fatal resolution errors, including a marker literal absent
    /// from the target body.
    pub fn splice_marker(&mut self, spec: &MarkerSpec) -> Result<()> {
        let token = self.refs.resolve_method(
            &self.image,
            &spec.target_type,
            &spec.method_name,
            &spec.selector,
        )?;
        let target = self.target_info(token)?;
        let mut body = self.take_body(token, &target)?;

        let result = planner::plan_marker(
            &mut self.image,
            &mut self.refs,
            &self.wiring,
            &target,
            &spec.literal,
            &body,
        )
        .and_then(|plan| match plan {
            Some(site) => apply_site(&mut body, site),
            None => Ok(()),
        });

        self.image.method_mut(token)?.body = Some(body);
        result
    }

    /// Run the module-final branch fix-up and validation, consuming the
    /// session.
    ///
    /// # Errors
    /// Propagates fix-up and validation failures.
    pub fn finish(mut self) -> Result<ModuleImage> {
        fixup::run(&mut self.image)?;
        self.image.validate()?;
        Ok(self.image)
    }

    /// Finish the session and atomically write the rewritten image to `path`.
    ///
    /// # Errors
    /// Propagates fix-up, validation, serialization, and I/O failures; on any
    /// of them the destination file keeps its previous contents.
    pub fn commit(self, path: &Path) -> Result<()> {
        self.finish()?.write_to_file(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        il::{OpCode, Operand},
        image::{MethodDef, MethodFlags, MethodSelector, Param, Version},
    };

    fn wiring() -> HookWiring {
        HookWiring {
            container: "Loader.Hooks".to_string(),
            router_type: "Game.Core".to_string(),
            router_field: "hooks".to_string(),
        }
    }

    /// `int doubleIt(int x)` -> `x + x`, a single exit.
    fn sample_image() -> ModuleImage {
        let mut image = ModuleImage::new("Game", Version::new(1, 0, 0, 0));
        let declaring = image.add_type("Game.Farmer", TypeFlags::PUBLIC);

        let mut body = MethodBody::new();
        body.push(OpCode::LdArg0, Operand::None);
        body.push(OpCode::LdArg0, Operand::None);
        body.push(OpCode::Add, Operand::None);
        body.push(OpCode::Ret, Operand::None);
        image.add_method(MethodDef {
            declaring,
            name: "doubleIt".to_string(),
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

    fn hook_calls(image: &ModuleImage, type_name: &str, method: &str) -> usize {
        let token = image.find_method(type_name, method, None).unwrap();
        image
            .method(token)
            .unwrap()
            .body
            .as_ref()
            .unwrap()
            .instructions()
            .iter()
            .filter(|i| i.opcode == OpCode::CallVirt)
            .count()
    }

    #[test]
    fn test_prefix_and_postfix_wrap_single_exit() {
        let mut session = RewriteSession::new(sample_image(), wiring());
        session.install_hook_container().unwrap();
        session
            .splice(&SpliceSpec {
                target_type: "Game.Farmer".to_string(),
                method_name: "doubleIt".to_string(),
                selector: MethodSelector::Any,
                suffix: None,
                prefix: true,
                postfix: true,
            })
            .unwrap();

        let image = session.finish().unwrap();
        // one prefix call plus one postfix call per exit; the prefix splice
        // added a short-circuit exit, so the original single ret becomes two
        assert_eq!(hook_calls(&image, "Game.Farmer", "doubleIt"), 3);
        // the rewrite survives serialization and stack simulation
        assert!(image.write().is_ok());
    }

    #[test]
    fn test_missing_target_method_is_fatal() {
        let mut session = RewriteSession::new(sample_image(), wiring());
        session.install_hook_container().unwrap();
        assert!(matches!(
            session.splice(&SpliceSpec {
                target_type: "Game.Farmer".to_string(),
                method_name: "renamedInUpdate".to_string(),
                selector: MethodSelector::Any,
                suffix: None,
                prefix: true,
                postfix: false,
            }),
            Err(crate::Error::MissingReference { .. })
        ));
    }

    #[test]
    fn test_missing_hook_slot_skips_silently() {
        // no install_hook_container, but the router field must exist
        let mut image = sample_image();
        let core = image.add_type("Game.Core", TypeFlags::PUBLIC);
        image.add_type("Loader.Hooks", TypeFlags::PUBLIC);
        image.add_field(FieldDef {
            declaring: core,
            name: "hooks".to_string(),
            flags: FieldFlags::STATIC | FieldFlags::PUBLIC,
            ty: TypeSig::Class("Loader.Hooks".to_string()),
        });

        let mut session = RewriteSession::new(image, wiring());
        session
            .splice(&SpliceSpec {
                target_type: "Game.Farmer".to_string(),
                method_name: "doubleIt".to_string(),
                selector: MethodSelector::Any,
                suffix: None,
                prefix: true,
                postfix: true,
            })
            .unwrap();

        let image = session.finish().unwrap();
        assert_eq!(hook_calls(&image, "Game.Farmer", "doubleIt"), 0);
    }

    #[test]
    fn test_marker_splice_anchors_on_literal() {
        let mut image = ModuleImage::new("Game", Version::new(1, 0, 0, 0));
        let declaring = image.add_type("Game.Clock", TypeFlags::PUBLIC);
        let literal = image.add_user_string("day rollover");

        let mut body = MethodBody::new();
        body.push(OpCode::Nop, Operand::None);
        body.push(OpCode::LdStr, Operand::Token(literal));
        body.push(OpCode::Pop, Operand::None);
        body.push(OpCode::Ret, Operand::None);
        image.add_method(MethodDef {
            declaring,
            name: "tick".to_string(),
            flags: MethodFlags::PUBLIC | MethodFlags::STATIC,
            params: Vec::new(),
            return_type: TypeSig::Void,
            body: Some(body),
        });

        let mut session = RewriteSession::new(image, wiring());
        session.install_hook_container().unwrap();
        session
            .splice_marker(&MarkerSpec {
                target_type: "Game.Clock".to_string(),
                method_name: "tick".to_string(),
                selector: MethodSelector::Any,
                literal: "day rollover".to_string(),
            })
            .unwrap();

        let image = session.finish().unwrap();
        assert_eq!(hook_calls(&image, "Game.Clock", "tick"), 1);
        // the marker identity string was interned
        assert!(image
            .user_strings()
            .iter()
            .any(|s| s == "Game.Clock.tick:day rollover"));
    }
}
