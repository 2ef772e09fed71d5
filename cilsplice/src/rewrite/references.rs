//! Name-to-token resolution with memoization.
//!
//! Every splice names its targets symbolically (type, method, field names);
//! this table turns those names into tokens against a concrete [`ModuleImage`],
//! importing reference rows for symbols that live in other modules. Lookups are
//! memoized, which doubles as the identity guarantee: resolving the same symbol
//! twice always yields the same token, so repeated splices share reference rows
//! instead of duplicating them.
//!
//! A failed resolution is the version-mismatch signal. It means the image no
//! longer has the member the rewrite plan expects, and the session must abort
//! before writing anything.

use std::collections::HashMap;

use crate::{
    image::{
        MemberKind, MemberRefRow, MemberSig, MethodSelector, ModuleImage, TypeRefRow, TypeSig,
    },
    token::Token,
    Error, Result,
};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum RefKey {
    Type {
        full_name: String,
    },
    Member {
        kind: MemberKind,
        declaring: String,
        name: String,
    },
}

/// Memoizing symbolic-name resolver over one module image.
#[derive(Debug, Default)]
pub struct ReferenceTable {
    cache: HashMap<RefKey, Token>,
}

impl ReferenceTable {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        ReferenceTable::default()
    }

    /// Resolve a type defined in this image.
    ///
    /// # Errors
    /// Returns [`Error::MissingReference`] if no such type definition exists.
    pub fn resolve_type(&mut self, image: &ModuleImage, full_name: &str) -> Result<Token> {
        let key = RefKey::Type {
            full_name: full_name.to_string(),
        };
        if let Some(&token) = self.cache.get(&key) {
            return Ok(token);
        }
        let token = image
            .type_token(full_name)
            .ok_or_else(|| Error::MissingReference {
                kind: "type",
                declaring_type: full_name.to_string(),
                name: String::new(),
            })?;
        self.cache.insert(key, token);
        Ok(token)
    }

    /// Resolve a method defined in this image, disambiguating overloads with
    /// the selector.
    ///
    /// Only unselective lookups are memoized; a selector is part of the query.
    ///
    /// # Errors
    /// Returns [`Error::MissingReference`] if no matching method exists.
    pub fn resolve_method(
        &mut self,
        image: &ModuleImage,
        type_full_name: &str,
        method_name: &str,
        selector: &MethodSelector,
    ) -> Result<Token> {
        let unselective = matches!(selector, MethodSelector::Any);
        let key = RefKey::Member {
            kind: MemberKind::Method,
            declaring: type_full_name.to_string(),
            name: method_name.to_string(),
        };
        if unselective {
            if let Some(&token) = self.cache.get(&key) {
                return Ok(token);
            }
        }
        let token = image
            .find_method_by(type_full_name, method_name, |m| selector.matches(m))
            .ok_or_else(|| Error::MissingReference {
                kind: "method",
                declaring_type: type_full_name.to_string(),
                name: method_name.to_string(),
            })?;
        if unselective {
            self.cache.insert(key, token);
        }
        Ok(token)
    }

    /// Resolve a field defined in this image.
    ///
    /// # Errors
    /// Returns [`Error::MissingReference`] if no such field exists.
    pub fn resolve_field(
        &mut self,
        image: &ModuleImage,
        type_full_name: &str,
        field_name: &str,
    ) -> Result<Token> {
        let key = RefKey::Member {
            kind: MemberKind::Field,
            declaring: type_full_name.to_string(),
            name: field_name.to_string(),
        };
        if let Some(&token) = self.cache.get(&key) {
            return Ok(token);
        }
        let token = image
            .find_field(type_full_name, field_name)
            .ok_or_else(|| Error::MissingReference {
                kind: "field",
                declaring_type: type_full_name.to_string(),
                name: field_name.to_string(),
            })?;
        self.cache.insert(key, token);
        Ok(token)
    }

    /// Import a type from another module, creating (or reusing) its reference row.
    pub fn import_type(
        &mut self,
        image: &mut ModuleImage,
        full_name: &str,
        module: &str,
    ) -> Token {
        let key = RefKey::Type {
            full_name: full_name.to_string(),
        };
        if let Some(&token) = self.cache.get(&key) {
            return token;
        }
        let token = image.add_type_ref(TypeRefRow {
            full_name: full_name.to_string(),
            module: module.to_string(),
        });
        self.cache.insert(key, token);
        token
    }

    /// Import a member from another module, creating (or reusing) its reference
    /// row with the given signature.
    pub fn import_member(
        &mut self,
        image: &mut ModuleImage,
        kind: MemberKind,
        declaring_type: &str,
        name: &str,
        module: &str,
        sig: MemberSig,
    ) -> Token {
        let key = RefKey::Member {
            kind,
            declaring: declaring_type.to_string(),
            name: name.to_string(),
        };
        if let Some(&token) = self.cache.get(&key) {
            return token;
        }
        let token = image.add_member_ref(MemberRefRow {
            kind,
            declaring_type: declaring_type.to_string(),
            name: name.to_string(),
            module: module.to_string(),
            sig,
        });
        self.cache.insert(key, token);
        token
    }

    /// Token for the runtime type of a signature, as needed by box and cast
    /// instructions. Primitives resolve against the core library; named types
    /// must be defined in the image itself.
    ///
    /// # Errors
    /// Returns [`Error::MissingReference`] for a named type the image does not
    /// define, and a malformed error for signatures with no runtime type.
    pub fn type_token_for(&mut self, image: &mut ModuleImage, ty: &TypeSig) -> Result<Token> {
        match ty {
            TypeSig::Class(name) | TypeSig::ValueType(name) => {
                let name = name.clone();
                self.resolve_type(image, &name)
            }
            TypeSig::Bool
            | TypeSig::I4
            | TypeSig::I8
            | TypeSig::R8
            | TypeSig::String
            | TypeSig::Object => {
                let full_name = ty.full_name().to_string();
                if let Ok(token) = self.resolve_type(image, &full_name) {
                    return Ok(token);
                }
                Ok(self.import_type(image, &full_name, "corlib"))
            }
            TypeSig::Void | TypeSig::ByRef(_) => Err(malformed_error!(
                "type {} has no boxable runtime type",
                ty
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{TypeFlags, Version};

    #[test]
    fn test_missing_method_is_fatal_resolution_error() {
        let mut image = ModuleImage::new("Game", Version::new(1, 0, 0, 0));
        image.add_type("Game.Farmer", TypeFlags::PUBLIC);
        let mut refs = ReferenceTable::new();

        let err = refs
            .resolve_method(&image, "Game.Farmer", "removedInUpdate", &MethodSelector::Any)
            .unwrap_err();
        match err {
            Error::MissingReference {
                kind,
                declaring_type,
                name,
            } => {
                assert_eq!(kind, "method");
                assert_eq!(declaring_type, "Game.Farmer");
                assert_eq!(name, "removedInUpdate");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_import_is_identity_stable() {
        let mut image = ModuleImage::new("Game", Version::new(1, 0, 0, 0));
        let mut refs = ReferenceTable::new();

        let first = refs.import_member(
            &mut image,
            MemberKind::Method,
            "Loader.Hooks",
            "OnCommonPrefix4",
            "Loader",
            MemberSig::Method {
                instance: true,
                params: vec![TypeSig::String],
                ret: TypeSig::Bool,
            },
        );
        let second = refs.import_member(
            &mut image,
            MemberKind::Method,
            "Loader.Hooks",
            "OnCommonPrefix4",
            "Loader",
            MemberSig::Method {
                instance: true,
                params: vec![TypeSig::String],
                ret: TypeSig::Bool,
            },
        );
        assert_eq!(first, second);
        assert_eq!(image.member_refs().len(), 1);
    }

    #[test]
    fn test_primitive_box_type_imported_from_corlib() {
        let mut image = ModuleImage::new("Game", Version::new(1, 0, 0, 0));
        let mut refs = ReferenceTable::new();

        let token = refs.type_token_for(&mut image, &TypeSig::I4).unwrap();
        let row = image.type_ref(token).unwrap();
        assert_eq!(row.full_name, "System.Int32");
        assert_eq!(row.module, "corlib");

        // second ask reuses the row
        let again = refs.type_token_for(&mut image, &TypeSig::I4).unwrap();
        assert_eq!(token, again);
    }
}
