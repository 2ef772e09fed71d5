//! The in-memory program image: a mutable graph of types, methods, fields,
//! imported references, and the user-string heap for one module.
//!
//! This is the "well-formed input program representation" the rewriting core
//! operates on. Tables are flat row vectors indexed by [`Token`]s, in the spirit
//! of metadata-table formats: a [`TypeDef`] row carries the type-level facts,
//! while methods and fields are rows of their own tables pointing back at their
//! declaring type.
//!
//! # Lifecycle
//!
//! An image is loaded from a container file (or built programmatically), mutated
//! in place by every splice operation of a rewrite session, and serialized back
//! in one shot - partial output is never written (see [`ModuleImage::write_to_file`]).

mod container;
mod reader;
mod resolver;
mod sig;
mod writer;

pub use reader::Parser;
pub use resolver::ImageResolver;
pub use sig::TypeSig;

use std::fmt;

use bitflags::bitflags;

use crate::{
    il::MethodBody,
    token::{Token, TokenKind},
    Result,
};

/// Four-part assembly version. `0.0.0.0` acts as an "any version" wildcard
/// during dependency resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Version(pub [u16; 4]);

impl Version {
    /// The `0.0.0.0` wildcard.
    pub const ANY: Version = Version([0, 0, 0, 0]);

    /// Build a version from its four components.
    #[must_use]
    pub fn new(major: u16, minor: u16, build: u16, revision: u16) -> Version {
        Version([major, minor, build, revision])
    }

    /// Whether this is the "any version" wildcard.
    #[must_use]
    pub fn is_wildcard(&self) -> bool {
        self.0 == [0, 0, 0, 0]
    }

    /// Whether a candidate image satisfies this requested version.
    #[must_use]
    pub fn matches(&self, candidate: &Version) -> bool {
        self.is_wildcard() || self == candidate
    }

    /// Parse a dotted `a.b.c.d` version string.
    pub fn parse(text: &str) -> Result<Version> {
        let mut parts = [0u16; 4];
        let mut count = 0;
        for piece in text.split('.') {
            if count == 4 {
                return Err(malformed_error!("version {} has too many components", text));
            }
            parts[count] = piece
                .parse()
                .map_err(|_| malformed_error!("invalid version component in {}", text))?;
            count += 1;
        }
        if count != 4 {
            return Err(malformed_error!("version {} needs four components", text));
        }
        Ok(Version(parts))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}.{}", self.0[0], self.0[1], self.0[2], self.0[3])
    }
}

bitflags! {
    /// Attributes of a type definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct TypeFlags: u32 {
        /// Externally visible
        const PUBLIC = 0x0001;
        /// Cannot be derived from
        const SEALED = 0x0002;
        /// Value type semantics (instances are boxed through object surfaces)
        const VALUE_TYPE = 0x0004;
    }
}

bitflags! {
    /// Attributes of a method definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct MethodFlags: u32 {
        /// No implicit receiver; argument slot 0 is the first declared parameter
        const STATIC = 0x0001;
        /// Externally visible
        const PUBLIC = 0x0002;
        /// Dispatched through the vtable
        const VIRTUAL = 0x0004;
        /// Introduces a new vtable slot rather than overriding
        const NEW_SLOT = 0x0008;
    }
}

bitflags! {
    /// Attributes of a field definition.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct FieldFlags: u32 {
        /// Per-module storage rather than per-instance
        const STATIC = 0x0001;
        /// Externally visible
        const PUBLIC = 0x0002;
    }
}

/// A type definition row.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeDef {
    /// Namespace-qualified name, e.g. `Game.Farmer`
    pub full_name: String,
    /// Type attributes
    pub flags: TypeFlags,
}

impl TypeDef {
    /// Whether instances must be boxed to pass through an object-typed surface.
    #[must_use]
    pub fn is_value_type(&self) -> bool {
        self.flags.contains(TypeFlags::VALUE_TYPE)
    }
}

/// One declared parameter of a method.
#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    /// Parameter name (documentation only; not consulted by the rewriter)
    pub name: String,
    /// Declared type
    pub ty: TypeSig,
}

/// A method definition row.
#[derive(Debug, Clone, PartialEq)]
pub struct MethodDef {
    /// Declaring type ([`TokenKind::TypeDef`] token)
    pub declaring: Token,
    /// Method name
    pub name: String,
    /// Method attributes
    pub flags: MethodFlags,
    /// Declared parameters, excluding the implicit receiver
    pub params: Vec<Param>,
    /// Return type ([`TypeSig::Void`] for none)
    pub return_type: TypeSig,
    /// Implementation; `None` for abstract/external methods
    pub body: Option<MethodBody>,
}

impl MethodDef {
    /// Whether the method has no implicit receiver.
    #[must_use]
    pub fn is_static(&self) -> bool {
        self.flags.contains(MethodFlags::STATIC)
    }
}

/// A field definition row.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDef {
    /// Declaring type ([`TokenKind::TypeDef`] token)
    pub declaring: Token,
    /// Field name
    pub name: String,
    /// Field attributes
    pub flags: FieldFlags,
    /// Declared type
    pub ty: TypeSig,
}

/// A declared dependency on another module.
#[derive(Debug, Clone, PartialEq)]
pub struct AssemblyRef {
    /// Module name of the dependency
    pub name: String,
    /// Requested version; [`Version::ANY`] accepts any candidate
    pub version: Version,
}

/// An imported type reference row.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRefRow {
    /// Namespace-qualified type name
    pub full_name: String,
    /// Module the type is defined in
    pub module: String,
}

/// Signature of an imported member, carried so stack arithmetic stays computable
/// for calls through references.
#[derive(Debug, Clone, PartialEq)]
pub enum MemberSig {
    /// Field type
    Field(TypeSig),
    /// Method shape
    Method {
        /// Whether the callee takes an implicit receiver
        instance: bool,
        /// Parameter types
        params: Vec<TypeSig>,
        /// Return type
        ret: TypeSig,
    },
}

/// What kind of member a reference names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MemberKind {
    /// A method
    Method,
    /// A field
    Field,
}

impl MemberKind {
    /// Human-readable kind for diagnostics.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberKind::Method => "method",
            MemberKind::Field => "field",
        }
    }
}

/// An imported member reference row.
#[derive(Debug, Clone, PartialEq)]
pub struct MemberRefRow {
    /// Method or field
    pub kind: MemberKind,
    /// Namespace-qualified declaring type name
    pub declaring_type: String,
    /// Member name
    pub name: String,
    /// Module the member is defined in
    pub module: String,
    /// Signature recorded at first import
    pub sig: MemberSig,
}

/// Row counts for diagnostics and the CLI `info` command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageSummary {
    /// Type definition rows
    pub types: usize,
    /// Method definition rows
    pub methods: usize,
    /// Field definition rows
    pub fields: usize,
    /// Imported type references
    pub type_refs: usize,
    /// Imported member references
    pub member_refs: usize,
    /// User string heap entries
    pub user_strings: usize,
}

/// Disambiguation of overloaded methods when a target is named symbolically.
#[derive(Debug, Clone, Default)]
pub enum MethodSelector {
    /// Accept the first method of the name
    #[default]
    Any,
    /// Require an exact declared parameter count
    ParamCount(usize),
    /// Arbitrary predicate over the method row
    Predicate(fn(&MethodDef) -> bool),
}

impl MethodSelector {
    /// Whether a method row satisfies this selector.
    #[must_use]
    pub fn matches(&self, method: &MethodDef) -> bool {
        match self {
            MethodSelector::Any => true,
            MethodSelector::ParamCount(count) => method.params.len() == *count,
            MethodSelector::Predicate(f) => f(method),
        }
    }
}

/// A mutable program image for one module.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleImage {
    /// Module name (also the stem of its container file name)
    pub name: String,
    /// Assembly version
    pub version: Version,
    /// Declared dependencies
    pub assembly_refs: Vec<AssemblyRef>,
    types: Vec<TypeDef>,
    methods: Vec<MethodDef>,
    fields: Vec<FieldDef>,
    type_refs: Vec<TypeRefRow>,
    member_refs: Vec<MemberRefRow>,
    user_strings: Vec<String>,
}

impl ModuleImage {
    /// Create an empty image.
    #[must_use]
    pub fn new(name: &str, version: Version) -> Self {
        ModuleImage {
            name: name.to_string(),
            version,
            assembly_refs: Vec::new(),
            types: Vec::new(),
            methods: Vec::new(),
            fields: Vec::new(),
            type_refs: Vec::new(),
            member_refs: Vec::new(),
            user_strings: Vec::new(),
        }
    }

    fn row_token(kind: TokenKind, index: usize) -> Token {
        #[allow(clippy::cast_possible_truncation)]
        Token::new(kind, index as u32)
    }

    /// Append a type definition row.
    pub fn add_type(&mut self, full_name: &str, flags: TypeFlags) -> Token {
        self.types.push(TypeDef {
            full_name: full_name.to_string(),
            flags,
        });
        Self::row_token(TokenKind::TypeDef, self.types.len() - 1)
    }

    /// Token of a type definition by full name.
    #[must_use]
    pub fn type_token(&self, full_name: &str) -> Option<Token> {
        self.types
            .iter()
            .position(|t| t.full_name == full_name)
            .map(|index| Self::row_token(TokenKind::TypeDef, index))
    }

    /// Look up a type definition row.
    pub fn type_def(&self, token: Token) -> Result<&TypeDef> {
        self.types
            .get(token.index())
            .filter(|_| token.kind() == TokenKind::TypeDef)
            .ok_or_else(|| malformed_error!("no TypeDef row for {}", token))
    }

    /// All type definition rows.
    #[must_use]
    pub fn types(&self) -> &[TypeDef] {
        &self.types
    }

    /// Append a method definition row.
    pub fn add_method(&mut self, method: MethodDef) -> Token {
        self.methods.push(method);
        Self::row_token(TokenKind::MethodDef, self.methods.len() - 1)
    }

    /// Look up a method definition row.
    pub fn method(&self, token: Token) -> Result<&MethodDef> {
        self.methods
            .get(token.index())
            .filter(|_| token.kind() == TokenKind::MethodDef)
            .ok_or_else(|| malformed_error!("no MethodDef row for {}", token))
    }

    /// Mutable lookup of a method definition row.
    pub fn method_mut(&mut self, token: Token) -> Result<&mut MethodDef> {
        if token.kind() != TokenKind::MethodDef {
            return Err(malformed_error!("{} is not a MethodDef token", token));
        }
        self.methods
            .get_mut(token.index())
            .ok_or_else(|| malformed_error!("no MethodDef row for {}", token))
    }

    /// All method definition rows.
    #[must_use]
    pub fn methods(&self) -> &[MethodDef] {
        &self.methods
    }

    /// Mutable view of all method rows, used by the module-final fix-up pass.
    pub fn methods_mut(&mut self) -> &mut [MethodDef] {
        &mut self.methods
    }

    /// Find a method by declaring type name, method name, and optional
    /// disambiguating predicate (for overloaded targets).
    #[must_use]
    pub fn find_method(
        &self,
        type_full_name: &str,
        method_name: &str,
        filter: Option<fn(&MethodDef) -> bool>,
    ) -> Option<Token> {
        match filter {
            Some(f) => self.find_method_by(type_full_name, method_name, f),
            None => self.find_method_by(type_full_name, method_name, |_| true),
        }
    }

    /// Find a method with an arbitrary disambiguating predicate.
    pub fn find_method_by(
        &self,
        type_full_name: &str,
        method_name: &str,
        filter: impl Fn(&MethodDef) -> bool,
    ) -> Option<Token> {
        let declaring = self.type_token(type_full_name)?;
        self.methods
            .iter()
            .position(|m| m.declaring == declaring && m.name == method_name && filter(m))
            .map(|index| Self::row_token(TokenKind::MethodDef, index))
    }

    /// Append a field definition row.
    pub fn add_field(&mut self, field: FieldDef) -> Token {
        self.fields.push(field);
        Self::row_token(TokenKind::FieldDef, self.fields.len() - 1)
    }

    /// Look up a field definition row.
    pub fn field(&self, token: Token) -> Result<&FieldDef> {
        self.fields
            .get(token.index())
            .filter(|_| token.kind() == TokenKind::FieldDef)
            .ok_or_else(|| malformed_error!("no FieldDef row for {}", token))
    }

    /// All field definition rows.
    #[must_use]
    pub fn fields(&self) -> &[FieldDef] {
        &self.fields
    }

    /// Find a field by declaring type name and field name.
    #[must_use]
    pub fn find_field(&self, type_full_name: &str, field_name: &str) -> Option<Token> {
        let declaring = self.type_token(type_full_name)?;
        self.fields
            .iter()
            .position(|f| f.declaring == declaring && f.name == field_name)
            .map(|index| Self::row_token(TokenKind::FieldDef, index))
    }

    /// Import a type reference, reusing an existing row for the same symbol.
    pub fn add_type_ref(&mut self, row: TypeRefRow) -> Token {
        if let Some(index) = self.type_refs.iter().position(|r| *r == row) {
            return Self::row_token(TokenKind::TypeRef, index);
        }
        self.type_refs.push(row);
        Self::row_token(TokenKind::TypeRef, self.type_refs.len() - 1)
    }

    /// Look up an imported type reference row.
    pub fn type_ref(&self, token: Token) -> Result<&TypeRefRow> {
        self.type_refs
            .get(token.index())
            .filter(|_| token.kind() == TokenKind::TypeRef)
            .ok_or_else(|| malformed_error!("no TypeRef row for {}", token))
    }

    /// Import a member reference, reusing an existing row for the same symbol.
    ///
    /// Identity is keyed on (kind, declaring type, name, module); the signature is
    /// recorded at first import and not part of the key.
    pub fn add_member_ref(&mut self, row: MemberRefRow) -> Token {
        if let Some(index) = self.member_refs.iter().position(|r| {
            r.kind == row.kind
                && r.declaring_type == row.declaring_type
                && r.name == row.name
                && r.module == row.module
        }) {
            return Self::row_token(TokenKind::MemberRef, index);
        }
        self.member_refs.push(row);
        Self::row_token(TokenKind::MemberRef, self.member_refs.len() - 1)
    }

    /// Look up an imported member reference row.
    pub fn member_ref(&self, token: Token) -> Result<&MemberRefRow> {
        self.member_refs
            .get(token.index())
            .filter(|_| token.kind() == TokenKind::MemberRef)
            .ok_or_else(|| malformed_error!("no MemberRef row for {}", token))
    }

    /// All imported member reference rows.
    #[must_use]
    pub fn member_refs(&self) -> &[MemberRefRow] {
        &self.member_refs
    }

    /// Intern a string literal, reusing an existing heap entry for equal values.
    pub fn add_user_string(&mut self, value: &str) -> Token {
        if let Some(index) = self.user_strings.iter().position(|s| s == value) {
            return Self::row_token(TokenKind::UserString, index);
        }
        self.user_strings.push(value.to_string());
        Self::row_token(TokenKind::UserString, self.user_strings.len() - 1)
    }

    /// Look up a string literal by token.
    pub fn user_string(&self, token: Token) -> Result<&str> {
        self.user_strings
            .get(token.index())
            .filter(|_| token.kind() == TokenKind::UserString)
            .map(String::as_str)
            .ok_or_else(|| malformed_error!("no user string for {}", token))
    }

    /// All user string heap entries.
    #[must_use]
    pub fn user_strings(&self) -> &[String] {
        &self.user_strings
    }

    /// Declare a dependency on another module.
    pub fn add_assembly_ref(&mut self, name: &str, version: Version) {
        self.assembly_refs.push(AssemblyRef {
            name: name.to_string(),
            version,
        });
    }

    /// Row counts for diagnostics.
    #[must_use]
    pub fn summary(&self) -> ImageSummary {
        ImageSummary {
            types: self.types.len(),
            methods: self.methods.len(),
            fields: self.fields.len(),
            type_refs: self.type_refs.len(),
            member_refs: self.member_refs.len(),
            user_strings: self.user_strings.len(),
        }
    }

    /// Validate the structural invariants of every method body.
    pub fn validate(&self) -> Result<()> {
        for method in &self.methods {
            if let Some(body) = &method.body {
                body.validate().map_err(|e| {
                    crate::Error::Error(format!(
                        "invalid body in {}::{}: {e}",
                        self.type_def(method.declaring)
                            .map(|t| t.full_name.clone())
                            .unwrap_or_default(),
                        method.name
                    ))
                })?;
            }
        }
        Ok(())
    }
}
