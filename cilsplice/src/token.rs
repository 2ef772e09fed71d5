//! Metadata tokens: compact references to rows of a module's tables.
//!
//! A [`Token`] packs a table kind into the top byte and a zero-based row index into the
//! lower three bytes, so instruction operands and cross-references fit in a single `u32`
//! when serialized.

use std::fmt;

/// Identifies which table (or heap) a [`Token`] indexes into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TokenKind {
    /// Type definition row in the current module
    TypeDef = 0x02,
    /// Field definition row in the current module
    FieldDef = 0x04,
    /// Method definition row in the current module
    MethodDef = 0x06,
    /// Imported type reference row
    TypeRef = 0x01,
    /// Imported member (method or field) reference row
    MemberRef = 0x0A,
    /// User string heap entry
    UserString = 0x70,
}

impl TokenKind {
    /// Decode a kind from the top byte of a raw token value.
    pub fn from_byte(value: u8) -> Option<TokenKind> {
        match value {
            0x02 => Some(TokenKind::TypeDef),
            0x04 => Some(TokenKind::FieldDef),
            0x06 => Some(TokenKind::MethodDef),
            0x01 => Some(TokenKind::TypeRef),
            0x0A => Some(TokenKind::MemberRef),
            0x70 => Some(TokenKind::UserString),
            _ => None,
        }
    }
}

/// A packed table reference: kind in the top byte, row index in the lower 24 bits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Token(u32);

impl Token {
    /// Build a token from a kind and a zero-based row index.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not fit in 24 bits; table growth is bounded far below
    /// that in practice.
    #[must_use]
    pub fn new(kind: TokenKind, index: u32) -> Token {
        assert!(index <= 0x00FF_FFFF, "token row index exceeds 24 bits");
        Token(((kind as u32) << 24) | index)
    }

    /// Reconstruct a token from its raw serialized value.
    pub fn from_raw(value: u32) -> Option<Token> {
        #[allow(clippy::cast_possible_truncation)]
        TokenKind::from_byte((value >> 24) as u8).map(|_| Token(value))
    }

    /// The raw `u32` as written to disk.
    #[must_use]
    pub fn raw(&self) -> u32 {
        self.0
    }

    /// The table this token indexes.
    #[must_use]
    pub fn kind(&self) -> TokenKind {
        #[allow(clippy::cast_possible_truncation)]
        TokenKind::from_byte((self.0 >> 24) as u8).expect("token constructed with valid kind")
    }

    /// Zero-based row index within the table.
    #[must_use]
    pub fn index(&self) -> usize {
        (self.0 & 0x00FF_FFFF) as usize
    }

    /// Shorthand for a [`TokenKind::TypeDef`] token.
    #[must_use]
    pub fn type_def(index: u32) -> Token {
        Token::new(TokenKind::TypeDef, index)
    }

    /// Shorthand for a [`TokenKind::MethodDef`] token.
    #[must_use]
    pub fn method_def(index: u32) -> Token {
        Token::new(TokenKind::MethodDef, index)
    }

    /// Shorthand for a [`TokenKind::FieldDef`] token.
    #[must_use]
    pub fn field_def(index: u32) -> Token {
        Token::new(TokenKind::FieldDef, index)
    }

    /// Shorthand for a [`TokenKind::TypeRef`] token.
    #[must_use]
    pub fn type_ref(index: u32) -> Token {
        Token::new(TokenKind::TypeRef, index)
    }

    /// Shorthand for a [`TokenKind::MemberRef`] token.
    #[must_use]
    pub fn member_ref(index: u32) -> Token {
        Token::new(TokenKind::MemberRef, index)
    }

    /// Shorthand for a [`TokenKind::UserString`] token.
    #[must_use]
    pub fn user_string(index: u32) -> Token {
        Token::new(TokenKind::UserString, index)
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:08X}", self.0)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Token({:?}, {})", self.kind(), self.index())
    }
}
