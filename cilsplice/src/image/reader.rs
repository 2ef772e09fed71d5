//! Container deserialization: memory-mapped input, a bounds-checked cursor
//! parser, and the table-by-table load path that rebuilds a [`ModuleImage`]
//! from its wire form.
//!
//! Method bodies come off disk as raw bytecode and are immediately lifted into
//! the id-keyed instruction stream; exception handler ranges are stored as byte
//! offsets on the wire and re-pinned to instruction ids here, so everything
//! downstream of loading is offset-free.

use std::path::Path;

use memmap2::Mmap;

use super::{
    container::{
        FORMAT_VERSION, HANDLER_CATCH, HANDLER_FINALLY, MAGIC, MEMBER_FIELD, MEMBER_METHOD,
        SIG_BOOL, SIG_BYREF, SIG_CLASS, SIG_I4, SIG_I8, SIG_OBJECT, SIG_R8, SIG_STRING,
        SIG_VALUE_TYPE, SIG_VOID,
    },
    AssemblyRef, FieldDef, FieldFlags, MemberKind, MemberRefRow, MemberSig, MethodDef,
    MethodFlags, ModuleImage, Param, TypeDef, TypeFlags, TypeRefRow, TypeSig, Version,
};
use crate::{
    il::{decode, ExceptionHandler, HandlerKind, InstrId, LocalVar, MethodBody},
    token::Token,
    Error, Result,
};

/// Primitive values the cursor parser can read in little-endian order.
pub trait LeValue: Sized {
    /// Encoded size in bytes.
    const SIZE: usize;

    /// Decode from exactly [`Self::SIZE`] bytes.
    fn from_le_slice(bytes: &[u8]) -> Self;
}

macro_rules! impl_le_value {
    ($($ty:ty),*) => {
        $(
            impl LeValue for $ty {
                const SIZE: usize = std::mem::size_of::<$ty>();

                fn from_le_slice(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    <$ty>::from_le_bytes(raw)
                }
            }
        )*
    };
}

impl_le_value!(u8, u16, u32, u64, i8, i32, i64);

/// A cursor-based, bounds-checked binary reader.
///
/// All read operations validate data availability before touching the buffer,
/// so truncated or damaged containers surface as [`Error::OutOfBounds`] instead
/// of panics.
pub struct Parser<'a> {
    /// The binary data being parsed
    data: &'a [u8],
    /// Current position within the data buffer
    position: usize,
}

impl<'a> Parser<'a> {
    /// Create a parser over a byte slice.
    #[must_use]
    pub fn new(data: &'a [u8]) -> Self {
        Parser { data, position: 0 }
    }

    /// Current cursor position.
    #[must_use]
    pub fn pos(&self) -> usize {
        self.position
    }

    /// Whether any bytes remain past the cursor.
    #[must_use]
    pub fn has_more_data(&self) -> bool {
        self.position < self.data.len()
    }

    /// Move the cursor to an absolute position.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if the position is past the end of the data.
    pub fn seek(&mut self, pos: usize) -> Result<()> {
        if pos > self.data.len() {
            return Err(Error::OutOfBounds);
        }
        self.position = pos;
        Ok(())
    }

    /// Read one little-endian primitive and advance the cursor.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if fewer than `T::SIZE` bytes remain.
    pub fn read_le<T: LeValue>(&mut self) -> Result<T> {
        let end = self
            .position
            .checked_add(T::SIZE)
            .ok_or(Error::OutOfBounds)?;
        if end > self.data.len() {
            return Err(Error::OutOfBounds);
        }
        let value = T::from_le_slice(&self.data[self.position..end]);
        self.position = end;
        Ok(value)
    }

    /// Read `len` raw bytes and advance the cursor.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] if fewer than `len` bytes remain.
    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.position.checked_add(len).ok_or(Error::OutOfBounds)?;
        if end > self.data.len() {
            return Err(Error::OutOfBounds);
        }
        let slice = &self.data[self.position..end];
        self.position = end;
        Ok(slice)
    }

    /// Read a `u32`-length-prefixed UTF-8 string.
    ///
    /// # Errors
    /// Returns [`Error::OutOfBounds`] on truncation, or a malformed error if the
    /// bytes are not valid UTF-8.
    pub fn read_prefixed_string_utf8(&mut self) -> Result<String> {
        let len = self.read_le::<u32>()? as usize;
        let bytes = self.read_bytes(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| malformed_error!("invalid UTF-8 string at offset {:#x}", self.position))
    }
}

fn read_version(parser: &mut Parser<'_>) -> Result<Version> {
    let mut parts = [0u16; 4];
    for part in &mut parts {
        *part = parser.read_le::<u16>()?;
    }
    Ok(Version(parts))
}

fn read_type_sig(parser: &mut Parser<'_>) -> Result<TypeSig> {
    let tag = parser.read_le::<u8>()?;
    match tag {
        SIG_VOID => Ok(TypeSig::Void),
        SIG_BOOL => Ok(TypeSig::Bool),
        SIG_I4 => Ok(TypeSig::I4),
        SIG_I8 => Ok(TypeSig::I8),
        SIG_R8 => Ok(TypeSig::R8),
        SIG_STRING => Ok(TypeSig::String),
        SIG_OBJECT => Ok(TypeSig::Object),
        SIG_CLASS => Ok(TypeSig::Class(parser.read_prefixed_string_utf8()?)),
        SIG_VALUE_TYPE => Ok(TypeSig::ValueType(parser.read_prefixed_string_utf8()?)),
        SIG_BYREF => Ok(TypeSig::ByRef(Box::new(read_type_sig(parser)?))),
        _ => Err(malformed_error!("unknown type signature tag {:#04x}", tag)),
    }
}

fn read_token(parser: &mut Parser<'_>) -> Result<Token> {
    let raw = parser.read_le::<u32>()?;
    Token::from_raw(raw).ok_or_else(|| malformed_error!("invalid token {:#010x}", raw))
}

fn read_member_sig(parser: &mut Parser<'_>, kind: MemberKind) -> Result<MemberSig> {
    match kind {
        MemberKind::Field => Ok(MemberSig::Field(read_type_sig(parser)?)),
        MemberKind::Method => {
            let instance = parser.read_le::<u8>()? != 0;
            let ret = read_type_sig(parser)?;
            let count = parser.read_le::<u32>()? as usize;
            let mut params = Vec::with_capacity(count);
            for _ in 0..count {
                params.push(read_type_sig(parser)?);
            }
            Ok(MemberSig::Method {
                instance,
                params,
                ret,
            })
        }
    }
}

/// Map a wire byte offset inside a body to an instruction id, where an offset
/// equal to the code size means "end of body".
fn offset_to_bound(
    offset: u32,
    code_size: u32,
    offsets: &std::collections::HashMap<u32, InstrId>,
) -> Result<Option<InstrId>> {
    if offset == code_size {
        return Ok(None);
    }
    offsets
        .get(&offset)
        .copied()
        .map(Some)
        .ok_or_else(|| malformed_error!("handler boundary {:#x} is not an instruction start", offset))
}

fn read_body(parser: &mut Parser<'_>) -> Result<MethodBody> {
    let mut body = MethodBody::new();
    body.max_stack = parser.read_le::<u16>()?;

    let local_count = parser.read_le::<u32>()? as usize;
    for _ in 0..local_count {
        body.locals.push(LocalVar {
            ty: read_type_sig(parser)?,
        });
    }

    let code_size = parser.read_le::<u32>()?;
    let code = parser.read_bytes(code_size as usize)?;
    let offsets = decode::decode_into(&mut body, code)?;

    let handler_count = parser.read_le::<u32>()? as usize;
    for _ in 0..handler_count {
        let kind = match parser.read_le::<u8>()? {
            HANDLER_CATCH => HandlerKind::Catch,
            HANDLER_FINALLY => HandlerKind::Finally,
            other => return Err(malformed_error!("unknown handler kind {:#04x}", other)),
        };
        let try_start_offset = parser.read_le::<u32>()?;
        let try_end_offset = parser.read_le::<u32>()?;
        let handler_start_offset = parser.read_le::<u32>()?;
        let handler_end_offset = parser.read_le::<u32>()?;
        let catch_raw = parser.read_le::<u32>()?;

        let try_start = offset_to_bound(try_start_offset, code_size, &offsets)?
            .ok_or_else(|| malformed_error!("protected region starts past end of body"))?;
        let handler_start = offset_to_bound(handler_start_offset, code_size, &offsets)?
            .ok_or_else(|| malformed_error!("handler starts past end of body"))?;
        let catch_type = if catch_raw == 0 {
            None
        } else {
            Some(
                Token::from_raw(catch_raw)
                    .ok_or_else(|| malformed_error!("invalid catch type token {:#010x}", catch_raw))?,
            )
        };

        body.exception_handlers.push(ExceptionHandler {
            kind,
            try_start,
            try_end: offset_to_bound(try_end_offset, code_size, &offsets)?,
            handler_start,
            handler_end: offset_to_bound(handler_end_offset, code_size, &offsets)?,
            catch_type,
        });
    }

    Ok(body)
}

impl ModuleImage {
    /// Load a module image from a container file via memory mapping.
    ///
    /// # Errors
    /// Returns [`Error::FileError`] on I/O failure, or a malformed/out-of-bounds
    /// error if the container is damaged.
    pub fn from_file(path: &Path) -> Result<ModuleImage> {
        let file = std::fs::File::open(path)?;
        // Safety: the mapping is read-only and dropped before this function returns
        let mmap = unsafe { Mmap::map(&file)? };
        ModuleImage::from_bytes(&mmap)
    }

    /// Parse a module image from container bytes.
    ///
    /// # Errors
    /// Returns a malformed error for bad magic, an unsupported format version,
    /// or structurally invalid table data; [`Error::OutOfBounds`] for truncation.
    pub fn from_bytes(data: &[u8]) -> Result<ModuleImage> {
        let mut parser = Parser::new(data);

        let magic = parser.read_bytes(4)?;
        if magic != MAGIC {
            return Err(Error::NotSupported);
        }
        let format = parser.read_le::<u16>()?;
        if format != FORMAT_VERSION {
            return Err(malformed_error!(
                "unsupported container format version {}",
                format
            ));
        }

        let name = parser.read_prefixed_string_utf8()?;
        let version = read_version(&mut parser)?;
        let mut image = ModuleImage::new(&name, version);

        let dep_count = parser.read_le::<u32>()? as usize;
        for _ in 0..dep_count {
            let dep_name = parser.read_prefixed_string_utf8()?;
            let dep_version = read_version(&mut parser)?;
            image.assembly_refs.push(AssemblyRef {
                name: dep_name,
                version: dep_version,
            });
        }

        let string_count = parser.read_le::<u32>()? as usize;
        for _ in 0..string_count {
            let value = parser.read_prefixed_string_utf8()?;
            image.user_strings.push(value);
        }

        let type_ref_count = parser.read_le::<u32>()? as usize;
        for _ in 0..type_ref_count {
            image.type_refs.push(TypeRefRow {
                full_name: parser.read_prefixed_string_utf8()?,
                module: parser.read_prefixed_string_utf8()?,
            });
        }

        let member_ref_count = parser.read_le::<u32>()? as usize;
        for _ in 0..member_ref_count {
            let kind = match parser.read_le::<u8>()? {
                MEMBER_METHOD => MemberKind::Method,
                MEMBER_FIELD => MemberKind::Field,
                other => return Err(malformed_error!("unknown member kind {:#04x}", other)),
            };
            let declaring_type = parser.read_prefixed_string_utf8()?;
            let member_name = parser.read_prefixed_string_utf8()?;
            let module = parser.read_prefixed_string_utf8()?;
            let sig = read_member_sig(&mut parser, kind)?;
            image.member_refs.push(MemberRefRow {
                kind,
                declaring_type,
                name: member_name,
                module,
                sig,
            });
        }

        let type_count = parser.read_le::<u32>()? as usize;
        for _ in 0..type_count {
            let full_name = parser.read_prefixed_string_utf8()?;
            let flags = TypeFlags::from_bits_truncate(parser.read_le::<u32>()?);
            image.types.push(TypeDef { full_name, flags });
        }

        let field_count = parser.read_le::<u32>()? as usize;
        for _ in 0..field_count {
            let declaring = read_token(&mut parser)?;
            let field_name = parser.read_prefixed_string_utf8()?;
            let flags = FieldFlags::from_bits_truncate(parser.read_le::<u32>()?);
            let ty = read_type_sig(&mut parser)?;
            image.fields.push(FieldDef {
                declaring,
                name: field_name,
                flags,
                ty,
            });
        }

        let method_count = parser.read_le::<u32>()? as usize;
        for _ in 0..method_count {
            let declaring = read_token(&mut parser)?;
            let method_name = parser.read_prefixed_string_utf8()?;
            let flags = MethodFlags::from_bits_truncate(parser.read_le::<u32>()?);
            let return_type = read_type_sig(&mut parser)?;

            let param_count = parser.read_le::<u32>()? as usize;
            let mut params = Vec::with_capacity(param_count);
            for _ in 0..param_count {
                params.push(Param {
                    name: parser.read_prefixed_string_utf8()?,
                    ty: read_type_sig(&mut parser)?,
                });
            }

            let body = if parser.read_le::<u8>()? != 0 {
                Some(read_body(&mut parser)?)
            } else {
                None
            };

            image.methods.push(MethodDef {
                declaring,
                name: method_name,
                flags,
                params,
                return_type,
                body,
            });
        }

        image.validate()?;
        Ok(image)
    }
}
