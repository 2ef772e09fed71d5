//! Container serialization: table-by-table encoding of a [`ModuleImage`] and
//! the atomic file write path.
//!
//! Serialization is all-or-nothing. The whole container is produced in memory
//! first - every body validated, its stack bound recomputed, its exception
//! handler ranges re-derived from the final instruction layout - and only then
//! written to a temporary file that is renamed over the destination. A crash or
//! validation failure at any point leaves the original file untouched.

use std::{io::Write, path::Path};

use super::{
    container::{
        FORMAT_VERSION, HANDLER_CATCH, HANDLER_FINALLY, MAGIC, MEMBER_FIELD, MEMBER_METHOD,
        SIG_BOOL, SIG_BYREF, SIG_CLASS, SIG_I4, SIG_I8, SIG_OBJECT, SIG_R8, SIG_STRING,
        SIG_VALUE_TYPE, SIG_VOID,
    },
    MemberKind, MemberSig, ModuleImage, TypeSig, Version,
};
use crate::{
    il::{encode, HandlerKind, InstrId, MethodBody},
    Result,
};

fn write_prefixed_string(out: &mut Vec<u8>, value: &str) {
    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(value.len() as u32).to_le_bytes());
    out.extend_from_slice(value.as_bytes());
}

fn write_version(out: &mut Vec<u8>, version: &Version) {
    for part in version.0 {
        out.extend_from_slice(&part.to_le_bytes());
    }
}

fn write_type_sig(out: &mut Vec<u8>, sig: &TypeSig) {
    match sig {
        TypeSig::Void => out.push(SIG_VOID),
        TypeSig::Bool => out.push(SIG_BOOL),
        TypeSig::I4 => out.push(SIG_I4),
        TypeSig::I8 => out.push(SIG_I8),
        TypeSig::R8 => out.push(SIG_R8),
        TypeSig::String => out.push(SIG_STRING),
        TypeSig::Object => out.push(SIG_OBJECT),
        TypeSig::Class(name) => {
            out.push(SIG_CLASS);
            write_prefixed_string(out, name);
        }
        TypeSig::ValueType(name) => {
            out.push(SIG_VALUE_TYPE);
            write_prefixed_string(out, name);
        }
        TypeSig::ByRef(inner) => {
            out.push(SIG_BYREF);
            write_type_sig(out, inner);
        }
    }
}

/// Byte offset of an optional region boundary, where `None` means end of body.
fn bound_offset(bound: Option<InstrId>, layout: &encode::Layout) -> Result<u32> {
    match bound {
        None => Ok(layout.code_size),
        Some(id) => layout
            .offsets
            .get(&id)
            .copied()
            .ok_or_else(|| malformed_error!("handler boundary #{} is not in the body", id.0)),
    }
}

fn write_body(out: &mut Vec<u8>, body: &MethodBody, max_stack: u16) -> Result<()> {
    out.extend_from_slice(&max_stack.to_le_bytes());

    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(body.locals.len() as u32).to_le_bytes());
    for local in &body.locals {
        write_type_sig(out, &local.ty);
    }

    let layout = encode::layout(body);
    let code = encode::encode(body)?;
    debug_assert_eq!(code.len() as u32, layout.code_size);
    out.extend_from_slice(&layout.code_size.to_le_bytes());
    out.extend_from_slice(&code);

    #[allow(clippy::cast_possible_truncation)]
    out.extend_from_slice(&(body.exception_handlers.len() as u32).to_le_bytes());
    for handler in &body.exception_handlers {
        out.push(match handler.kind {
            HandlerKind::Catch => HANDLER_CATCH,
            HandlerKind::Finally => HANDLER_FINALLY,
        });
        let try_start = *layout
            .offsets
            .get(&handler.try_start)
            .ok_or_else(|| malformed_error!("protected region start is not in the body"))?;
        let handler_start = *layout
            .offsets
            .get(&handler.handler_start)
            .ok_or_else(|| malformed_error!("handler start is not in the body"))?;
        out.extend_from_slice(&try_start.to_le_bytes());
        out.extend_from_slice(&bound_offset(handler.try_end, &layout)?.to_le_bytes());
        out.extend_from_slice(&handler_start.to_le_bytes());
        out.extend_from_slice(&bound_offset(handler.handler_end, &layout)?.to_le_bytes());
        out.extend_from_slice(
            &handler
                .catch_type
                .map_or(0u32, |token| token.raw())
                .to_le_bytes(),
        );
    }

    Ok(())
}

impl ModuleImage {
    /// Serialize the image to container bytes.
    ///
    /// Validates every method body and recomputes its operand stack bound; the
    /// stored `max_stack` of in-memory bodies is ignored in favor of the
    /// recomputed value.
    ///
    /// # Errors
    /// Returns an error if any body fails validation, stack simulation, or
    /// branch encoding.
    pub fn write(&self) -> Result<Vec<u8>> {
        self.validate()?;

        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC);
        out.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        write_prefixed_string(&mut out, &self.name);
        write_version(&mut out, &self.version);

        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(self.assembly_refs.len() as u32).to_le_bytes());
        for dep in &self.assembly_refs {
            write_prefixed_string(&mut out, &dep.name);
            write_version(&mut out, &dep.version);
        }

        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(self.user_strings().len() as u32).to_le_bytes());
        for value in self.user_strings() {
            write_prefixed_string(&mut out, value);
        }

        let type_refs = &self.type_refs;
        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(type_refs.len() as u32).to_le_bytes());
        for row in type_refs {
            write_prefixed_string(&mut out, &row.full_name);
            write_prefixed_string(&mut out, &row.module);
        }

        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(self.member_refs().len() as u32).to_le_bytes());
        for row in self.member_refs() {
            out.push(match row.kind {
                MemberKind::Method => MEMBER_METHOD,
                MemberKind::Field => MEMBER_FIELD,
            });
            write_prefixed_string(&mut out, &row.declaring_type);
            write_prefixed_string(&mut out, &row.name);
            write_prefixed_string(&mut out, &row.module);
            match &row.sig {
                MemberSig::Field(ty) => write_type_sig(&mut out, ty),
                MemberSig::Method {
                    instance,
                    params,
                    ret,
                } => {
                    out.push(u8::from(*instance));
                    write_type_sig(&mut out, ret);
                    #[allow(clippy::cast_possible_truncation)]
                    out.extend_from_slice(&(params.len() as u32).to_le_bytes());
                    for param in params {
                        write_type_sig(&mut out, param);
                    }
                }
            }
        }

        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(self.types().len() as u32).to_le_bytes());
        for ty in self.types() {
            write_prefixed_string(&mut out, &ty.full_name);
            out.extend_from_slice(&ty.flags.bits().to_le_bytes());
        }

        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(self.fields().len() as u32).to_le_bytes());
        for field in self.fields() {
            out.extend_from_slice(&field.declaring.raw().to_le_bytes());
            write_prefixed_string(&mut out, &field.name);
            out.extend_from_slice(&field.flags.bits().to_le_bytes());
            write_type_sig(&mut out, &field.ty);
        }

        #[allow(clippy::cast_possible_truncation)]
        out.extend_from_slice(&(self.methods().len() as u32).to_le_bytes());
        for method in self.methods() {
            out.extend_from_slice(&method.declaring.raw().to_le_bytes());
            write_prefixed_string(&mut out, &method.name);
            out.extend_from_slice(&method.flags.bits().to_le_bytes());
            write_type_sig(&mut out, &method.return_type);

            #[allow(clippy::cast_possible_truncation)]
            out.extend_from_slice(&(method.params.len() as u32).to_le_bytes());
            for param in &method.params {
                write_prefixed_string(&mut out, &param.name);
                write_type_sig(&mut out, &param.ty);
            }

            match &method.body {
                None => out.push(0),
                Some(body) => {
                    out.push(1);
                    let max_stack = encode::compute_max_stack(body, self, &method.return_type)?;
                    write_body(&mut out, body, max_stack)?;
                }
            }
        }

        Ok(out)
    }

    /// Serialize the image and atomically replace the file at `path`.
    ///
    /// The container is written to `<path>.tmp` and renamed into place, so the
    /// destination either keeps its old contents or receives the complete new
    /// image. The temporary file is removed if serialization or the rename fails.
    ///
    /// # Errors
    /// Returns serialization errors from [`ModuleImage::write`] or
    /// [`crate::Error::FileError`] on I/O failure.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let bytes = self.write()?;

        let mut tmp = path.as_os_str().to_os_string();
        tmp.push(".tmp");
        let tmp = std::path::PathBuf::from(tmp);

        let result = (|| -> Result<()> {
            let mut file = std::fs::File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
            std::fs::rename(&tmp, path)?;
            Ok(())
        })();

        if result.is_err() {
            let _ = std::fs::remove_file(&tmp);
        }
        result
    }
}
