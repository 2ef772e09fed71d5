//! Wire-level constants of the module container format, shared by the
//! reader and writer so the two sides cannot drift apart.

/// File magic at offset 0.
pub(super) const MAGIC: [u8; 4] = *b"CILM";

/// Container format version this build reads and writes.
pub(super) const FORMAT_VERSION: u16 = 1;

/// Type signature tags.
pub(super) const SIG_VOID: u8 = 0x00;
pub(super) const SIG_BOOL: u8 = 0x01;
pub(super) const SIG_I4: u8 = 0x02;
pub(super) const SIG_I8: u8 = 0x03;
pub(super) const SIG_R8: u8 = 0x04;
pub(super) const SIG_STRING: u8 = 0x05;
pub(super) const SIG_OBJECT: u8 = 0x06;
pub(super) const SIG_CLASS: u8 = 0x07;
pub(super) const SIG_VALUE_TYPE: u8 = 0x08;
pub(super) const SIG_BYREF: u8 = 0x09;

/// Member reference kind tags.
pub(super) const MEMBER_METHOD: u8 = 0x00;
pub(super) const MEMBER_FIELD: u8 = 0x01;

/// Exception handler kind tags.
pub(super) const HANDLER_CATCH: u8 = 0x00;
pub(super) const HANDLER_FINALLY: u8 = 0x01;
