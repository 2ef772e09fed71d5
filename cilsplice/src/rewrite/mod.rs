//! The rewriting pipeline: reference resolution, hook slot synthesis, splice
//! planning, physical instruction splicing, slot allocation, and the
//! module-final branch fix-up.
//!
//! [`RewriteSession`] is the orchestrator; the submodules are its stages in
//! data-flow order. The planner consumes the [`references::ReferenceTable`]
//! and the [`hooks`] catalog to decide what to call, the
//! [`locals::SlotAllocator`] decides where intermediate values live, and the
//! [`splicer`] physically rewrites the instruction stream last.

pub mod fixup;
pub mod hooks;
pub mod locals;
pub mod planner;
pub mod references;
pub mod splicer;

mod session;

pub use fixup::upgrade_branches;
pub use hooks::{define_hook, HookFamily, HookRole, MARKER_HOOK};
pub use planner::{HookWiring, MarkerSpec, SpliceSite, SpliceSpec, TargetInfo};
pub use references::ReferenceTable;
pub use session::RewriteSession;
pub use splicer::{insert_before, redirect_returns_to_entry, retarget_branches};
