//! Domain layer: the data the orchestrator reasons about.
//!
//! Nothing in here performs I/O.  Invariants (a credential bundle is either
//! complete or absent, an identity is never a magic string) are enforced by
//! the types themselves so the application layer cannot construct an invalid
//! value by accident.

pub mod credentials;
pub mod device;
pub mod discovery;
pub mod identity;
