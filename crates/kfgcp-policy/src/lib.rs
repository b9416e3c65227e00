//! kfgcp policy reconciliation
//!
//! Keeps a project's access policy in line with a deployment's binding
//! templates without losing edits made by anyone else:
//!
//! 1. **Clear** - strip this deployment's own service-account members from
//!    every binding and write the result back.
//! 2. **Rewrite** - re-fetch (the clear write rotated the etag), merge the
//!    resolved templates into the live policy and write it back.
//!
//! Deletion only runs the clear step. Every write carries the etag of the
//! snapshot it was computed from; a stale-etag rejection restarts the phase
//! from a fresh read, up to a small fixed number of attempts.

pub mod error;
pub mod merge;
pub mod reconciler;

pub use error::PolicyError;
pub use merge::{clear_owned, merge_templates};
pub use reconciler::{PolicyPhase, PolicyReconciler};
