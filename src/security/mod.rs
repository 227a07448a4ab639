//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming request:
//!     → access_control.rs (identity headers → UserContext)
//!     → rate_limit.rs (size guards, tier classification, partition checks)
//!     → Pass to proxying
//! ```
//!
//! # Design Decisions
//! - Fail closed: a misconfigured (zero) quota denies rather than admits
//! - Per-partition locking; no global lock on the admission path
//! - No trust in client input

pub mod access_control;
pub mod rate_limit;
