//! `JobSpec` and the `HpcProcess` abstraction shared by every hpc-connect
//! backend.
//!
//! This crate is intentionally small: it holds the data the rest of the
//! workspace agrees on (the job description and the process handle trait)
//! without pulling in any scheduler-specific code, so that submission
//! adapters, the future/poller engine, and the launcher compiler can all
//! depend on it without depending on each other.

mod error;
mod job;
mod process;

pub use error::HpcConnectError;
pub use job::JobSpec;
pub use job::JobSpecUpdate;
pub use process::HpcProcess;
