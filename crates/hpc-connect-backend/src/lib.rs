//! Submission adapters for Slurm, PBS, Flux, and direct/remote subprocess
//! execution, plus the background future/poller engine that turns any
//! [`HpcProcess`] into an observable [`Future`].
//!
//! [`HpcProcess`]: hpc_connect_job::HpcProcess

mod flux;
mod future;
mod local;
mod manager;
mod pbs;
mod script;
mod slurm;

pub use flux::FluxManager;
pub use flux::FluxProcess;
pub use future::Future;
pub use future::as_completed;
pub use local::LocalManager;
pub use local::LocalProcess;
pub use manager::SubmissionManager;
pub use manager::format_time_limit;
pub use pbs::PbsManager;
pub use pbs::PbsProcess;
pub use slurm::SlurmManager;
pub use slurm::SlurmProcess;
