//! The public facade: given a [`Config`], resolve a [`Backend`] whose
//! `submission_manager()` and `launcher()` factories yield ready adapters.
//!
//! [`Config`]: hpc_connect_config::Config

mod launcher;
mod registry;

pub use hpc_connect_backend::Future;
pub use hpc_connect_backend::SubmissionManager;
pub use hpc_connect_backend::as_completed;
pub use hpc_connect_config::Config;
pub use hpc_connect_config::ConfigValue;
pub use hpc_connect_job::HpcConnectError;
pub use hpc_connect_job::HpcProcess;
pub use hpc_connect_job::JobSpec;
pub use hpc_connect_job::JobSpecUpdate;
pub use hpc_connect_launch::LaunchCommand;
pub use launcher::LauncherAdapter;
pub use registry::Backend;
pub use registry::Registry;
pub use registry::resolve;
