//! The [`HpcProcess`] trait: a backend-specific handle to a submitted job.

use std::fmt;

use chrono::DateTime;
use chrono::Utc;

use crate::error::HpcConnectError;

/// A backend-specific handle to a live (or completed) job.
///
/// An `HpcProcess` is created by a submission adapter at submit time. Its
/// mutable state (`jobid` once assigned, `started`, `returncode`) is owned
/// by the concrete implementation and is mutated only by the implementation
/// itself, from within [`HpcProcess::poll`] or [`HpcProcess::cancel`] — both
/// of which take `&self` so the type can be shared behind an `Arc` between
/// the polling thread and the handle's owner.
pub trait HpcProcess: fmt::Debug + Send + Sync {
    /// The scheduler's job identifier, once known.
    ///
    /// Implementations that assign the identifier synchronously at submit
    /// time (Slurm, PBS) return `Some` immediately; `Flux` and the local
    /// backends may return `None` briefly if identifier assignment is
    /// asynchronous.
    fn jobid(&self) -> Option<String>;

    /// When the job was submitted.
    fn submitted(&self) -> DateTime<Utc>;

    /// When the job started running, if it has.
    fn started(&self) -> Option<DateTime<Utc>>;

    /// The process's exit code, once it has terminated.
    fn returncode(&self) -> Option<i32>;

    /// Polls the backend for a state update, returning the exit code if the
    /// job has terminated.
    ///
    /// Calling `poll` after the job has already terminated is idempotent
    /// and simply returns the previously observed return code.
    fn poll(&self) -> Result<Option<i32>, HpcConnectError>;

    /// Best-effort cancellation. Implementations tolerate the backend
    /// reporting the job as already inactive.
    fn cancel(&self) -> Result<(), HpcConnectError>;

    /// The interval the future/poller engine should wait between calls to
    /// [`HpcProcess::poll`].
    fn polling_interval(&self) -> std::time::Duration;
}
