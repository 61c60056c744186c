//! Job admission, queueing and process supervision for `crawld`.
//!
//! [`ProjectQueues`] hold the pending backlog, the [`Poller`] moves one job
//! per tick into the [`Launcher`], and the [`Daemon`] loop ties them to the
//! outside world through a [`DaemonHandle`].

mod error;
pub use crawld_store::StorageError;
pub use error::{CoreError, CoreResult};

mod naming;
pub use naming::{check_job_id, check_name};

pub mod system;

mod events;
pub use events::{EventBus, JobCompletion, JobEvent, Subscribe};

mod packages;
pub use packages::{FsPackageStorage, PackageConfig, PackageHandle, PackageStorage, natural_cmp};

mod environment;
pub use environment::{
    ENV_JOB, ENV_LOG_FILE, ENV_PACKAGE, ENV_PROJECT, ENV_SPIDER, ENV_VERSION, Environment,
    RunnerConfig, RunnerEnvironment,
};

mod queues;
pub use queues::ProjectQueues;

mod launcher;
pub use launcher::{Launcher, LauncherConfig, WAIT_FAILED_EXIT_CODE};

mod poller;
pub use poller::{Poller, PollerConfig, PollerState, TickOutcome};

mod daemon;
pub use daemon::{Daemon, DaemonHandle};
