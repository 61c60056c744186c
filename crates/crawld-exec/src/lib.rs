mod error;
pub use error::{ExecError, ExecResult};

pub mod proc;
pub use proc::{ProcessSpec, SpawnedProcess, exit_code, spawn};

mod util;
pub use util::{parse_signal, signal_group};

pub mod utils;
pub use utils::limits::RlimitConfig;
