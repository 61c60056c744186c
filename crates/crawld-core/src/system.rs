use std::{sync::OnceLock, time::Instant};

static NODE_NAME: OnceLock<String> = OnceLock::new();
static START_TIME: OnceLock<Instant> = OnceLock::new();

/// Record daemon start time.
pub fn init_uptime() {
    START_TIME.get_or_init(Instant::now);
}

/// Daemon uptime in seconds.
pub fn uptime_seconds() -> u64 {
    let start = START_TIME.get_or_init(Instant::now);
    start.elapsed().as_secs()
}

/// Host name reported in daemon status; falls back to `"localhost"`.
pub fn node_name() -> &'static str {
    NODE_NAME.get_or_init(|| {
        hostname::get()
            .ok()
            .and_then(|name| name.into_string().ok())
            .filter(|name| !name.is_empty())
            .unwrap_or_else(|| "localhost".to_string())
    })
}

/// Number of CPUs available to the daemon (at least 1).
pub fn cpu_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}
