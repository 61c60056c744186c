//! Shared job and result types for the crawl daemon.
//!
//! Everything here is plain data: the queue payload ([`JobRequest`]), the
//! launcher's bookkeeping records ([`RunningJob`], [`FinishedJob`]) and the
//! small vocabulary types the other crates pass around.

mod domain;
pub use domain::*;
