use crawld_core::JobEvent;
use crawld_model::SPAWN_FAILED_EXIT_CODE;
use tracing::{debug, info, warn};

#[inline]
pub fn message_for(event: &JobEvent) -> &'static str {
    match event {
        JobEvent::Queued { .. } => "job queued",
        JobEvent::Started { .. } => "job process started",
        JobEvent::Finished { exit_code: 0, .. } => "job finished",
        JobEvent::Finished { .. } => "job finished with non-zero exit code",
        JobEvent::SpawnFailed { .. } => "job could not be started",
        JobEvent::Requeued { .. } => "launcher full; job returned to its queue",
        JobEvent::CancelRequested { .. } => "cancel signal sent to running job",
        JobEvent::PendingRemoved { .. } => "pending job removed",
        JobEvent::ProjectRemoved { .. } => "project removed",
    }
}

/// Log `event` at the level its kind deserves.
pub fn log_event(event: &JobEvent) {
    let msg = message_for(event);

    match event {
        JobEvent::Queued {
            job_id,
            project,
            spider,
            priority,
        } => debug!(target: "crawld.events", %job_id, %project, %spider, priority, "{msg}"),

        JobEvent::Started {
            job_id,
            project,
            spider,
            pid,
        } => info!(target: "crawld.events", %job_id, %project, %spider, pid, "{msg}"),

        JobEvent::Finished {
            job_id,
            project,
            spider,
            exit_code,
        } => {
            if *exit_code == 0 {
                info!(target: "crawld.events", %job_id, %project, %spider, "{msg}")
            } else {
                warn!(target: "crawld.events", %job_id, %project, %spider, exit_code, "{msg}")
            }
        }

        JobEvent::SpawnFailed {
            job_id,
            project,
            spider,
            reason,
        } => warn!(
            target: "crawld.events",
            %job_id,
            %project,
            %spider,
            exit_code = SPAWN_FAILED_EXIT_CODE,
            %reason,
            "{msg}"
        ),

        JobEvent::Requeued { project, priority } => {
            debug!(target: "crawld.events", %project, priority, "{msg}")
        }

        JobEvent::CancelRequested { job_id, project } | JobEvent::PendingRemoved { job_id, project } => {
            info!(target: "crawld.events", %job_id, %project, "{msg}")
        }

        JobEvent::ProjectRemoved { project, pending } => {
            info!(target: "crawld.events", %project, pending, "{msg}")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_picks_message() {
        let ok = JobEvent::Finished {
            job_id: "a".into(),
            project: "shop".into(),
            spider: "s".into(),
            exit_code: 0,
        };
        let bad = JobEvent::Finished {
            job_id: "b".into(),
            project: "shop".into(),
            spider: "s".into(),
            exit_code: 2,
        };
        assert_eq!(message_for(&ok), "job finished");
        assert_ne!(message_for(&bad), message_for(&ok));

        // Without a subscriber installed this is a no-op; it must not panic.
        log_event(&bad);
    }
}
