use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::{JobId, Project};

/// Exit code recorded for a job whose process could never be started
/// (missing package, missing executable, fork/exec failure).
///
/// Real children report `0..=255`, so a negative code is unambiguous.
pub const SPAWN_FAILED_EXIT_CODE: i32 = -1;

/// A job whose process is currently alive.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunningJob {
    pub job_id: JobId,
    pub project: Project,
    pub spider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub args: BTreeMap<String, String>,
    pub pid: u32,
    #[serde(with = "time_serde")]
    pub start_time: SystemTime,
    pub log_path: PathBuf,
}

impl RunningJob {
    /// Close the record with the given exit code.
    pub fn finish(self, exit_code: i32, end_time: SystemTime) -> FinishedJob {
        FinishedJob {
            job_id: self.job_id,
            project: self.project,
            spider: self.spider,
            version: self.version,
            start_time: self.start_time,
            end_time,
            exit_code,
            log_path: Some(self.log_path),
        }
    }
}

/// A job that has left the launcher. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinishedJob {
    pub job_id: JobId,
    pub project: Project,
    pub spider: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(with = "time_serde")]
    pub start_time: SystemTime,
    #[serde(with = "time_serde")]
    pub end_time: SystemTime,
    pub exit_code: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_path: Option<PathBuf>,
}

impl FinishedJob {
    #[inline]
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0
    }

    #[inline]
    pub fn never_started(&self) -> bool {
        self.exit_code == SPAWN_FAILED_EXIT_CODE
    }
}

mod time_serde {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::{Duration, SystemTime, UNIX_EPOCH};

    pub fn serialize<S>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let since_epoch = time
            .duration_since(UNIX_EPOCH)
            .map_err(serde::ser::Error::custom)?;
        since_epoch.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SystemTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map(|d| UNIX_EPOCH + d)
            .map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn running() -> RunningJob {
        RunningJob {
            job_id: JobId::from("job-1"),
            project: "shop".to_string(),
            spider: "products".to_string(),
            version: Some("r3".to_string()),
            args: BTreeMap::new(),
            pid: 4242,
            start_time: SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000),
            log_path: PathBuf::from("/var/log/crawld/shop/products/job-1.log"),
        }
    }

    #[test]
    fn finish_carries_identity_over() {
        let end = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_060);
        let done = running().finish(3, end);

        assert_eq!(done.job_id, JobId::from("job-1"));
        assert_eq!(done.project, "shop");
        assert_eq!(done.version.as_deref(), Some("r3"));
        assert_eq!(done.exit_code, 3);
        assert_eq!(done.end_time, end);
        assert!(!done.succeeded());
        assert!(!done.never_started());
    }

    #[test]
    fn finished_job_serde_roundtrip() {
        let done = running().finish(0, SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_001));
        let json = serde_json::to_string(&done).unwrap();
        assert!(json.contains("\"exitCode\":0"));
        assert!(json.contains("\"startTime\":1700000000"));

        let back: FinishedJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.job_id, done.job_id);
        assert_eq!(back.start_time, done.start_time);
        assert_eq!(back.end_time, done.end_time);
    }
}
