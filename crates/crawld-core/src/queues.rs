//! Per-project pending queues.
//!
//! Each project owns one [`PriorityQueue`] stored as `<dir>/<project>.db`.
//! Queues are opened lazily on the first insert for a project and kept for
//! the life of the daemon; their order of first appearance is the poller's
//! final tie-break.
use std::{
    fs,
    path::{Path, PathBuf},
};

use crawld_model::{JobId, JobRequest, PendingJob, Priority, Project};
use crawld_store::PriorityQueue;
use tracing::{debug, info, warn};

use crate::{
    error::{CoreError, CoreResult},
    naming::check_name,
};

const DB_EXT: &str = "db";

pub struct ProjectQueues {
    dir: Option<PathBuf>,
    queues: Vec<(Project, PriorityQueue)>,
}

impl ProjectQueues {
    /// Open the queues kept under `dir`, creating the directory if needed.
    ///
    /// Existing `<project>.db` files are reopened in name order so that the
    /// pending backlog survives a restart.
    pub fn open(dir: impl Into<PathBuf>) -> CoreResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(DB_EXT) {
                continue;
            }
            match path.file_stem().and_then(|s| s.to_str()) {
                Some(name) if check_name(name).is_ok() => names.push(name.to_string()),
                _ => warn!(target: "crawld.queues", path = %path.display(), "skipping unreadable queue file name"),
            }
        }
        names.sort();

        let mut queues = Vec::with_capacity(names.len());
        for name in names {
            let queue = PriorityQueue::open(db_path(&dir, &name))?;
            debug!(target: "crawld.queues", project = %name, pending = queue.count()?, "queue reopened");
            queues.push((name, queue));
        }

        info!(target: "crawld.queues", dir = %dir.display(), projects = queues.len(), "project queues opened");
        Ok(Self {
            dir: Some(dir),
            queues,
        })
    }

    /// Queues that live only in memory.
    pub fn in_memory() -> Self {
        Self {
            dir: None,
            queues: Vec::new(),
        }
    }

    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    /// Projects with a queue, in first-seen order.
    pub fn list_projects(&self) -> Vec<Project> {
        self.queues.iter().map(|(p, _)| p.clone()).collect()
    }

    pub fn contains(&self, project: &str) -> bool {
        self.position(project).is_some()
    }

    /// The queue of `project`, opened on first use.
    pub fn queue_for(&mut self, project: &str) -> CoreResult<&mut PriorityQueue> {
        check_name(project)?;
        let idx = match self.position(project) {
            Some(idx) => idx,
            None => {
                let queue = match &self.dir {
                    Some(dir) => PriorityQueue::open(db_path(dir, project))?,
                    None => PriorityQueue::open_in_memory()?,
                };
                debug!(target: "crawld.queues", project, "queue created");
                self.queues.push((project.to_string(), queue));
                self.queues.len() - 1
            }
        };
        Ok(&mut self.queues[idx].1)
    }

    /// Existing queue of `project`, without creating one.
    pub fn get(&self, project: &str) -> Option<&PriorityQueue> {
        self.position(project).map(|idx| &self.queues[idx].1)
    }

    /// Every queue in first-seen order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &PriorityQueue)> {
        self.queues.iter().map(|(p, q)| (p.as_str(), q))
    }

    /// Queue `job` in its project's store.
    pub fn insert(&mut self, job: &JobRequest, priority: Priority) -> CoreResult<i64> {
        let queue = self.queue_for(&job.project)?;
        Ok(queue.insert_as(job, priority)?)
    }

    /// Priority of the entry `pop` would return for `project`.
    pub fn peek_priority(&self, project: &str) -> CoreResult<Option<Priority>> {
        match self.get(project) {
            Some(queue) => Ok(queue.peek_highest()?.map(|(_, priority)| priority)),
            None => Ok(None),
        }
    }

    /// Take the next job of `project`.
    ///
    /// An entry that does not decode as a job is still removed and reported as
    /// `InvalidRequest`, so it cannot block the queue.
    pub fn pop(&mut self, project: &str) -> CoreResult<Option<(JobRequest, Priority)>> {
        let Some(idx) = self.position(project) else {
            return Ok(None);
        };
        let Some((doc, priority)) = self.queues[idx].1.pop_highest()? else {
            return Ok(None);
        };
        let job = serde_json::from_value::<JobRequest>(doc)
            .map_err(|e| CoreError::InvalidRequest(format!("undecodable entry in {project}: {e}")))?;
        Ok(Some((job, priority)))
    }

    /// Pending jobs, highest priority first per project, projects in first-seen order.
    pub fn pending(&self, project: Option<&str>) -> CoreResult<Vec<PendingJob>> {
        let mut out = Vec::new();
        for (name, queue) in self.iter() {
            if project.is_some_and(|p| p != name) {
                continue;
            }
            for (doc, priority) in queue.iterate()? {
                match serde_json::from_value::<JobRequest>(doc) {
                    Ok(job) => out.push(PendingJob {
                        job_id: job.job_id,
                        project: job.project,
                        spider: job.spider,
                        version: job.version,
                        priority,
                    }),
                    Err(e) => {
                        warn!(target: "crawld.queues", project = name, error = %e, "undecodable pending entry");
                    }
                }
            }
        }
        Ok(out)
    }

    /// `true` if any project has `job_id` pending.
    pub fn has_pending(&self, job_id: &JobId) -> CoreResult<bool> {
        for (_, queue) in self.iter() {
            for (doc, _) in queue.iterate()? {
                let found = doc
                    .get("job_id")
                    .and_then(|v| v.as_str())
                    .is_some_and(|id| id == job_id.as_str());
                if found {
                    return Ok(true);
                }
            }
        }
        Ok(false)
    }

    pub fn pending_count(&self) -> CoreResult<usize> {
        let mut total = 0;
        for (_, queue) in self.iter() {
            total += queue.count()?;
        }
        Ok(total)
    }

    /// Remove the pending job `job_id` of `project`. Returns how many entries went.
    pub fn cancel_pending(&mut self, project: &str, job_id: &JobId) -> CoreResult<usize> {
        self.remove_where(project, |job| job.is_job(job_id))
    }

    /// Remove every pending job of `project` matching `predicate`.
    ///
    /// Entries that do not decode as jobs never match.
    pub fn remove_where<F>(&mut self, project: &str, mut predicate: F) -> CoreResult<usize>
    where
        F: FnMut(&JobRequest) -> bool,
    {
        let Some(idx) = self.position(project) else {
            return Ok(0);
        };
        let removed = self.queues[idx].1.remove(|doc| {
            serde_json::from_value::<JobRequest>(doc.clone())
                .map(|job| predicate(&job))
                .unwrap_or(false)
        })?;
        Ok(removed)
    }

    /// Drop the queue of `project` and delete its file.
    ///
    /// Returns the number of pending jobs discarded, or `None` for an unknown project.
    pub fn remove_project(&mut self, project: &str) -> CoreResult<Option<usize>> {
        let Some(idx) = self.position(project) else {
            return Ok(None);
        };
        let (_, mut queue) = self.queues.remove(idx);
        let pending = queue.count()?;
        queue.clear()?;
        let path = queue.path().map(Path::to_path_buf);
        drop(queue);

        if let Some(path) = path {
            for file in [path.clone(), sidecar(&path, "-wal"), sidecar(&path, "-shm")] {
                match fs::remove_file(&file) {
                    Ok(()) => {}
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }

        info!(target: "crawld.queues", project, pending, "project queue removed");
        Ok(Some(pending))
    }

    fn position(&self, project: &str) -> Option<usize> {
        self.queues.iter().position(|(p, _)| p == project)
    }
}

fn db_path(dir: &Path, project: &str) -> PathBuf {
    dir.join(format!("{project}.{DB_EXT}"))
}

fn sidecar(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}
