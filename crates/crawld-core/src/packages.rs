//! Uploaded project packages ("eggs").
//!
//! A package is an opaque archive the runner knows how to load. The daemon
//! only stores them, picks a version for a job, and hands the path over.
use std::{
    cmp::Ordering,
    fs,
    path::{Path, PathBuf},
};

use crawld_model::Project;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{CoreError, CoreResult},
    naming::check_name,
};

const PACKAGE_EXT: &str = "egg";

/// A stored package version resolved for a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageHandle {
    pub project: Project,
    pub version: String,
    pub path: PathBuf,
}

/// Storage of uploaded project packages.
pub trait PackageStorage: Send + Sync {
    /// Store `data` as `version` of `project`, replacing an existing upload.
    fn put(&self, project: &str, version: &str, data: &[u8]) -> CoreResult<PackageHandle>;

    /// Pick the package for a job.
    ///
    /// An explicit version that was never uploaded is `NotFound`. Without a
    /// version the latest upload is chosen; a project with no uploads resolves
    /// to `None`.
    fn resolve(&self, project: &str, version: Option<&str>) -> CoreResult<Option<PackageHandle>>;

    /// Versions of `project`, oldest first.
    fn versions(&self, project: &str) -> CoreResult<Vec<String>>;

    /// Projects that have at least one upload, sorted.
    fn projects(&self) -> CoreResult<Vec<Project>>;

    fn delete_version(&self, project: &str, version: &str) -> CoreResult<()>;

    /// Remove every version of `project`. Returns `false` if it had none.
    fn delete_project(&self, project: &str) -> CoreResult<bool>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PackageConfig {
    pub eggs_dir: PathBuf,
}

impl Default for PackageConfig {
    fn default() -> Self {
        Self {
            eggs_dir: PathBuf::from("eggs"),
        }
    }
}

/// Packages kept as `<root>/<project>/<version>.egg`.
#[derive(Debug, Clone)]
pub struct FsPackageStorage {
    root: PathBuf,
}

impl FsPackageStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn from_config(cfg: &PackageConfig) -> Self {
        Self::new(cfg.eggs_dir.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn project_dir(&self, project: &str) -> PathBuf {
        self.root.join(project)
    }

    fn package_path(&self, project: &str, version: &str) -> PathBuf {
        self.project_dir(project)
            .join(format!("{version}.{PACKAGE_EXT}"))
    }

    fn handle(&self, project: &str, version: &str) -> PackageHandle {
        PackageHandle {
            project: project.to_string(),
            version: version.to_string(),
            path: self.package_path(project, version),
        }
    }
}

impl PackageStorage for FsPackageStorage {
    fn put(&self, project: &str, version: &str, data: &[u8]) -> CoreResult<PackageHandle> {
        check_name(project)?;
        check_name(version)?;

        let dir = self.project_dir(project);
        fs::create_dir_all(&dir)?;

        let handle = self.handle(project, version);
        // Write next to the target, then rename, so a reader never sees half a package.
        let tmp = dir.join(format!(".{version}.{PACKAGE_EXT}.tmp"));
        fs::write(&tmp, data)?;
        fs::rename(&tmp, &handle.path)?;

        info!(target: "crawld.packages", project, version, bytes = data.len(), "package stored");
        Ok(handle)
    }

    fn resolve(&self, project: &str, version: Option<&str>) -> CoreResult<Option<PackageHandle>> {
        check_name(project)?;
        match version {
            Some(version) => {
                check_name(version)?;
                let handle = self.handle(project, version);
                if handle.path.is_file() {
                    Ok(Some(handle))
                } else {
                    Err(CoreError::NotFound(format!(
                        "package {project} version {version}"
                    )))
                }
            }
            None => {
                let latest = self.versions(project)?.pop();
                debug!(target: "crawld.packages", project, ?latest, "resolved latest");
                Ok(latest.map(|v| self.handle(project, &v)))
            }
        }
    }

    fn versions(&self, project: &str) -> CoreResult<Vec<String>> {
        check_name(project)?;
        let dir = self.project_dir(project);
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut versions = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some(PACKAGE_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str())
                && !stem.starts_with('.')
            {
                versions.push(stem.to_string());
            }
        }
        versions.sort_by(|a, b| natural_cmp(a, b));
        Ok(versions)
    }

    fn projects(&self) -> CoreResult<Vec<Project>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut projects = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !self.versions(&name)?.is_empty() {
                projects.push(name);
            }
        }
        projects.sort();
        Ok(projects)
    }

    fn delete_version(&self, project: &str, version: &str) -> CoreResult<()> {
        check_name(project)?;
        check_name(version)?;
        let path = self.package_path(project, version);
        match fs::remove_file(&path) {
            Ok(()) => {
                info!(target: "crawld.packages", project, version, "package deleted");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CoreError::NotFound(
                format!("package {project} version {version}"),
            )),
            Err(e) => Err(e.into()),
        }
    }

    fn delete_project(&self, project: &str) -> CoreResult<bool> {
        check_name(project)?;
        let dir = self.project_dir(project);
        match fs::remove_dir_all(&dir) {
            Ok(()) => {
                info!(target: "crawld.packages", project, "project packages deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }
}

/// Compare version strings so that digit runs order numerically:
/// `r2 < r10`, `1.9 < 1.10`.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let mut xs = a.chars().peekable();
    let mut ys = b.chars().peekable();
    loop {
        match (xs.peek().copied(), ys.peek().copied()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(x), Some(y)) if x.is_ascii_digit() && y.is_ascii_digit() => {
                let nx = take_digits(&mut xs);
                let ny = take_digits(&mut ys);
                let tx = nx.trim_start_matches('0');
                let ty = ny.trim_start_matches('0');
                let ord = tx
                    .len()
                    .cmp(&ty.len())
                    .then_with(|| tx.cmp(ty))
                    .then_with(|| nx.len().cmp(&ny.len()));
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            (Some(x), Some(y)) => {
                if x != y {
                    return x.cmp(&y);
                }
                xs.next();
                ys.next();
            }
        }
    }
}

fn take_digits(it: &mut std::iter::Peekable<std::str::Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(c) = it.peek().copied() {
        if !c.is_ascii_digit() {
            break;
        }
        out.push(c);
        it.next();
    }
    out
}
