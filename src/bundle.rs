use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::info;

use crate::domain::PackMode;
use crate::error::PackError;
use crate::fs_util;
use crate::manifest::{MANIFEST_FILE_NAME, Manifest, STATUS_FILE_NAME, StatusReport};
use crate::pipeline::FetchResult;
use crate::script::{INSTRUCTIONS_FILE_NAME, Script, instructions};

pub const CONTENT_TYPE: &str = "application/zip";

/// The finished archive. Dropping the bundle removes the request's working
/// directory, archive included; `persist` copies it out first.
#[derive(Debug)]
pub struct OutputBundle {
    _workdir: TempDir,
    archive_path: PathBuf,
    file_name: String,
    size: u64,
    file_count: usize,
    mode: PackMode,
    results: Vec<FetchResult>,
}

impl OutputBundle {
    pub fn path(&self) -> &Path {
        &self.archive_path
    }

    /// Caller-visible download name.
    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    pub fn content_type(&self) -> &'static str {
        CONTENT_TYPE
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn file_count(&self) -> usize {
        self.file_count
    }

    pub fn mode(&self) -> PackMode {
        self.mode
    }

    pub fn results(&self) -> &[FetchResult] {
        &self.results
    }

    pub fn open(&self) -> Result<fs::File, PackError> {
        fs::File::open(&self.archive_path).map_err(|err| PackError::Packaging(err.to_string()))
    }

    pub fn persist(&self, dest: &Path) -> Result<u64, PackError> {
        if let Some(parent) = dest.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|err| PackError::Filesystem(err.to_string()))?;
        }
        fs::copy(&self.archive_path, dest).map_err(|err| PackError::Filesystem(err.to_string()))
    }
}

/// What the aggregator packs besides the staging tree.
pub enum BundleContent<'a> {
    Fetched,
    Script { script: &'a Script, script_name: &'a str },
}

pub struct Aggregator {
    bundle_name: String,
}

impl Aggregator {
    pub fn new(bundle_name: impl Into<String>) -> Self {
        Self {
            bundle_name: bundle_name.into(),
        }
    }

    /// Writes manifest and status (plus script and instructions in record
    /// mode) into `staging`, then zips `staging` into the working directory.
    pub fn finish(
        &self,
        workdir: TempDir,
        staging: &Path,
        content: BundleContent<'_>,
        manifest: &Manifest,
        results: Vec<FetchResult>,
    ) -> Result<OutputBundle, PackError> {
        fs::create_dir_all(staging).map_err(|err| PackError::Packaging(err.to_string()))?;
        let mode = match content {
            BundleContent::Fetched => PackMode::Execute,
            BundleContent::Script { .. } => PackMode::Record,
        };

        write_text(&staging.join(MANIFEST_FILE_NAME), &manifest.render())?;
        let status = serde_json::to_string_pretty(&StatusReport::new(mode, &results))
            .map_err(|err| PackError::Packaging(err.to_string()))?;
        write_text(&staging.join(STATUS_FILE_NAME), &status)?;

        if let BundleContent::Script {
            script,
            script_name,
        } = content
        {
            let script_path = staging.join(script_name);
            write_text(&script_path, &script.render())?;
            make_executable(&script_path)?;
            write_text(
                &staging.join(INSTRUCTIONS_FILE_NAME),
                &instructions(script_name),
            )?;
        }

        let archive_path = workdir.path().join(&self.bundle_name);
        let file_count = fs_util::zip_dir(staging, &archive_path)?;
        let size = fs::metadata(&archive_path)
            .map_err(|err| PackError::Packaging(err.to_string()))?
            .len();
        if size == 0 {
            return Err(PackError::Packaging(format!(
                "{} is empty",
                archive_path.display()
            )));
        }

        let succeeded = results.iter().filter(|r| r.is_ok()).count();
        info!(
            archive = %archive_path.display(),
            size,
            file_count,
            succeeded,
            failed = results.len() - succeeded,
            "bundle ready"
        );

        Ok(OutputBundle {
            _workdir: workdir,
            archive_path,
            file_name: self.bundle_name.clone(),
            size,
            file_count,
            mode,
            results,
        })
    }
}

fn write_text(path: &Path, content: &str) -> Result<(), PackError> {
    fs::write(path, content)
        .map_err(|err| PackError::Packaging(format!("write {}: {err}", path.display())))
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), PackError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|err| PackError::Packaging(err.to_string()))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), PackError> {
    Ok(())
}
