use std::fs;
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

use camino::Utf8Path;
use tracing::debug;

use crate::error::PackError;
use crate::fs_util;
use crate::http::{HttpClient, filename_from_content_disposition, safe_file_name};
use crate::ops::{FetchOperation, FetchPlan, FetchTarget};
use crate::sources::last_path_segment;
use crate::tool::ToolRunner;

const FALLBACK_FILE_NAME: &str = "download";
const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Performs fetch operations against the local disk and the network.
#[derive(Clone)]
pub struct Executor<H: HttpClient, T: ToolRunner> {
    http: H,
    tools: T,
}

impl<H: HttpClient, T: ToolRunner> Executor<H, T> {
    pub fn new(http: H, tools: T) -> Self {
        Self { http, tools }
    }

    /// Runs the plan in order, stopping at the first failing step.
    pub fn run_plan(&self, plan: &FetchPlan, deadline: Instant) -> Result<(), PackError> {
        for op in &plan.operations {
            debug!(op = op.name(), token = %plan.token, "executing");
            self.apply(op, deadline)?;
        }
        Ok(())
    }

    pub fn apply(&self, op: &FetchOperation, deadline: Instant) -> Result<(), PackError> {
        let remaining = remaining_until(deadline, op)?;
        match op {
            FetchOperation::CreateDir { path } => fs::create_dir_all(path.as_std_path())
                .map_err(|err| PackError::Filesystem(format!("create {path}: {err}"))),
            FetchOperation::FetchUrl { url, target } => self.fetch_url(url, target, remaining),
            FetchOperation::ExtractArchive {
                archive,
                into,
                rename_to,
            } => extract_and_rename(archive, into, rename_to),
            FetchOperation::FlattenNested { dir } => {
                let consumed = fs_util::flatten_nested(dir.as_std_path())?;
                debug!(%dir, consumed, "flattened nested archives");
                Ok(())
            }
            FetchOperation::InvokeExternal {
                program,
                args,
                dest,
            } => {
                self.tools.run(program, args, remaining)?;
                let dest = dest.as_std_path();
                if !dest.exists() || fs_util::dir_is_empty(dest)? {
                    return Err(PackError::EmptyDownload(dest.display().to_string()));
                }
                Ok(())
            }
        }
    }

    fn fetch_url(
        &self,
        url: &str,
        target: &FetchTarget,
        timeout: Duration,
    ) -> Result<(), PackError> {
        let mut remote = self.http.open(url, timeout)?;
        let path = match target {
            FetchTarget::File(path) => path.clone(),
            FetchTarget::Directory(dir) => {
                let name = remote
                    .content_disposition
                    .as_deref()
                    .and_then(filename_from_content_disposition)
                    .or_else(|| last_path_segment(url).and_then(safe_file_name))
                    .unwrap_or_else(|| FALLBACK_FILE_NAME.to_string());
                dir.join(name)
            }
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent.as_std_path())
                .map_err(|err| PackError::Filesystem(err.to_string()))?;
        }
        let mut file = fs::File::create(path.as_std_path())
            .map_err(|err| PackError::Filesystem(format!("create {path}: {err}")))?;
        let written = copy_body(url, &mut remote.body, &mut file, &path)?;
        debug!(%url, %path, bytes = written, "downloaded");
        Ok(())
    }
}

/// Streams `body` into `out`. Read failures belong to the remote side,
/// write failures to the local disk.
fn copy_body<R: Read + ?Sized, W: Write>(
    url: &str,
    body: &mut R,
    out: &mut W,
    path: &Utf8Path,
) -> Result<u64, PackError> {
    let mut buf = vec![0u8; COPY_BUFFER_SIZE];
    let mut written = 0u64;
    loop {
        let read = match body.read(&mut buf) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                return Err(PackError::Network {
                    url: url.to_string(),
                    message: err.to_string(),
                });
            }
        };
        out.write_all(&buf[..read])
            .map_err(|err| PackError::Filesystem(format!("write {path}: {err}")))?;
        written += read as u64;
    }
    out.flush()
        .map_err(|err| PackError::Filesystem(format!("write {path}: {err}")))?;
    Ok(written)
}

fn extract_and_rename(
    archive: &Utf8Path,
    into: &Utf8Path,
    rename_to: &str,
) -> Result<(), PackError> {
    let staging = into.join(format!(".staging-{rename_to}"));
    fs_util::remove_path(staging.as_std_path())?;
    fs::create_dir_all(staging.as_std_path())
        .map_err(|err| PackError::Filesystem(err.to_string()))?;

    let result = (|| {
        fs_util::validate_zip(archive.as_std_path())?;
        fs_util::extract_zip(archive.as_std_path(), staging.as_std_path())?;
        let top_level = fs_util::single_top_level_dir(staging.as_std_path())?;
        let target = into.join(rename_to);
        fs_util::remove_path(target.as_std_path())?;
        fs::rename(&top_level, target.as_std_path())
            .map_err(|err| PackError::Filesystem(format!("rename into {target}: {err}")))
    })();

    let cleanup = fs_util::remove_path(staging.as_std_path());
    result?;
    cleanup?;
    fs_util::remove_path(archive.as_std_path())
}

fn remaining_until(deadline: Instant, op: &FetchOperation) -> Result<Duration, PackError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Err(PackError::Timeout(format!(
            "item deadline reached before {}",
            op.name()
        )));
    }
    Ok(remaining)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use assert_matches::assert_matches;

    use super::*;

    struct BrokenBody;

    impl Read for BrokenBody {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer"))
        }
    }

    struct FullDisk;

    impl Write for FullDisk {
        fn write(&mut self, _buf: &[u8]) -> io::Result<usize> {
            Err(io::Error::other("no space left on device"))
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn copy_errors_are_attributed_to_their_side() {
        let path = Utf8Path::new("out/file.bin");
        let url = "https://osf.io/download/abc12";

        let mut out = Vec::new();
        let mut body = Cursor::new(vec![7u8; 100_000]);
        let written = copy_body(url, &mut body, &mut out, path).unwrap();
        assert_eq!(written, 100_000);
        assert_eq!(out.len(), 100_000);

        let err = copy_body(url, &mut BrokenBody, &mut Vec::new(), path).unwrap_err();
        assert_matches!(err, PackError::Network { url: failed, .. } if failed == url);

        let err = copy_body(url, &mut Cursor::new(b"data".to_vec()), &mut FullDisk, path)
            .unwrap_err();
        assert_matches!(err, PackError::Filesystem(message) if message.contains("no space left"));
    }
}
