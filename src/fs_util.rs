use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::error::PackError;

pub const MAX_FLATTEN_ROUNDS: usize = 32;
pub const SET_ASIDE_SUFFIX: &str = "flattening";

pub fn extract_zip(zip_path: &Path, target_dir: &Path) -> Result<(), PackError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| PackError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|err| PackError::Archive(format!("{}: {err}", zip_path.display())))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| PackError::Archive(err.to_string()))?;
        let entry_path = match entry.enclosed_name() {
            Some(path) => target_dir.join(path),
            None => {
                return Err(PackError::Archive(
                    "zip entry path traversal detected".to_string(),
                ));
            }
        };

        if entry.is_dir() {
            fs::create_dir_all(&entry_path)
                .map_err(|err| PackError::Filesystem(err.to_string()))?;
            continue;
        }

        if let Some(parent) = entry_path.parent() {
            fs::create_dir_all(parent).map_err(|err| PackError::Filesystem(err.to_string()))?;
        }
        let mut outfile =
            fs::File::create(&entry_path).map_err(|err| PackError::Filesystem(err.to_string()))?;
        io::copy(&mut entry, &mut outfile).map_err(|err| PackError::Archive(err.to_string()))?;
    }
    Ok(())
}

pub fn validate_zip(zip_path: &Path) -> Result<(), PackError> {
    let file = fs::File::open(zip_path)
        .map_err(|err| PackError::Filesystem(format!("open zip {}: {err}", zip_path.display())))?;
    let mut archive = ZipArchive::new(file)
        .map_err(|err| PackError::Archive(format!("{}: {err}", zip_path.display())))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|err| PackError::Archive(err.to_string()))?;
        if entry.is_dir() {
            continue;
        }
        io::copy(&mut entry, &mut io::sink()).map_err(|err| PackError::Archive(err.to_string()))?;
    }
    Ok(())
}

/// The only entry of `dir`, which must be a directory.
pub fn single_top_level_dir(dir: &Path) -> Result<PathBuf, PackError> {
    let entries = fs::read_dir(dir)
        .map_err(|err| PackError::Filesystem(err.to_string()))?
        .collect::<Result<Vec<_>, _>>()
        .map_err(|err| PackError::Filesystem(err.to_string()))?;
    match entries.as_slice() {
        [entry] if entry.path().is_dir() => Ok(entry.path()),
        [entry] => Err(PackError::Archive(format!(
            "archive root holds a single file, expected a directory: {}",
            entry.file_name().to_string_lossy()
        ))),
        [] => Err(PackError::Archive("archive is empty".to_string())),
        many => Err(PackError::Archive(format!(
            "archive root holds {} entries, expected exactly one directory",
            many.len()
        ))),
    }
}

/// Extracts every `.zip` and gunzips every `.gz` below `dir` next to itself,
/// removing the consumed archive, until none remain.
pub fn flatten_nested(dir: &Path) -> Result<usize, PackError> {
    let mut consumed = 0;
    for _ in 0..MAX_FLATTEN_ROUNDS {
        let archives = walk_files(dir)?
            .into_iter()
            .filter(|path| nested_archive_ext(path).is_some())
            .collect::<Vec<_>>();
        if archives.is_empty() {
            return Ok(consumed);
        }
        for archive in archives {
            let Some(kind) = nested_archive_ext(&archive) else {
                continue;
            };
            let parent = archive.parent().unwrap_or(dir);
            // entries may carry the archive's own name
            let held = set_aside(&archive)?;
            match kind {
                "zip" => extract_zip(&held, parent)?,
                _ => gunzip(&held, &archive.with_extension(""))?,
            }
            fs::remove_file(&held).map_err(|err| PackError::Filesystem(err.to_string()))?;
            consumed += 1;
        }
    }
    Err(PackError::Archive(format!(
        "nested archives under {} still present after {MAX_FLATTEN_ROUNDS} rounds",
        dir.display()
    )))
}

fn nested_archive_ext(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?;
    if ext.eq_ignore_ascii_case("zip") {
        Some("zip")
    } else if ext.eq_ignore_ascii_case("gz") {
        Some("gz")
    } else {
        None
    }
}

/// Renames `archive` to a hidden sibling that no longer looks like an archive.
fn set_aside(archive: &Path) -> Result<PathBuf, PackError> {
    let name = archive
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default();
    let held = archive.with_file_name(format!(".{name}.{SET_ASIDE_SUFFIX}"));
    fs::rename(archive, &held).map_err(|err| PackError::Filesystem(err.to_string()))?;
    Ok(held)
}

fn gunzip(path: &Path, target: &Path) -> Result<(), PackError> {
    let file = fs::File::open(path).map_err(|err| PackError::Filesystem(err.to_string()))?;
    let mut decoder = GzDecoder::new(file);
    let mut out = fs::File::create(target).map_err(|err| PackError::Filesystem(err.to_string()))?;
    io::copy(&mut decoder, &mut out)
        .map_err(|err| PackError::Archive(format!("{}: {err}", path.display())))?;
    Ok(())
}

/// Writes every file under `source_dir` into a deflated zip, with paths
/// relative to `source_dir`. Returns the number of files written.
pub fn zip_dir(source_dir: &Path, output: &Path) -> Result<usize, PackError> {
    let file =
        fs::File::create(output).map_err(|err| PackError::Packaging(err.to_string()))?;
    let mut zip = ZipWriter::new(file);

    let mut files = if source_dir.exists() {
        walk_files(source_dir)?
    } else {
        Vec::new()
    };
    files.sort();

    for path in &files {
        let relative = path
            .strip_prefix(source_dir)
            .map_err(|err| PackError::Packaging(err.to_string()))?;
        let name = relative
            .components()
            .map(|part| part.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let options = SimpleFileOptions::default()
            .compression_method(CompressionMethod::Deflated)
            .unix_permissions(file_mode(path));
        zip.start_file(name, options)
            .map_err(|err| PackError::Packaging(err.to_string()))?;
        let mut input =
            fs::File::open(path).map_err(|err| PackError::Packaging(err.to_string()))?;
        io::copy(&mut input, &mut zip).map_err(|err| PackError::Packaging(err.to_string()))?;
    }

    zip.finish()
        .map_err(|err| PackError::Packaging(err.to_string()))?;
    Ok(files.len())
}

#[cfg(unix)]
fn file_mode(path: &Path) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    fs::metadata(path)
        .map(|meta| meta.permissions().mode() & 0o777)
        .unwrap_or(0o644)
}

#[cfg(not(unix))]
fn file_mode(_path: &Path) -> u32 {
    0o644
}

pub fn walk_files(root: &Path) -> Result<Vec<PathBuf>, PackError> {
    let mut items = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(path) = stack.pop() {
        let entries = fs::read_dir(&path).map_err(|err| PackError::Filesystem(err.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|err| PackError::Filesystem(err.to_string()))?;
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
            } else {
                items.push(path);
            }
        }
    }
    Ok(items)
}

pub fn dir_is_empty(dir: &Path) -> Result<bool, PackError> {
    let mut entries = fs::read_dir(dir).map_err(|err| PackError::Filesystem(err.to_string()))?;
    Ok(entries.next().is_none())
}

pub fn remove_path(path: &Path) -> Result<(), PackError> {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        return Ok(());
    };
    result.map_err(|err| PackError::Filesystem(err.to_string()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use assert_matches::assert_matches;

    use super::*;

    fn write_zip(path: &Path, entries: &[(&str, &[u8])]) {
        let mut zip = ZipWriter::new(fs::File::create(path).unwrap());
        for (name, body) in entries {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(body).unwrap();
        }
        zip.finish().unwrap();
    }

    #[test]
    fn flatten_nested_zip_in_zip() {
        let temp = tempfile::tempdir().unwrap();
        let inner = temp.path().join("inner.zip");
        write_zip(&inner, &[("deep/a.txt", &b"a"[..])]);
        let inner_bytes = fs::read(&inner).unwrap();
        fs::remove_file(&inner).unwrap();

        let dir = temp.path().join("out");
        fs::create_dir_all(&dir).unwrap();
        write_zip(
            &dir.join("outer.zip"),
            &[("inner.zip", inner_bytes.as_slice()), ("b.txt", &b"b"[..])],
        );

        let consumed = flatten_nested(&dir).unwrap();
        assert_eq!(consumed, 2);
        assert!(dir.join("deep/a.txt").exists());
        assert!(dir.join("b.txt").exists());
        assert!(walk_files(&dir).unwrap().iter().all(|p| nested_archive_ext(p).is_none()));
    }

    #[test]
    fn flatten_survives_entry_named_like_its_archive() {
        let temp = tempfile::tempdir().unwrap();
        let inner = temp.path().join("inner.zip");
        write_zip(&inner, &[("x.txt", &b"x"[..])]);
        let inner_bytes = fs::read(&inner).unwrap();

        let dir = temp.path().join("out");
        fs::create_dir_all(&dir).unwrap();
        write_zip(&dir.join("a.zip"), &[("a.zip", inner_bytes.as_slice())]);

        assert_eq!(flatten_nested(&dir).unwrap(), 2);
        assert_eq!(fs::read(dir.join("x.txt")).unwrap(), b"x");
        let left = walk_files(&dir).unwrap();
        assert_eq!(left, vec![dir.join("x.txt")]);
    }

    #[test]
    fn top_level_requires_single_dir() {
        let temp = tempfile::tempdir().unwrap();
        fs::write(temp.path().join("a.txt"), b"a").unwrap();
        fs::write(temp.path().join("b.txt"), b"b").unwrap();
        let err = single_top_level_dir(temp.path()).unwrap_err();
        assert_matches!(err, PackError::Archive(_));
    }

    #[test]
    fn corrupt_zip_is_archive_error() {
        let temp = tempfile::tempdir().unwrap();
        let path = temp.path().join("broken.zip");
        fs::write(&path, b"not a zip").unwrap();
        assert_matches!(validate_zip(&path), Err(PackError::Archive(_)));
    }
}
