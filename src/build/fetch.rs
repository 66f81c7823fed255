// src/build/fetch.rs

//! Source transfer, verification and automatic extraction

use super::BuildError;
use crate::error::Result;
use crate::fetch::Fetcher;
use crate::hash;
use filetime::FileTime;
use flate2::read::GzDecoder;
use std::fs;
use std::io::{self, Read};
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Checksum sentinel that disables verification for one source.
const SKIP_CHECKSUM: &str = "SKIP";

/// Sources with a scheme prefix are fetched over HTTP; everything else is
/// a file relative to the recipe root.
pub(super) fn is_remote(source: &str) -> bool {
    source.contains("://")
}

/// Download a remote source to `dest`, preserving the server-reported
/// modification time when one is sent.
pub(super) fn fetch_remote(fetcher: &dyn Fetcher, url: &str, dest: &Path) -> Result<()> {
    let mut resource = fetcher.get(url)?;
    if !(200..300).contains(&resource.status) {
        return Err(BuildError::FetchFailed {
            url: url.to_string(),
            status: resource.status,
        }
        .into());
    }

    let mut file = fs::File::create(dest)?;
    io::copy(&mut resource.body, &mut file)?;
    drop(file);

    if let Some(modified) = resource.last_modified {
        filetime::set_file_mtime(dest, FileTime::from_unix_time(modified.timestamp(), 0))?;
    }

    Ok(())
}

/// Verify a fetched file against its declared SHA-256 digest, unless the
/// declaration is the `SKIP` sentinel.
pub(super) fn verify_checksum(path: &Path, expected: &str) -> Result<()> {
    if expected == SKIP_CHECKSUM {
        return Ok(());
    }

    let actual = hash::file_sha256(path)?;
    if actual != expected {
        return Err(BuildError::ChecksumMismatch {
            file: path.display().to_string(),
            expected: expected.to_string(),
            actual,
        }
        .into());
    }

    Ok(())
}

/// Extract a recognized archive into `dest_dir`, stripping the longest
/// directory prefix shared by all members. Returns false when the file is
/// not a supported archive type.
pub(super) fn auto_extract(archive: &Path, dest_dir: &Path) -> Result<bool> {
    let name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    if name.ends_with(".zip") {
        extract_zip(archive, dest_dir)?;
        Ok(true)
    } else if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
        extract_tar(
            || Ok(Box::new(GzDecoder::new(fs::File::open(archive)?))),
            dest_dir,
        )?;
        Ok(true)
    } else if name.ends_with(".tar") {
        extract_tar(|| Ok(Box::new(fs::File::open(archive)?)), dest_dir)?;
        Ok(true)
    } else {
        Ok(false)
    }
}

/// Map each member path to its destination with the longest shared
/// directory prefix removed. A lone member keeps its final path segment;
/// members left empty by the strip are dropped.
fn strip_shared_prefix(names: &[String]) -> Vec<(String, PathBuf)> {
    let split: Vec<Vec<&str>> = names
        .iter()
        .map(|name| {
            Path::new(name)
                .components()
                .filter_map(|c| match c {
                    Component::Normal(part) => part.to_str(),
                    _ => None,
                })
                .collect()
        })
        .collect();

    let min_len = split.iter().map(Vec::len).min().unwrap_or(0);
    let mut prefix = 0;
    while prefix < min_len && split.iter().all(|parts| parts[prefix] == split[0][prefix]) {
        prefix += 1;
    }

    if names.len() == 1 {
        prefix = prefix.saturating_sub(1);
    }

    names
        .iter()
        .zip(&split)
        .filter(|(_, parts)| parts.len() > prefix)
        .map(|(name, parts)| (name.clone(), parts[prefix..].iter().collect()))
        .collect()
}

fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = fs::File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file).map_err(io::Error::from)?;

    let names: Vec<String> = archive.file_names().map(str::to_string).collect();
    debug!(members = names.len(), "extracting zip archive");

    for (name, stripped) in strip_shared_prefix(&names) {
        let mut member = archive.by_name(&name).map_err(io::Error::from)?;
        let target = dest_dir.join(stripped);

        if member.is_dir() {
            fs::create_dir_all(&target)?;
        } else {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut out = fs::File::create(&target)?;
            io::copy(&mut member, &mut out)?;
            if let Some(mode) = member.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode))?;
            }
        }
    }

    Ok(())
}

/// Tar entries can only be read in stream order, so the archive is opened
/// twice: once to list the members and once to unpack them.
fn extract_tar<F>(open: F, dest_dir: &Path) -> Result<()>
where
    F: Fn() -> Result<Box<dyn Read>>,
{
    let mut names = Vec::new();
    for entry in tar::Archive::new(open()?).entries()? {
        names.push(entry?.path()?.display().to_string());
    }
    debug!(members = names.len(), "extracting tar archive");

    let mapping = strip_shared_prefix(&names);

    for entry in tar::Archive::new(open()?).entries()? {
        let mut entry = entry?;
        let name = entry.path()?.display().to_string();
        let Some((_, stripped)) = mapping.iter().find(|(member, _)| *member == name) else {
            continue;
        };

        let target = dest_dir.join(stripped);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
    }

    Ok(())
}
