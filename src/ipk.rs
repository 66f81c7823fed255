// src/ipk.rs

//! Reproducible package archive builder
//!
//! A package archive is a gzipped tar containing, in order, a
//! `debian-binary` marker, a `control.tar.gz` with the control stanza and
//! maintainer scripts, and a `data.tar.gz` with the package file tree.
//! Every piece of variable metadata is normalized: entry owners are
//! forced to uid/gid 0 with empty names, and all modification times (tar
//! entries and gzip headers alike) are pinned to a caller-supplied epoch.
//! Two builds from identical package content and the same epoch are
//! byte-identical.

use crate::error::Result;
use flate2::{Compression, GzBuilder};
use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tar::{Builder as TarBuilder, EntryType, Header};
use tracing::debug;
use walkdir::WalkDir;

/// Contents of the `debian-binary` format marker.
const FORMAT_MARKER: &[u8] = b"2.0\n";

/// Write a complete package archive to `output`.
///
/// `control` is the rendered control stanza, `scripts` maps maintainer
/// script names to their bodies, and `data_dir` is the packaging
/// directory holding the file tree to install.
pub fn write_ipk<W: Write>(
    output: W,
    epoch: u64,
    control: &str,
    scripts: &BTreeMap<String, String>,
    data_dir: &Path,
) -> Result<()> {
    let control_archive = make_control(epoch, control, scripts)?;
    let data_archive = make_data(epoch, data_dir)?;

    let gz = gz_writer(output, epoch);
    let mut archive = TarBuilder::new(gz);
    append_bytes(&mut archive, "./debian-binary", FORMAT_MARKER, 0o644, epoch)?;
    append_bytes(&mut archive, "./control.tar.gz", &control_archive, 0o644, epoch)?;
    append_bytes(&mut archive, "./data.tar.gz", &data_archive, 0o644, epoch)?;
    archive.into_inner()?.finish()?;

    Ok(())
}

/// Build the control sub-archive: the control stanza, then the maintainer
/// scripts marked executable.
fn make_control(epoch: u64, control: &str, scripts: &BTreeMap<String, String>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let gz = gz_writer(&mut buffer, epoch);
    let mut archive = TarBuilder::new(gz);

    append_bytes(&mut archive, "./control", control.as_bytes(), 0o644, epoch)?;
    for (name, body) in scripts {
        append_bytes(&mut archive, &format!("./{name}"), body.as_bytes(), 0o755, epoch)?;
    }

    archive.into_inner()?.finish()?;
    Ok(buffer)
}

/// Build the data sub-archive from the packaging directory. Entries are
/// written in sorted order with paths rewritten relative to the root and
/// prefixed with `./`; symbolic links are preserved as links.
fn make_data(epoch: u64, data_dir: &Path) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let gz = gz_writer(&mut buffer, epoch);
    let mut archive = TarBuilder::new(gz);

    for entry in WalkDir::new(data_dir).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(data_dir)
            .map_err(io::Error::other)?;

        let metadata = entry.metadata().map_err(io::Error::other)?;
        let mode = metadata.permissions().mode() & 0o7777;
        let file_type = entry.file_type();

        let name = if relative.as_os_str().is_empty() {
            "./".to_string()
        } else if file_type.is_dir() {
            format!("./{}/", relative.display())
        } else {
            format!("./{}", relative.display())
        };

        if file_type.is_dir() {
            let mut header = clean_header(mode, epoch);
            header.set_entry_type(EntryType::Directory);
            header.set_size(0);
            archive.append_data(&mut header, &name, io::empty())?;
        } else if file_type.is_symlink() {
            let target = fs::read_link(entry.path())?;
            let mut header = clean_header(mode, epoch);
            header.set_entry_type(EntryType::Symlink);
            header.set_size(0);
            archive.append_link(&mut header, &name, &target)?;
        } else {
            let mut header = clean_header(mode, epoch);
            header.set_entry_type(EntryType::Regular);
            header.set_size(metadata.len());
            archive.append_data(&mut header, &name, fs::File::open(entry.path())?)?;
        }
    }

    archive.into_inner()?.finish()?;
    debug!(bytes = buffer.len(), "packed data archive");
    Ok(buffer)
}

/// Gzip writer with its header timestamp pinned to the epoch.
fn gz_writer<W: Write>(inner: W, epoch: u64) -> flate2::write::GzEncoder<W> {
    GzBuilder::new()
        .mtime(epoch as u32)
        .write(inner, Compression::best())
}

/// A tar header with all variable metadata normalized.
fn clean_header(mode: u32, epoch: u64) -> Header {
    let mut header = Header::new_gnu();
    header.set_mode(mode);
    header.set_uid(0);
    header.set_gid(0);
    header.set_mtime(epoch);
    header
}

fn append_bytes<W: Write>(
    archive: &mut TarBuilder<W>,
    name: &str,
    data: &[u8],
    mode: u32,
    epoch: u64,
) -> Result<()> {
    let mut header = clean_header(mode, epoch);
    header.set_entry_type(EntryType::Regular);
    header.set_size(data.len() as u64);
    archive.append_data(&mut header, name, data)?;
    Ok(())
}
