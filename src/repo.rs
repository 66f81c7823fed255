// src/repo.rs

//! Repository index generation
//!
//! Writes the `Packages` index consumed by opkg-style clients, plus its
//! gzipped twin. Each stanza is a package's control fields followed by
//! the archive's filename, digest and size. Packages whose archive is not
//! present in the repository directory are skipped.

use crate::error::Result;
use crate::hash;
use crate::recipe::Recipe;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::fmt::Write as _;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

pub fn write_index(repo_dir: &Path, recipes: &[Recipe]) -> Result<()> {
    let mut index = fs::File::create(repo_dir.join("Packages"))?;
    let mut index_gz = GzEncoder::new(
        fs::File::create(repo_dir.join("Packages.gz"))?,
        Compression::best(),
    );

    let mut listed = 0usize;
    for recipe in recipes {
        for package in recipe.ordered_packages() {
            let filename = package.filename();
            let archive = repo_dir.join(&filename);
            if !archive.is_file() {
                debug!(package = %package.name, "archive missing, not indexed");
                continue;
            }

            let mut stanza = package.control(recipe);
            let _ = write!(
                stanza,
                "Filename: {}\nSHA256sum: {}\nSize: {}\n\n",
                filename,
                hash::file_sha256(&archive)?,
                fs::metadata(&archive)?.len(),
            );

            index.write_all(stanza.as_bytes())?;
            index_gz.write_all(stanza.as_bytes())?;
            listed += 1;
        }
    }

    index_gz.finish()?;
    info!(packages = listed, "wrote repository index");
    Ok(())
}
