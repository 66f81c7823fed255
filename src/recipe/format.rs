// src/recipe/format.rs

//! The immutable recipe data model and its control-stanza rendering

use crate::bash::Variables;
use crate::version::Version;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::fmt::Write;
use std::path::PathBuf;

/// Target architecture assumed when a package does not declare one.
pub const DEFAULT_ARCH: &str = "armv7-3.2";

/// A parsed and validated recipe: the build plan for one or more packages.
#[derive(Debug, Clone)]
pub struct Recipe {
    /// Name of the recipe (usually its directory name).
    pub name: String,
    /// Directory local sources are copied from.
    pub root: PathBuf,
    /// Declared timestamp; all archive entry mtimes derive from it.
    pub timestamp: DateTime<Utc>,
    pub maintainer: String,
    /// Build-image tag; present exactly when a `build()` step exists.
    pub image: Option<String>,
    /// Parallel with `sha256sums`.
    pub sources: Vec<String>,
    pub sha256sums: Vec<String>,
    /// Fetched files that must not be auto-extracted.
    pub noextract: Vec<String>,
    pub prepare: Option<String>,
    pub build: Option<String>,
    /// Declaration order of the packages.
    pub package_names: Vec<String>,
    pub packages: BTreeMap<String, Package>,
}

impl Recipe {
    /// The fixed epoch used for reproducible archives, derived from the
    /// declared timestamp.
    pub fn epoch(&self) -> u64 {
        self.timestamp.timestamp().max(0) as u64
    }

    /// Packages in declaration order.
    pub fn ordered_packages(&self) -> impl Iterator<Item = &Package> {
        self.package_names
            .iter()
            .filter_map(|name| self.packages.get(name))
    }
}

/// One installable unit produced by a recipe.
#[derive(Debug, Clone)]
pub struct Package {
    pub name: String,
    pub version: Version,
    pub arch: String,
    pub description: String,
    pub url: String,
    pub section: String,
    pub license: String,
    pub depends: Vec<String>,
    pub conflicts: Vec<String>,
    /// Effective declaration set, package-local over recipe-wide; this is
    /// what generated maintainer scripts re-inject.
    pub variables: Variables,
    /// Body of the required `package()` action.
    pub action: String,
    pub install: InstallHooks,
}

/// Optional install-hook bodies declared by a package.
#[derive(Debug, Clone, Default)]
pub struct InstallHooks {
    pub preinstall: Option<String>,
    pub configure: Option<String>,
    pub preremove: Option<String>,
    pub postremove: Option<String>,
    pub preupgrade: Option<String>,
    pub postupgrade: Option<String>,
}

impl InstallHooks {
    pub fn get(&self, name: &str) -> Option<&str> {
        let hook = match name {
            "preinstall" => &self.preinstall,
            "configure" => &self.configure,
            "preremove" => &self.preremove,
            "postremove" => &self.postremove,
            "preupgrade" => &self.preupgrade,
            "postupgrade" => &self.postupgrade,
            _ => &None,
        };
        hook.as_deref()
    }
}

impl Package {
    /// Unique identifier of this package within the repository.
    pub fn id(&self) -> String {
        format!("{}_{}_{}", self.name, self.version, self.arch)
    }

    /// Name of the archive file built for this package.
    pub fn filename(&self) -> String {
        format!("{}.ipk", self.id())
    }

    /// The full control stanza; the maintainer field comes from the
    /// parent recipe.
    pub fn control(&self, recipe: &Recipe) -> String {
        let mut control = String::new();
        let _ = write!(
            control,
            "Package: {}\n\
             Version: {}\n\
             Maintainer: {}\n\
             Section: {}\n\
             Architecture: {}\n\
             Description: {}\n\
             HomePage: {}\n\
             License: {}\n",
            self.name,
            self.version,
            recipe.maintainer,
            self.section,
            self.arch,
            self.description,
            self.url,
            self.license,
        );

        if let Some(depends) = join_relations(&self.depends) {
            let _ = writeln!(control, "Depends: {}", depends);
        }
        if let Some(conflicts) = join_relations(&self.conflicts) {
            let _ = writeln!(control, "Conflicts: {}", conflicts);
        }

        control
    }
}

/// Comma-join a relation list, skipping blank entries; `None` when
/// nothing remains.
fn join_relations(entries: &[String]) -> Option<String> {
    let joined = entries
        .iter()
        .filter(|e| !e.is_empty())
        .cloned()
        .collect::<Vec<_>>()
        .join(", ");

    if joined.is_empty() {
        None
    } else {
        Some(joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_recipe() -> Recipe {
        Recipe {
            name: "sample".into(),
            root: PathBuf::from("/recipes/sample"),
            timestamp: Utc.with_ymd_and_hms(2023, 6, 1, 12, 0, 0).unwrap(),
            maintainer: "Jo Doe <jo@example.org>".into(),
            image: None,
            sources: vec![],
            sha256sums: vec![],
            noextract: vec![],
            prepare: None,
            build: None,
            package_names: vec!["foo".into()],
            packages: BTreeMap::new(),
        }
    }

    fn sample_package() -> Package {
        Package {
            name: "foo".into(),
            version: Version::parse("1.2-3").unwrap(),
            arch: DEFAULT_ARCH.into(),
            description: "An example".into(),
            url: "https://example.org".into(),
            section: "utils".into(),
            license: "MIT".into(),
            depends: vec![],
            conflicts: vec![],
            variables: Variables::new(),
            action: "true".into(),
            install: InstallHooks::default(),
        }
    }

    #[test]
    fn test_identifier_and_filename() {
        let pkg = sample_package();
        assert_eq!(pkg.id(), "foo_1.2-3_armv7-3.2");
        assert_eq!(pkg.filename(), "foo_1.2-3_armv7-3.2.ipk");
    }

    #[test]
    fn test_control_stanza() {
        let recipe = sample_recipe();
        let pkg = sample_package();
        let control = pkg.control(&recipe);

        assert_eq!(
            control,
            "Package: foo\n\
             Version: 1.2-3\n\
             Maintainer: Jo Doe <jo@example.org>\n\
             Section: utils\n\
             Architecture: armv7-3.2\n\
             Description: An example\n\
             HomePage: https://example.org\n\
             License: MIT\n"
        );
    }

    #[test]
    fn test_control_relations_skip_blank_entries() {
        let recipe = sample_recipe();
        let mut pkg = sample_package();
        pkg.depends = vec!["a".into(), String::new(), "b".into()];
        pkg.conflicts = vec![String::new()];

        let control = pkg.control(&recipe);
        assert!(control.contains("Depends: a, b\n"));
        assert!(!control.contains("Conflicts"));
    }

    #[test]
    fn test_epoch_from_timestamp() {
        let recipe = sample_recipe();
        assert_eq!(recipe.epoch(), 1685620800);
    }
}
