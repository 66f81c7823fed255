// src/build/mod.rs

//! The build pipeline
//!
//! Drives a recipe through its stages in strict order: fetch, prepare,
//! build, strip, package, archive. All side effects go through the
//! executor and fetcher seams; the pipeline itself only orchestrates and
//! owns the working directory layout (`src` tree, per-package `pkg`
//! trees, archives written next to them). There is no parallelism inside
//! one recipe, no cancellation and no rollback: an aborted build leaves
//! the working directory behind for the caller to clean up.

mod fetch;

use crate::bash::{serialize, Value, Variables};
use crate::error::Result;
use crate::exec::{BindMount, Executor, Job};
use crate::fetch::Fetcher;
use crate::ipk;
use crate::recipe::{Package, Recipe};
use nix::unistd::{Gid, Uid};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, info_span};

/// Path the source tree is mounted at inside build containers.
const MOUNT_SRC: &str = "/src";

/// Registry namespace the build images live under.
const IMAGE_PREFIX: &str = "ghcr.io/toltec-dev/";

/// Image used for the strip stage, which needs the cross toolchain.
const STRIP_IMAGE: &str = "toolchain:v1.3.1";

/// Strips every executable in the source tree with both the target and
/// host toolchains. Files neither can process are left untouched.
const STRIP_SCRIPT: &str = r#"shopt -s globstar nullglob
for binary in "$srcdir"/**/*; do
    [[ -f $binary && -x $binary ]] || continue
    "${CROSS_COMPILE:-}strip" --strip-all -- "$binary" 2> /dev/null || true
    strip --strip-all -- "$binary" 2> /dev/null || true
done
"#;

/// Install-hook to maintainer-script mapping: hook name, Debian script
/// name, action word the script body is guarded by. Hooks sharing a
/// script name merge into one file.
const SCRIPT_MAP: [(&str, &str, &str); 6] = [
    ("preinstall", "preinst", "install"),
    ("preupgrade", "preinst", "upgrade"),
    ("configure", "postinst", "configure"),
    ("postupgrade", "postinst", "upgrade"),
    ("preremove", "prerm", "remove"),
    ("postremove", "postrm", "remove"),
];

#[derive(Error, Debug)]
pub enum BuildError {
    #[error("checksum mismatch for {file}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        file: String,
        expected: String,
        actual: String,
    },

    #[error("fetching {url} failed with status {status}")]
    FetchFailed { url: String, status: u16 },

    #[error("recipe '{recipe}' declares no package named '{package}'")]
    UnknownPackage { recipe: String, package: String },

    #[error("build script failed with exit status {0}")]
    ScriptFailed(i32),

    #[error("no container runtime available to run image '{0}'")]
    NoRuntime(String),
}

/// Pipeline stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    Fetch,
    Prepare,
    Build,
    Strip,
    Package,
    Archive,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Fetch => "fetch",
            Stage::Prepare => "prepare",
            Stage::Build => "build",
            Stage::Strip => "strip",
            Stage::Package => "package",
            Stage::Archive => "archive",
        })
    }
}

/// Drives recipes through the pipeline.
pub struct Builder<'a> {
    executor: &'a dyn Executor,
    fetcher: &'a dyn Fetcher,
}

impl<'a> Builder<'a> {
    pub fn new(executor: &'a dyn Executor, fetcher: &'a dyn Fetcher) -> Self {
        Self { executor, fetcher }
    }

    /// Build a recipe inside `work_dir` and return the paths of the
    /// archives written. `packages` restricts the set of packages built;
    /// `None` builds them all. An unknown package name fails before any
    /// stage runs.
    pub fn make(
        &self,
        recipe: &Recipe,
        work_dir: &Path,
        packages: Option<&[String]>,
    ) -> Result<Vec<PathBuf>> {
        let selected = select(recipe, packages)?;

        let span = info_span!("build", recipe = %recipe.name);
        let _enter = span.enter();

        let src_dir = work_dir.join("src");
        fs::create_dir_all(&src_dir)?;

        self.fetch(recipe, &src_dir)?;
        self.prepare(recipe, &src_dir)?;
        self.compile(recipe, &src_dir)?;
        self.strip(&src_dir)?;

        let mut archives = Vec::new();
        for package in selected {
            let pkg_dir = work_dir.join("pkg").join(&package.name);
            fs::create_dir_all(&pkg_dir)?;
            self.package(package, &src_dir, &pkg_dir)?;
            archives.push(self.archive(recipe, package, &pkg_dir, work_dir)?);
        }

        Ok(archives)
    }

    fn run(&self, job: Job) -> Result<()> {
        let status = self.executor.execute(&job)?;
        if status != 0 {
            return Err(BuildError::ScriptFailed(status).into());
        }
        Ok(())
    }

    /// Transfer, verify and unpack every declared source.
    fn fetch(&self, recipe: &Recipe, src_dir: &Path) -> Result<()> {
        for (source, checksum) in recipe.sources.iter().zip(&recipe.sha256sums) {
            let file_name = source.rsplit('/').next().unwrap_or(source);
            let dest = src_dir.join(file_name);

            if fetch::is_remote(source) {
                info!(stage = %Stage::Fetch, url = %source, "fetching remote source");
                fetch::fetch_remote(self.fetcher, source, &dest)?;
            } else {
                info!(stage = %Stage::Fetch, file = %source, "copying local source");
                fs::copy(recipe.root.join(source), &dest)?;
            }

            fetch::verify_checksum(&dest, checksum)?;

            if !recipe.noextract.iter().any(|n| n == file_name)
                && fetch::auto_extract(&dest, src_dir)?
            {
                fs::remove_file(&dest)?;
            }
        }

        Ok(())
    }

    fn prepare(&self, recipe: &Recipe, src_dir: &Path) -> Result<()> {
        let Some(body) = &recipe.prepare else {
            debug!(stage = %Stage::Prepare, "no prepare step declared");
            return Ok(());
        };

        info!(stage = %Stage::Prepare, "preparing sources");
        let mut variables = Variables::new();
        variables.insert("srcdir".into(), Value::Scalar(src_dir.display().to_string()));

        self.run(Job {
            image: None,
            mounts: vec![],
            variables,
            script: body.clone(),
        })
    }

    /// Run the build step in its container, with the source tree mounted
    /// and an ownership fixup appended so the host user keeps control of
    /// the files the container wrote.
    fn compile(&self, recipe: &Recipe, src_dir: &Path) -> Result<()> {
        let Some(body) = &recipe.build else {
            debug!(stage = %Stage::Build, "no build step declared");
            return Ok(());
        };

        info!(stage = %Stage::Build, image = ?recipe.image, "building sources");

        let mut script = body.clone();
        script.push_str(&format!(
            "\nchown -R {}:{} {}\n",
            Uid::current(),
            Gid::current(),
            MOUNT_SRC
        ));

        let mut variables = Variables::new();
        variables.insert("srcdir".into(), Value::Scalar(MOUNT_SRC.into()));

        self.run(Job {
            image: recipe.image.as_deref().map(|tag| format!("{IMAGE_PREFIX}{tag}")),
            mounts: vec![BindMount {
                source: src_dir.to_path_buf(),
                target: MOUNT_SRC.into(),
            }],
            variables,
            script,
        })
    }

    /// The strip stage always runs, even for recipes without a build
    /// step: pre-built payloads carry executables too.
    fn strip(&self, src_dir: &Path) -> Result<()> {
        info!(stage = %Stage::Strip, "stripping binaries");
        let mut variables = Variables::new();
        variables.insert("srcdir".into(), Value::Scalar(MOUNT_SRC.into()));

        self.run(Job {
            image: Some(format!("{IMAGE_PREFIX}{STRIP_IMAGE}")),
            mounts: vec![BindMount {
                source: src_dir.to_path_buf(),
                target: MOUNT_SRC.into(),
            }],
            variables,
            script: STRIP_SCRIPT.into(),
        })
    }

    fn package(&self, package: &Package, src_dir: &Path, pkg_dir: &Path) -> Result<()> {
        info!(stage = %Stage::Package, package = %package.name, "packaging");

        let mut variables = Variables::new();
        variables.insert("srcdir".into(), Value::Scalar(src_dir.display().to_string()));
        variables.insert("pkgdir".into(), Value::Scalar(pkg_dir.display().to_string()));

        self.run(Job {
            image: None,
            mounts: vec![],
            variables,
            script: package.action.clone(),
        })
    }

    fn archive(
        &self,
        recipe: &Recipe,
        package: &Package,
        pkg_dir: &Path,
        out_dir: &Path,
    ) -> Result<PathBuf> {
        let scripts = maintainer_scripts(package);
        let path = out_dir.join(package.filename());

        let file = fs::File::create(&path)?;
        ipk::write_ipk(
            io::BufWriter::new(file),
            recipe.epoch(),
            &package.control(recipe),
            &scripts,
            pkg_dir,
        )?;

        info!(stage = %Stage::Archive, path = %path.display(), "wrote package archive");
        Ok(path)
    }
}

fn select<'r>(recipe: &'r Recipe, requested: Option<&[String]>) -> Result<Vec<&'r Package>> {
    match requested {
        None => Ok(recipe.ordered_packages().collect()),
        Some(names) => names
            .iter()
            .map(|name| {
                recipe.packages.get(name).ok_or_else(|| {
                    BuildError::UnknownPackage {
                        recipe: recipe.name.clone(),
                        package: name.clone(),
                    }
                    .into()
                })
            })
            .collect(),
    }
}

/// Generate the Debian maintainer scripts for a package's install hooks.
/// Each script starts with a preamble re-injecting the package's
/// declarations and identity, followed by one action-guarded section per
/// contributing hook.
fn maintainer_scripts(package: &Package) -> BTreeMap<String, String> {
    let mut scripts = BTreeMap::new();

    for (hook, script_name, action) in SCRIPT_MAP {
        let Some(body) = package.install.get(hook) else {
            continue;
        };

        let entry = scripts.entry(script_name.to_string()).or_insert_with(|| {
            let mut variables = package.variables.clone();
            variables.insert("pkgname".into(), Value::Scalar(package.name.clone()));
            variables.insert("pkgver".into(), Value::Scalar(package.version.to_string()));
            variables.insert("arch".into(), Value::Scalar(package.arch.clone()));
            format!("#!/usr/bin/env bash\n{}", serialize::render(&variables))
        });

        entry.push_str(&format!("if [[ $1 = {action} ]]; then\n{body}\nfi\n"));
    }

    scripts
}
