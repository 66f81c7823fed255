// tests/build.rs

//! End-to-end build tests
//!
//! These run a real recipe through the full pipeline: bash declaration
//! extraction, validation, host execution of the package step and
//! reproducible archive output.

use bakery::bash::Value;
use bakery::fetch::{RemoteHead, RemoteResource};
use bakery::{Builder, Error, Executor, Fetcher, HostExecutor, Job, Recipe, Result};
use flate2::read::GzDecoder;
use std::fs;
use std::io::Read;
use std::path::Path;
use tempfile::TempDir;

fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Stand-in for a container runtime: image jobs run in a local bash
/// process instead, with scalar variables pointing at mount targets
/// remapped to the mounted host directories.
struct LocalRuntime(HostExecutor);

impl Executor for LocalRuntime {
    fn execute(&self, job: &Job) -> Result<i32> {
        if job.image.is_none() {
            return self.0.execute(job);
        }

        let mut variables = job.variables.clone();
        for mount in &job.mounts {
            for value in variables.values_mut() {
                if let Value::Scalar(path) = value {
                    if path == &mount.target {
                        *path = mount.source.display().to_string();
                    }
                }
            }
        }

        self.0.execute(&Job {
            image: None,
            mounts: vec![],
            variables,
            script: job.script.clone(),
        })
    }
}

/// Stand-in for the network; the tests only use local sources.
struct OfflineFetcher;

impl Fetcher for OfflineFetcher {
    fn get(&self, url: &str) -> Result<RemoteResource> {
        panic!("unexpected network access to {url}");
    }

    fn head(&self, url: &str) -> Result<RemoteHead> {
        panic!("unexpected network access to {url}");
    }
}

const RECIPE: &str = r#"
pkgnames=(hello)
timestamp=2023-06-01T12:00:00Z
maintainer='Jo Doe <jo@example.org>'
pkgver=1.2-3
pkgdesc='Friendly greeter'
url=https://example.org/hello
section=utils
license=MIT
greeting='hello world'
source=(hello.sh)
sha256sums=(SKIP)

package() {
    install -D -m 755 "$srcdir"/hello.sh "$pkgdir"/opt/bin/hello
}

configure() {
    echo configured
}
"#;

fn write_recipe(dir: &Path) -> Recipe {
    fs::write(dir.join("hello.sh"), "#!/bin/sh\necho hello\n").unwrap();
    Recipe::new("hello", dir, RECIPE).unwrap()
}

fn build_once(recipe: &Recipe, work_dir: &Path) -> Vec<u8> {
    let executor = LocalRuntime(HostExecutor::new());
    let builder = Builder::new(&executor, &OfflineFetcher);
    let archives = builder.make(recipe, work_dir, None).unwrap();
    assert_eq!(archives.len(), 1);
    fs::read(&archives[0]).unwrap()
}

#[test]
fn test_full_build_produces_expected_archive() {
    init_logging();
    let recipe_dir = TempDir::new().unwrap();
    let work_dir = TempDir::new().unwrap();
    let recipe = write_recipe(recipe_dir.path());

    let executor = LocalRuntime(HostExecutor::new());
    let builder = Builder::new(&executor, &OfflineFetcher);
    let archives = builder.make(&recipe, work_dir.path(), None).unwrap();

    assert_eq!(
        archives,
        vec![work_dir.path().join("hello_1.2-3_armv7-3.2.ipk")]
    );

    // Outer structure: format marker, control, data, in that order.
    let bytes = fs::read(&archives[0]).unwrap();
    let mut outer = tar::Archive::new(GzDecoder::new(&bytes[..]));
    let mut names = Vec::new();
    let mut inner = Vec::new();
    for entry in outer.entries().unwrap() {
        let mut entry = entry.unwrap();
        names.push(entry.path().unwrap().display().to_string());
        let mut content = Vec::new();
        entry.read_to_end(&mut content).unwrap();
        inner.push(content);
    }
    assert_eq!(
        names,
        vec!["./debian-binary", "./control.tar.gz", "./data.tar.gz"]
    );
    assert_eq!(inner[0], b"2.0\n");

    // Control archive: the stanza plus the generated postinst.
    let mut control_names = Vec::new();
    let mut control_texts = Vec::new();
    let mut control = tar::Archive::new(GzDecoder::new(&inner[1][..]));
    for entry in control.entries().unwrap() {
        let mut entry = entry.unwrap();
        control_names.push(entry.path().unwrap().display().to_string());
        let mut text = String::new();
        entry.read_to_string(&mut text).unwrap();
        control_texts.push(text);
    }
    assert_eq!(control_names, vec!["./control", "./postinst"]);
    assert!(control_texts[0].contains("Package: hello\n"));
    assert!(control_texts[0].contains("Version: 1.2-3\n"));
    assert!(control_texts[0].contains("Maintainer: Jo Doe <jo@example.org>\n"));
    assert!(control_texts[0].contains("Architecture: armv7-3.2\n"));
    assert!(control_texts[1].contains("if [[ $1 = configure ]]; then"));
    assert!(control_texts[1].contains("declare -- pkgname=hello"));
    // Recipe-declared variables are available to hook bodies at
    // install time.
    assert!(control_texts[1].contains("declare -- greeting='hello world'"));

    // Data archive: the installed file under its ./-relative path.
    let mut data = tar::Archive::new(GzDecoder::new(&inner[2][..]));
    let mut data_names = Vec::new();
    for entry in data.entries().unwrap() {
        let entry = entry.unwrap();
        assert_eq!(entry.header().uid().unwrap(), 0);
        assert_eq!(entry.header().mtime().unwrap(), recipe.epoch());
        data_names.push(entry.path().unwrap().display().to_string());
    }
    assert!(data_names.contains(&"./opt/bin/hello".to_string()));
}

#[test]
fn test_rebuilds_are_byte_identical() {
    init_logging();
    let recipe_dir = TempDir::new().unwrap();
    let recipe = write_recipe(recipe_dir.path());

    let first_dir = TempDir::new().unwrap();
    let second_dir = TempDir::new().unwrap();

    let first = build_once(&recipe, first_dir.path());
    std::thread::sleep(std::time::Duration::from_millis(1100));
    let second = build_once(&recipe, second_dir.path());

    assert_eq!(first, second);
}

#[test]
fn test_unknown_requested_package_fails() {
    init_logging();
    let recipe_dir = TempDir::new().unwrap();
    let work_dir = TempDir::new().unwrap();
    let recipe = write_recipe(recipe_dir.path());

    let executor = LocalRuntime(HostExecutor::new());
    let builder = Builder::new(&executor, &OfflineFetcher);
    let result = builder.make(&recipe, work_dir.path(), Some(&["other".to_string()][..]));

    assert!(matches!(result, Err(Error::Build(_))));
    assert!(!work_dir.path().join("src").exists());
}

#[test]
fn test_split_recipe_builds_each_package() {
    init_logging();
    let recipe_dir = TempDir::new().unwrap();
    let work_dir = TempDir::new().unwrap();

    let source = r#"
pkgnames=(tool tool-docs)
timestamp=2023-06-01T12:00:00Z
maintainer='Jo Doe <jo@example.org>'
pkgver=2.0-1
url=https://example.org/tool
section=utils
license=MIT

tool() {
    pkgdesc='The tool'
    package() {
        mkdir -p "$pkgdir"/opt/bin
        echo tool > "$pkgdir"/opt/bin/tool
    }
}

tool-docs() {
    pkgdesc='Documentation for the tool'
    package() {
        mkdir -p "$pkgdir"/opt/share
        echo docs > "$pkgdir"/opt/share/tool.txt
    }
}
"#;

    let recipe = Recipe::new("tool", recipe_dir.path(), source).unwrap();
    let executor = LocalRuntime(HostExecutor::new());
    let builder = Builder::new(&executor, &OfflineFetcher);
    let archives = builder.make(&recipe, work_dir.path(), None).unwrap();

    let mut names: Vec<String> = archives
        .iter()
        .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(
        names,
        vec!["tool-docs_2.0-1_armv7-3.2.ipk", "tool_2.0-1_armv7-3.2.ipk"]
    );
}
