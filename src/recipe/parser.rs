// src/recipe/parser.rs

//! Construction and validation of recipes from script source
//!
//! All validation happens here, eagerly, before any build side effect:
//! a [`Recipe`] that exists is a recipe that passed every structural
//! check.

use super::format::{InstallHooks, Package, Recipe, DEFAULT_ARCH};
use crate::bash::{self, Functions, Layered, Shape, Value, Variables};
use crate::error::Result;
use crate::version::{Version, VersionError};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;
use thiserror::Error;
use tracing::debug;

#[derive(Error, Debug)]
pub enum RecipeError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("field '{field}' must be a {expected}, not a {actual}")]
    FieldShape {
        field: &'static str,
        expected: Shape,
        actual: Shape,
    },

    #[error("found {sources} sources but {checksums} checksums")]
    ChecksumCount { sources: usize, checksums: usize },

    #[error("a recipe declaring an image must define a build() step")]
    MissingBuildFunction,

    #[error("a recipe defining a build() step must declare an image")]
    MissingImage,

    #[error("recipe declares no packages")]
    NoPackages,

    #[error("missing function '{0}()' for package '{0}'")]
    MissingPackageFunction(String),

    #[error("package '{0}' does not define a package() step")]
    MissingPackageAction(String),

    #[error("duplicate package identifier '{0}'")]
    DuplicateIdentifier(String),

    #[error("invalid timestamp '{value}'")]
    InvalidTimestamp {
        value: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("invalid version for package '{package}'")]
    InvalidVersion {
        package: String,
        #[source]
        source: VersionError,
    },
}

impl Recipe {
    /// Load and validate the recipe stored in the directory `root`, whose
    /// script is expected in a file named `package`.
    pub fn from_file(root: &Path) -> Result<Recipe> {
        let source = fs::read_to_string(root.join("package"))?;
        let name = root
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Recipe::new(name, root, &source)
    }

    /// Construct and validate a recipe from its full script source.
    pub fn new(
        name: impl Into<String>,
        root: impl Into<std::path::PathBuf>,
        source: &str,
    ) -> Result<Recipe> {
        let name = name.into();
        let (variables, functions) = bash::extract(source)?;

        let empty = Variables::new();
        let scope = Layered::new(&variables, &empty);

        let package_names = required_list(scope, "pkgnames")?;
        if package_names.is_empty() {
            return Err(RecipeError::NoPackages.into());
        }

        let raw_timestamp = required_string(scope, "timestamp")?;
        let timestamp = parse_timestamp(&raw_timestamp).map_err(|source| {
            RecipeError::InvalidTimestamp {
                value: raw_timestamp,
                source,
            }
        })?;

        let maintainer = required_string(scope, "maintainer")?;
        let image = optional_string(scope, "image")?;
        let sources = optional_list(scope, "source")?;
        let sha256sums = optional_list(scope, "sha256sums")?;
        let noextract = optional_list(scope, "noextract")?;

        if sources.len() != sha256sums.len() {
            return Err(RecipeError::ChecksumCount {
                sources: sources.len(),
                checksums: sha256sums.len(),
            }
            .into());
        }

        let prepare = functions.get("prepare").cloned();
        let build = functions.get("build").cloned();

        if image.is_some() && build.is_none() {
            return Err(RecipeError::MissingBuildFunction.into());
        }
        if build.is_some() && image.is_none() {
            return Err(RecipeError::MissingImage.into());
        }

        let mut packages = BTreeMap::new();
        let mut identifiers = BTreeSet::new();

        for package_name in &package_names {
            // A lone package reads its declarations from the recipe
            // itself; split packages each carry their own script in a
            // same-named function.
            let package_source = if package_names.len() == 1 {
                source.to_string()
            } else {
                functions
                    .get(package_name.as_str())
                    .cloned()
                    .ok_or_else(|| RecipeError::MissingPackageFunction(package_name.clone()))?
            };

            let package =
                Package::new(package_name.clone(), &variables, &functions, &package_source)?;

            if !identifiers.insert(package.id()) {
                return Err(RecipeError::DuplicateIdentifier(package.id()).into());
            }
            packages.insert(package_name.clone(), package);
        }

        debug!(recipe = %name, packages = package_names.len(), "parsed recipe");

        Ok(Recipe {
            name,
            root: root.into(),
            timestamp,
            maintainer,
            image,
            sources,
            sha256sums,
            noextract,
            prepare,
            build,
            package_names,
            packages,
        })
    }
}

impl Package {
    /// Construct one package from its own script, layered over the parent
    /// recipe's declarations. Package-local declarations win on collision.
    pub fn new(
        name: String,
        parent_variables: &Variables,
        parent_functions: &Functions,
        source: &str,
    ) -> Result<Package> {
        let (own_variables, own_functions) = bash::extract(source)?;
        let variables = Layered::new(&own_variables, parent_variables);
        let functions = Layered::new(&own_functions, parent_functions);

        // The flattened declaration set is kept on the package so it can
        // be re-injected into generated maintainer scripts.
        let mut effective = parent_variables.clone();
        effective.extend(
            own_variables
                .iter()
                .map(|(name, value)| (name.clone(), value.clone())),
        );

        let raw_version = required_string(variables, "pkgver")?;
        let version =
            Version::parse(&raw_version).map_err(|source| RecipeError::InvalidVersion {
                package: name.clone(),
                source,
            })?;

        let action = functions
            .get("package")
            .cloned()
            .ok_or_else(|| RecipeError::MissingPackageAction(name.clone()))?;

        let install = InstallHooks {
            preinstall: functions.get("preinstall").cloned(),
            configure: functions.get("configure").cloned(),
            preremove: functions.get("preremove").cloned(),
            postremove: functions.get("postremove").cloned(),
            preupgrade: functions.get("preupgrade").cloned(),
            postupgrade: functions.get("postupgrade").cloned(),
        };

        Ok(Package {
            name,
            version,
            arch: optional_string(variables, "arch")?.unwrap_or_else(|| DEFAULT_ARCH.to_string()),
            description: required_string(variables, "pkgdesc")?,
            url: required_string(variables, "url")?,
            section: required_string(variables, "section")?,
            license: required_string(variables, "license")?,
            depends: optional_list(variables, "depends")?,
            conflicts: optional_list(variables, "conflicts")?,
            variables: effective,
            action,
            install,
        })
    }
}

/// Parse a declared timestamp. Recipes commonly write minute-resolution
/// ISO-8601 (`2023-06-01T12:00Z`); a missing seconds field is padded
/// before the RFC 3339 parse.
fn parse_timestamp(value: &str) -> std::result::Result<DateTime<Utc>, chrono::ParseError> {
    let parsed = DateTime::parse_from_rfc3339(value).or_else(|err| {
        let time_end = value.find('T').map(|t| t + 6);
        match time_end.and_then(|i| Some((value.get(..i)?, value.get(i..)?))) {
            Some((head, tail)) if !tail.starts_with(':') => {
                DateTime::parse_from_rfc3339(&format!("{head}:00{tail}")).map_err(|_| err)
            }
            _ => Err(err),
        }
    })?;

    Ok(parsed.with_timezone(&Utc))
}

// Field schema helpers. An explicitly unset declaration counts as a
// missing field, not a shape mismatch.

fn lookup<'a>(scope: Layered<'a, Value>, field: &'static str) -> Option<&'a Value> {
    match scope.get(field) {
        Some(Value::Unset) | None => None,
        Some(value) => Some(value),
    }
}

fn required_string(scope: Layered<Value>, field: &'static str) -> Result<String> {
    let value = lookup(scope, field).ok_or(RecipeError::MissingField(field))?;
    match value.as_scalar() {
        Some(s) => Ok(s.to_string()),
        None => Err(RecipeError::FieldShape {
            field,
            expected: Shape::Scalar,
            actual: value.shape(),
        }
        .into()),
    }
}

fn optional_string(scope: Layered<Value>, field: &'static str) -> Result<Option<String>> {
    match lookup(scope, field) {
        None => Ok(None),
        Some(value) => match value.as_scalar() {
            Some(s) => Ok(Some(s.to_string())),
            None => Err(RecipeError::FieldShape {
                field,
                expected: Shape::Scalar,
                actual: value.shape(),
            }
            .into()),
        },
    }
}

fn required_list(scope: Layered<Value>, field: &'static str) -> Result<Vec<String>> {
    let value = lookup(scope, field).ok_or(RecipeError::MissingField(field))?;
    list_of(value, field)
}

fn optional_list(scope: Layered<Value>, field: &'static str) -> Result<Vec<String>> {
    match lookup(scope, field) {
        None => Ok(Vec::new()),
        Some(value) => list_of(value, field),
    }
}

fn list_of(value: &Value, field: &'static str) -> Result<Vec<String>> {
    match value.as_list() {
        Some(items) => Ok(items.into_iter().map(str::to_string).collect()),
        None => Err(RecipeError::FieldShape {
            field,
            expected: Shape::Indexed,
            actual: value.shape(),
        }
        .into()),
    }
}
