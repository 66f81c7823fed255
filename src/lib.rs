// src/lib.rs

//! Reproducible package builds from declarative bash recipes
//!
//! This crate turns recipe scripts into installable `.ipk` archives for
//! an embedded package repository. A recipe declares its metadata and
//! build steps in a restricted bash dialect; the [`bash`] module extracts
//! those declarations through the interpreter itself, the [`recipe`]
//! module validates them into an immutable build plan, and the [`build`]
//! pipeline drives fetch, prepare, build, strip, package and archive
//! stages through pluggable executor and fetcher seams. Archives are
//! byte-reproducible: all variable metadata is pinned to the recipe's
//! declared timestamp.

pub mod bash;
pub mod build;
mod error;
pub mod exec;
pub mod fetch;
pub mod hash;
pub mod ipk;
pub mod recipe;
pub mod repo;
pub mod version;

pub use build::{BuildError, Builder, Stage};
pub use error::{Error, Result};
pub use exec::{BindMount, Executor, HostExecutor, Job};
pub use fetch::{Fetcher, HttpFetcher};
pub use recipe::{Package, Recipe, RecipeError};
pub use version::{Version, VersionError};
