// src/error.rs

//! Crate-wide error and result types
//!
//! Two failure kinds matter to callers: validation failures
//! ([`RecipeError`](crate::recipe::RecipeError)), raised eagerly while a
//! recipe is constructed and before any side effect, and build failures
//! ([`BuildError`](crate::build::BuildError)), raised while the pipeline
//! runs. Neither is retried internally.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("invalid recipe: {0}")]
    Recipe(#[from] crate::recipe::RecipeError),

    #[error("build failed: {0}")]
    Build(#[from] crate::build::BuildError),

    #[error("declaration bridge: {0}")]
    Bash(#[from] crate::bash::BashError),

    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
}
