// src/recipe/mod.rs

//! Recipe and package model
//!
//! A package is a final user-installable software archive. A recipe is a
//! bash script with the instructions necessary to build one or more
//! related packages; a recipe declaring several is a split recipe. The
//! model here is constructed once from the script source, validated
//! eagerly, and immutable afterwards.

mod format;
mod parser;

pub use format::{InstallHooks, Package, Recipe, DEFAULT_ARCH};
pub use parser::RecipeError;
