// src/filesystem/mod.rs

//! Filesystem helpers shared by extraction, removal and simulation

pub mod path;

pub use path::{
    absolute_package_path, resolve_in_root, safe_join, sanitize_filename, sanitize_path,
};
