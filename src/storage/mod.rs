pub mod client_db;

pub use client_db::ClientDatabase;

use std::fs;
use std::path::Path;

/// Ensure the parent directory of `path` exists
pub fn ensure_parent_dir(path: &str) -> std::io::Result<()> {
    match Path::new(path).parent() {
        Some(parent) if !parent.as_os_str().is_empty() => fs::create_dir_all(parent),
        _ => Ok(()),
    }
}
