use std::path::PathBuf;

use anyhow::{Result, bail};

/// Paths in the settings file must be absolute; the daemon may change its
/// working directory when it detaches.
pub(crate) fn absolute_path(field: &str, value: String) -> Result<PathBuf> {
    let path = PathBuf::from(value);
    if path.as_os_str().is_empty() {
        bail!("`{field}` must not be empty");
    }
    if path.is_relative() {
        bail!(
            "`{field}` must be an absolute path but found \"{}\"",
            path.display()
        );
    }
    Ok(path)
}

pub(crate) fn non_empty(field: &str, value: String) -> Result<String> {
    if value.trim().is_empty() {
        bail!("`{field}` must not be empty");
    }
    Ok(value)
}
