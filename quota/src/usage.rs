use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use crate::table::QuotaTable;

/// Total size of all regular files below `path`.
///
/// Symbolic links are neither followed nor counted. Entries that vanish or
/// cannot be read while walking contribute nothing.
pub fn dir_usage(path: &Path) -> u64 {
    let entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(e) => {
            debug!(path = %path.display(), "Skipping unreadable directory: {e}");
            return 0;
        }
    };
    entries
        .filter_map(Result::ok)
        .map(|entry| match entry.file_type() {
            Ok(kind) if kind.is_dir() => dir_usage(&entry.path()),
            Ok(kind) if kind.is_file() => entry.metadata().map(|m| m.len()).unwrap_or(0),
            _ => 0,
        })
        .sum()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Classification {
    Ok,
    AlmostFull,
    Full,
}

impl Classification {
    /// Full once the limit is reached, almost full within ten percent of it.
    pub fn of(usage: u64, limit: u64) -> Self {
        if usage >= limit {
            Self::Full
        } else if u128::from(usage) * 11 >= u128::from(limit) * 10 {
            Self::AlmostFull
        } else {
            Self::Ok
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "ok",
            Self::AlmostFull => "almost full",
            Self::Full => "full",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppUsage {
    pub app: String,
    pub usage: u64,
    pub limit: u64,
    pub state: Classification,
}

/// Classify every application directory directly below `root` that has a
/// quota. Results are ordered by application name.
pub fn scan(root: &Path, table: &QuotaTable) -> io::Result<Vec<AppUsage>> {
    let mut report = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let app = entry.file_name().to_string_lossy().into_owned();
        let Some(limit) = table.limit(&app) else {
            debug!(app = %app, "No quota configured");
            continue;
        };
        let usage = dir_usage(&entry.path());
        report.push(AppUsage {
            state: Classification::of(usage, limit),
            app,
            usage,
            limit,
        });
    }
    report.sort_by(|a, b| a.app.cmp(&b.app));
    Ok(report)
}
