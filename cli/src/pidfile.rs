use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Holds the daemon's pid on disk for as long as it lives.
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o664)
            .open(path)?;
        writeln!(file, "{}", std::process::id())?;
        debug!(path = %path.display(), "Wrote pid file");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(path = %self.path.display(), "Could not remove pid file: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_pid_until_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("phmd.pid");
        fs::write(&path, "stale contents that are longer\n").unwrap();

        let pid_file = PidFile::create(&path).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents, format!("{}\n", std::process::id()));

        drop(pid_file);
        assert!(!path.exists());
    }

    #[test]
    fn missing_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(PidFile::create(&dir.path().join("no/such/dir.pid")).is_err());
    }
}
