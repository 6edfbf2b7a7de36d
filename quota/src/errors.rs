use std::{io, path::PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Could not read quota config `{path}`: {err}")]
    Read { path: PathBuf, err: io::Error },
    #[error("Quota config `{0}` is empty.")]
    Empty(PathBuf),
    #[error("Quota config `{0}` contains no usable entries.")]
    NoEntries(PathBuf),
    #[error("Could not start the monitor thread: {0}")]
    ThreadCreation(io::Error),
    #[error("The monitor thread panicked.")]
    ThreadPanicked,
}
