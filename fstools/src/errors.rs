use std::path::PathBuf;

use runner::errors::ProcessError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FsError {
    #[error("Unsupported filesystem kind.")]
    InvalidKind,
    #[error("Failed to {op} {failed:?}.")]
    Pair {
        op: &'static str,
        failed: Vec<PathBuf>,
    },
    #[error("`{tool}` exited with code {code}.")]
    ToolFailed { tool: String, code: i32 },
    #[error(transparent)]
    Process(#[from] ProcessError),
}
