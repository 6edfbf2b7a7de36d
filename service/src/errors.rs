use runner::errors::ProcessError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RestoreError {
    #[error("Restore command is empty.")]
    NoCommand,
    #[error("Restore tool exited with code {0}.")]
    Failed(i32),
    #[error(transparent)]
    Process(#[from] ProcessError),
}
