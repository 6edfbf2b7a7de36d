use std::path::PathBuf;

use runner::Executor;
use tracing::info;

use crate::errors::RestoreError;

/// Repopulates a freshly formatted partition with its default data set.
pub trait DataRestore {
    fn restore(&mut self) -> Result<(), RestoreError>;
}

/// Runs `command... bundle` and expects exit code 0.
pub struct CommandRestore<E> {
    command: Vec<String>,
    bundle: PathBuf,
    executor: E,
}

impl<E: Executor> CommandRestore<E> {
    pub fn new(command: Vec<String>, bundle: impl Into<PathBuf>, executor: E) -> Self {
        Self {
            command,
            bundle: bundle.into(),
            executor,
        }
    }
}

impl<E: Executor> DataRestore for CommandRestore<E> {
    fn restore(&mut self) -> Result<(), RestoreError> {
        if self.command.is_empty() {
            return Err(RestoreError::NoCommand);
        }
        let mut argv = self.command.clone();
        argv.push(self.bundle.to_string_lossy().into_owned());
        match self.executor.execute(&argv)? {
            0 => {
                info!(bundle = %self.bundle.display(), "Restored default data set");
                Ok(())
            }
            code => Err(RestoreError::Failed(code)),
        }
    }
}
