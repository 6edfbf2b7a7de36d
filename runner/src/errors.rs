use std::io;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("No program given to execute.")]
    EmptyCommand,
    #[error("Could not spawn `{program}`: {err}")]
    Spawn { program: String, err: io::Error },
    #[error("Failed to set up output capture for `{program}`: {err}")]
    Capture { program: String, err: io::Error },
    #[error("Error polling output of `{program}`: {err}")]
    Poll { program: String, err: io::Error },
    #[error("Error waiting for `{program}` to exit: {err}")]
    Wait { program: String, err: io::Error },
}
