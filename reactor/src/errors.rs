use std::io;
use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    #[error("Failed to create command pipe: {0}")]
    Create(io::Error),
    #[error("Command channel is closed.")]
    Closed,
    #[error("Error writing command: {0}")]
    Write(io::Error),
    #[error("Short command write of {0} bytes.")]
    ShortWrite(usize),
    #[error("Error reading command: {0}")]
    Read(io::Error),
    #[error("Short command read of {0} bytes.")]
    ShortRead(usize),
    #[error("Received unknown command code {code}.")]
    UnknownCode { code: u32, ticket: u32 },
    #[error("Command payload of {0} bytes does not fit.")]
    PayloadTooLong(usize),
    #[error("Command payload contains a NUL byte.")]
    PayloadNul,
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("No room for another event source (capacity {capacity}).")]
    CapacityExceeded { capacity: usize },
    #[error("Failed to set up timer: {0}")]
    Timer(io::Error),
    #[error("Unknown event source.")]
    UnknownHandle,
}

#[derive(Error, Debug)]
pub enum BusError {
    #[error("Bus connection lost.")]
    Disconnected,
    #[error("Bus address `{0}` is already served by another process.")]
    AddressInUse(PathBuf),
    #[error("Bus name `{0}` cannot be claimed on this connection.")]
    NameTaken(String),
    #[error("Object path `{0}` already has a handler.")]
    AlreadyRegistered(String),
    #[error("Bus I/O error: {0}")]
    Io(#[from] io::Error),
    #[error(transparent)]
    Source(#[from] SourceError),
}

#[derive(Error, Debug)]
pub enum ReactorError {
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error("Error polling event sources: {0}")]
    Poll(io::Error),
    #[error("Fatal bus error: {0}")]
    Bus(#[from] BusError),
    #[error("Failed to claim bus name `{name}`: {source}")]
    NameRequest { name: String, source: BusError },
    #[error("Failed to install signal handler: {0}")]
    Signal(#[from] ctrlc::Error),
    #[error("Failed to install SIGQUIT handler: {0}")]
    SignalAction(io::Error),
}
