//! Contract between the reactor and a message-bus connection.
//!
//! A bus connection never polls on its own. It asks the reactor to watch
//! descriptors and arm timers through [`EventSources`], and the reactor
//! calls back into the connection when one of them fires.
use std::fmt;
use std::os::fd::RawFd;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::{BusError, SourceError};

pub mod local;

pub const ERROR_INVALID_ARGS: &str = "org.freedesktop.DBus.Error.InvalidArgs";
pub const ERROR_UNKNOWN_METHOD: &str = "org.freedesktop.DBus.Error.UnknownMethod";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WatchHandle(pub(crate) u64);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub(crate) u64);

/// Conditions a watch asks to be woken for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Interest {
    pub readable: bool,
    pub writable: bool,
}

impl Interest {
    pub const READABLE: Self = Self {
        readable: true,
        writable: false,
    };
    pub const WRITABLE: Self = Self {
        readable: false,
        writable: true,
    };
    pub const BOTH: Self = Self {
        readable: true,
        writable: true,
    };
}

/// Conditions reported for a ready watch.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
    pub hangup: bool,
}

impl Readiness {
    pub(crate) fn from_revents(revents: libc::c_short) -> Self {
        Self {
            readable: revents & libc::POLLIN != 0,
            writable: revents & libc::POLLOUT != 0,
            error: revents & (libc::POLLERR | libc::POLLNVAL) != 0,
            hangup: revents & libc::POLLHUP != 0,
        }
    }
}

/// Registration interface the reactor offers to a bus connection.
pub trait EventSources {
    fn add_watch(
        &mut self,
        fd: RawFd,
        interest: Interest,
        enabled: bool,
    ) -> Result<WatchHandle, SourceError>;
    fn remove_watch(&mut self, watch: WatchHandle);
    fn toggle_watch(&mut self, watch: WatchHandle, enabled: bool);
    /// Periodic timer firing every `interval_ms`. An interval of 0 or a
    /// disabled timer stays registered but is not polled.
    fn add_timer(&mut self, interval_ms: u64, enabled: bool) -> Result<TimerHandle, SourceError>;
    fn remove_timer(&mut self, timer: TimerHandle);
    fn retarget_timer(
        &mut self,
        timer: TimerHandle,
        interval_ms: u64,
        enabled: bool,
    ) -> Result<(), SourceError>;
}

/// Typed argument of a bus message.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Arg {
    Bool(bool),
    Int(i64),
    Str(String),
    /// Anything else a peer sent; only ever rejected by handlers.
    Other(serde_json::Value),
}

impl Arg {
    fn type_name(&self) -> &'static str {
        match self {
            Self::Bool(_) => "boolean",
            Self::Int(_) => "int64",
            Self::Str(_) => "string",
            Self::Other(serde_json::Value::Number(_)) => "double",
            Self::Other(serde_json::Value::Null) => "null",
            Self::Other(serde_json::Value::Array(_)) => "array",
            Self::Other(_) => "dict",
        }
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    pub serial: u64,
    pub path: String,
    pub interface: Option<String>,
    pub member: String,
    pub args: Vec<Arg>,
}

/// Arguments of a message did not match what the handler expects.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ArgError {
    pub name: &'static str,
    pub message: String,
}

impl ArgError {
    fn invalid(message: String) -> Self {
        Self {
            name: ERROR_INVALID_ARGS,
            message,
        }
    }
}

impl Message {
    pub fn method_call(
        path: impl Into<String>,
        interface: impl Into<String>,
        member: impl Into<String>,
        args: Vec<Arg>,
    ) -> Self {
        Self {
            serial: 0,
            path: path.into(),
            interface: Some(interface.into()),
            member: member.into(),
            args,
        }
    }

    /// Leading `N` string arguments. Trailing arguments are ignored.
    pub fn str_args<const N: usize>(&self) -> Result<[&str; N], ArgError> {
        if self.args.len() < N {
            return Err(ArgError::invalid(format!(
                "Message has only {} arguments, but more were expected",
                self.args.len()
            )));
        }
        let mut out = [""; N];
        for (i, (slot, arg)) in out.iter_mut().zip(&self.args).enumerate() {
            match arg {
                Arg::Str(s) => *slot = s.as_str(),
                other => {
                    return Err(ArgError::invalid(format!(
                        "Argument {i} is specified to be of type \"string\", but is actually of type \"{}\"",
                        other.type_name()
                    )));
                }
            }
        }
        Ok(out)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}.{} at {}",
            self.interface.as_deref().unwrap_or("<none>"),
            self.member,
            self.path
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandlerResult {
    Handled,
    NotYetHandled,
}

/// Reply channel bound to the message being handled.
pub trait ReplySink {
    fn send_return(&mut self);
    fn send_error(&mut self, name: &str, message: &str);
}

pub trait MessageHandler {
    fn handle(&mut self, message: &Message, replies: &mut dyn ReplySink) -> HandlerResult;
}

impl<F> MessageHandler for F
where
    F: FnMut(&Message, &mut dyn ReplySink) -> HandlerResult,
{
    fn handle(&mut self, message: &Message, replies: &mut dyn ReplySink) -> HandlerResult {
        self(message, replies)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchStatus {
    DataRemains,
    Complete,
}

/// A bus connection driven by the reactor.
pub trait BusConnection {
    /// Register the connection's descriptors and timers.
    fn attach(&mut self, sources: &mut dyn EventSources) -> Result<(), BusError>;
    fn register_object_path(
        &mut self,
        path: &str,
        handler: Box<dyn MessageHandler>,
    ) -> Result<(), BusError>;
    /// Handler for messages no object path claims.
    fn register_fallback(&mut self, handler: Box<dyn MessageHandler>) -> Result<(), BusError>;
    fn unregister_object_path(&mut self, path: &str) -> bool;
    fn unregister_fallback(&mut self) -> bool;
    /// Claim `name` exclusively, without queueing behind another owner.
    fn request_name(&mut self, name: &str) -> Result<(), BusError>;
    /// Process at most one queued incoming message.
    fn dispatch(&mut self, sources: &mut dyn EventSources) -> DispatchStatus;
    fn handle_watch(
        &mut self,
        watch: WatchHandle,
        readiness: Readiness,
        sources: &mut dyn EventSources,
    ) -> Result<(), BusError>;
    fn handle_timeout(
        &mut self,
        timer: TimerHandle,
        sources: &mut dyn EventSources,
    ) -> Result<(), BusError>;
    /// Send a method call to `destination` without waiting for a reply.
    fn call(
        &mut self,
        destination: &str,
        message: Message,
        sources: &mut dyn EventSources,
    ) -> Result<(), BusError>;
    /// Drop every source and release the connection.
    fn close(&mut self, sources: &mut dyn EventSources);
}
