//! Bus connection served directly over a Unix stream socket.
//!
//! Every line a client writes is one JSON request object; everything the bus
//! writes back is one [`Outbound`] JSON line. The listener and each client are
//! ordinary watches, so the whole transport runs inside the reactor loop.
//!
//! A client may claim a well-known name by calling `RequestName` on
//! [`DRIVER_INTERFACE`]. Calls the daemon sends to that name are written to
//! the claiming client; calls to a name nobody holds yet wait for a claimant.
use std::collections::{HashMap, VecDeque};
use std::fs;
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{
    Arg, BusConnection, DispatchStatus, ERROR_INVALID_ARGS, ERROR_UNKNOWN_METHOD, EventSources,
    HandlerResult, Interest, Message, MessageHandler, Readiness, ReplySink, TimerHandle,
    WatchHandle,
};
use crate::errors::BusError;

/// How often idle clients are looked for.
pub const REAP_INTERVAL_MS: u64 = 30_000;
/// Clients silent for longer than this with nothing left to send are dropped.
pub const IDLE_LIMIT: Duration = Duration::from_secs(60);
/// Built-in object through which clients claim names.
pub const DRIVER_PATH: &str = "/org/freedesktop/DBus";
pub const DRIVER_INTERFACE: &str = "org.freedesktop.DBus";
pub const ERROR_ACCESS_DENIED: &str = "org.freedesktop.DBus.Error.AccessDenied";
const MAX_LINE: usize = 64 * 1024;
const READ_CHUNK: usize = 4096;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct Request {
    serial: u64,
    path: String,
    #[serde(default)]
    interface: Option<String>,
    member: String,
    #[serde(default)]
    args: Vec<Arg>,
}

impl From<Request> for Message {
    fn from(req: Request) -> Self {
        Self {
            serial: req.serial,
            path: req.path,
            interface: req.interface,
            member: req.member,
            args: req.args,
        }
    }
}

/// A line written to a client: a reply to one of its requests, or a call
/// addressed to a name it holds.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Outbound {
    Return {
        serial: u64,
    },
    Error {
        serial: u64,
        name: String,
        message: String,
    },
    Call {
        serial: u64,
        destination: String,
        path: String,
        interface: Option<String>,
        member: String,
        args: Vec<Arg>,
    },
}

impl Outbound {
    fn call(destination: &str, message: Message) -> Self {
        Self::Call {
            serial: message.serial,
            destination: destination.to_string(),
            path: message.path,
            interface: message.interface,
            member: message.member,
            args: message.args,
        }
    }
}

/// Serial of a request line that failed to decode, when it carries one.
fn request_serial(line: &[u8]) -> u64 {
    serde_json::from_slice::<serde_json::Value>(line)
        .ok()
        .and_then(|value| value.get("serial").and_then(serde_json::Value::as_u64))
        .unwrap_or(0)
}

struct Replies {
    serial: u64,
    sent: Vec<Outbound>,
}

impl ReplySink for Replies {
    fn send_return(&mut self) {
        self.sent.push(Outbound::Return {
            serial: self.serial,
        });
    }

    fn send_error(&mut self, name: &str, message: &str) {
        self.sent.push(Outbound::Error {
            serial: self.serial,
            name: name.to_string(),
            message: message.to_string(),
        });
    }
}

struct Client {
    stream: UnixStream,
    input: Vec<u8>,
    output: Vec<u8>,
    read_watch: WatchHandle,
    write_watch: WatchHandle,
    last_active: Instant,
}

pub struct LocalBus {
    path: PathBuf,
    listener: Option<UnixListener>,
    listener_watch: Option<WatchHandle>,
    reaper: Option<TimerHandle>,
    clients: HashMap<u64, Client>,
    next_client: u64,
    objects: HashMap<String, Box<dyn MessageHandler>>,
    fallback: Option<Box<dyn MessageHandler>>,
    inbox: VecDeque<(u64, Message)>,
    name: Option<String>,
    /// Names claimed by clients.
    peers: HashMap<String, u64>,
    /// Outgoing calls whose destination has not been claimed yet.
    held: Vec<(String, Message)>,
    next_serial: u64,
}

impl LocalBus {
    /// Bind the bus socket at `path`. Fails if another process is serving
    /// it; a socket file nobody answers on is replaced.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, BusError> {
        let path = path.into();
        if fs::symlink_metadata(&path).is_ok() {
            if UnixStream::connect(&path).is_ok() {
                return Err(BusError::AddressInUse(path));
            }
            debug!(path = %path.display(), "Replacing stale bus socket");
            fs::remove_file(&path)?;
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let listener = UnixListener::bind(&path)?;
        listener.set_nonblocking(true)?;
        info!(path = %path.display(), "Bus socket open");
        Ok(Self {
            path,
            listener: Some(listener),
            listener_watch: None,
            reaper: None,
            clients: HashMap::new(),
            next_client: 1,
            objects: HashMap::new(),
            fallback: None,
            inbox: VecDeque::new(),
            name: None,
            peers: HashMap::new(),
            held: Vec::new(),
            next_serial: 1,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn owned_name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    fn accept(&mut self, sources: &mut dyn EventSources) {
        let Some(listener) = &self.listener else {
            return;
        };
        let mut accepted = Vec::new();
        loop {
            match listener.accept() {
                Ok((stream, _)) => accepted.push(stream),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Accepting bus client failed: {e}");
                    break;
                }
            }
        }
        for stream in accepted {
            self.add_client(stream, sources);
        }
    }

    fn add_client(&mut self, stream: UnixStream, sources: &mut dyn EventSources) {
        if let Err(e) = stream.set_nonblocking(true) {
            warn!("Rejecting bus client: {e}");
            return;
        }
        let fd = stream.as_raw_fd();
        let read_watch = match sources.add_watch(fd, Interest::READABLE, true) {
            Ok(watch) => watch,
            Err(e) => {
                warn!("Rejecting bus client: {e}");
                return;
            }
        };
        let write_watch = match sources.add_watch(fd, Interest::WRITABLE, false) {
            Ok(watch) => watch,
            Err(e) => {
                sources.remove_watch(read_watch);
                warn!("Rejecting bus client: {e}");
                return;
            }
        };
        let id = self.next_client;
        self.next_client += 1;
        self.clients.insert(
            id,
            Client {
                stream,
                input: Vec::new(),
                output: Vec::new(),
                read_watch,
                write_watch,
                last_active: Instant::now(),
            },
        );
        debug!(client = id, "Bus client connected");
    }

    fn client_for(&self, watch: WatchHandle) -> Option<u64> {
        self.clients
            .iter()
            .find(|(_, c)| c.read_watch == watch || c.write_watch == watch)
            .map(|(id, _)| *id)
    }

    fn drop_client(&mut self, id: u64, sources: &mut dyn EventSources) {
        if let Some(client) = self.clients.remove(&id) {
            self.peers.retain(|_, owner| *owner != id);
            sources.remove_watch(client.read_watch);
            sources.remove_watch(client.write_watch);
            debug!(client = id, "Bus client disconnected");
        }
    }

    fn read_client(&mut self, id: u64, sources: &mut dyn EventSources) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        let mut buf = [0; READ_CHUNK];
        let mut closed = false;
        loop {
            match client.stream.read(&mut buf) {
                Ok(0) => {
                    closed = true;
                    break;
                }
                Ok(n) => client.input.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(client = id, "Read from bus client failed: {e}");
                    closed = true;
                    break;
                }
            }
        }
        client.last_active = Instant::now();

        let mut rejected = Vec::new();
        while let Some(end) = client.input.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = client.input.drain(..=end).collect();
            let line = &line[..end];
            if line.iter().all(u8::is_ascii_whitespace) {
                continue;
            }
            match serde_json::from_slice::<Request>(line) {
                Ok(request) => self.inbox.push_back((id, request.into())),
                Err(e) => {
                    warn!(client = id, "Malformed bus request: {e}");
                    rejected.push(Outbound::Error {
                        serial: request_serial(line),
                        name: ERROR_INVALID_ARGS.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        if client.input.len() > MAX_LINE {
            warn!(client = id, "Bus request line too long");
            closed = true;
        }

        if closed {
            self.drop_client(id, sources);
        } else if !rejected.is_empty() {
            self.queue_replies(id, rejected, sources);
        }
    }

    fn write_client(&mut self, id: u64, sources: &mut dyn EventSources) {
        let Some(client) = self.clients.get_mut(&id) else {
            return;
        };
        while !client.output.is_empty() {
            match client.stream.write(&client.output) {
                Ok(0) => break,
                Ok(n) => {
                    client.output.drain(..n);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!(client = id, "Write to bus client failed: {e}");
                    self.drop_client(id, sources);
                    return;
                }
            }
        }
        if client.output.is_empty() {
            sources.toggle_watch(client.write_watch, false);
        }
    }

    fn queue_replies(&mut self, id: u64, replies: Vec<Outbound>, sources: &mut dyn EventSources) {
        let Some(client) = self.clients.get_mut(&id) else {
            debug!(client = id, "Dropping replies for departed client");
            return;
        };
        for reply in replies {
            match serde_json::to_vec(&reply) {
                Ok(line) => {
                    client.output.extend_from_slice(&line);
                    client.output.push(b'\n');
                }
                Err(e) => warn!(client = id, "Could not encode reply: {e}"),
            }
        }
        if !client.output.is_empty() {
            sources.toggle_watch(client.write_watch, true);
        }
    }

    /// Built-in `RequestName`: hand `name` to the calling client and deliver
    /// whatever was held for it.
    fn claim_name(&mut self, client: u64, message: &Message, replies: &mut Replies) {
        let name = match message.str_args::<1>() {
            Ok([name]) => name.to_string(),
            Err(e) => {
                replies.send_error(e.name, &e.message);
                return;
            }
        };
        let taken = self.name.as_deref() == Some(name.as_str())
            || self.peers.get(&name).is_some_and(|owner| *owner != client);
        if taken {
            replies.send_error(
                ERROR_ACCESS_DENIED,
                &format!("Name \"{name}\" is owned by another connection"),
            );
            return;
        }
        self.peers.insert(name.clone(), client);
        debug!(client, name = %name, "Bus client claimed name");
        replies.send_return();

        let (ready, held): (Vec<_>, Vec<_>) = std::mem::take(&mut self.held)
            .into_iter()
            .partition(|(destination, _)| *destination == name);
        self.held = held;
        let calls = ready
            .into_iter()
            .map(|(destination, message)| Outbound::call(&destination, message));
        replies.sent.extend(calls);
    }

    fn reap_idle(&mut self, sources: &mut dyn EventSources) {
        let idle: Vec<u64> = self
            .clients
            .iter()
            .filter(|(_, c)| c.output.is_empty() && c.last_active.elapsed() > IDLE_LIMIT)
            .map(|(id, _)| *id)
            .collect();
        for id in idle {
            debug!(client = id, "Dropping idle bus client");
            self.drop_client(id, sources);
        }
    }
}

impl BusConnection for LocalBus {
    fn attach(&mut self, sources: &mut dyn EventSources) -> Result<(), BusError> {
        let listener = self.listener.as_ref().ok_or(BusError::Disconnected)?;
        self.listener_watch = Some(sources.add_watch(
            listener.as_raw_fd(),
            Interest::READABLE,
            true,
        )?);
        self.reaper = Some(sources.add_timer(REAP_INTERVAL_MS, true)?);
        Ok(())
    }

    fn register_object_path(
        &mut self,
        path: &str,
        handler: Box<dyn MessageHandler>,
    ) -> Result<(), BusError> {
        if self.objects.contains_key(path) {
            return Err(BusError::AlreadyRegistered(path.to_string()));
        }
        self.objects.insert(path.to_string(), handler);
        Ok(())
    }

    fn register_fallback(&mut self, handler: Box<dyn MessageHandler>) -> Result<(), BusError> {
        if self.fallback.is_some() {
            return Err(BusError::AlreadyRegistered("/".to_string()));
        }
        self.fallback = Some(handler);
        Ok(())
    }

    fn unregister_object_path(&mut self, path: &str) -> bool {
        self.objects.remove(path).is_some()
    }

    fn unregister_fallback(&mut self) -> bool {
        self.fallback.take().is_some()
    }

    fn request_name(&mut self, name: &str) -> Result<(), BusError> {
        if self.peers.contains_key(name) {
            return Err(BusError::NameTaken(name.to_string()));
        }
        match &self.name {
            Some(owned) if owned != name => Err(BusError::NameTaken(name.to_string())),
            _ => {
                self.name = Some(name.to_string());
                info!(name, "Acquired bus name");
                Ok(())
            }
        }
    }

    fn dispatch(&mut self, sources: &mut dyn EventSources) -> DispatchStatus {
        let Some((client, message)) = self.inbox.pop_front() else {
            return DispatchStatus::Complete;
        };
        let mut replies = Replies {
            serial: message.serial,
            sent: Vec::new(),
        };
        if message.path == DRIVER_PATH
            && message.interface.as_deref() == Some(DRIVER_INTERFACE)
            && message.member == "RequestName"
        {
            self.claim_name(client, &message, &mut replies);
            self.queue_replies(client, replies.sent, sources);
            return if self.inbox.is_empty() {
                DispatchStatus::Complete
            } else {
                DispatchStatus::DataRemains
            };
        }
        let handler = self
            .objects
            .get_mut(&message.path)
            .or(self.fallback.as_mut());
        let result = match handler {
            Some(handler) => handler.handle(&message, &mut replies),
            None => HandlerResult::NotYetHandled,
        };
        if replies.sent.is_empty() {
            match result {
                HandlerResult::Handled => replies.send_return(),
                HandlerResult::NotYetHandled => replies.send_error(
                    ERROR_UNKNOWN_METHOD,
                    &format!("Method \"{}\" doesn't exist", message),
                ),
            }
        }
        self.queue_replies(client, replies.sent, sources);
        if self.inbox.is_empty() {
            DispatchStatus::Complete
        } else {
            DispatchStatus::DataRemains
        }
    }

    fn handle_watch(
        &mut self,
        watch: WatchHandle,
        readiness: Readiness,
        sources: &mut dyn EventSources,
    ) -> Result<(), BusError> {
        if Some(watch) == self.listener_watch {
            if readiness.error {
                return Err(BusError::Disconnected);
            }
            self.accept(sources);
            return Ok(());
        }
        let Some(id) = self.client_for(watch) else {
            debug!(?watch, "Readiness for unknown watch");
            return Ok(());
        };
        if readiness.readable || readiness.hangup {
            self.read_client(id, sources);
        }
        if readiness.error {
            self.drop_client(id, sources);
        } else if readiness.writable {
            self.write_client(id, sources);
        }
        Ok(())
    }

    fn handle_timeout(
        &mut self,
        timer: TimerHandle,
        sources: &mut dyn EventSources,
    ) -> Result<(), BusError> {
        if Some(timer) == self.reaper {
            self.reap_idle(sources);
        }
        Ok(())
    }

    fn call(
        &mut self,
        destination: &str,
        mut message: Message,
        sources: &mut dyn EventSources,
    ) -> Result<(), BusError> {
        if self.listener.is_none() {
            return Err(BusError::Disconnected);
        }
        message.serial = self.next_serial;
        self.next_serial += 1;
        match self.peers.get(destination).copied() {
            Some(id) => self.queue_replies(id, vec![Outbound::call(destination, message)], sources),
            None => {
                debug!(
                    destination,
                    member = %message.member,
                    "Holding call until the name is claimed"
                );
                self.held.push((destination.to_string(), message));
            }
        }
        Ok(())
    }

    fn close(&mut self, sources: &mut dyn EventSources) {
        let ids: Vec<u64> = self.clients.keys().copied().collect();
        for id in ids {
            self.drop_client(id, sources);
        }
        if let Some(watch) = self.listener_watch.take() {
            sources.remove_watch(watch);
        }
        if let Some(timer) = self.reaper.take() {
            sources.remove_timer(timer);
        }
        self.objects.clear();
        self.fallback = None;
        self.inbox.clear();
        self.held.clear();
        if self.listener.take().is_some() {
            let _ = fs::remove_file(&self.path);
            info!(path = %self.path.display(), "Bus socket closed");
        }
    }
}

impl Drop for LocalBus {
    fn drop(&mut self) {
        if self.listener.take().is_some() {
            let _ = fs::remove_file(&self.path);
        }
    }
}
