//! Single-threaded event loop driving a bus connection.
//!
//! The reactor owns the bus connection, the table of event sources the bus
//! registered and the read end of the command channel. Each iteration drains
//! the bus's pending dispatch work, then blocks in `poll(2)` with no timeout
//! until a source or a command is ready.
use std::io;
use std::os::fd::AsRawFd;

use tracing::{debug, error, info, instrument, warn};

pub mod bus;
pub mod channel;
pub mod command;
pub mod errors;
pub mod signals;
pub mod sources;

use bus::{BusConnection, DispatchStatus, Message, MessageHandler};
use channel::{CommandChannel, CommandSender};
use command::{Command, CommandCode};
use errors::*;
use signals::SignalGuard;
use sources::{Ready, SourceTable};

enum Flow {
    Continue,
    Quit,
}

type Hook = Box<dyn FnOnce()>;

/// Only a lost connection ends the loop.
fn bus_result(result: Result<(), BusError>) -> Result<(), ReactorError> {
    match result {
        Err(BusError::Disconnected) => Err(BusError::Disconnected.into()),
        Err(e) => {
            warn!("Bus error: {e}");
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

pub struct Reactor<B: BusConnection> {
    bus: B,
    bus_name: String,
    channel: CommandChannel,
    sources: SourceTable,
    paths: Vec<String>,
    fallback: bool,
    signals: Option<SignalGuard>,
    teardown: Vec<Hook>,
}

impl<B: BusConnection> Reactor<B> {
    /// Fails if the command channel cannot be created.
    pub fn new(bus: B, bus_name: impl Into<String>) -> Result<Self, ReactorError> {
        let channel = CommandChannel::new()?;
        let sources = SourceTable::new(channel.sender());
        Ok(Self {
            bus,
            bus_name: bus_name.into(),
            channel,
            sources,
            paths: Vec::new(),
            fallback: false,
            signals: None,
            teardown: Vec::new(),
        })
    }

    pub fn sender(&self) -> CommandSender {
        self.channel.sender()
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn register_object_path(
        &mut self,
        path: &str,
        handler: Box<dyn MessageHandler>,
    ) -> Result<(), ReactorError> {
        self.bus.register_object_path(path, handler)?;
        self.paths.push(path.to_string());
        info!(path, "Registered object path");
        Ok(())
    }

    pub fn register_fallback(&mut self, handler: Box<dyn MessageHandler>) -> Result<(), ReactorError> {
        self.bus.register_fallback(handler)?;
        self.fallback = true;
        Ok(())
    }

    /// Send a method call to `destination` without waiting for its reply.
    pub fn call(&mut self, destination: &str, message: Message) -> Result<(), ReactorError> {
        debug!(destination, %message, "Sending call");
        self.bus.call(destination, message, &mut self.sources)?;
        Ok(())
    }

    /// Route SIGINT, SIGTERM, SIGHUP and SIGQUIT into a `Quit` command.
    pub fn install_signal_handlers(&mut self) -> Result<(), ReactorError> {
        self.signals = Some(signals::install(&self.channel.sender())?);
        Ok(())
    }

    /// Run after the bus connection has been released, in registration order.
    /// Termination signals arriving while hooks run are ignored.
    pub fn on_shutdown(&mut self, hook: impl FnOnce() + 'static) {
        self.teardown.push(Box::new(hook));
    }

    /// Serve until a `Quit` command arrives or a fatal error occurs, then
    /// shut down.
    pub fn run(mut self) -> Result<(), ReactorError> {
        let result = self
            .bus
            .attach(&mut self.sources)
            .map_err(ReactorError::from)
            .and_then(|()| self.event_loop());
        if let Err(e) = &result {
            error!("Reactor stopped: {e}");
        }
        self.shutdown();
        result
    }

    fn event_loop(&mut self) -> Result<(), ReactorError> {
        info!("Reactor running");
        loop {
            while self.bus.dispatch(&mut self.sources) == DispatchStatus::DataRemains {}

            let mut set = self.sources.poll_set(self.channel.as_raw_fd());
            // SAFETY: `set.fds` is a live, correctly sized pollfd array.
            let rc = unsafe {
                libc::poll(set.fds.as_mut_ptr(), set.fds.len() as libc::nfds_t, -1)
            };
            if rc < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ReactorError::Poll(err));
            }

            for ready in set.ready() {
                match ready {
                    Ready::Channel => {
                        if let Flow::Quit = self.process_command()? {
                            return Ok(());
                        }
                    }
                    Ready::Timer(timer) => {
                        if self.sources.expire_timer(timer) {
                            bus_result(self.bus.handle_timeout(timer, &mut self.sources))?;
                        }
                    }
                    Ready::Watch(watch, readiness) => {
                        if self.sources.watch_live(watch) {
                            bus_result(self.bus.handle_watch(watch, readiness, &mut self.sources))?;
                        }
                    }
                }
            }
        }
    }

    fn process_command(&mut self) -> Result<Flow, ReactorError> {
        let (command, ticket) = match self.channel.recv() {
            Ok(Some(frame)) => frame,
            Ok(None) => return Ok(Flow::Continue),
            Err(ChannelError::UnknownCode { code, ticket }) => {
                warn!(code, "Ignoring unknown command");
                self.channel.complete(ticket);
                return Ok(Flow::Continue);
            }
            Err(e) => return Err(e.into()),
        };
        let flow = self.execute(&command);
        self.channel.complete(ticket);
        flow
    }

    #[instrument(skip_all, fields(code = ?command.code))]
    fn execute(&mut self, command: &Command) -> Result<Flow, ReactorError> {
        match command.code {
            CommandCode::None => {
                debug!("No-op command");
                Ok(Flow::Continue)
            }
            CommandCode::Quit => {
                info!("Quit requested");
                Ok(Flow::Quit)
            }
            CommandCode::RequestBusName => {
                self.bus
                    .request_name(&self.bus_name)
                    .map_err(|source| ReactorError::NameRequest {
                        name: self.bus_name.clone(),
                        source,
                    })?;
                Ok(Flow::Continue)
            }
        }
    }

    fn shutdown(self) {
        let Self {
            mut bus,
            channel,
            mut sources,
            paths,
            fallback,
            signals,
            teardown,
            ..
        } = self;
        for path in &paths {
            if !bus.unregister_object_path(path) {
                warn!(path, "Object path was not registered");
            }
        }
        if fallback {
            bus.unregister_fallback();
        }
        // Signals stay caught until the hooks are done; they can no longer
        // reach the channel once it is closed.
        if let Some(guard) = &signals {
            guard.detach();
        }
        channel.close();
        bus.close(&mut sources);
        drop(sources);
        for hook in teardown {
            hook();
        }
        drop(signals);
        info!("Reactor shut down");
    }
}
