//! Cross-thread delivery of [`Command`]s into the reactor thread.
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::sync::{Arc, Condvar, Mutex, PoisonError, RwLock};

use tracing::debug;

use crate::command::{COMMAND_SIZE, Command, Frame};
use crate::errors::ChannelError;

#[derive(Default)]
struct Completion {
    done: u32,
    closed: bool,
}

struct Shared {
    write: RwLock<Option<OwnedFd>>,
    /// Serializes synchronous senders; holds the last ticket handed out.
    sync: Mutex<u32>,
    completion: Mutex<Completion>,
    processed: Condvar,
}

/// Reactor-side end of the channel. Owns the read end of the pipe.
pub struct CommandChannel {
    read: OwnedFd,
    shared: Arc<Shared>,
}

/// Cloneable handle any thread may use to reach the reactor.
#[derive(Clone)]
pub struct CommandSender {
    shared: Arc<Shared>,
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    // SAFETY: `fd` is a descriptor this module just created and still owns.
    unsafe {
        let flags = libc::fcntl(fd, libc::F_GETFL);
        if flags < 0 || libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) < 0 {
            return Err(io::Error::last_os_error());
        }
    }
    Ok(())
}

impl CommandChannel {
    pub fn new() -> Result<Self, ChannelError> {
        let mut fds = [-1; 2];
        // SAFETY: `fds` has room for the two descriptors pipe2 writes.
        if unsafe { libc::pipe2(fds.as_mut_ptr(), libc::O_CLOEXEC) } != 0 {
            return Err(ChannelError::Create(io::Error::last_os_error()));
        }
        // SAFETY: pipe2 succeeded so both descriptors are open and unowned.
        let (read, write) = unsafe { (OwnedFd::from_raw_fd(fds[0]), OwnedFd::from_raw_fd(fds[1])) };
        set_nonblocking(read.as_raw_fd()).map_err(ChannelError::Create)?;
        set_nonblocking(write.as_raw_fd()).map_err(ChannelError::Create)?;
        Ok(Self {
            read,
            shared: Arc::new(Shared {
                write: RwLock::new(Some(write)),
                sync: Mutex::new(0),
                completion: Mutex::new(Completion::default()),
                processed: Condvar::new(),
            }),
        })
    }

    pub fn sender(&self) -> CommandSender {
        CommandSender {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Read one frame. `Ok(None)` when nothing is pending.
    pub fn recv(&self) -> Result<Option<(Command, u32)>, ChannelError> {
        let mut frame: Frame = [0; COMMAND_SIZE];
        let n = loop {
            // SAFETY: `frame` is valid for COMMAND_SIZE bytes of writes.
            let n = unsafe {
                libc::read(
                    self.read.as_raw_fd(),
                    frame.as_mut_ptr().cast(),
                    COMMAND_SIZE,
                )
            };
            if n >= 0 {
                break n as usize;
            }
            let err = io::Error::last_os_error();
            match err.kind() {
                io::ErrorKind::Interrupted => continue,
                io::ErrorKind::WouldBlock => return Ok(None),
                _ => return Err(ChannelError::Read(err)),
            }
        };
        if n != COMMAND_SIZE {
            return Err(ChannelError::ShortRead(n));
        }
        Command::decode(&frame).map(Some)
    }

    /// Wake the synchronous sender waiting on `ticket`, if any.
    pub fn complete(&self, ticket: u32) {
        if ticket == 0 {
            return;
        }
        let mut completion = self
            .shared
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        completion.done = ticket;
        self.shared.processed.notify_all();
    }

    /// Close both pipe ends and release every waiting sender with an error.
    pub fn close(self) {
        self.sender().close();
        debug!("Command channel closed");
    }
}

impl AsRawFd for CommandChannel {
    fn as_raw_fd(&self) -> RawFd {
        self.read.as_raw_fd()
    }
}

impl CommandSender {
    fn write_frame(&self, frame: &Frame) -> Result<(), ChannelError> {
        let write = self
            .shared
            .write
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let fd = write.as_ref().ok_or(ChannelError::Closed)?;
        loop {
            // SAFETY: `frame` is valid for COMMAND_SIZE bytes of reads.
            let n = unsafe { libc::write(fd.as_raw_fd(), frame.as_ptr().cast(), COMMAND_SIZE) };
            if n < 0 {
                let err = io::Error::last_os_error();
                if err.kind() == io::ErrorKind::Interrupted {
                    continue;
                }
                return Err(ChannelError::Write(err));
            }
            let n = n as usize;
            return if n == COMMAND_SIZE {
                Ok(())
            } else {
                Err(ChannelError::ShortWrite(n))
            };
        }
    }

    /// Queue `command` without waiting for it to be processed.
    pub fn send_async(&self, command: &Command) -> Result<(), ChannelError> {
        self.write_frame(&command.encode(0))
    }

    /// Queue `command` and block until the reactor has processed it. Only
    /// one synchronous command is in flight at a time.
    pub fn send_sync(&self, command: &Command) -> Result<(), ChannelError> {
        let mut last = self
            .shared
            .sync
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let ticket = match last.wrapping_add(1) {
            0 => 1,
            ticket => ticket,
        };
        *last = ticket;
        self.write_frame(&command.encode(ticket))?;

        let mut completion = self
            .shared
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        while completion.done != ticket && !completion.closed {
            completion = self
                .shared
                .processed
                .wait(completion)
                .unwrap_or_else(PoisonError::into_inner);
        }
        if completion.done == ticket {
            Ok(())
        } else {
            Err(ChannelError::Closed)
        }
    }

    /// Write end of the pipe for async-signal-safe delivery.
    pub(crate) fn raw_write_fd(&self) -> Option<RawFd> {
        self.shared
            .write
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .map(AsRawFd::as_raw_fd)
    }

    fn close(&self) {
        self.shared
            .write
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let mut completion = self
            .shared
            .completion
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        completion.closed = true;
        self.shared.processed.notify_all();
    }
}
