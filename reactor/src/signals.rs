//! Routing of termination signals into the command channel.
//!
//! SIGINT, SIGTERM and SIGHUP go through `ctrlc`, whose handler thread
//! queues a `Quit` command. SIGQUIT gets a raw handler that only writes a
//! pre-encoded `Quit` frame to the channel pipe.
use std::io;
use std::sync::atomic::{AtomicI32, Ordering};

use tracing::{debug, warn};

use crate::channel::CommandSender;
use crate::command::{COMMAND_SIZE, Command, Frame};
use crate::errors::{ChannelError, ReactorError};

static QUIT_FRAME: Frame = Command::QUIT.encode(0);
static QUIT_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn on_sigquit(_: libc::c_int) {
    let fd = QUIT_FD.load(Ordering::Acquire);
    if fd < 0 {
        return;
    }
    // SAFETY: write(2) and errno access are async-signal-safe; QUIT_FRAME is
    // a static of exactly COMMAND_SIZE bytes.
    unsafe {
        let errno = libc::__errno_location();
        let saved = *errno;
        libc::write(fd, QUIT_FRAME.as_ptr().cast(), COMMAND_SIZE);
        *errno = saved;
    }
}

/// Restores default dispositions when dropped. The SIGQUIT handler must be
/// detached before the channel is closed.
pub struct SignalGuard(());

impl SignalGuard {
    /// Stop the SIGQUIT handler from writing to the channel. Signals are still
    /// caught, and dropped, until the guard itself is dropped.
    pub fn detach(&self) {
        QUIT_FD.store(-1, Ordering::Release);
    }
}

pub fn install(sender: &CommandSender) -> Result<SignalGuard, ReactorError> {
    let fd = sender.raw_write_fd().ok_or(ChannelError::Closed)?;
    QUIT_FD.store(fd, Ordering::Release);

    // SAFETY: `action` is fully initialised before use and the handler only
    // performs async-signal-safe work.
    let rc = unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = on_sigquit as extern "C" fn(libc::c_int) as libc::sighandler_t;
        action.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut action.sa_mask);
        libc::sigaction(libc::SIGQUIT, &action, std::ptr::null_mut())
    };
    if rc != 0 {
        QUIT_FD.store(-1, Ordering::Release);
        return Err(ReactorError::SignalAction(io::Error::last_os_error()));
    }

    let sender = sender.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        debug!("Termination signal received");
        if let Err(e) = sender.send_async(&Command::QUIT) {
            warn!("Could not deliver quit: {e}");
        }
    }) {
        drop(SignalGuard(()));
        return Err(e.into());
    }
    Ok(SignalGuard(()))
}

impl Drop for SignalGuard {
    fn drop(&mut self) {
        for signo in [libc::SIGINT, libc::SIGTERM, libc::SIGHUP, libc::SIGQUIT] {
            // SAFETY: restoring the default disposition has no preconditions.
            unsafe {
                libc::signal(signo, libc::SIG_DFL);
            }
        }
        QUIT_FD.store(-1, Ordering::Release);
    }
}
