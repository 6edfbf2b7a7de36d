//! Bounded table of the watches and timers a bus connection registered.
use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use tracing::{debug, warn};

use crate::bus::{EventSources, Interest, Readiness, TimerHandle, WatchHandle};
use crate::channel::CommandSender;
use crate::command::{Command, CommandCode};
use crate::errors::SourceError;

/// Descriptors in one `poll(2)` call, the command channel included.
pub const POLL_CAPACITY: usize = 10;
/// Room left for bus sources.
pub const MAX_SOURCES: usize = POLL_CAPACITY - 1;

enum Kind {
    Watch {
        fd: RawFd,
        interest: Interest,
        enabled: bool,
    },
    Timer {
        fd: OwnedFd,
        interval_ms: u64,
        enabled: bool,
    },
}

struct Slot {
    id: u64,
    kind: Kind,
}

/// What a descriptor in the poll set belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Target {
    Channel,
    Watch(WatchHandle),
    Timer(TimerHandle),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Ready {
    Channel,
    Watch(WatchHandle, Readiness),
    Timer(TimerHandle),
}

/// Descriptors for one poll call with the owner of each entry.
pub(crate) struct PollSet {
    pub(crate) fds: Vec<libc::pollfd>,
    targets: Vec<Target>,
}

impl PollSet {
    /// Snapshot of everything that became ready, in poll order.
    pub(crate) fn ready(&self) -> Vec<Ready> {
        self.fds
            .iter()
            .zip(&self.targets)
            .filter(|(pfd, _)| pfd.revents != 0)
            .map(|(pfd, target)| match *target {
                Target::Channel => Ready::Channel,
                Target::Watch(handle) => {
                    Ready::Watch(handle, Readiness::from_revents(pfd.revents))
                }
                Target::Timer(handle) => Ready::Timer(handle),
            })
            .collect()
    }
}

fn timespec(ms: u64) -> libc::timespec {
    libc::timespec {
        tv_sec: (ms / 1000) as libc::time_t,
        tv_nsec: ((ms % 1000) * 1_000_000) as libc::c_long,
    }
}

fn arm(fd: &OwnedFd, interval_ms: u64, enabled: bool) -> io::Result<()> {
    let period = if enabled { interval_ms } else { 0 };
    let spec = libc::itimerspec {
        it_interval: timespec(period),
        it_value: timespec(period),
    };
    // SAFETY: `fd` is an open timerfd and `spec` outlives the call.
    if unsafe { libc::timerfd_settime(fd.as_raw_fd(), 0, &spec, std::ptr::null_mut()) } != 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn new_timer() -> io::Result<OwnedFd> {
    // SAFETY: plain syscall; the returned descriptor is checked before use.
    let fd = unsafe {
        libc::timerfd_create(libc::CLOCK_MONOTONIC, libc::TFD_NONBLOCK | libc::TFD_CLOEXEC)
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // SAFETY: `fd` was just created and is owned by nobody else.
    Ok(unsafe { OwnedFd::from_raw_fd(fd) })
}

pub struct SourceTable {
    slots: Vec<Slot>,
    next_id: u64,
    sender: CommandSender,
    name_requested: bool,
}

impl SourceTable {
    pub fn new(sender: CommandSender) -> Self {
        Self {
            slots: Vec::with_capacity(MAX_SOURCES),
            next_id: 1,
            sender,
            name_requested: false,
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    fn check_capacity(&self) -> Result<(), SourceError> {
        if self.slots.len() >= MAX_SOURCES {
            warn!(capacity = MAX_SOURCES, "Event source table full");
            return Err(SourceError::CapacityExceeded {
                capacity: MAX_SOURCES,
            });
        }
        Ok(())
    }

    fn insert(&mut self, kind: Kind) -> Result<u64, SourceError> {
        self.check_capacity()?;
        let id = self.next_id;
        self.next_id += 1;
        self.slots.push(Slot { id, kind });
        Ok(id)
    }

    fn remove(&mut self, id: u64) -> bool {
        let before = self.slots.len();
        self.slots.retain(|slot| slot.id != id);
        before != self.slots.len()
    }

    fn slot_mut(&mut self, id: u64) -> Option<&mut Slot> {
        self.slots.iter_mut().find(|slot| slot.id == id)
    }

    /// The first enabled watch means the bus can talk; ask the reactor to
    /// claim the service name once.
    fn watch_enabled(&mut self) {
        if self.name_requested {
            return;
        }
        match self
            .sender
            .send_async(&Command::new(CommandCode::RequestBusName))
        {
            Ok(()) => self.name_requested = true,
            Err(e) => warn!("Could not queue bus name request: {e}"),
        }
    }

    pub(crate) fn poll_set(&self, channel: RawFd) -> PollSet {
        let mut fds = Vec::with_capacity(POLL_CAPACITY);
        let mut targets = Vec::with_capacity(POLL_CAPACITY);
        fds.push(libc::pollfd {
            fd: channel,
            events: libc::POLLIN,
            revents: 0,
        });
        targets.push(Target::Channel);
        for slot in &self.slots {
            match &slot.kind {
                Kind::Watch {
                    fd,
                    interest,
                    enabled: true,
                } => {
                    let mut events = 0;
                    if interest.readable {
                        events |= libc::POLLIN;
                    }
                    if interest.writable {
                        events |= libc::POLLOUT;
                    }
                    fds.push(libc::pollfd {
                        fd: *fd,
                        events,
                        revents: 0,
                    });
                    targets.push(Target::Watch(WatchHandle(slot.id)));
                }
                Kind::Timer {
                    fd,
                    interval_ms,
                    enabled: true,
                } if *interval_ms > 0 => {
                    fds.push(libc::pollfd {
                        fd: fd.as_raw_fd(),
                        events: libc::POLLIN,
                        revents: 0,
                    });
                    targets.push(Target::Timer(TimerHandle(slot.id)));
                }
                _ => {}
            }
        }
        PollSet { fds, targets }
    }

    /// Whether `watch` should still be told about readiness seen in an
    /// earlier snapshot.
    pub(crate) fn watch_live(&self, watch: WatchHandle) -> bool {
        self.slots.iter().any(|slot| {
            slot.id == watch.0 && matches!(slot.kind, Kind::Watch { enabled: true, .. })
        })
    }

    /// Consume the expirations of `timer`. False if the timer went away or
    /// was disarmed since the snapshot.
    pub(crate) fn expire_timer(&self, timer: TimerHandle) -> bool {
        let Some(Slot {
            kind: Kind::Timer { fd, enabled, .. },
            ..
        }) = self.slots.iter().find(|slot| slot.id == timer.0)
        else {
            return false;
        };
        let mut expirations = 0u64;
        // SAFETY: reading exactly eight bytes into a u64.
        let n = unsafe {
            libc::read(
                fd.as_raw_fd(),
                (&mut expirations as *mut u64).cast(),
                size_of::<u64>(),
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                warn!(?timer, "Reading timer failed: {err}");
            }
            return false;
        }
        if expirations > 1 {
            debug!(?timer, expirations, "Timer overran");
        }
        *enabled
    }
}

impl EventSources for SourceTable {
    fn add_watch(
        &mut self,
        fd: RawFd,
        interest: Interest,
        enabled: bool,
    ) -> Result<WatchHandle, SourceError> {
        let id = self.insert(Kind::Watch {
            fd,
            interest,
            enabled,
        })?;
        debug!(fd, ?interest, enabled, id, "Added watch");
        if enabled {
            self.watch_enabled();
        }
        Ok(WatchHandle(id))
    }

    fn remove_watch(&mut self, watch: WatchHandle) {
        if self.remove(watch.0) {
            debug!(?watch, "Removed watch");
        }
    }

    fn toggle_watch(&mut self, watch: WatchHandle, enable: bool) {
        let Some(Slot {
            kind: Kind::Watch { enabled, .. },
            ..
        }) = self.slot_mut(watch.0)
        else {
            warn!(?watch, "Toggling unknown watch");
            return;
        };
        *enabled = enable;
        if enable {
            self.watch_enabled();
        }
    }

    fn add_timer(&mut self, interval_ms: u64, enabled: bool) -> Result<TimerHandle, SourceError> {
        self.check_capacity()?;
        let fd = new_timer().map_err(SourceError::Timer)?;
        arm(&fd, interval_ms, enabled).map_err(SourceError::Timer)?;
        let id = self.insert(Kind::Timer {
            fd,
            interval_ms,
            enabled,
        })?;
        debug!(interval_ms, enabled, id, "Added timer");
        Ok(TimerHandle(id))
    }

    fn remove_timer(&mut self, timer: TimerHandle) {
        if self.remove(timer.0) {
            debug!(?timer, "Removed timer");
        }
    }

    fn retarget_timer(
        &mut self,
        timer: TimerHandle,
        interval: u64,
        enable: bool,
    ) -> Result<(), SourceError> {
        let Some(Slot {
            kind:
                Kind::Timer {
                    fd,
                    interval_ms,
                    enabled,
                },
            ..
        }) = self.slot_mut(timer.0)
        else {
            return Err(SourceError::UnknownHandle);
        };
        arm(fd, interval, enable).map_err(SourceError::Timer)?;
        *interval_ms = interval;
        *enabled = enable;
        Ok(())
    }
}
