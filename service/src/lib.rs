//! Recovery requests served on the health object path.
//!
//! Every request carries a filesystem kind and a device path. Once those
//! parse, the request counts as handled no matter how the underlying
//! filesystem operations fare; failures are logged only.
use fstools::{FsKind, FsOps, Mounter};
use reactor::bus::{HandlerResult, Message, MessageHandler, ReplySink};
use runner::Executor;
use tracing::{info, instrument, warn};

pub mod errors;
mod restore;
mod session;

pub use restore::{CommandRestore, DataRestore};
pub use session::{SESSION_MANAGER, SESSION_NAME, SESSION_OWNER, session_registration};

const MOUNT_FLAGS: u64 = 0;
const UNMOUNT_FLAGS: i32 = 0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Request {
    Check,
    CheckAndRecover,
    Mount,
    Unmount,
    CreatePartition,
}

impl Request {
    pub const ALL: [Self; 5] = [
        Self::Check,
        Self::CheckAndRecover,
        Self::Mount,
        Self::Unmount,
        Self::CreatePartition,
    ];

    pub fn member(self) -> &'static str {
        match self {
            Self::Check => "fsCheck",
            Self::CheckAndRecover => "fsCheckAndRecover",
            Self::Mount => "mount",
            Self::Unmount => "umount",
            Self::CreatePartition => "createPartition",
        }
    }

    pub fn from_member(member: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|r| r.member() == member)
    }
}

pub struct HealthService<M, E, R> {
    interface: String,
    ops: FsOps<M, E>,
    restore: R,
}

impl<M: Mounter, E: Executor, R: DataRestore> HealthService<M, E, R> {
    pub fn new(interface: impl Into<String>, ops: FsOps<M, E>, restore: R) -> Self {
        Self {
            interface: interface.into(),
            ops,
            restore,
        }
    }

    pub fn ops(&self) -> &FsOps<M, E> {
        &self.ops
    }

    pub fn restore(&self) -> &R {
        &self.restore
    }

    fn unmount_pair(&mut self) {
        if let Err(e) = self.ops.unmount(UNMOUNT_FLAGS) {
            warn!("Unmount: {e}");
        }
    }

    fn mount_pair(&mut self, kind: FsKind, device: &str) {
        if let Err(e) = self.ops.mount(device, kind, MOUNT_FLAGS) {
            warn!("Mount: {e}");
        }
    }

    /// Unmount, check, and mount again whatever the check reports.
    #[instrument(skip(self))]
    pub fn check(&mut self, kind: FsKind, device: &str) {
        self.unmount_pair();
        if let Err(e) = self.ops.check(device, kind) {
            warn!("Check: {e}");
        }
        self.mount_pair(kind, device);
    }

    /// Unmount and check; on uncorrected errors reformat, mount and restore
    /// the default data set.
    #[instrument(skip(self))]
    pub fn check_and_recover(&mut self, kind: FsKind, device: &str) {
        self.unmount_pair();
        match self.ops.check(device, kind) {
            Ok(outcome) if outcome.needs_recovery() => {}
            Ok(_) => {
                info!("Filesystem ok, nothing to do");
                return;
            }
            Err(e) => {
                warn!("Check: {e}");
                return;
            }
        }
        if let Err(e) = self.ops.format(device, kind) {
            warn!("Recovery format: {e}");
            return;
        }
        self.mount_pair(kind, device);
        match self.restore.restore() {
            Ok(()) => info!("Persistence data set up"),
            Err(e) => warn!("Failed to set up persistence data: {e}"),
        }
    }

    #[instrument(skip(self))]
    pub fn mount(&mut self, kind: FsKind, device: &str) {
        self.mount_pair(kind, device);
    }

    #[instrument(skip(self))]
    pub fn unmount(&mut self) {
        self.unmount_pair();
    }

    #[instrument(skip(self))]
    pub fn create_partition(&mut self, kind: FsKind, device: &str) {
        self.unmount_pair();
        if let Err(e) = self.ops.format(device, kind) {
            warn!("Format: {e}");
        }
    }

    pub fn execute(&mut self, request: Request, kind: FsKind, device: &str) {
        match request {
            Request::Check => self.check(kind, device),
            Request::CheckAndRecover => self.check_and_recover(kind, device),
            Request::Mount => self.mount(kind, device),
            Request::Unmount => self.unmount(),
            Request::CreatePartition => self.create_partition(kind, device),
        }
    }
}

impl<M: Mounter, E: Executor, R: DataRestore> MessageHandler for HealthService<M, E, R> {
    fn handle(&mut self, message: &Message, replies: &mut dyn ReplySink) -> HandlerResult {
        if message.interface.as_deref() != Some(self.interface.as_str()) {
            return HandlerResult::NotYetHandled;
        }
        let Some(request) = Request::from_member(&message.member) else {
            warn!(member = %message.member, "Unknown health request");
            return HandlerResult::NotYetHandled;
        };
        let [kind, device] = match message.str_args::<2>() {
            Ok(args) => args,
            Err(e) => {
                warn!(member = %message.member, "Rejecting request: {e}");
                replies.send_error(e.name, &e.message);
                return HandlerResult::NotYetHandled;
            }
        };
        info!(member = %message.member, kind, device, "Health request");
        self.execute(request, FsKind::from(kind), device);
        HandlerResult::Handled
    }
}

/// Catches messages for every path the health object does not own.
#[derive(Clone, Copy, Debug, Default)]
pub struct Fallback;

impl MessageHandler for Fallback {
    fn handle(&mut self, message: &Message, _: &mut dyn ReplySink) -> HandlerResult {
        info!(
            path = %message.path,
            interface = message.interface.as_deref().unwrap_or_default(),
            member = %message.member,
            "Unhandled message"
        );
        HandlerResult::NotYetHandled
    }
}
