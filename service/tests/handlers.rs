use std::cell::RefCell;
use std::io;
use std::path::Path;
use std::rc::Rc;

use fstools::{FsOps, MountPair, Mounter};
use pretty_assertions::assert_eq;
use reactor::bus::{Arg, ERROR_INVALID_ARGS, HandlerResult, Message, MessageHandler, ReplySink};
use runner::Executor;
use runner::errors::ProcessError;
use service::errors::RestoreError;
use service::{DataRestore, Fallback, HealthService, Request};

const INTERFACE: &str = "org.genivi.persistence.health";
const PATH: &str = "/org/genivi/persistence/health";

type Events = Rc<RefCell<Vec<String>>>;

struct FakeMounter {
    events: Events,
    fail: bool,
    mounted: Vec<String>,
}

impl Mounter for FakeMounter {
    fn mount(&mut self, device: &str, target: &Path, fstype: &str, _: u64) -> io::Result<()> {
        let target = target.display().to_string();
        self.events
            .borrow_mut()
            .push(format!("mount {device} {target} {fstype}"));
        if self.fail || self.mounted.contains(&target) {
            return Err(io::Error::other("busy"));
        }
        self.mounted.push(target);
        Ok(())
    }

    fn unmount(&mut self, target: &Path, _: i32) -> io::Result<()> {
        let target = target.display().to_string();
        self.events.borrow_mut().push(format!("unmount {target}"));
        if self.fail {
            return Err(io::Error::other("not mounted"));
        }
        self.mounted.retain(|m| *m != target);
        Ok(())
    }
}

struct FakeTools {
    events: Events,
    fsck: Option<i32>,
    mkfs: i32,
}

impl Executor for FakeTools {
    fn execute(&mut self, argv: &[String]) -> Result<i32, ProcessError> {
        self.events.borrow_mut().push(argv.join(" "));
        let Some(fsck) = self.fsck else {
            return Err(ProcessError::Spawn {
                program: argv[0].clone(),
                err: io::ErrorKind::NotFound.into(),
            });
        };
        Ok(if argv[0].contains("fsck") { fsck } else { self.mkfs })
    }
}

struct FakeRestore {
    events: Events,
    ok: bool,
}

impl DataRestore for FakeRestore {
    fn restore(&mut self) -> Result<(), RestoreError> {
        self.events.borrow_mut().push("restore".to_string());
        if self.ok { Ok(()) } else { Err(RestoreError::Failed(1)) }
    }
}

#[derive(Default)]
struct Sink(Vec<String>);

impl ReplySink for Sink {
    fn send_return(&mut self) {
        self.0.push("return".to_string());
    }

    fn send_error(&mut self, name: &str, _: &str) {
        self.0.push(name.to_string());
    }
}

type Service = HealthService<FakeMounter, FakeTools, FakeRestore>;

struct Setup {
    fsck: Option<i32>,
    mkfs: i32,
    mount_fails: bool,
    restore_ok: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            fsck: Some(0),
            mkfs: 0,
            mount_fails: false,
            restore_ok: true,
        }
    }
}

fn service(setup: Setup) -> (Service, Events) {
    let events = Events::default();
    let ops = FsOps::new(
        MountPair::new("/Data/mnt-c", "/Data/mnt-wt"),
        "/sbin",
        FakeMounter {
            events: Rc::clone(&events),
            fail: setup.mount_fails,
            mounted: Vec::new(),
        },
        FakeTools {
            events: Rc::clone(&events),
            fsck: setup.fsck,
            mkfs: setup.mkfs,
        },
    );
    let restore = FakeRestore {
        events: Rc::clone(&events),
        ok: setup.restore_ok,
    };
    (HealthService::new(INTERFACE, ops, restore), events)
}

fn call(member: &str, args: Vec<Arg>) -> Message {
    Message::method_call(PATH, INTERFACE, member, args)
}

fn request(service: &mut Service, member: &str, kind: &str) -> (HandlerResult, Vec<String>) {
    let mut sink = Sink::default();
    let result = service.handle(&call(member, vec![kind.into(), "/dev/mmcblk0p3".into()]), &mut sink);
    (result, sink.0)
}

const UNMOUNT_PAIR: [&str; 2] = ["unmount /Data/mnt-c", "unmount /Data/mnt-wt"];
const MOUNT_PAIR: [&str; 2] = [
    "mount /dev/mmcblk0p3 /Data/mnt-c ext4",
    "mount /dev/mmcblk0p3 /Data/mnt-wt ext4",
];
const FSCK: &str = "/sbin/fsck.ext4 /dev/mmcblk0p3 -p -v";
const MKFS: &str = "/sbin/mkfs.ext4 -F /dev/mmcblk0p3";

fn steps(parts: &[&[&str]]) -> Vec<String> {
    parts.concat().into_iter().map(str::to_string).collect()
}

#[test]
fn handled_even_when_every_operation_fails() {
    for request_kind in Request::ALL {
        let (mut service, events) = service(Setup {
            fsck: None,
            mount_fails: true,
            ..Setup::default()
        });
        let (result, replies) = request(&mut service, request_kind.member(), "ext4");
        assert_eq!(result, HandlerResult::Handled, "{request_kind:?}");
        assert!(replies.is_empty());
        assert!(!events.borrow().is_empty());
    }
}

#[test]
fn malformed_arguments_get_an_error_reply_and_touch_nothing() {
    let malformed = [
        vec![],
        vec![Arg::from("ext4")],
        vec![Arg::Int(4), Arg::from("/dev/mmcblk0p3")],
        vec![Arg::from("ext4"), Arg::Bool(true)],
    ];
    for request_kind in Request::ALL {
        for args in &malformed {
            let (mut service, events) = service(Setup::default());
            let mut sink = Sink::default();
            let result = service.handle(&call(request_kind.member(), args.clone()), &mut sink);
            assert_eq!(result, HandlerResult::NotYetHandled);
            assert_eq!(sink.0, [ERROR_INVALID_ARGS]);
            assert!(events.borrow().is_empty());
        }
    }
}

#[test]
fn recovery_happens_only_for_uncorrected_errors() {
    for code in [0, 1, 2, 4, 8, 16, 32, 128] {
        let (mut service, events) = service(Setup {
            fsck: Some(code),
            ..Setup::default()
        });
        let (result, _) = request(&mut service, "fsCheckAndRecover", "ext4");
        assert_eq!(result, HandlerResult::Handled);
        let expected = if code == 4 {
            steps(&[&UNMOUNT_PAIR, &[FSCK, MKFS], &MOUNT_PAIR, &["restore"]])
        } else {
            steps(&[&UNMOUNT_PAIR, &[FSCK]])
        };
        assert_eq!(*events.borrow(), expected, "fsck exit code {code}");
    }
}

#[test]
fn failed_recovery_format_skips_mount_and_restore() {
    let (mut service, events) = service(Setup {
        fsck: Some(4),
        mkfs: 1,
        ..Setup::default()
    });
    request(&mut service, "fsCheckAndRecover", "ext4");
    assert_eq!(*events.borrow(), steps(&[&UNMOUNT_PAIR, &[FSCK, MKFS]]));
}

#[test]
fn failed_restore_is_still_handled() {
    let (mut service, events) = service(Setup {
        fsck: Some(4),
        restore_ok: false,
        ..Setup::default()
    });
    let (result, _) = request(&mut service, "fsCheckAndRecover", "ext4");
    assert_eq!(result, HandlerResult::Handled);
    assert_eq!(events.borrow().last().map(String::as_str), Some("restore"));
}

#[test]
fn check_remounts_whatever_the_outcome() {
    for code in [0, 4, 8] {
        let (mut service, events) = service(Setup {
            fsck: Some(code),
            ..Setup::default()
        });
        request(&mut service, "fsCheck", "ext4");
        assert_eq!(
            *events.borrow(),
            steps(&[&UNMOUNT_PAIR, &[FSCK], &MOUNT_PAIR])
        );
    }
}

#[test]
fn single_step_requests() {
    let (mut service, events) = service(Setup::default());
    request(&mut service, "mount", "ext4");
    request(&mut service, "umount", "ext4");
    request(&mut service, "createPartition", "ext4");
    assert_eq!(
        *events.borrow(),
        steps(&[&MOUNT_PAIR, &UNMOUNT_PAIR, &UNMOUNT_PAIR, &[MKFS]])
    );
}

#[test]
fn mounting_twice_is_logged_not_fatal() {
    let (mut service, events) = service(Setup::default());
    for _ in 0..2 {
        let (result, replies) = request(&mut service, "mount", "ext4");
        assert_eq!(result, HandlerResult::Handled);
        assert!(replies.is_empty());
    }
    assert_eq!(*events.borrow(), steps(&[&MOUNT_PAIR, &MOUNT_PAIR]));
    assert_eq!(service.ops().mounter().mounted.len(), 2);
}

#[test]
fn mount_pair_is_always_operated_as_a_unit() {
    for request_kind in Request::ALL {
        let (mut service, events) = service(Setup {
            fsck: Some(4),
            ..Setup::default()
        });
        request(&mut service, request_kind.member(), "ext4");
        let events = events.borrow();
        let mount_steps: Vec<_> = events
            .iter()
            .filter(|e| e.starts_with("mount ") || e.starts_with("unmount "))
            .collect();
        for pair in mount_steps.chunks(2) {
            assert_eq!(pair.len(), 2, "{request_kind:?}");
            assert!(pair[0].ends_with("/Data/mnt-c") || pair[0].contains("/Data/mnt-c "));
            assert!(pair[1].ends_with("/Data/mnt-wt") || pair[1].contains("/Data/mnt-wt "));
        }
    }
}

#[test]
fn unknown_kind_only_unmounts() {
    let (mut service, events) = service(Setup::default());
    let (result, _) = request(&mut service, "fsCheck", "xfs");
    assert_eq!(result, HandlerResult::Handled);
    assert_eq!(*events.borrow(), steps(&[&UNMOUNT_PAIR]));
}

#[test]
fn foreign_interface_and_unknown_member_are_not_handled() {
    let (mut service, events) = service(Setup::default());
    let mut sink = Sink::default();
    let foreign = Message::method_call(PATH, "org.example.other", "mount", vec![
        "ext4".into(),
        "/dev/sda1".into(),
    ]);
    assert_eq!(service.handle(&foreign, &mut sink), HandlerResult::NotYetHandled);
    let unknown = call("format", vec!["ext4".into(), "/dev/sda1".into()]);
    assert_eq!(service.handle(&unknown, &mut sink), HandlerResult::NotYetHandled);
    assert!(sink.0.is_empty());
    assert!(events.borrow().is_empty());
}

#[test]
fn fallback_never_handles() {
    let mut sink = Sink::default();
    let message = Message::method_call("/", "org.freedesktop.DBus.Peer", "Ping", vec![]);
    assert_eq!(Fallback.handle(&message, &mut sink), HandlerResult::NotYetHandled);
    assert!(sink.0.is_empty());
}
