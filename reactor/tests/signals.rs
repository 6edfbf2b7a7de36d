use std::thread;
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use reactor::channel::CommandChannel;
use reactor::command::Command;
use reactor::signals;

fn wait_for_frame(channel: &CommandChannel) -> Option<(Command, u32)> {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Some(frame) = channel.recv().unwrap() {
            return Some(frame);
        }
        thread::sleep(Duration::from_millis(10));
    }
    None
}

// One test per binary: the ctrlc handler can only be installed once.
#[test]
fn each_termination_signal_queues_one_quit() {
    let channel = CommandChannel::new().unwrap();
    let guard = signals::install(&channel.sender()).unwrap();

    // SAFETY: a handler for SIGQUIT is installed.
    assert_eq!(unsafe { libc::raise(libc::SIGQUIT) }, 0);
    assert_eq!(channel.recv().unwrap(), Some((Command::QUIT, 0)));
    assert_eq!(channel.recv().unwrap(), None);

    for signo in [libc::SIGTERM, libc::SIGINT, libc::SIGHUP] {
        // SAFETY: ctrlc handles all three.
        assert_eq!(unsafe { libc::raise(signo) }, 0);
        assert_eq!(wait_for_frame(&channel), Some((Command::QUIT, 0)));
        thread::sleep(Duration::from_millis(50));
        assert_eq!(channel.recv().unwrap(), None);
    }

    guard.detach();
    // SAFETY: the handler is still installed but no longer writes.
    assert_eq!(unsafe { libc::raise(libc::SIGQUIT) }, 0);
    assert_eq!(channel.recv().unwrap(), None);
    drop(guard);
}
