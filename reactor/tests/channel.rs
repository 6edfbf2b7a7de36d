use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Duration;

use reactor::channel::CommandChannel;
use reactor::command::{Command, CommandCode};
use reactor::errors::ChannelError;

const THREADS: u32 = 8;
const PER_THREAD: u32 = 40;

#[test]
fn concurrent_async_senders_never_corrupt_frames() {
    let channel = CommandChannel::new().unwrap();
    let workers: Vec<_> = (0..THREADS)
        .map(|id| {
            let sender = channel.sender();
            thread::spawn(move || {
                for seq in 0..PER_THREAD {
                    let command = Command::new(CommandCode::None)
                        .with_params([id, seq, id ^ seq, !seq])
                        .with_payload(&format!("sender-{id}-{seq}"))
                        .unwrap();
                    sender.send_async(&command).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    let mut next = vec![0; THREADS as usize];
    let mut received = 0;
    while let Some((command, ticket)) = channel.recv().unwrap() {
        let [id, seq, mix, inverted] = command.params;
        assert_eq!(ticket, 0);
        assert_eq!(mix, id ^ seq);
        assert_eq!(inverted, !seq);
        assert_eq!(command.payload(), format!("sender-{id}-{seq}"));
        assert_eq!(next[id as usize], seq, "per-sender order");
        next[id as usize] += 1;
        received += 1;
    }
    assert_eq!(received, THREADS * PER_THREAD);
}

#[test]
fn send_sync_waits_until_processed() {
    let channel = CommandChannel::new().unwrap();
    let sender = channel.sender();
    let returned = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&returned);
    let waiter = thread::spawn(move || {
        let result = sender.send_sync(&Command::new(CommandCode::RequestBusName));
        flag.store(true, Ordering::SeqCst);
        result
    });

    let (command, ticket) = loop {
        if let Some(frame) = channel.recv().unwrap() {
            break frame;
        }
        thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(command.code, CommandCode::RequestBusName);
    assert_ne!(ticket, 0);

    thread::sleep(Duration::from_millis(100));
    assert!(!returned.load(Ordering::SeqCst));

    channel.complete(ticket);
    waiter.join().unwrap().unwrap();
    assert!(returned.load(Ordering::SeqCst));
}

#[test]
fn sync_senders_are_serialized() {
    let channel = CommandChannel::new().unwrap();
    let waiters: Vec<_> = (0..3)
        .map(|_| {
            let sender = channel.sender();
            thread::spawn(move || sender.send_sync(&Command::new(CommandCode::None)))
        })
        .collect();

    let mut tickets = Vec::new();
    while tickets.len() < 3 {
        match channel.recv().unwrap() {
            Some((_, ticket)) => {
                // A second synchronous frame never shows up before this one
                // is completed.
                thread::sleep(Duration::from_millis(20));
                assert!(channel.recv().unwrap().is_none());
                tickets.push(ticket);
                channel.complete(ticket);
            }
            None => thread::sleep(Duration::from_millis(5)),
        }
    }
    for waiter in waiters {
        waiter.join().unwrap().unwrap();
    }
    tickets.dedup();
    assert_eq!(tickets.len(), 3);
}

#[test]
fn closing_releases_waiting_sender() {
    let channel = CommandChannel::new().unwrap();
    let sender = channel.sender();
    let waiter = thread::spawn(move || sender.send_sync(&Command::QUIT));
    thread::sleep(Duration::from_millis(50));
    channel.close();
    assert!(matches!(
        waiter.join().unwrap(),
        Err(ChannelError::Closed)
    ));
}
