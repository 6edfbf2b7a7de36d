use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;
use reactor::Reactor;
use reactor::bus::local::{DRIVER_INTERFACE, DRIVER_PATH, ERROR_ACCESS_DENIED, LocalBus, Outbound};
use reactor::bus::{
    Arg, BusConnection, ERROR_INVALID_ARGS, ERROR_UNKNOWN_METHOD, HandlerResult, Message,
    ReplySink,
};
use reactor::command::Command;
use reactor::errors::BusError;

const REQUESTS: [&str; 8] = [
    r#"{"serial":1,"path":"/org/test/health","interface":"org.test.health","member":"ok","args":["ext4","/dev/sda1"]}"#,
    r#"{"serial":2,"path":"/org/test/health","member":"fail"}"#,
    r#"{"serial":3,"path":"/org/test/health","member":"other"}"#,
    r#"{"serial":4,"path":"/elsewhere","member":"ok"}"#,
    "not json",
    r#"{"serial":9,"path":"/org/test/health","member":"args","args":["ext4",1.5]}"#,
    r#"{"serial":10,"path":"/org/test/health","member":"args","args":["ext4",null]}"#,
    r#"{"serial":11,"path":"/org/test/health"}"#,
];

fn exchange(path: &Path) -> io::Result<Vec<Outbound>> {
    let stream = UnixStream::connect(path)?;
    stream.set_read_timeout(Some(Duration::from_secs(10)))?;
    let mut reader = BufReader::new(stream.try_clone()?);
    let mut writer = stream;
    let mut replies = Vec::new();
    for request in REQUESTS {
        writeln!(writer, "{request}")?;
        let mut line = String::new();
        reader.read_line(&mut line)?;
        replies.push(serde_json::from_str(&line).map_err(io::Error::other)?);
    }
    Ok(replies)
}

fn health(message: &Message, replies: &mut dyn ReplySink) -> HandlerResult {
    match message.member.as_str() {
        "ok" => HandlerResult::Handled,
        "args" => match message.str_args::<2>() {
            Ok(_) => HandlerResult::Handled,
            Err(e) => {
                replies.send_error(e.name, &e.message);
                HandlerResult::NotYetHandled
            }
        },
        "fail" => {
            replies.send_error("org.test.Error.Failed", "device busy");
            HandlerResult::Handled
        }
        _ => HandlerResult::NotYetHandled,
    }
}

#[test]
fn serves_requests_until_quit() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("run/bus.sock");
    let bus = LocalBus::open(&path).unwrap();
    let mut reactor = Reactor::new(bus, "org.test.health").unwrap();
    reactor
        .register_object_path("/org/test/health", Box::new(health))
        .unwrap();

    let sender = reactor.sender();
    let client_path = path.clone();
    let client = thread::spawn(move || {
        let replies = exchange(&client_path);
        sender.send_async(&Command::QUIT).unwrap();
        replies
    });
    reactor.run().unwrap();
    let replies = client.join().unwrap().unwrap();

    assert_eq!(replies[0], Outbound::Return { serial: 1 });
    assert_eq!(
        replies[1],
        Outbound::Error {
            serial: 2,
            name: "org.test.Error.Failed".to_string(),
            message: "device busy".to_string(),
        }
    );
    for (reply, serial) in replies[2..4].iter().zip([3, 4]) {
        assert!(matches!(
            reply,
            Outbound::Error { serial: s, name, .. } if *s == serial && name == ERROR_UNKNOWN_METHOD
        ));
    }
    assert!(matches!(
        &replies[4],
        Outbound::Error { serial: 0, name, .. } if name == ERROR_INVALID_ARGS
    ));
    for (reply, (serial, kind)) in replies[5..7].iter().zip([(9, "double"), (10, "null")]) {
        assert!(matches!(
            reply,
            Outbound::Error { serial: s, name, message }
                if *s == serial && name == ERROR_INVALID_ARGS && message.contains(kind)
        ));
    }
    assert!(matches!(
        &replies[7],
        Outbound::Error { serial: 11, name, .. } if name == ERROR_INVALID_ARGS
    ));
    assert!(!path.exists());
}

#[test]
fn live_socket_is_not_taken_over() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bus.sock");
    let _first = LocalBus::open(&path).unwrap();
    assert!(matches!(
        LocalBus::open(&path),
        Err(BusError::AddressInUse(_))
    ));
}

#[test]
fn stale_socket_is_replaced() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bus.sock");
    drop(UnixListener::bind(&path).unwrap());
    assert!(path.exists());
    let bus = LocalBus::open(&path).unwrap();
    assert_eq!(bus.path(), path);
    drop(bus);
    assert!(!path.exists());
}

#[test]
fn only_one_name_per_connection() {
    let dir = tempfile::tempdir().unwrap();
    let mut bus = LocalBus::open(dir.path().join("bus.sock")).unwrap();
    bus.request_name("org.test.health").unwrap();
    bus.request_name("org.test.health").unwrap();
    assert!(matches!(
        bus.request_name("org.test.other"),
        Err(BusError::NameTaken(_))
    ));
    assert_eq!(bus.owned_name(), Some("org.test.health"));
}

fn claim(stream: &mut UnixStream, serial: u64, name: &str) -> io::Result<()> {
    let request = serde_json::json!({
        "serial": serial,
        "path": DRIVER_PATH,
        "interface": DRIVER_INTERFACE,
        "member": "RequestName",
        "args": [name],
    });
    writeln!(stream, "{request}")
}

fn read_outbound(reader: &mut impl BufRead) -> io::Result<Outbound> {
    let mut line = String::new();
    reader.read_line(&mut line)?;
    serde_json::from_str(&line).map_err(io::Error::other)
}

fn registration() -> Message {
    Message::method_call(
        "/org/test/Consumer",
        "org.test.Consumer",
        "RegisterSession",
        vec!["PersistenceFailure".into(), Arg::Int(1)],
    )
}

#[test]
fn calls_wait_for_their_destination_to_be_claimed() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bus.sock");
    let bus = LocalBus::open(&path).unwrap();
    let mut reactor = Reactor::new(bus, "org.test.health").unwrap();
    reactor.call("org.test.Manager", registration()).unwrap();

    let sender = reactor.sender();
    let client_path = path.clone();
    let client = thread::spawn(move || -> io::Result<Vec<Outbound>> {
        let mut owner = UnixStream::connect(&client_path)?;
        owner.set_read_timeout(Some(Duration::from_secs(10)))?;
        let mut owner_reader = BufReader::new(owner.try_clone()?);
        claim(&mut owner, 1, "org.test.Manager")?;
        let mut seen = vec![
            read_outbound(&mut owner_reader)?,
            read_outbound(&mut owner_reader)?,
        ];

        let mut rival = UnixStream::connect(&client_path)?;
        rival.set_read_timeout(Some(Duration::from_secs(10)))?;
        let mut rival_reader = BufReader::new(rival.try_clone()?);
        claim(&mut rival, 7, "org.test.Manager")?;
        seen.push(read_outbound(&mut rival_reader)?);

        sender.send_async(&Command::QUIT).unwrap();
        Ok(seen)
    });
    reactor.run().unwrap();
    let seen = client.join().unwrap().unwrap();

    assert_eq!(seen[0], Outbound::Return { serial: 1 });
    assert_eq!(
        seen[1],
        Outbound::Call {
            serial: 1,
            destination: "org.test.Manager".to_string(),
            path: "/org/test/Consumer".to_string(),
            interface: Some("org.test.Consumer".to_string()),
            member: "RegisterSession".to_string(),
            args: vec!["PersistenceFailure".into(), Arg::Int(1)],
        }
    );
    assert!(matches!(
        &seen[2],
        Outbound::Error { serial: 7, name, .. } if name == ERROR_ACCESS_DENIED
    ));
}
