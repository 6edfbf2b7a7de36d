//! Blocking execution of external tools with their output captured.
//!
//! The child's stdout and stderr are redirected into two non-blocking pipes
//! which the caller polls with a short timeout, so a silent child never
//! stalls the loop and a chatty one never fills its pipe and deadlocks.
use std::ffi::OsStr;
use std::io::{self, Read};
use std::os::unix::process::ExitStatusExt;
use std::process::{Command, ExitStatus, Stdio};
use std::time::Duration;

use mio::unix::pipe::Receiver;
use mio::{Events, Interest, Poll, Token};
use tracing::{info, warn};

pub mod errors;
use errors::*;

/// Upper bound on how long one poll of the output pipes may block.
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);

const READ_CHUNK: usize = 4096;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Seam between the filesystem operations and the processes they start.
pub trait Executor {
    /// Run `argv` to completion and return its exit code.
    fn execute(&mut self, argv: &[String]) -> Result<i32, ProcessError>;
}

/// Executor which logs every captured line tagged with the program name.
#[derive(Clone, Copy, Debug, Default)]
pub struct LoggingExecutor;

impl Executor for LoggingExecutor {
    fn execute(&mut self, argv: &[String]) -> Result<i32, ProcessError> {
        let program = argv.first().map(String::as_str).unwrap_or_default();
        info!(target: "phm::exec", program, "executing `{}`", argv.join(" "));
        run_blocking(argv, |stream, line| {
            info!(target: "phm::exec", program, ?stream, "{line}");
        })
    }
}

struct Pipe {
    stream: OutputStream,
    receiver: Option<Receiver>,
    pending: Vec<u8>,
}

impl Pipe {
    fn new(stream: OutputStream, receiver: Receiver) -> Self {
        Self {
            stream,
            receiver: Some(receiver),
            pending: Vec::new(),
        }
    }

    /// Read everything currently available and hand out complete lines.
    fn drain(&mut self, on_line: &mut impl FnMut(OutputStream, &str)) {
        let mut buf = [0; READ_CHUNK];
        loop {
            let Some(receiver) = self.receiver.as_mut() else {
                return;
            };
            let read = receiver.read(&mut buf);
            match read {
                Ok(0) => {
                    self.receiver = None;
                    break;
                }
                Ok(n) => {
                    self.pending.extend_from_slice(&buf[..n]);
                    self.emit_lines(on_line);
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(stream = ?self.stream, "Dropping output pipe after read error: {e}");
                    self.receiver = None;
                    break;
                }
            }
        }
    }

    fn emit_lines(&mut self, on_line: &mut impl FnMut(OutputStream, &str)) {
        while let Some(end) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=end).collect();
            emit(self.stream, &line[..end], on_line);
        }
    }

    /// Output without a trailing newline is still a line once the child is gone.
    fn finish(&mut self, on_line: &mut impl FnMut(OutputStream, &str)) {
        self.drain(on_line);
        if !self.pending.is_empty() {
            let rest = std::mem::take(&mut self.pending);
            emit(self.stream, &rest, on_line);
        }
    }
}

fn emit(stream: OutputStream, bytes: &[u8], on_line: &mut impl FnMut(OutputStream, &str)) {
    let text = String::from_utf8_lossy(bytes);
    on_line(stream, text.strip_suffix('\r').unwrap_or(&text));
}

fn exit_code(status: ExitStatus) -> i32 {
    status
        .code()
        .or_else(|| status.signal().map(|signo| 128 + signo))
        .unwrap_or(-1)
}

/// Run `argv` to completion, calling `on_line` for every line written to
/// stdout or stderr, and return the decoded exit code. A child killed by a
/// signal reports `128 + signo`.
pub fn run_blocking<S: AsRef<OsStr>>(
    argv: &[S],
    mut on_line: impl FnMut(OutputStream, &str),
) -> Result<i32, ProcessError> {
    let Some((program, args)) = argv.split_first() else {
        return Err(ProcessError::EmptyCommand);
    };
    let name = program.as_ref().to_string_lossy().into_owned();
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| ProcessError::Spawn {
            program: name.clone(),
            err,
        })?;

    let capture = |err| ProcessError::Capture {
        program: name.clone(),
        err,
    };
    let mut setup = || -> io::Result<(Poll, [Pipe; 2])> {
        let stdout = child.stdout.take().ok_or(io::ErrorKind::BrokenPipe)?;
        let stderr = child.stderr.take().ok_or(io::ErrorKind::BrokenPipe)?;
        let mut pipes = [
            Pipe::new(OutputStream::Stdout, Receiver::from(stdout)),
            Pipe::new(OutputStream::Stderr, Receiver::from(stderr)),
        ];
        let poll = Poll::new()?;
        for (index, pipe) in pipes.iter_mut().enumerate() {
            if let Some(receiver) = pipe.receiver.as_mut() {
                receiver.set_nonblocking(true)?;
                poll.registry()
                    .register(receiver, Token(index), Interest::READABLE)?;
            }
        }
        Ok((poll, pipes))
    };
    let (mut poll, mut pipes) = match setup() {
        Ok(parts) => parts,
        Err(err) => {
            let _ = child.kill();
            let _ = child.wait();
            return Err(capture(err));
        }
    };

    let mut events = Events::with_capacity(pipes.len());
    loop {
        match poll.poll(&mut events, Some(POLL_INTERVAL)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::Poll { program: name, err });
            }
        }
        for event in events.iter() {
            let Token(index) = event.token();
            if let Some(pipe) = pipes.get_mut(index) {
                pipe.drain(&mut on_line);
            }
        }
        match child.try_wait() {
            Ok(Some(status)) => {
                for pipe in pipes.iter_mut() {
                    pipe.finish(&mut on_line);
                }
                return Ok(exit_code(status));
            }
            Ok(None) => {}
            Err(err) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(ProcessError::Wait { program: name, err });
            }
        }
    }
}
