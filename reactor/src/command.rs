//! Fixed-width commands written through the channel pipe.
//!
//! Frame layout (native endian): `code: u32`, `ticket: u32`,
//! `params: [u32; 4]`, `payload: [u8; 64]`, zero padding up to
//! [`COMMAND_SIZE`]. One frame is always written with a single `write(2)`
//! and stays below `PIPE_BUF`, so concurrent writers never interleave.
use crate::errors::ChannelError;

pub const COMMAND_SIZE: usize = 128;
/// Payload bytes including the terminating NUL.
pub const PAYLOAD_SIZE: usize = 64;
pub const PARAM_COUNT: usize = 4;

const CODE_AT: usize = 0;
const TICKET_AT: usize = 4;
const PARAMS_AT: usize = 8;
const PAYLOAD_AT: usize = PARAMS_AT + PARAM_COUNT * 4;

const _: () = assert!(PAYLOAD_AT + PAYLOAD_SIZE <= COMMAND_SIZE);
const _: () = assert!(COMMAND_SIZE <= libc::PIPE_BUF);

pub type Frame = [u8; COMMAND_SIZE];

#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandCode {
    None = 0,
    Quit = 1,
    RequestBusName = 2,
}

impl CommandCode {
    fn from_raw(raw: u32) -> Option<Self> {
        match raw {
            0 => Some(Self::None),
            1 => Some(Self::Quit),
            2 => Some(Self::RequestBusName),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Command {
    pub code: CommandCode,
    pub params: [u32; PARAM_COUNT],
    payload: [u8; PAYLOAD_SIZE],
}

impl Command {
    pub const QUIT: Self = Self::new(CommandCode::Quit);

    pub const fn new(code: CommandCode) -> Self {
        Self {
            code,
            params: [0; PARAM_COUNT],
            payload: [0; PAYLOAD_SIZE],
        }
    }

    pub fn with_params(mut self, params: [u32; PARAM_COUNT]) -> Self {
        self.params = params;
        self
    }

    /// Attach a string of at most 63 bytes.
    pub fn with_payload(mut self, text: &str) -> Result<Self, ChannelError> {
        let bytes = text.as_bytes();
        if bytes.len() >= PAYLOAD_SIZE {
            return Err(ChannelError::PayloadTooLong(bytes.len()));
        }
        if bytes.contains(&0) {
            return Err(ChannelError::PayloadNul);
        }
        self.payload = [0; PAYLOAD_SIZE];
        self.payload[..bytes.len()].copy_from_slice(bytes);
        Ok(self)
    }

    pub fn payload(&self) -> &str {
        let end = self
            .payload
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(PAYLOAD_SIZE);
        std::str::from_utf8(&self.payload[..end]).unwrap_or_default()
    }

    /// Encode for the pipe. `ticket` is 0 unless a synchronous sender waits
    /// on the frame.
    pub const fn encode(&self, ticket: u32) -> Frame {
        let mut frame = [0; COMMAND_SIZE];
        put(&mut frame, CODE_AT, self.code as u32);
        put(&mut frame, TICKET_AT, ticket);
        let mut i = 0;
        while i < PARAM_COUNT {
            put(&mut frame, PARAMS_AT + i * 4, self.params[i]);
            i += 1;
        }
        let mut i = 0;
        while i < PAYLOAD_SIZE {
            frame[PAYLOAD_AT + i] = self.payload[i];
            i += 1;
        }
        frame
    }

    /// Decode a frame into its command and ticket.
    pub fn decode(frame: &Frame) -> Result<(Self, u32), ChannelError> {
        let raw = get(frame, CODE_AT);
        let ticket = get(frame, TICKET_AT);
        let code = CommandCode::from_raw(raw).ok_or(ChannelError::UnknownCode { code: raw, ticket })?;
        let mut command = Self::new(code);
        for (i, param) in command.params.iter_mut().enumerate() {
            *param = get(frame, PARAMS_AT + i * 4);
        }
        command
            .payload
            .copy_from_slice(&frame[PAYLOAD_AT..PAYLOAD_AT + PAYLOAD_SIZE]);
        command.payload[PAYLOAD_SIZE - 1] = 0;
        Ok((command, ticket))
    }
}

const fn put(frame: &mut Frame, at: usize, value: u32) {
    let bytes = value.to_ne_bytes();
    frame[at] = bytes[0];
    frame[at + 1] = bytes[1];
    frame[at + 2] = bytes[2];
    frame[at + 3] = bytes[3];
}

fn get(frame: &Frame, at: usize) -> u32 {
    u32::from_ne_bytes([frame[at], frame[at + 1], frame[at + 2], frame[at + 3]])
}
