//! Memcached binary protocol encoder and decoder
//!
//! Every frame starts with a fixed 24-byte header in network byte order:
//!
//! ```text
//! +-------+--------+---------+--------+-----------+----------------+
//! | magic | opcode | key len | ex len | data type | status/vbucket |
//! |  u8   |   u8   |   u16   |   u8   |    u8     |      u16       |
//! +-------+--------+---------+--------+-----------+----------------+
//! | total body len |     opaque     |              cas             |
//! |      u32       |      u32       |              u64             |
//! +----------------+----------------+------------------------------+
//! ```
//!
//! The body follows as `extras | key | value`.

use std::io::Read;

use crate::utils::ProtocolError;

pub const REQUEST_MAGIC: u8 = 0x80;
pub const RESPONSE_MAGIC: u8 = 0x81;
pub const HEADER_LEN: usize = 24;

/// Flag bit marking a value stored as JSON
pub const JSON_FLAG: u32 = 2;

/// Upper bound on a response body; anything larger means the stream is out of sync
const MAX_BODY_LEN: usize = 128 * 1024 * 1024;

/// Request opcodes used by this client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    Get = 0x00,
    Set = 0x01,
    Delete = 0x04,
    Increment = 0x05,
    Decrement = 0x06,
    SaslListMechs = 0x20,
    SaslAuth = 0x21,
    SaslStep = 0x22,
}

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    NoError,
    KeyNotFound,
    Unauthorized,
    ContinueAuth,
    UnknownCommand,
    Other(u16),
}

impl Status {
    pub fn code(self) -> u16 {
        match self {
            Status::NoError => 0x0000,
            Status::KeyNotFound => 0x0001,
            Status::Unauthorized => 0x0020,
            Status::ContinueAuth => 0x0021,
            Status::UnknownCommand => 0x0081,
            Status::Other(code) => code,
        }
    }

    pub fn is_success(self) -> bool {
        self == Status::NoError
    }
}

impl From<u16> for Status {
    fn from(code: u16) -> Self {
        match code {
            0x0000 => Status::NoError,
            0x0001 => Status::KeyNotFound,
            0x0020 => Status::Unauthorized,
            0x0021 => Status::ContinueAuth,
            0x0081 => Status::UnknownCommand,
            other => Status::Other(other),
        }
    }
}

/// A fully read response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub opcode: u8,
    pub status: Status,
    pub extras: Vec<u8>,
    pub key: Vec<u8>,
    pub value: Vec<u8>,
    pub cas: u64,
}

impl Response {
    /// Fail with `ProtocolError::Unauthorized` if the server refused the request
    pub fn check_authorized(self) -> Result<Self, ProtocolError> {
        if self.status == Status::Unauthorized {
            Err(ProtocolError::Unauthorized)
        } else {
            Ok(self)
        }
    }

    /// Item flags carried in the first four bytes of a get response's extras
    pub fn flags(&self) -> Option<u32> {
        let bytes: [u8; 4] = self.extras.get(..4)?.try_into().ok()?;
        Some(u32::from_be_bytes(bytes))
    }

    /// New counter value from an increment/decrement response
    pub fn counter_value(&self) -> Result<u64, ProtocolError> {
        let bytes: [u8; 8] = self
            .value
            .as_slice()
            .try_into()
            .map_err(|_| ProtocolError::InvalidCounter(self.value.len()))?;
        Ok(u64::from_be_bytes(bytes))
    }
}

/// Request encoder with a reusable buffer
pub struct PacketEncoder {
    buf: Vec<u8>,
}

impl PacketEncoder {
    /// Create new encoder with specified capacity
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    /// Clear buffer for reuse
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Get encoded bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    /// Take ownership of buffer
    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Append one request frame
    ///
    /// Keys longer than `u16::MAX` or extras longer than `u8::MAX` cannot be
    /// framed; callers only pass hashed keys and fixed-size extras.
    pub fn encode(&mut self, opcode: Opcode, key: &[u8], value: &[u8], extras: &[u8]) {
        let body_len = extras.len() + key.len() + value.len();
        self.buf.reserve(HEADER_LEN + body_len);

        self.buf.push(REQUEST_MAGIC);
        self.buf.push(opcode as u8);
        self.buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
        self.buf.push(extras.len() as u8);
        self.buf.push(0); // data type
        self.buf.extend_from_slice(&0u16.to_be_bytes()); // vbucket
        self.buf.extend_from_slice(&(body_len as u32).to_be_bytes());
        self.buf.extend_from_slice(&0u32.to_be_bytes()); // opaque
        self.buf.extend_from_slice(&0u64.to_be_bytes()); // cas

        self.buf.extend_from_slice(extras);
        self.buf.extend_from_slice(key);
        self.buf.extend_from_slice(value);
    }
}

/// Encode a single request frame
pub fn encode_request(opcode: Opcode, key: &[u8], value: &[u8], extras: &[u8]) -> Vec<u8> {
    let mut encoder =
        PacketEncoder::with_capacity(HEADER_LEN + extras.len() + key.len() + value.len());
    encoder.encode(opcode, key, value, extras);
    encoder.into_bytes()
}

/// Extras for a set request: flags then expiration
pub fn set_extras(flags: u32, ttl: u32) -> [u8; 8] {
    let mut extras = [0u8; 8];
    extras[..4].copy_from_slice(&flags.to_be_bytes());
    extras[4..].copy_from_slice(&ttl.to_be_bytes());
    extras
}

/// Extras for increment/decrement: delta, initial value, expiration
pub fn counter_extras(delta: u64, initial: u64, ttl: u32) -> [u8; 20] {
    let mut extras = [0u8; 20];
    extras[..8].copy_from_slice(&delta.to_be_bytes());
    extras[8..16].copy_from_slice(&initial.to_be_bytes());
    extras[16..].copy_from_slice(&ttl.to_be_bytes());
    extras
}

/// Response decoder that always consumes whole frames
pub struct PacketDecoder<R> {
    reader: R,
    header: [u8; HEADER_LEN],
}

impl<R: Read> PacketDecoder<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            header: [0u8; HEADER_LEN],
        }
    }

    /// Decode next response frame from stream
    ///
    /// Reads exactly the header, then exactly the advertised body, however
    /// many partial reads the transport needs.
    pub fn decode(&mut self) -> Result<Response, ProtocolError> {
        self.reader.read_exact(&mut self.header)?;
        let h = &self.header;

        if h[0] != RESPONSE_MAGIC {
            return Err(ProtocolError::InvalidMagic(h[0]));
        }

        let opcode = h[1];
        let key_len = u16::from_be_bytes([h[2], h[3]]) as usize;
        let extras_len = h[4] as usize;
        let status = Status::from(u16::from_be_bytes([h[6], h[7]]));
        let body_len = u32::from_be_bytes([h[8], h[9], h[10], h[11]]) as usize;
        let cas = u64::from_be_bytes([h[16], h[17], h[18], h[19], h[20], h[21], h[22], h[23]]);

        if body_len > MAX_BODY_LEN {
            return Err(ProtocolError::Malformed(format!(
                "body length {} exceeds limit",
                body_len
            )));
        }
        if extras_len + key_len > body_len {
            return Err(ProtocolError::Malformed(format!(
                "extras ({}) + key ({}) longer than body ({})",
                extras_len, key_len, body_len
            )));
        }

        let mut body = vec![0u8; body_len];
        self.reader.read_exact(&mut body)?;

        let value = body.split_off(extras_len + key_len);
        let key = body.split_off(extras_len);
        let extras = body;

        Ok(Response {
            opcode,
            status,
            extras,
            key,
            value,
            cas,
        })
    }
}

#[cfg(test)]
pub(crate) fn encode_response(
    opcode: u8,
    status: u16,
    extras: &[u8],
    key: &[u8],
    value: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(HEADER_LEN + extras.len() + key.len() + value.len());
    buf.push(RESPONSE_MAGIC);
    buf.push(opcode);
    buf.extend_from_slice(&(key.len() as u16).to_be_bytes());
    buf.push(extras.len() as u8);
    buf.push(0);
    buf.extend_from_slice(&status.to_be_bytes());
    buf.extend_from_slice(&((extras.len() + key.len() + value.len()) as u32).to_be_bytes());
    buf.extend_from_slice(&0u32.to_be_bytes());
    buf.extend_from_slice(&0u64.to_be_bytes());
    buf.extend_from_slice(extras);
    buf.extend_from_slice(key);
    buf.extend_from_slice(value);
    buf
}
