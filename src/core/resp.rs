/// Redis RESP (Redis Serialization Protocol) parsing and generation

use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::str;

/// RESP data types
#[derive(Debug, Clone, PartialEq)]
pub enum RespValue {
    /// Simple String (+OK\r\n)
    SimpleString(String),
    /// Error (-ERR message\r\n)
    Error(String),
    /// Integer (:123\r\n)
    Integer(i64),
    /// Bulk String ($5\r\nhello\r\n)
    BulkString(Option<Bytes>), // None represents NULL
    /// Array (*2\r\n$5\r\nhello\r\n$5\r\nworld\r\n)
    Array(Option<Vec<RespValue>>), // None represents NULL array
}

impl RespValue {
    pub fn ok() -> Self {
        RespValue::SimpleString("OK".to_string())
    }

    pub fn bulk<B: Into<Bytes>>(data: B) -> Self {
        RespValue::BulkString(Some(data.into()))
    }

    pub fn null() -> Self {
        RespValue::BulkString(None)
    }

    pub fn array(elements: Vec<RespValue>) -> Self {
        RespValue::Array(Some(elements))
    }
}

/// RESP parser for reading Redis protocol messages
pub struct RespParser;

/// RESP encoder for writing Redis protocol messages
pub struct RespEncoder;

/// Parse error types
#[derive(Debug, thiserror::Error)]
pub enum RespParseError {
    #[error("Invalid RESP format: {0}")]
    InvalidFormat(String),
    #[error("Invalid UTF-8: {0}")]
    InvalidUtf8(#[from] str::Utf8Error),
    #[error("Invalid integer: {0}")]
    InvalidInteger(String),
}

type Parsed = Option<(RespValue, usize)>;

impl RespParser {
    /// Parse one RESP value from the front of `buf`.
    ///
    /// Returns `Ok(None)` and leaves `buf` untouched when the value is not
    /// complete yet; on success the consumed bytes are removed from `buf`.
    pub fn parse(buf: &mut BytesMut) -> Result<Option<RespValue>, RespParseError> {
        match Self::parse_at(buf, 0)? {
            Some((value, end)) => {
                buf.advance(end);
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Parse every complete value currently buffered
    pub fn parse_all(buf: &mut BytesMut) -> Result<Vec<RespValue>, RespParseError> {
        let mut values = Vec::new();
        while let Some(value) = Self::parse(buf)? {
            values.push(value);
        }
        Ok(values)
    }

    fn parse_at(buf: &[u8], pos: usize) -> Result<Parsed, RespParseError> {
        let Some(&kind) = buf.get(pos) else {
            return Ok(None);
        };
        let Some((line, next)) = Self::read_line(buf, pos + 1) else {
            return Ok(None);
        };

        match kind {
            b'+' => Ok(Some((
                RespValue::SimpleString(str::from_utf8(line)?.to_string()),
                next,
            ))),
            b'-' => Ok(Some((RespValue::Error(str::from_utf8(line)?.to_string()), next))),
            b':' => Ok(Some((RespValue::Integer(Self::parse_int(line)?), next))),
            b'$' => Self::parse_bulk_string(buf, line, next),
            b'*' => Self::parse_array(buf, line, next),
            other => Err(RespParseError::InvalidFormat(format!(
                "Unknown RESP type: {}",
                other as char
            ))),
        }
    }

    fn parse_bulk_string(buf: &[u8], line: &[u8], next: usize) -> Result<Parsed, RespParseError> {
        let size = Self::parse_int(line)?;
        if size == -1 {
            return Ok(Some((RespValue::BulkString(None), next)));
        }
        if size < 0 {
            return Err(RespParseError::InvalidFormat(
                "Invalid bulk string size".to_string(),
            ));
        }

        let end = Self::bulk_end(next, size)?;
        if buf.len() < end + 2 {
            return Ok(None);
        }
        if &buf[end..end + 2] != b"\r\n" {
            return Err(RespParseError::InvalidFormat(
                "Missing \\r\\n after bulk string".to_string(),
            ));
        }

        let content = Bytes::copy_from_slice(&buf[next..end]);
        Ok(Some((RespValue::BulkString(Some(content)), end + 2)))
    }

    fn parse_array(buf: &[u8], line: &[u8], next: usize) -> Result<Parsed, RespParseError> {
        let size = Self::parse_int(line)?;
        if size == -1 {
            return Ok(Some((RespValue::Array(None), next)));
        }
        if size < 0 {
            return Err(RespParseError::InvalidFormat(
                "Invalid array size".to_string(),
            ));
        }

        // every element takes at least three bytes
        let buffered = buf.len().saturating_sub(next) / 3;
        let mut elements = Vec::with_capacity(buffered.min(size as usize));
        let mut pos = next;
        for _ in 0..size {
            match Self::parse_at(buf, pos)? {
                Some((element, end)) => {
                    elements.push(element);
                    pos = end;
                }
                None => return Ok(None),
            }
        }

        Ok(Some((RespValue::Array(Some(elements)), pos)))
    }

    /// Offset just past the payload of a bulk string of `size` bytes at `next`
    fn bulk_end(next: usize, size: i64) -> Result<usize, RespParseError> {
        usize::try_from(size)
            .ok()
            .and_then(|size| next.checked_add(size))
            .filter(|end| end.checked_add(2).is_some())
            .ok_or_else(|| RespParseError::InvalidFormat("Invalid bulk string size".to_string()))
    }

    fn parse_int(line: &[u8]) -> Result<i64, RespParseError> {
        btoi::btoi::<i64>(line).map_err(|e| RespParseError::InvalidInteger(e.to_string()))
    }

    /// Locate the line starting at `start`; returns its content and the offset after `\r\n`.
    fn read_line(buf: &[u8], start: usize) -> Option<(&[u8], usize)> {
        let rest = buf.get(start..)?;
        let idx = rest.windows(2).position(|w| w == b"\r\n")?;
        Some((&rest[..idx], start + idx + 2))
    }
}

/// Finds where the next complete value ends without building it.
///
/// Progress is kept between calls, so a large reply arriving over many reads
/// is walked once. Call [`FrameScanner::scan`] after every read on the same
/// buffer; once it reports a length the value can be parsed in one pass.
#[derive(Debug, Default)]
pub struct FrameScanner {
    /// Bytes of the current value already walked
    pos: usize,
    /// Values still expected per open array, innermost last
    pending: Vec<u64>,
}

impl FrameScanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Length of the first complete value in `buf`, or `None` until it has arrived.
    pub fn scan(&mut self, buf: &[u8]) -> Result<Option<usize>, RespParseError> {
        let result = self.walk(buf);
        if !matches!(result, Ok(None)) {
            self.reset();
        }
        result
    }

    pub fn reset(&mut self) {
        self.pos = 0;
        self.pending.clear();
    }

    fn walk(&mut self, buf: &[u8]) -> Result<Option<usize>, RespParseError> {
        if self.pending.is_empty() {
            self.pos = 0;
            self.pending.push(1);
        }
        loop {
            match self.pending.last().copied() {
                None => return Ok(Some(self.pos)),
                Some(0) => {
                    self.pending.pop();
                    continue;
                }
                Some(_) => {}
            }

            let Some(&kind) = buf.get(self.pos) else {
                return Ok(None);
            };
            let Some((line, next)) = RespParser::read_line(buf, self.pos + 1) else {
                return Ok(None);
            };
            let mut children = 0;
            match kind {
                b'+' | b'-' | b':' => self.pos = next,
                b'$' => match RespParser::parse_int(line)? {
                    -1 => self.pos = next,
                    size => {
                        let end = RespParser::bulk_end(next, size)?;
                        if buf.len() < end + 2 {
                            return Ok(None);
                        }
                        self.pos = end + 2;
                    }
                },
                b'*' => {
                    let size = RespParser::parse_int(line)?;
                    if size < -1 {
                        return Err(RespParseError::InvalidFormat(
                            "Invalid array size".to_string(),
                        ));
                    }
                    children = size.max(0) as u64;
                    self.pos = next;
                }
                other => {
                    return Err(RespParseError::InvalidFormat(format!(
                        "Unknown RESP type: {}",
                        other as char
                    )))
                }
            }
            if let Some(remaining) = self.pending.last_mut() {
                *remaining -= 1;
            }
            if children > 0 {
                self.pending.push(children);
            }
        }
    }
}

impl RespEncoder {
    /// Encode a RESP value to bytes
    pub fn encode(value: &RespValue) -> Bytes {
        let mut buf = BytesMut::new();
        Self::encode_into(&mut buf, value);
        buf.freeze()
    }

    /// Encode a RESP value into an existing buffer
    pub fn encode_into(buf: &mut BytesMut, value: &RespValue) {
        match value {
            RespValue::SimpleString(s) => {
                buf.put_u8(b'+');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Error(s) => {
                buf.put_u8(b'-');
                buf.extend_from_slice(s.as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::Integer(n) => {
                buf.put_u8(b':');
                buf.extend_from_slice(n.to_string().as_bytes());
                buf.put_slice(b"\r\n");
            }
            RespValue::BulkString(Some(data)) => Self::encode_bulk(buf, data),
            RespValue::BulkString(None) => {
                buf.extend_from_slice(b"$-1\r\n");
            }
            RespValue::Array(Some(elements)) => {
                buf.put_u8(b'*');
                buf.extend_from_slice(elements.len().to_string().as_bytes());
                buf.put_slice(b"\r\n");
                for element in elements {
                    Self::encode_into(buf, element);
                }
            }
            RespValue::Array(None) => {
                buf.extend_from_slice(b"*-1\r\n");
            }
        }
    }

    /// Encode a request as an array of bulk strings
    pub fn encode_request(buf: &mut BytesMut, args: &[Bytes]) {
        buf.put_u8(b'*');
        buf.extend_from_slice(args.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        for arg in args {
            Self::encode_bulk(buf, arg);
        }
    }

    fn encode_bulk(buf: &mut BytesMut, data: &[u8]) {
        buf.put_u8(b'$');
        buf.extend_from_slice(data.len().to_string().as_bytes());
        buf.put_slice(b"\r\n");
        buf.extend_from_slice(data);
        buf.put_slice(b"\r\n");
    }
}
