//! Incremental Server-Sent Events decoder
//!
//! [`FrameDecoder`] turns arbitrary byte chunks into blank-line delimited
//! blocks, and [`parse_block`] turns one block into a [`MessageEvent`].
//!
//! A line terminator is `\r\n`, a lone `\r` or a lone `\n`; a block ends at
//! the first pair of consecutive terminators.

use std::borrow::Cow;
use std::time::Duration;

use bytes::{Buf, Bytes, BytesMut};

use crate::event::{MessageEvent, DEFAULT_EVENT_TYPE};

const BOM: &[u8] = b"\xEF\xBB\xBF";

/// Buffers body chunks of one connection attempt and yields complete blocks
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buffer: BytesMut,
    bom_checked: bool,
}

impl FrameDecoder {
    /// Create an empty decoder
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk received from the body stream
    pub fn push(&mut self, chunk: &[u8]) {
        self.buffer.extend_from_slice(chunk);
    }

    /// Take the next complete block, without its trailing blank line.
    ///
    /// Returns `None` once only a partial block is left; it stays buffered
    /// until more bytes arrive.
    pub fn next_block(&mut self) -> Option<Bytes> {
        if !self.strip_bom() {
            return None;
        }

        let (start, end) = find_boundary(&self.buffer)?;
        let block = self.buffer.split_to(start).freeze();
        self.buffer.advance(end - start);
        Some(block)
    }

    /// Drop any partial block, ready for a new connection attempt
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.bom_checked = false;
    }

    /// Number of bytes waiting for a block boundary
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Returns `false` while the buffer may still be the start of a BOM.
    fn strip_bom(&mut self) -> bool {
        if self.bom_checked {
            return true;
        }
        if self.buffer.len() < BOM.len() && BOM.starts_with(&self.buffer[..]) {
            return false;
        }
        if self.buffer.starts_with(BOM) {
            self.buffer.advance(BOM.len());
        }
        self.bom_checked = true;
        true
    }
}

/// Length of the line terminator starting at `at`, if any.
///
/// A `\r` at the very end of `buf` counts as a terminator on its own.
fn terminator_len(buf: &[u8], at: usize) -> Option<usize> {
    match buf.get(at)? {
        b'\r' if buf.get(at + 1) == Some(&b'\n') => Some(2),
        b'\r' | b'\n' => Some(1),
        _ => None,
    }
}

/// Leftmost `(start, end)` of two consecutive line terminators.
fn find_boundary(buf: &[u8]) -> Option<(usize, usize)> {
    (0..buf.len()).find_map(|start| {
        let first = terminator_len(buf, start)?;
        let second = terminator_len(buf, start + first)?;
        Some((start, start + first + second))
    })
}

/// Splits a block into lines on `\r\n`, `\r` or `\n`.
struct Lines<'a> {
    rest: Option<&'a [u8]>,
}

impl<'a> Iterator for Lines<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<&'a [u8]> {
        let rest = self.rest?;
        match rest.iter().position(|&b| b == b'\r' || b == b'\n') {
            Some(pos) => {
                let len = terminator_len(rest, pos).unwrap_or(1);
                self.rest = Some(&rest[pos + len..]);
                Some(&rest[..pos])
            }
            None => {
                self.rest = None;
                Some(rest)
            }
        }
    }
}

fn lines(block: &[u8]) -> Lines<'_> {
    Lines { rest: Some(block) }
}

/// Field name and value; a line without `:` is a name with an empty value.
fn split_field(line: &[u8]) -> (&[u8], &[u8]) {
    match line.iter().position(|&b| b == b':') {
        Some(colon) => {
            let value = &line[colon + 1..];
            (&line[..colon], value.strip_prefix(b" ").unwrap_or(value))
        }
        None => (line, &[]),
    }
}

/// Replace invalid UTF-8 sequences with U+FFFD, keeping the valid parts.
fn repair(value: &[u8]) -> Cow<'_, str> {
    String::from_utf8_lossy(value)
}

/// Parse a `retry` value: the canonical decimal form of a non-negative `i64`.
///
/// Signs, leading zeros, fractions and surrounding garbage are rejected.
pub fn parse_retry(value: &[u8]) -> Option<u64> {
    let text = std::str::from_utf8(value).ok()?;
    let millis: i64 = text.parse().ok()?;
    if millis < 0 || millis.to_string() != text {
        return None;
    }
    u64::try_from(millis).ok()
}

/// Result of parsing one block
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBlock {
    /// The decoded message; its data may be empty
    pub message: MessageEvent,
    /// Reconnect delay requested by a valid `retry` field
    pub retry: Option<Duration>,
}

/// Parse one block into a message.
///
/// `last_event_id` is the identifier carried forward from earlier blocks and
/// is used when the block has no usable `id` field. The caller decides what
/// to commit; this function keeps no state.
pub fn parse_block(block: &[u8], last_event_id: &str) -> ParsedBlock {
    let mut data = String::new();
    let mut id: Option<String> = None;
    let mut event_type: Option<String> = None;
    let mut retry: Option<u64> = None;

    for line in lines(block) {
        let (name, value) = split_field(line);
        match name {
            b"data" => {
                data.push_str(&repair(value));
                data.push('\n');
            }
            b"id" if !value.contains(&0) => id = Some(repair(value).into_owned()),
            b"event" if !value.is_empty() => event_type = Some(repair(value).into_owned()),
            b"retry" => {
                if let Some(millis) = parse_retry(value) {
                    retry = Some(millis);
                }
            }
            _ => {}
        }
    }

    if data.ends_with('\n') {
        data.pop();
    }

    let message = MessageEvent::from_parts(
        data,
        id.unwrap_or_else(|| last_event_id.to_owned()),
        event_type.unwrap_or_else(|| DEFAULT_EVENT_TYPE.to_owned()),
        retry,
    );

    ParsedBlock {
        message,
        retry: retry.map(Duration::from_millis),
    }
}
