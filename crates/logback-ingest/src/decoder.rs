// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Incremental decoding of a connection's byte stream into logging event objects.
//!
//! The stream carries consecutive MessagePack values with no delimiter of their own: the
//! MessagePack type and length markers are the only framing. [`LoggingEventCodec`] tries to
//! decode one value from the front of a buffer and reports "need more bytes" while the value
//! is still incomplete. [`EventReader`] owns the socket and the buffer (the decode cursor) and
//! keeps reading until the codec yields a whole object, the peer closes, or reading fails.

use std::io::{self, Cursor};
use std::time::Duration;

use bytes::{Buf, BytesMut};
use serde::Deserialize;
use serde_json::{Map, Value};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::codec::Decoder;

use crate::errors::DecodeError;

/// Default upper bound on a single buffered object.
pub const DEFAULT_MAX_FRAME_LENGTH: usize = 8 * 1024 * 1024;

// Bytes reserved ahead of every socket read.
const READ_CHUNK: usize = 8192;

/// Field-accessible record decoded from one stream element.
pub type DecodedObject = Map<String, Value>;

/// Decodes one self-delimited MessagePack map per call.
///
/// Incoming bytes are first walked by a [`FrameScan`], which only reads type and length markers
/// and resumes where it stopped. The full decode runs once the scan has seen a complete value,
/// so reassembling a large object costs one pass over its bytes however it was split.
#[derive(Debug, Clone)]
pub struct LoggingEventCodec {
    max_frame_length: usize,
    scan: FrameScan,
}

impl Default for LoggingEventCodec {
    fn default() -> Self {
        Self::with_max_frame_length(DEFAULT_MAX_FRAME_LENGTH)
    }
}

impl LoggingEventCodec {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            max_frame_length,
            scan: FrameScan::new(),
        }
    }
}

impl Decoder for LoggingEventCodec {
    type Item = DecodedObject;
    type Error = DecodeError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        if !self.scan.is_ready(src) {
            if src.len() > self.max_frame_length {
                return Err(DecodeError::FrameTooLarge {
                    limit: self.max_frame_length,
                });
            }
            return Ok(None);
        }

        let (result, consumed) = {
            let mut cursor = Cursor::new(&src[..]);
            let result = {
                let mut deserializer = rmp_serde::Deserializer::new(&mut cursor);
                Value::deserialize(&mut deserializer)
            };
            (result, cursor.position())
        };

        match result {
            Ok(value) => {
                src.advance(usize::try_from(consumed).unwrap_or(src.len()));
                self.scan = FrameScan::new();
                match value {
                    Value::Object(map) => Ok(Some(map)),
                    other => Err(DecodeError::Unrecognized(kind_of(&other))),
                }
            }
            Err(e) if is_incomplete(&e) => Ok(None),
            Err(e) => Err(DecodeError::Malformed(e)),
        }
    }
}

/// Resumable walk over the markers of one MessagePack value.
///
/// The buffer only grows at its end while a value is incomplete, so the walk keeps its offset
/// and the number of items still owed by every open container between calls.
#[derive(Debug, Clone)]
struct FrameScan {
    offset: usize,
    pending: Vec<u64>,
}

impl FrameScan {
    fn new() -> Self {
        Self {
            offset: 0,
            pending: vec![1],
        }
    }

    /// Whether `buf` holds enough bytes for a decode attempt.
    ///
    /// Content the walk does not understand is handed to the decoder right away so it can
    /// report the error.
    fn is_ready(&mut self, buf: &[u8]) -> bool {
        loop {
            match self.pending.last().copied() {
                None => return true,
                Some(0) => {
                    self.pending.pop();
                    continue;
                }
                Some(_) => {}
            }

            let Some(&marker) = buf.get(self.offset) else {
                return false;
            };
            let Some(item) = item_layout(marker, &buf[self.offset + 1..]) else {
                return false;
            };
            let Some(item) = item else {
                return true;
            };

            let end = self
                .offset
                .saturating_add(1 + item.header)
                .saturating_add(item.payload);
            if end > buf.len() {
                return false;
            }
            self.offset = end;
            if let Some(remaining) = self.pending.last_mut() {
                *remaining -= 1;
            }
            if item.children > 0 {
                self.pending.push(item.children);
            }
        }
    }
}

struct ItemLayout {
    header: usize,
    payload: usize,
    children: u64,
}

// `None` when the length bytes have not arrived yet, `Some(None)` for a reserved marker.
fn item_layout(marker: u8, rest: &[u8]) -> Option<Option<ItemLayout>> {
    let fixed = |payload: usize| -> Option<Option<ItemLayout>> {
        Some(Some(ItemLayout {
            header: 0,
            payload,
            children: 0,
        }))
    };
    let sized = |len_bytes: usize, extra: usize| -> Option<Option<ItemLayout>> {
        let len = read_len(rest, len_bytes)?;
        Some(Some(ItemLayout {
            header: len_bytes,
            payload: usize::try_from(len).ok()?.checked_add(extra)?,
            children: 0,
        }))
    };
    let container = |len_bytes: usize, per_entry: u64| -> Option<Option<ItemLayout>> {
        let len = read_len(rest, len_bytes)?;
        Some(Some(ItemLayout {
            header: len_bytes,
            payload: 0,
            children: len * per_entry,
        }))
    };

    match marker {
        0x00..=0x7f | 0xe0..=0xff | 0xc0 | 0xc2 | 0xc3 => fixed(0),
        0x80..=0x8f => Some(Some(ItemLayout {
            header: 0,
            payload: 0,
            children: u64::from(marker & 0x0f) * 2,
        })),
        0x90..=0x9f => Some(Some(ItemLayout {
            header: 0,
            payload: 0,
            children: u64::from(marker & 0x0f),
        })),
        0xa0..=0xbf => fixed(usize::from(marker & 0x1f)),
        0xc4 | 0xd9 => sized(1, 0),
        0xc5 | 0xda => sized(2, 0),
        0xc6 | 0xdb => sized(4, 0),
        0xc7 => sized(1, 1),
        0xc8 => sized(2, 1),
        0xc9 => sized(4, 1),
        0xca => fixed(4),
        0xcb => fixed(8),
        0xcc | 0xd0 => fixed(1),
        0xcd | 0xd1 => fixed(2),
        0xce | 0xd2 => fixed(4),
        0xcf | 0xd3 => fixed(8),
        0xd4 => fixed(2),
        0xd5 => fixed(3),
        0xd6 => fixed(5),
        0xd7 => fixed(9),
        0xd8 => fixed(17),
        0xdc => container(2, 1),
        0xdd => container(4, 1),
        0xde => container(2, 2),
        0xdf => container(4, 2),
        0xc1 => Some(None),
    }
}

// Big-endian length of `len_bytes` bytes.
fn read_len(rest: &[u8], len_bytes: usize) -> Option<u64> {
    let bytes = rest.get(..len_bytes)?;
    Some(bytes.iter().fold(0u64, |acc, b| (acc << 8) | u64::from(*b)))
}

// Running out of input mid-value surfaces as an EOF while reading a marker or its payload.
fn is_incomplete(err: &rmp_serde::decode::Error) -> bool {
    match err {
        rmp_serde::decode::Error::InvalidMarkerRead(e)
        | rmp_serde::decode::Error::InvalidDataRead(e) => e.kind() == io::ErrorKind::UnexpectedEof,
        _ => false,
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "nil",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "map",
    }
}

/// Per-connection lazy sequence of decoded objects.
///
/// The sequence ends with `Ok(None)` on a clean close, or with the first error. Once it has
/// ended every further call returns `Ok(None)`; a new connection needs a new reader.
#[derive(Debug)]
pub struct EventReader<R> {
    io: R,
    codec: LoggingEventCodec,
    buffer: BytesMut,
    idle_timeout: Option<Duration>,
    finished: bool,
}

impl<R> EventReader<R>
where
    R: AsyncRead + Unpin,
{
    /// `idle_timeout` bounds every individual socket read; `None` waits forever.
    pub fn new(io: R, codec: LoggingEventCodec, idle_timeout: Option<Duration>) -> Self {
        Self {
            io,
            codec,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            idle_timeout,
            finished: false,
        }
    }

    pub async fn next(&mut self) -> Result<Option<DecodedObject>, DecodeError> {
        if self.finished {
            return Ok(None);
        }
        let result = self.decode_next().await;
        if !matches!(result, Ok(Some(_))) {
            self.finished = true;
        }
        result
    }

    async fn decode_next(&mut self) -> Result<Option<DecodedObject>, DecodeError> {
        loop {
            if let Some(object) = self.codec.decode(&mut self.buffer)? {
                return Ok(Some(object));
            }
            if self.read_more().await? == 0 {
                if self.buffer.is_empty() {
                    return Ok(None);
                }
                return Err(DecodeError::Truncated(self.buffer.len()));
            }
        }
    }

    async fn read_more(&mut self) -> Result<usize, DecodeError> {
        self.buffer.reserve(READ_CHUNK);
        let read = self.io.read_buf(&mut self.buffer);
        match self.idle_timeout {
            Some(limit) => tokio::time::timeout(limit, read)
                .await
                .map_err(|_| DecodeError::IdleTimeout(limit))?
                .map_err(DecodeError::from),
            None => read.await.map_err(DecodeError::from),
        }
    }

    pub fn into_inner(self) -> R {
        self.io
    }
}
