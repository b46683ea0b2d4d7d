//! Binary RPC wire format.
//!
//! A connection opens with a 4-byte magic (the same bytes the multiplexer
//! classifies on), then carries framed requests and responses:
//!
//! ```text
//! frame:    [ tag u8 ][ length u32 BE ][ payload ]
//! request:  tag = opcode (1 Pop, 2 Peek)
//!           Pop payload:  block(queue name), u64 timeout secs, u32 timeout nanos
//!           Peek payload: block(queue name), i64 count
//! response: tag = status (0 ok, 1 error)
//!           Pop ok:   u8 present flag, record bytes when present
//!           Peek ok:  u32 record count, then length-prefixed records
//!           error:    utf-8 message, the underlying error unchanged
//! ```
//!
//! block(x) is a u32 length prefix followed by the bytes, matching the
//! record codec. A zero timeout means "return immediately without
//! blocking".

use bytes::BufMut;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{CodecError, RpcError};
use crate::record::{put_block, take_block, take_i64, take_string, take_u32, take_u64, take_u8};
use crate::record::Record;

mod client;
mod server;

pub use client::Client;
pub use server::serve;

/// Connection handshake magic; also the multiplexer's RPC classifier key.
pub const MAGIC: [u8; 4] = *b"HKQ1";

/// Upper bound on a single frame's payload.
pub const MAX_FRAME: u32 = 16 * 1024 * 1024;

const OP_POP: u8 = 1;
const OP_PEEK: u8 = 2;

const STATUS_OK: u8 = 0;
const STATUS_ERROR: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Pop { queue: String, timeout: Duration },
    Peek { queue: String, count: i64 },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Pop(Option<Record>),
    Peek(Vec<Record>),
    Error(String),
}

impl Request {
    pub(crate) fn encode(&self) -> (u8, Vec<u8>) {
        let mut payload = Vec::new();
        match self {
            Request::Pop { queue, timeout } => {
                put_block(&mut payload, queue.as_bytes());
                payload.put_u64(timeout.as_secs());
                payload.put_u32(timeout.subsec_nanos());
                (OP_POP, payload)
            }
            Request::Peek { queue, count } => {
                put_block(&mut payload, queue.as_bytes());
                payload.put_i64(*count);
                (OP_PEEK, payload)
            }
        }
    }

    pub(crate) fn decode(opcode: u8, mut payload: &[u8]) -> Result<Self, CodecError> {
        let src = &mut payload;
        let request = match opcode {
            OP_POP => {
                let queue = take_string(src, "queue name")?;
                let secs = take_u64(src)?;
                let nanos = take_u32(src)?;
                Request::Pop {
                    queue,
                    timeout: Duration::new(secs, nanos),
                }
            }
            OP_PEEK => {
                let queue = take_string(src, "queue name")?;
                let count = take_i64(src)?;
                Request::Peek { queue, count }
            }
            other => return Err(CodecError::UnknownOpcode(other)),
        };
        if !src.is_empty() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(request)
    }
}

impl Response {
    pub(crate) fn encode(&self) -> (u8, Vec<u8>) {
        let mut payload = Vec::new();
        match self {
            Response::Pop(record) => {
                match record {
                    Some(record) => {
                        payload.put_u8(1);
                        payload.extend_from_slice(&record.encode());
                    }
                    None => payload.put_u8(0),
                }
                (STATUS_OK, payload)
            }
            Response::Peek(records) => {
                payload.put_u32(records.len() as u32);
                for record in records {
                    put_block(&mut payload, &record.encode());
                }
                (STATUS_OK, payload)
            }
            Response::Error(message) => (STATUS_ERROR, message.as_bytes().to_vec()),
        }
    }
}

pub(crate) fn decode_pop_payload(mut payload: &[u8]) -> Result<Option<Record>, CodecError> {
    let src = &mut payload;
    match take_u8(src)? {
        0 => {
            if !src.is_empty() {
                return Err(CodecError::TrailingBytes);
            }
            Ok(None)
        }
        _ => Ok(Some(Record::decode(*src)?)),
    }
}

pub(crate) fn decode_peek_payload(mut payload: &[u8]) -> Result<Vec<Record>, CodecError> {
    let src = &mut payload;
    let count = take_u32(src)?;
    let mut records = Vec::with_capacity(count.min(1024) as usize);
    for _ in 0..count {
        records.push(Record::decode(take_block(src)?)?);
    }
    if !src.is_empty() {
        return Err(CodecError::TrailingBytes);
    }
    Ok(records)
}

/// Read one frame. `Ok(None)` is a clean end of stream at a frame
/// boundary; anything truncated mid-frame is an error.
pub(crate) async fn read_frame<R>(reader: &mut R) -> Result<Option<(u8, Vec<u8>)>, RpcError>
where
    R: AsyncRead + Unpin,
{
    let mut tag = [0u8; 1];
    match reader.read_exact(&mut tag).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }
    let length = reader.read_u32().await?;
    if length > MAX_FRAME {
        return Err(CodecError::FrameTooLarge(length as u64, MAX_FRAME as u64).into());
    }
    let mut payload = vec![0u8; length as usize];
    reader.read_exact(&mut payload).await?;
    Ok(Some((tag[0], payload)))
}

pub(crate) async fn write_frame<W>(writer: &mut W, tag: u8, payload: &[u8]) -> Result<(), RpcError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_u8(tag).await?;
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
