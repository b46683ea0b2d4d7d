//! Captured webhook request snapshots and their wire encoding.
//!
//! The binary encoding is the only form that is ever persisted, so it must
//! round-trip exactly, multi-valued headers and zero-length bodies
//! included. Layout (all integers big-endian, variable fields prefixed with
//! a u32 length):
//!
//! ```text
//! i64  received_at (unix millis)
//! u32  header count
//!      per header: block(name), u32 value count, per value: block(value)
//! block(host)
//! block(body)
//! ```
//!
//! JSON (used by the HTTP front end) is a separate, serde-derived view.

use bytes::BufMut;
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::CodecError;

/// One named header with its repeated values, in arrival order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    pub name: String,
    pub value: Vec<String>,
}

/// An inbound request snapshot stored in a queue. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Record {
    /// Arrival time in milliseconds since the unix epoch.
    pub received_at: i64,
    pub header: Vec<Header>,
    pub host: String,
    pub body: String,
}

impl Record {
    /// Snapshot constructor stamped with the current wall clock.
    pub fn new(host: impl Into<String>, header: Vec<Header>, body: impl Into<String>) -> Self {
        Self {
            received_at: unix_millis(),
            header,
            host: host.into(),
            body: body.into(),
        }
    }

    /// Encode to the persisted binary form.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(32 + self.host.len() + self.body.len());
        buf.put_i64(self.received_at);
        buf.put_u32(self.header.len() as u32);
        for header in &self.header {
            put_block(&mut buf, header.name.as_bytes());
            buf.put_u32(header.value.len() as u32);
            for value in &header.value {
                put_block(&mut buf, value.as_bytes());
            }
        }
        put_block(&mut buf, self.host.as_bytes());
        put_block(&mut buf, self.body.as_bytes());
        buf
    }

    /// Strict decode of the persisted binary form. Rejects truncated
    /// input and trailing bytes so a corrupt store entry never turns into
    /// a silently wrong record.
    pub fn decode(mut src: &[u8]) -> Result<Self, CodecError> {
        let src = &mut src;
        let received_at = take_i64(src)?;
        let header_count = take_u32(src)?;
        let mut header = Vec::with_capacity(header_count.min(64) as usize);
        for _ in 0..header_count {
            let name = take_string(src, "header name")?;
            let value_count = take_u32(src)?;
            let mut value = Vec::with_capacity(value_count.min(16) as usize);
            for _ in 0..value_count {
                value.push(take_string(src, "header value")?);
            }
            header.push(Header { name, value });
        }
        let host = take_string(src, "host")?;
        let body = take_string(src, "body")?;
        if !src.is_empty() {
            return Err(CodecError::TrailingBytes);
        }
        Ok(Self {
            received_at,
            header,
            host,
            body,
        })
    }
}

fn unix_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

// Shared wire primitives, also used by the RPC frame codec.

pub(crate) fn put_block(dst: &mut Vec<u8>, bytes: &[u8]) {
    dst.put_u32(bytes.len() as u32);
    dst.put_slice(bytes);
}

pub(crate) fn take_u8(src: &mut &[u8]) -> Result<u8, CodecError> {
    let (&first, rest) = src.split_first().ok_or(CodecError::Truncated)?;
    *src = rest;
    Ok(first)
}

pub(crate) fn take_u32(src: &mut &[u8]) -> Result<u32, CodecError> {
    let bytes: [u8; 4] = take_array(src)?;
    Ok(u32::from_be_bytes(bytes))
}

pub(crate) fn take_u64(src: &mut &[u8]) -> Result<u64, CodecError> {
    let bytes: [u8; 8] = take_array(src)?;
    Ok(u64::from_be_bytes(bytes))
}

pub(crate) fn take_i64(src: &mut &[u8]) -> Result<i64, CodecError> {
    let bytes: [u8; 8] = take_array(src)?;
    Ok(i64::from_be_bytes(bytes))
}

pub(crate) fn take_block<'a>(src: &mut &'a [u8]) -> Result<&'a [u8], CodecError> {
    let len = take_u32(src)? as usize;
    if src.len() < len {
        return Err(CodecError::Truncated);
    }
    let (block, rest) = src.split_at(len);
    *src = rest;
    Ok(block)
}

pub(crate) fn take_string(src: &mut &[u8], field: &'static str) -> Result<String, CodecError> {
    let block = take_block(src)?;
    String::from_utf8(block.to_vec()).map_err(|_| CodecError::Utf8(field))
}

fn take_array<const N: usize>(src: &mut &[u8]) -> Result<[u8; N], CodecError> {
    if src.len() < N {
        return Err(CodecError::Truncated);
    }
    let (head, rest) = src.split_at(N);
    *src = rest;
    Ok(head.try_into().expect("split_at returned wrong length"))
}
