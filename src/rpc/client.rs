//! Minimal RPC client, used by consumers draining queues and by the
//! integration tests.

use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::error::RpcError;
use crate::record::Record;
use crate::rpc::{
    decode_peek_payload, decode_pop_payload, read_frame, write_frame, Request, MAGIC, STATUS_OK,
};

/// One RPC connection. Requests run one at a time, in order.
pub struct Client<S> {
    stream: S,
}

impl Client<TcpStream> {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self, RpcError> {
        let stream = TcpStream::connect(addr).await?;
        Self::handshake(stream).await
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Client<S> {
    /// Send the protocol magic over an established stream (plain TCP or
    /// TLS) and take ownership of it.
    pub async fn handshake(mut stream: S) -> Result<Self, RpcError> {
        stream.write_all(&MAGIC).await?;
        stream.flush().await?;
        Ok(Self { stream })
    }

    /// Blocking pop; a zero timeout returns immediately.
    pub async fn pop(&mut self, queue: &str, timeout: Duration) -> Result<Option<Record>, RpcError> {
        let payload = self
            .roundtrip(Request::Pop {
                queue: queue.to_string(),
                timeout,
            })
            .await?;
        Ok(decode_pop_payload(&payload)?)
    }

    /// Non-destructive peek; a zero count uses the server default.
    pub async fn peek(&mut self, queue: &str, count: i64) -> Result<Vec<Record>, RpcError> {
        let payload = self
            .roundtrip(Request::Peek {
                queue: queue.to_string(),
                count,
            })
            .await?;
        Ok(decode_peek_payload(&payload)?)
    }

    async fn roundtrip(&mut self, request: Request) -> Result<Vec<u8>, RpcError> {
        let (opcode, payload) = request.encode();
        write_frame(&mut self.stream, opcode, &payload).await?;
        let (status, payload) = read_frame(&mut self.stream)
            .await?
            .ok_or_else(|| RpcError::Io(std::io::ErrorKind::UnexpectedEof.into()))?;
        if status != STATUS_OK {
            return Err(RpcError::Remote(
                String::from_utf8_lossy(&payload).into_owned(),
            ));
        }
        Ok(payload)
    }
}
