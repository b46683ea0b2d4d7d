//! RPC front end: translates wire requests into queue engine calls.

use std::sync::Arc;
use tokio::io::AsyncReadExt;

use crate::error::{CodecError, RpcError, ServeError};
use crate::net::{MuxStream, VirtualListener};
use crate::queue::Queue;
use crate::rpc::{read_frame, write_frame, Request, Response, MAGIC};
use crate::server::Shutdown;

/// Serve RPC connections from a virtual listener until it fails or
/// shutdown is triggered. Listener failure is terminal and propagates to
/// the composition.
pub async fn serve(
    mut listener: VirtualListener,
    queue: Arc<Queue>,
    shutdown: Shutdown,
) -> Result<(), ServeError> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let stream = accepted?;
                let queue = queue.clone();
                let shutdown = shutdown.clone();
                tokio::spawn(async move {
                    let peer = stream.peer_addr();
                    if let Err(err) = handle_connection(stream, queue, shutdown).await {
                        tracing::debug!(peer = %peer, error = %err, "rpc connection ended");
                    }
                });
            }
            () = shutdown.wait() => {
                tracing::info!("rpc server stopped");
                return Ok(());
            }
        }
    }
}

async fn handle_connection(
    mut stream: MuxStream,
    queue: Arc<Queue>,
    shutdown: Shutdown,
) -> Result<(), RpcError> {
    // The classifier replayed the magic, so it is read here whether the
    // connection came through the mux or a standalone listener.
    let mut magic = [0u8; MAGIC.len()];
    stream.read_exact(&mut magic).await?;
    if magic != MAGIC {
        return Err(CodecError::BadMagic.into());
    }

    while let Some((opcode, payload)) = read_frame(&mut stream).await? {
        let response = match Request::decode(opcode, &payload) {
            Ok(request) => dispatch(&queue, &shutdown, request).await,
            // A malformed frame means the stream can no longer be
            // trusted; report it and drop the connection.
            Err(err) => return Err(err.into()),
        };
        let (status, payload) = response.encode();
        write_frame(&mut stream, status, &payload).await?;
    }
    Ok(())
}

async fn dispatch(queue: &Queue, shutdown: &Shutdown, request: Request) -> Response {
    match request {
        Request::Pop {
            queue: name,
            timeout,
        } => match queue.pop_with_cancel(&name, timeout, shutdown.wait()).await {
            Ok(record) => Response::Pop(record),
            Err(err) => Response::Error(err.to_string()),
        },
        Request::Peek {
            queue: name,
            count,
        } => match queue.peek(&name, count).await {
            Ok(records) => Response::Peek(records),
            Err(err) => Response::Error(err.to_string()),
        },
    }
}
