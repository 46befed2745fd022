use crate::router;
use crate::state::AppState;
use crate::subscription::ClientFilter;
use bytes::Bytes;
use futures::{Sink, SinkExt, Stream, StreamExt};
use repl_core::ipc::{ReplRequest, ReplResponse};
use std::path::Path;
use std::sync::Arc;
use tokio::net::UnixListener;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};

pub async fn run_unix_server(
    socket_path: &str,
    state: Arc<AppState>,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    let listener = UnixListener::bind(socket_path)?;
    tracing::info!("IPC Server listening on {}", socket_path);

    loop {
        tokio::select! {
            res = listener.accept() => {
                let (stream, _) = res?;
                let state = state.clone();
                tokio::spawn(async move {
                    let (read, write) = stream.into_split();
                    // 4-byte little-endian length prefix + MessagePack payload
                    let le_codec = || LengthDelimitedCodec::builder().little_endian().new_codec();
                    let framed_read = FramedRead::new(read, le_codec());
                    let framed_write = FramedWrite::new(write, le_codec());
                    serve_connection(framed_read, framed_write, state).await;
                });
            }
            _ = shutdown.recv() => {
                tracing::info!("Shutting down IPC server...");
                break;
            }
        }
    }

    if Path::new(socket_path).exists() {
        std::fs::remove_file(socket_path)?;
    }

    Ok(())
}

async fn send_response<W>(framed_write: &mut W, response: &ReplResponse) -> bool
where
    W: Sink<Bytes, Error = std::io::Error> + Unpin,
{
    match rmp_serde::to_vec_named(response) {
        Ok(resp_bytes) => {
            if let Err(e) = framed_write.send(Bytes::from(resp_bytes)).await {
                tracing::error!("Failed to send response: {}", e);
                return false;
            }
            true
        }
        Err(e) => {
            tracing::error!("Failed to serialize response: {}", e);
            false
        }
    }
}

async fn serve_connection<R, W>(mut framed_read: R, mut framed_write: W, state: Arc<AppState>)
where
    R: Stream<Item = Result<bytes::BytesMut, std::io::Error>> + Unpin,
    W: Sink<Bytes, Error = std::io::Error> + Unpin,
{
    while let Some(frame) = framed_read.next().await {
        let bytes_mut = match frame {
            Ok(b) => b,
            Err(e) => {
                tracing::error!("Frame error: {}", e);
                break;
            }
        };

        let request: ReplRequest = match rmp_serde::from_slice(&bytes_mut) {
            Ok(req) => req,
            Err(e) => {
                let resp = ReplResponse::err(format!("Deserialization error: {}", e));
                if !send_response(&mut framed_write, &resp).await {
                    break;
                }
                continue;
            }
        };

        if let ReplRequest::Subscribe { client_id } = request {
            let events = state.events.subscribe();
            let ack = ReplResponse::ok(serde_json::json!({
                "subscribed": true,
                "client_id": client_id,
            }));
            if send_response(&mut framed_write, &ack).await {
                stream_events(framed_read, framed_write, events, ClientFilter::new(client_id)).await;
            }
            return;
        }

        let response = router::handle_request(request, &state).await;
        if !send_response(&mut framed_write, &response).await {
            break;
        }
    }
}

/// Forward relayed events to a subscribed connection until either side closes.
async fn stream_events<R, W>(
    mut framed_read: R,
    mut framed_write: W,
    mut events: broadcast::Receiver<String>,
    filter: ClientFilter,
) where
    R: Stream<Item = Result<bytes::BytesMut, std::io::Error>> + Unpin,
    W: Sink<Bytes, Error = std::io::Error> + Unpin,
{
    loop {
        tokio::select! {
            received = events.recv() => match received {
                Ok(payload) => {
                    if filter.accepts(&payload)
                        && !send_response(&mut framed_write, &ReplResponse::event(payload)).await
                    {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Event subscriber lagging, events dropped");
                }
                Err(RecvError::Closed) => break,
            },
            // anything the subscriber sends, or hanging up, ends the stream
            _ = framed_read.next() => break,
        }
    }
    tracing::debug!("Event subscription closed");
}
