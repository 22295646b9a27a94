use futures::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_util::codec::{FramedRead, FramedWrite, LinesCodec, LinesCodecError};

use super::Gateway;
use crate::error::{error_response, protocol_error, INVALID_REQUEST};
use crate::session::TransportKind;

const OUTBOUND_BUFFER: usize = 64;

/// Serve newline-delimited JSON-RPC on the process's stdin/stdout.
pub async fn run_stdio(gateway: Gateway, max_line_bytes: usize) -> Result<(), String> {
    tracing::info!("Serving MCP over stdio");
    serve_lines(gateway, tokio::io::stdin(), tokio::io::stdout(), max_line_bytes).await
}

/// One session per stream. Requests are handled one at a time in order;
/// responses and notifications share a single writer so frames never
/// interleave.
pub async fn serve_lines<R, W>(
    gateway: Gateway,
    reader: R,
    writer: W,
    max_line_bytes: usize,
) -> Result<(), String>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (outbound, mut outbound_rx) = mpsc::channel::<Value>(OUTBOUND_BUFFER);
    let writer_task = tokio::spawn(async move {
        let mut frames = FramedWrite::new(writer, LinesCodec::new());
        while let Some(message) = outbound_rx.recv().await {
            if let Err(err) = frames.send(message.to_string()).await {
                tracing::error!("Failed to write to stdout: {err}");
                break;
            }
        }
    });

    // Keep only the id: a held handle would keep the writer channel open.
    let session_id = gateway.sessions.create(TransportKind::Line, None).id;
    gateway
        .sessions
        .attach_outbound(&session_id, outbound.clone())
        .map_err(|err| err.to_string())?;

    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(max_line_bytes));
    let result = loop {
        let line = match lines.next().await {
            None => break Ok(()),
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                tracing::warn!("Discarding frame larger than {max_line_bytes} bytes");
                let response = error_response(
                    Value::Null,
                    protocol_error(INVALID_REQUEST, "Request too large"),
                );
                if outbound.send(response).await.is_err() {
                    break Ok(());
                }
                continue;
            }
            Some(Err(LinesCodecError::Io(err))) => break Err(format!("stdin read error: {err}")),
        };
        if line.trim().is_empty() {
            continue;
        }

        gateway.sessions.touch(&session_id).ok();
        if let Some(response) = gateway.handler.handle_text(&line, Some(&outbound)).await {
            if outbound.send(response).await.is_err() {
                tracing::debug!("Output closed; stopping line transport");
                break Ok(());
            }
        }
    };

    gateway.sessions.close(&session_id, "input closed");
    drop(outbound);
    let _ = writer_task.await;
    tracing::info!("Line transport finished");
    result
}
