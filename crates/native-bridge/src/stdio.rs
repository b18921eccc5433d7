//! NDJSON transport: one request per input line, one script per output line.

use crate::{BridgeResult, HostDispatcher};
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{broadcast, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, warn};

/// Write every script from `scripts` to `writer`, one per line.
pub fn spawn_script_writer<W>(
    mut scripts: mpsc::UnboundedReceiver<String>,
    mut writer: W,
) -> JoinHandle<std::io::Result<()>>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(script) = scripts.recv().await {
            writer.write_all(script.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }
        Ok(())
    })
}

/// Serve requests read from `reader` until EOF or shutdown.
///
/// Requests are dispatched concurrently. Returns the number of lines
/// handled once every in-flight dispatch has finished.
pub async fn serve_lines<R>(
    reader: R,
    dispatcher: Arc<HostDispatcher>,
    mut shutdown: broadcast::Receiver<()>,
) -> BridgeResult<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut in_flight = JoinSet::new();
    let mut handled = 0;

    info!("Bridge transport listening");

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    debug!("Bridge input closed");
                    break;
                };
                let trimmed = line.trim().to_string();
                if trimmed.is_empty() {
                    continue;
                }
                handled += 1;
                let dispatcher = dispatcher.clone();
                in_flight.spawn(async move {
                    if let Err(e) = dispatcher.handle_message(&trimmed).await {
                        warn!(error = %e, "Failed to answer bridge request");
                    }
                });
            }
            _ = shutdown.recv() => {
                info!("Bridge transport shutting down");
                break;
            }
        }
    }

    while in_flight.join_next().await.is_some() {}
    Ok(handled)
}
