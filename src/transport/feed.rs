//! Newline-delimited JSON push feed.
//!
//! On connect a client receives `init`, then every `updateServers`. Sending
//! the line `requestHistoryGraph` returns one `historyGraph`.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::StreamExt;
use minewatch_types::Message;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio_util::codec::{FramedRead, LinesCodec, LinesCodecError};
use tracing::{debug, info};

use super::accepted;
use crate::hub::NotificationHub;

/// Longest request line a client may send. The only request is
/// `requestHistoryGraph`.
pub const MAX_REQUEST_LINE: usize = 256;

/// Accept feed clients on `listener` until `shutdown` is set.
pub async fn serve_feed(
    listener: TcpListener,
    hub: Arc<NotificationHub>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    info!(addr = %listener.local_addr()?, "Feed server listening");

    loop {
        let result = tokio::select! {
            result = listener.accept() => result,
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        };
        let Some((stream, peer)) = accepted(result, "feed").await else {
            continue;
        };
        let hub = Arc::clone(&hub);
        let shutdown = shutdown.clone();

        tokio::spawn(async move {
            debug!(%peer, "Feed client connected");
            match handle_client(stream, peer, hub, shutdown).await {
                Ok(()) => debug!(%peer, "Feed client disconnected"),
                Err(e) => debug!(%peer, error = %e, "Feed client dropped"),
            }
        });
    }

    info!("Feed server stopped");
    Ok(())
}

async fn handle_client(
    stream: TcpStream,
    peer: SocketAddr,
    hub: Arc<NotificationHub>,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_REQUEST_LINE));

    // Subscribe before sending init so no update falls in between.
    let mut updates = hub.subscribe();
    write_message(&mut writer, &hub.init_message()).await?;

    loop {
        tokio::select! {
            line = lines.next() => {
                let line = match line {
                    None => break,
                    Some(Ok(line)) => line,
                    Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                        debug!(%peer, limit = MAX_REQUEST_LINE, "Request line too long, closing");
                        break;
                    }
                    Some(Err(LinesCodecError::Io(e))) => return Err(e),
                };
                match hub.handle_request(&line) {
                    Some(reply) => write_message(&mut writer, &reply).await?,
                    None if line.trim().is_empty() => {}
                    None => debug!(%peer, request = %line.trim(), "Ignoring unknown request"),
                }
            }
            update = updates.recv() => match update {
                Ok(message) => write_message(&mut writer, &message).await?,
                Err(RecvError::Lagged(skipped)) => {
                    debug!(%peer, skipped, "Feed client lagging, skipped updates");
                }
                Err(RecvError::Closed) => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    writer.shutdown().await
}

/// Write one message as a JSON line.
pub async fn write_message<W>(writer: &mut W, message: &Message) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(message).map_err(io::Error::other)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await
}
