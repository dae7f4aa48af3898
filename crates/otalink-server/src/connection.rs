//! Device WebSocket connection handling.
//!
//! Every accepted socket is split in two:
//! - a writer task that owns the sink and drains the connection's
//!   `LinkReceiver`, one frame at a time
//! - the reader loop below, which feeds text frames to the `Dispatcher`,
//!   sends keepalive probes and stops when the link is closed

use std::fmt::Display;
use std::net::SocketAddr;

use axum::extract::ws::{Message, WebSocket};
use futures::{Sink, SinkExt, StreamExt};
use otalink_protocol::{encode_server_message, ServerMessage};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::dispatcher::ConnectionContext;
use crate::link::{DeviceLink, Frame, LinkError, LinkReceiver};
use crate::routes::AppState;

/// Serve one device socket until it closes.
pub async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: AppState) {
    info!("New device connection from {}", addr);

    let (ws_tx, mut ws_rx) = socket.split();
    let (link, outbound) = DeviceLink::channel(state.config.link_capacity);
    let writer = tokio::spawn(run_writer(ws_tx, outbound, addr));

    let mut ctx = ConnectionContext::new(addr, link.clone());
    let mut keepalive = tokio::time::interval(state.config.keepalive_interval);
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately.
    keepalive.tick().await;

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        state.dispatcher.handle_text(&mut ctx, &text).await;
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!("Ignoring {} byte binary frame from {}", data.len(), addr);
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Device {} closed connection", addr);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error from {}: {}", addr, e);
                        break;
                    }
                    None => {
                        info!("Device {} disconnected", addr);
                        break;
                    }
                    _ => {} // Ping/Pong are answered by the transport
                }
            }

            _ = keepalive.tick() => {
                // Nothing may interleave with a running OTA stream.
                let transferring = ctx
                    .identity
                    .as_deref()
                    .is_some_and(|id| state.registry.is_transfer_active(id));
                if transferring {
                    debug!("Skipping keepalive to {} during transfer", addr);
                } else if let Err(e) = link
                    .send_timeout(Frame::Control(ServerMessage::Ping), state.config.send_timeout)
                    .await
                {
                    debug!("Keepalive to {} failed: {}", addr, e);
                }
            }

            _ = link.closed() => {
                info!("Connection {} from {} closed by server", link.id(), addr);
                break;
            }
        }
    }

    link.close();
    state.dispatcher.on_close(&ctx);
    if let Err(e) = writer.await {
        error!("Writer task for {} failed: {}", addr, e);
    }
}

/// Write queued frames to the socket until the link closes.
///
/// Frames whose sender already gave up are dropped unsent.
async fn run_writer<S>(mut sink: S, mut outbound: LinkReceiver, addr: SocketAddr)
where
    S: Sink<Message> + Unpin,
    S::Error: Display,
{
    while let Some(out) = outbound.recv().await {
        if out.is_abandoned() {
            debug!("Dropping abandoned frame for {}", addr);
            continue;
        }
        let result = match to_message(out.frame) {
            Ok(msg) => sink
                .send(msg)
                .await
                .map_err(|e| LinkError::Transport(e.to_string())),
            Err(e) => Err(e),
        };

        let fatal = matches!(result, Err(LinkError::Transport(_)));
        if let Err(e) = &result {
            error!("Failed to send frame to {}: {}", addr, e);
        }
        let _ = out.ack.send(result);
        if fatal {
            break;
        }
    }

    outbound.close();
    let _ = sink.send(Message::Close(None)).await;
    let _ = sink.close().await;
    debug!("Writer for {} ({}) stopped", addr, outbound.id());
}

fn to_message(frame: Frame) -> Result<Message, LinkError> {
    match frame {
        Frame::Control(msg) => Ok(Message::Text(encode_server_message(&msg)?)),
        Frame::Binary(data) => Ok(Message::Binary(data)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::mpsc;
    use std::time::Duration;

    fn addr() -> SocketAddr {
        "127.0.0.1:40001".parse().unwrap()
    }

    #[tokio::test]
    async fn test_writer_skips_abandoned_frames() {
        let (link, outbound) = DeviceLink::channel(4);

        // Queued, then given up on before the writer runs.
        let cancelled =
            tokio::time::timeout(Duration::from_millis(20), link.send_binary(vec![1])).await;
        assert!(cancelled.is_err());

        let (sink, written) = mpsc::unbounded();
        let writer = tokio::spawn(run_writer(sink, outbound, addr()));

        link.send_binary(vec![2]).await.unwrap();
        link.send_control(ServerMessage::OtaEnd).await.unwrap();
        link.close();
        writer.await.unwrap();

        let written: Vec<Message> = written.collect().await;
        assert_eq!(written.len(), 3);
        assert!(matches!(&written[0], Message::Binary(data) if *data == vec![2u8]));
        assert!(matches!(&written[1], Message::Text(text) if text.contains("OTA_END")));
        assert!(matches!(written[2], Message::Close(None)));
    }

    #[tokio::test]
    async fn test_writer_stops_after_timeout() {
        let (link, outbound) = DeviceLink::channel(4);

        // Nothing drains the queue yet, so the send times out.
        let result = link
            .send_timeout(Frame::Binary(vec![1]), Duration::from_millis(20))
            .await;
        assert!(matches!(result, Err(LinkError::Timeout(_))));

        let (sink, written) = mpsc::unbounded();
        run_writer(sink, outbound, addr()).await;

        let written: Vec<Message> = written.collect().await;
        assert_eq!(written.len(), 1);
        assert!(matches!(written[0], Message::Close(None)));
    }
}
