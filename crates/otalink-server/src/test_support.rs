//! Fake device writers for unit tests.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::link::{Frame, LinkError, LinkReceiver};

/// Drain `receiver`, acknowledging every frame and forwarding it to the
/// returned channel. Abandoned frames are skipped like the socket writer does.
///
/// With `fail_after = Some(k)`, the first `k` binary frames succeed and the
/// next one is rejected with a transport error, after which the writer
/// stops (closing the link). Control frames are always accepted.
pub(crate) fn spawn_writer(
    mut receiver: LinkReceiver,
    fail_after: Option<usize>,
) -> (mpsc::UnboundedReceiver<Frame>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handle = tokio::spawn(async move {
        let mut binaries = 0usize;
        while let Some(out) = receiver.recv().await {
            if out.is_abandoned() {
                continue;
            }
            if let Frame::Binary(_) = out.frame {
                if fail_after == Some(binaries) {
                    let _ = out
                        .ack
                        .send(Err(LinkError::Transport("injected failure".to_string())));
                    break;
                }
                binaries += 1;
            }
            let _ = tx.send(out.frame);
            let _ = out.ack.send(Ok(()));
        }
    });
    (rx, handle)
}

/// Collect everything currently buffered in `rx`.
pub(crate) fn drain(rx: &mut mpsc::UnboundedReceiver<Frame>) -> Vec<Frame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}
