//! OTA firmware push driver.
//!
//! `OtaService::push_firmware` resolves the target device, claims its
//! transfer lock and walks an `OtaSession` through
//! `BEGIN_SENT → STREAMING → END_SENT → COMPLETE`, failing the session on the
//! first transport error.

use std::sync::Arc;
use std::time::{Duration, Instant};

use otalink_core::{FailureReason, InvalidTransition, OtaSession, OtaState, OTA_CHUNK_SIZE};
use otalink_protocol::ServerMessage;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::link::{DeviceLink, Frame, LinkError};
use crate::registry::DeviceRegistry;
use crate::streamer::stream_chunks;

/// Tuning for firmware pushes.
#[derive(Debug, Clone)]
pub struct OtaConfig {
    /// Binary frame size.
    pub chunk_size: usize,
    /// Upper bound for the transport to accept one frame.
    pub send_timeout: Duration,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            chunk_size: OTA_CHUNK_SIZE,
            send_timeout: Duration::from_secs(10),
        }
    }
}

/// Errors reported to the caller of a firmware push.
#[derive(Debug, Error)]
pub enum OtaError {
    /// No open connection for the device. Nothing was sent.
    #[error("device offline")]
    DeviceUnreachable { device_id: String },

    /// Another push to the same device is running. Nothing was sent.
    #[error("update already in progress for {device_id}")]
    TransferInProgress { device_id: String },

    /// A frame could not be sent; the transfer was abandoned.
    #[error("transfer to {device_id} failed in {state} after {bytes_sent} bytes: {source}")]
    Transport {
        device_id: String,
        state: OtaState,
        bytes_sent: usize,
        #[source]
        source: LinkError,
    },

    #[error(transparent)]
    InvalidState(#[from] InvalidTransition),
}

/// Outcome of a completed push.
#[derive(Debug, Clone)]
pub struct TransferReport {
    pub transfer_id: Uuid,
    pub device_id: String,
    pub bytes_sent: usize,
    pub chunks_sent: usize,
    pub elapsed: Duration,
}

/// Pushes firmware images to registered devices.
#[derive(Debug, Clone)]
pub struct OtaService {
    registry: Arc<DeviceRegistry>,
    config: OtaConfig,
}

impl OtaService {
    pub fn new(registry: Arc<DeviceRegistry>, config: OtaConfig) -> Self {
        Self { registry, config }
    }

    pub fn config(&self) -> &OtaConfig {
        &self.config
    }

    /// Push `image` to `device_id` and wait for the transfer to finish.
    pub async fn push_firmware(
        &self,
        device_id: &str,
        image: &[u8],
    ) -> Result<TransferReport, OtaError> {
        let mut session = OtaSession::with_chunk_size(device_id, image.len(), self.config.chunk_size);

        let link = match self.registry.lookup(device_id) {
            Some(link) if link.is_open() => link,
            _ => {
                session.fail(FailureReason::DeviceOffline)?;
                info!("OTA to {} rejected: device offline", device_id);
                return Err(OtaError::DeviceUnreachable {
                    device_id: device_id.to_string(),
                });
            }
        };

        let Some(_guard) = self.registry.try_begin_transfer(device_id) else {
            warn!("OTA to {} rejected: transfer already running", device_id);
            return Err(OtaError::TransferInProgress {
                device_id: device_id.to_string(),
            });
        };

        let transfer_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            %transfer_id,
            "Starting OTA to {} on {}: {} bytes",
            device_id,
            link.id(),
            image.len()
        );

        match self.drive(&mut session, &link, image).await {
            Ok(()) => {
                let report = TransferReport {
                    transfer_id,
                    device_id: device_id.to_string(),
                    bytes_sent: session.bytes_sent(),
                    chunks_sent: session.chunks_sent(),
                    elapsed: started.elapsed(),
                };
                info!(
                    %transfer_id,
                    "OTA to {} complete: {} bytes in {} chunks ({:?})",
                    device_id,
                    report.bytes_sent,
                    report.chunks_sent,
                    report.elapsed
                );
                Ok(report)
            }
            Err(e) => {
                error!(%transfer_id, "OTA to {} failed: {}", device_id, e);
                Err(e)
            }
        }
    }

    async fn drive(
        &self,
        session: &mut OtaSession,
        link: &DeviceLink,
        image: &[u8],
    ) -> Result<(), OtaError> {
        let timeout = self.config.send_timeout;

        let begin = ServerMessage::OtaBegin {
            size: image.len() as u64,
        };
        if let Err(e) = link.send_timeout(Frame::Control(begin), timeout).await {
            return Err(abort(session, e));
        }
        session.begin_sent()?;

        session.start_streaming()?;
        let chunk_size = session.chunk_size();
        let streamed = stream_chunks(link, image, chunk_size, timeout, |len| {
            let before = session.progress_percent();
            if let Err(e) = session.record_chunk(len) {
                warn!("Chunk accounting out of sync: {}", e);
            }
            let after = session.progress_percent();
            if after / 10 != before / 10 {
                debug!("{}: {}% sent", session.device_id(), after);
            }
        })
        .await;
        if let Err(e) = streamed {
            return Err(abort(session, e.source));
        }
        debug!(
            "{}: streamed {} bytes in {} chunks",
            session.device_id(),
            session.bytes_sent(),
            session.chunks_sent()
        );

        session.end_sent()?;
        if let Err(e) = link
            .send_timeout(Frame::Control(ServerMessage::OtaEnd), timeout)
            .await
        {
            return Err(abort(session, e));
        }
        session.complete()?;
        Ok(())
    }
}

/// Fail `session` after a send error and build the caller-facing error.
fn abort(session: &mut OtaSession, source: LinkError) -> OtaError {
    let state = session.state();
    if let Err(e) = session.fail(FailureReason::Transport) {
        warn!("{}", e);
    }
    OtaError::Transport {
        device_id: session.device_id().to_string(),
        state,
        bytes_sent: session.bytes_sent(),
        source,
    }
}
