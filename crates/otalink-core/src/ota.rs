//! OTA session state machine.
//!
//! One `OtaSession` tracks a single firmware push to one device:
//!
//! ```text
//! Init -> BeginSent -> Streaming -> EndSent -> Complete
//!   \________\____________\___________\______> Failed(reason)
//! ```
//!
//! `Complete` and `Failed` are terminal. The session only validates
//! transitions and counts bytes; sending frames is the caller's job.

use std::fmt;

use thiserror::Error;

use crate::model::OTA_CHUNK_SIZE;

/// Why a session ended in `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureReason {
    /// No live connection for the device when the push started.
    DeviceOffline,
    /// A control message or binary frame could not be sent.
    Transport,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::DeviceOffline => write!(f, "device offline"),
            FailureReason::Transport => write!(f, "transport failure"),
        }
    }
}

/// Current state of an OTA session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OtaState {
    Init,
    BeginSent,
    Streaming,
    EndSent,
    Complete,
    Failed(FailureReason),
}

impl OtaState {
    /// Whether no further transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OtaState::Complete | OtaState::Failed(_))
    }

    /// Whether frames may currently be in flight to the device.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            OtaState::BeginSent | OtaState::Streaming | OtaState::EndSent
        )
    }
}

impl fmt::Display for OtaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OtaState::Init => write!(f, "INIT"),
            OtaState::BeginSent => write!(f, "BEGIN_SENT"),
            OtaState::Streaming => write!(f, "STREAMING"),
            OtaState::EndSent => write!(f, "END_SENT"),
            OtaState::Complete => write!(f, "COMPLETE"),
            OtaState::Failed(reason) => write!(f, "FAILED ({reason})"),
        }
    }
}

/// Rejected state transition.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid OTA transition '{event}' in state {from}")]
pub struct InvalidTransition {
    pub from: OtaState,
    pub event: &'static str,
}

/// State of one firmware push.
#[derive(Debug, Clone)]
pub struct OtaSession {
    device_id: String,
    total_size: usize,
    chunk_size: usize,
    bytes_sent: usize,
    chunks_sent: usize,
    state: OtaState,
}

impl OtaSession {
    /// Create a session in `Init` using the standard frame size.
    pub fn new(device_id: impl Into<String>, total_size: usize) -> Self {
        Self::with_chunk_size(device_id, total_size, OTA_CHUNK_SIZE)
    }

    /// Create a session with a custom frame size.
    pub fn with_chunk_size(device_id: impl Into<String>, total_size: usize, chunk_size: usize) -> Self {
        Self {
            device_id: device_id.into(),
            total_size,
            chunk_size: chunk_size.max(1),
            bytes_sent: 0,
            chunks_sent: 0,
            state: OtaState::Init,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn total_size(&self) -> usize {
        self.total_size
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    pub fn chunks_sent(&self) -> usize {
        self.chunks_sent
    }

    pub fn state(&self) -> OtaState {
        self.state
    }

    /// Transfer progress in percent (100 for an empty image once complete).
    pub fn progress_percent(&self) -> u8 {
        if self.total_size == 0 {
            return if self.state == OtaState::Complete { 100 } else { 0 };
        }
        ((self.bytes_sent * 100) / self.total_size) as u8
    }

    fn transition(
        &mut self,
        expected: OtaState,
        next: OtaState,
        event: &'static str,
    ) -> Result<(), InvalidTransition> {
        if self.state != expected {
            return Err(InvalidTransition {
                from: self.state,
                event,
            });
        }
        self.state = next;
        Ok(())
    }

    /// The OTA_BEGIN control message was accepted by the transport.
    pub fn begin_sent(&mut self) -> Result<(), InvalidTransition> {
        self.transition(OtaState::Init, OtaState::BeginSent, "begin_sent")
    }

    /// Binary frames are about to be streamed.
    pub fn start_streaming(&mut self) -> Result<(), InvalidTransition> {
        self.transition(OtaState::BeginSent, OtaState::Streaming, "start_streaming")
    }

    /// One binary frame of `len` bytes was accepted by the transport.
    pub fn record_chunk(&mut self, len: usize) -> Result<(), InvalidTransition> {
        if self.state != OtaState::Streaming
            || len == 0
            || len > self.chunk_size
            || self.bytes_sent + len > self.total_size
        {
            return Err(InvalidTransition {
                from: self.state,
                event: "record_chunk",
            });
        }
        self.bytes_sent += len;
        self.chunks_sent += 1;
        Ok(())
    }

    /// The OTA_END marker is being sent. Requires every byte to be sent.
    pub fn end_sent(&mut self) -> Result<(), InvalidTransition> {
        if self.bytes_sent != self.total_size {
            return Err(InvalidTransition {
                from: self.state,
                event: "end_sent",
            });
        }
        self.transition(OtaState::Streaming, OtaState::EndSent, "end_sent")
    }

    /// The OTA_END marker was accepted by the transport.
    pub fn complete(&mut self) -> Result<(), InvalidTransition> {
        self.transition(OtaState::EndSent, OtaState::Complete, "complete")
    }

    /// Move to `Failed`. Allowed from any non-terminal state.
    pub fn fail(&mut self, reason: FailureReason) -> Result<(), InvalidTransition> {
        if self.state.is_terminal() {
            return Err(InvalidTransition {
                from: self.state,
                event: "fail",
            });
        }
        self.state = OtaState::Failed(reason);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn drive_to_streaming(session: &mut OtaSession) {
        session.begin_sent().unwrap();
        session.start_streaming().unwrap();
    }

    #[test]
    fn test_happy_path() {
        let mut session = OtaSession::new("D1", 9000);
        assert_eq!(session.state(), OtaState::Init);

        drive_to_streaming(&mut session);
        for len in [4096, 4096, 808] {
            session.record_chunk(len).unwrap();
        }
        assert_eq!(session.bytes_sent(), 9000);
        assert_eq!(session.chunks_sent(), 3);

        session.end_sent().unwrap();
        session.complete().unwrap();
        assert_eq!(session.state(), OtaState::Complete);
        assert_eq!(session.progress_percent(), 100);
    }

    #[test]
    fn test_end_before_all_bytes_rejected() {
        let mut session = OtaSession::new("D1", 9000);
        drive_to_streaming(&mut session);
        session.record_chunk(4096).unwrap();

        let err = session.end_sent().unwrap_err();
        assert_eq!(err.from, OtaState::Streaming);
        assert_eq!(session.state(), OtaState::Streaming);
    }

    #[test]
    fn test_chunk_overflow_rejected() {
        let mut session = OtaSession::new("D1", 100);
        drive_to_streaming(&mut session);
        assert!(session.record_chunk(101).is_err());
        assert!(session.record_chunk(0).is_err());
        assert_eq!(session.bytes_sent(), 0);
    }

    #[test]
    fn test_chunk_outside_streaming_rejected() {
        let mut session = OtaSession::new("D1", 100);
        assert!(session.record_chunk(10).is_err());
    }

    #[test]
    fn test_empty_image() {
        let mut session = OtaSession::new("D1", 0);
        drive_to_streaming(&mut session);
        session.end_sent().unwrap();
        session.complete().unwrap();
        assert_eq!(session.progress_percent(), 100);
    }

    #[test]
    fn test_fail_from_init() {
        let mut session = OtaSession::new("D2", 10);
        session.fail(FailureReason::DeviceOffline).unwrap();
        assert_eq!(session.state(), OtaState::Failed(FailureReason::DeviceOffline));
        assert!(session.state().is_terminal());
    }

    #[test]
    fn test_fail_mid_stream() {
        let mut session = OtaSession::new("D1", 9000);
        drive_to_streaming(&mut session);
        session.record_chunk(4096).unwrap();
        session.fail(FailureReason::Transport).unwrap();

        assert_eq!(session.state(), OtaState::Failed(FailureReason::Transport));
        assert!(session.record_chunk(4096).is_err());
        assert!(session.complete().is_err());
    }

    #[test]
    fn test_failed_is_absorbing() {
        let mut session = OtaSession::new("D1", 10);
        session.fail(FailureReason::Transport).unwrap();
        assert!(session.fail(FailureReason::DeviceOffline).is_err());
        assert!(session.begin_sent().is_err());
    }

    #[test]
    fn test_complete_is_terminal() {
        let mut session = OtaSession::new("D1", 0);
        drive_to_streaming(&mut session);
        session.end_sent().unwrap();
        session.complete().unwrap();
        assert!(session.fail(FailureReason::Transport).is_err());
    }

    #[test]
    fn test_active_states() {
        assert!(!OtaState::Init.is_active());
        assert!(OtaState::BeginSent.is_active());
        assert!(OtaState::Streaming.is_active());
        assert!(OtaState::EndSent.is_active());
        assert!(!OtaState::Complete.is_active());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(OtaState::EndSent.to_string(), "END_SENT");
        assert_eq!(
            OtaState::Failed(FailureReason::DeviceOffline).to_string(),
            "FAILED (device offline)"
        );
    }
}
