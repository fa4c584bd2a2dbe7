//! Session stage machine.
//!
//! Transitions are pure; all I/O happens in the run loop, which feeds the
//! outcome of each step back in as an [`Event`].

use crate::error::{ComponentError, DecodeError, HandshakeError};

#[derive(Debug)]
pub enum Stage {
    /// Stream negotiation and secret-based authentication, exactly once.
    Handshake,
    /// Steady-state stanza dispatch.
    Dispatch,
    /// The server closed the stream cleanly.
    Done,
    Failed(ComponentError),
}

/// Outcome of one step of the run loop.
#[derive(Debug)]
pub enum Event {
    /// The server acknowledged the handshake digest.
    Authenticated,
    /// One element was read and routed to its handler.
    Dispatched,
    /// The server sent `</stream:stream>`.
    StreamClosed,
    Failed(ComponentError),
    /// Cancellation was observed between steps.
    Cancelled,
}

impl Stage {
    pub fn next(self, event: Event) -> Stage {
        match (self, event) {
            (Stage::Done, _) => Stage::Done,
            (failed @ Stage::Failed(_), _) => failed,
            (_, Event::Failed(err)) => Stage::Failed(err),
            (_, Event::Cancelled) => Stage::Failed(ComponentError::Cancelled),
            (Stage::Handshake, Event::Authenticated) => Stage::Dispatch,
            (Stage::Handshake, Event::Dispatched | Event::StreamClosed) => {
                Stage::Failed(ComponentError::Handshake(HandshakeError::AuthenticationFailed {
                    reason: "stream ended before authentication".to_string(),
                }))
            }
            (Stage::Dispatch, Event::Dispatched) => Stage::Dispatch,
            (Stage::Dispatch, Event::StreamClosed) => Stage::Done,
            // The stream is never renegotiated
            (Stage::Dispatch, Event::Authenticated) => {
                Stage::Failed(ComponentError::Decode(DecodeError::UnexpectedElement {
                    expected: "stanza",
                    found: "handshake".to_string(),
                }))
            }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Stage::Done | Stage::Failed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handshake_then_dispatch_until_stream_close() {
        let stage = Stage::Handshake.next(Event::Authenticated);
        assert!(matches!(stage, Stage::Dispatch));
        let stage = stage.next(Event::Dispatched).next(Event::Dispatched);
        assert!(matches!(stage, Stage::Dispatch));
        let stage = stage.next(Event::StreamClosed);
        assert!(matches!(stage, Stage::Done));
        assert!(stage.is_terminal());
    }

    #[test]
    fn test_failure_is_terminal_from_any_stage() {
        for stage in [Stage::Handshake, Stage::Dispatch] {
            let next = stage.next(Event::Failed(ComponentError::ConnectionClosed));
            assert!(matches!(next, Stage::Failed(ComponentError::ConnectionClosed)));
        }
    }

    #[test]
    fn test_cancellation_is_reported_as_cancelled() {
        let stage = Stage::Dispatch.next(Event::Cancelled);
        assert!(matches!(&stage, Stage::Failed(e) if e.is_cancelled()));
    }

    #[test]
    fn test_terminal_stages_absorb_events() {
        assert!(matches!(Stage::Done.next(Event::Cancelled), Stage::Done));
        let failed = Stage::Failed(ComponentError::ConnectionClosed);
        assert!(matches!(
            failed.next(Event::Authenticated),
            Stage::Failed(ComponentError::ConnectionClosed)
        ));
    }

    #[test]
    fn test_no_dispatch_before_handshake() {
        let stage = Stage::Handshake.next(Event::Dispatched);
        assert!(matches!(
            stage,
            Stage::Failed(ComponentError::Handshake(HandshakeError::AuthenticationFailed { .. }))
        ));
    }

    #[test]
    fn test_no_second_handshake() {
        let stage = Stage::Dispatch.next(Event::Authenticated);
        assert!(matches!(stage, Stage::Failed(ComponentError::Decode(_))));
    }
}
