//! Session command queue
//!
//! Builders and engines call back from whatever thread they run on. Their
//! callbacks are turned into [`SessionCommand`]s and pushed onto the session's
//! unbounded channel; the session applies them on the caller's thread.

use crate::{
    builder::BuiltRenderers,
    engine::EngineEvent,
    error::Error,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Work item applied by the session on the caller's thread
#[derive(Debug)]
pub enum SessionCommand {
    RenderersBuilt {
        generation: u64,
        renderers: BuiltRenderers,
    },
    RenderersError {
        generation: u64,
        error: Error,
    },
    Engine(EngineEvent),
}

/// Cloneable handle for reporting engine events into a session
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl EventSink {
    pub(crate) fn new(tx: mpsc::UnboundedSender<SessionCommand>) -> Self {
        Self { tx }
    }

    /// Queue an event; returns false once the session is gone
    pub fn emit(&self, event: EngineEvent) -> bool {
        self.tx.send(SessionCommand::Engine(event)).is_ok()
    }
}

/// One renderer build, revocable by the session
///
/// A request reports exactly once: [`complete`](BuildRequest::complete) and
/// [`fail`](BuildRequest::fail) consume it. Once the session cancels the
/// request neither call reaches the session.
#[derive(Debug)]
pub struct BuildRequest {
    generation: u64,
    token: CancellationToken,
    tx: mpsc::UnboundedSender<SessionCommand>,
}

impl BuildRequest {
    pub(crate) fn new(
        generation: u64,
        token: CancellationToken,
        tx: mpsc::UnboundedSender<SessionCommand>,
    ) -> Self {
        Self { generation, token, tx }
    }

    /// Sequence number of the `prepare` call that issued this request
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Token that fires when the session revokes this request
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Sink the built sources and renderers report their events through
    pub fn event_sink(&self) -> EventSink {
        EventSink::new(self.tx.clone())
    }

    /// Hand the built renderers to the session
    ///
    /// Returns false if the request was cancelled or the session is gone.
    pub fn complete(self, renderers: BuiltRenderers) -> bool {
        if self.token.is_cancelled() {
            debug!(generation = self.generation, "Dropping renderers of cancelled build");
            return false;
        }
        self.tx
            .send(SessionCommand::RenderersBuilt {
                generation: self.generation,
                renderers,
            })
            .is_ok()
    }

    /// Report that building failed
    ///
    /// Returns false if the request was cancelled or the session is gone.
    pub fn fail(self, error: Error) -> bool {
        if self.token.is_cancelled() {
            debug!(generation = self.generation, %error, "Dropping error of cancelled build");
            return false;
        }
        self.tx
            .send(SessionCommand::RenderersError {
                generation: self.generation,
                error,
            })
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancelled_request_sends_nothing() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let token = CancellationToken::new();
        let request = BuildRequest::new(3, token.clone(), tx);

        token.cancel();
        assert!(request.is_cancelled());
        assert!(!request.fail(Error::build("late")));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_complete_carries_generation() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let request = BuildRequest::new(7, CancellationToken::new(), tx);

        assert!(request.complete(BuiltRenderers::new()));
        match rx.try_recv() {
            Ok(SessionCommand::RenderersBuilt { generation, .. }) => assert_eq!(generation, 7),
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn test_event_sink_reports_closed_session() {
        let (tx, rx) = mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        assert!(sink.emit(EngineEvent::PlayWhenReadyCommitted));
        drop(rx);
        assert!(!sink.emit(EngineEvent::PlayWhenReadyCommitted));
    }
}
