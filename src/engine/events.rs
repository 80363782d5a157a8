//! Typed progress channel between the engine and the presentation layer.
//!
//! Per-repository ordering is total: `started` < `progress*` < `completed`.
//! Delivery never blocks the engine: the channel is unbounded and
//! `started`/`completed` are never dropped, while `progress` is coalesced
//! upstream (consecutive identical phases are not re-sent).

use tokio::sync::mpsc;
use tracing::debug;

use super::RepoOutcome;

/// Events emitted for each repository during a bulk run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    Started {
        repo: String,
    },
    Progress {
        repo: String,
        phase: String,
    },
    Completed {
        outcome: RepoOutcome,
    },
    /// Out-of-band notices (rate limiting, account warnings).
    Notice {
        message: String,
    },
}

/// Engine-side handle; cheap to clone into workers.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ProgressEvent>,
}

impl EventSender {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// A sender with no consumer, for callers that do not render progress.
    pub fn discard() -> Self {
        let (tx, _rx) = mpsc::unbounded_channel();
        Self { tx }
    }

    pub fn started(&self, repo: &str) {
        self.emit(ProgressEvent::Started {
            repo: repo.to_string(),
        });
    }

    pub fn progress(&self, repo: &str, phase: &str) {
        self.emit(ProgressEvent::Progress {
            repo: repo.to_string(),
            phase: phase.to_string(),
        });
    }

    pub fn completed(&self, outcome: &RepoOutcome) {
        self.emit(ProgressEvent::Completed {
            outcome: outcome.clone(),
        });
    }

    pub fn notice(&self, message: &str) {
        self.emit(ProgressEvent::Notice {
            message: message.to_string(),
        });
    }

    fn emit(&self, event: ProgressEvent) {
        // A closed receiver just means the presenter went away; the run
        // itself must not care.
        if self.tx.send(event).is_err() {
            debug!("progress consumer dropped, event discarded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OutcomeKind;

    #[test]
    fn test_events_flow_in_order() {
        let (sender, mut rx) = EventSender::channel();
        sender.started("api");
        sender.progress("api", "Receiving objects: 50%");
        sender.completed(&RepoOutcome {
            repo: "api".to_string(),
            kind: OutcomeKind::Cloned,
            reason: None,
        });

        assert!(matches!(rx.try_recv().unwrap(), ProgressEvent::Started { .. }));
        assert!(matches!(rx.try_recv().unwrap(), ProgressEvent::Progress { .. }));
        assert!(matches!(rx.try_recv().unwrap(), ProgressEvent::Completed { .. }));
    }

    #[test]
    fn test_send_without_consumer_does_not_panic() {
        let sender = EventSender::discard();
        sender.started("api");
        sender.notice("rate limited");
    }
}
