//! Pipeline status events
//!
//! Components publish status events on a broadcast [`EventBus`]. Monitoring and
//! reporting subscribe to it; the pipeline itself never waits on a subscriber.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Sync run state machine phases
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncPhase {
    /// Comparing observed candidates against the baseline
    Scanning,
    /// Dispatching candidates through enrichment, validation and persistence
    Processing,
    /// Moving the baseline after every dispatched candidate is terminal
    Advancing,
    /// Run finished (baseline possibly advanced)
    Completed,
    /// Run cancelled between batches (baseline untouched)
    Aborted,
}

impl SyncPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPhase::Scanning => "SCANNING",
            SyncPhase::Processing => "PROCESSING",
            SyncPhase::Advancing => "ADVANCING",
            SyncPhase::Completed => "COMPLETED",
            SyncPhase::Aborted => "ABORTED",
        }
    }

    /// Terminal phases end the run
    pub fn is_terminal(&self) -> bool {
        matches!(self, SyncPhase::Completed | SyncPhase::Aborted)
    }
}

/// Per-outcome counters reported at the end of a run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub inserted: usize,
    pub updated: usize,
    pub rejected_duplicate: usize,
    pub deferred: usize,
    pub skipped: usize,
    pub validation_drops: usize,
}

/// Status events emitted by the pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    RunStarted {
        run_id: Uuid,
        mode: String,
        observed: usize,
        timestamp: DateTime<Utc>,
    },
    PhaseChanged {
        run_id: Uuid,
        old_phase: SyncPhase,
        new_phase: SyncPhase,
        timestamp: DateTime<Utc>,
    },
    LabelRejected {
        run_id: Uuid,
        decision_key: String,
        field: String,
        label: String,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    CandidateCompleted {
        run_id: Uuid,
        decision_key: String,
        outcome: String,
        validation_drops: usize,
        timestamp: DateTime<Utc>,
    },
    BaselineAdvanced {
        run_id: Uuid,
        previous: Option<String>,
        current: String,
        timestamp: DateTime<Utc>,
    },
    RunCompleted {
        run_id: Uuid,
        phase: SyncPhase,
        counts: OutcomeCounts,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Run the event belongs to
    pub fn run_id(&self) -> Uuid {
        match self {
            PipelineEvent::RunStarted { run_id, .. }
            | PipelineEvent::PhaseChanged { run_id, .. }
            | PipelineEvent::LabelRejected { run_id, .. }
            | PipelineEvent::CandidateCompleted { run_id, .. }
            | PipelineEvent::BaselineAdvanced { run_id, .. }
            | PipelineEvent::RunCompleted { run_id, .. } => *run_id,
        }
    }
}

/// Broadcast bus for pipeline status events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus buffering up to `capacity` events per slow subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; `Err` when nobody is listening
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring the absence of subscribers
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_event() {
        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let run_id = Uuid::new_v4();

        bus.emit(PipelineEvent::RunStarted {
            run_id,
            mode: "filtered".to_string(),
            observed: 3,
            timestamp: Utc::now(),
        })
        .unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(event.run_id(), run_id);
    }

    #[test]
    fn test_emit_without_subscribers_errors_but_lossy_does_not() {
        let bus = EventBus::new(4);
        let event = PipelineEvent::PhaseChanged {
            run_id: Uuid::new_v4(),
            old_phase: SyncPhase::Scanning,
            new_phase: SyncPhase::Processing,
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PipelineEvent::BaselineAdvanced {
            run_id: Uuid::nil(),
            previous: Some("37_100".to_string()),
            current: "37_120".to_string(),
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BaselineAdvanced");
        assert_eq!(json["current"], "37_120");
    }

    #[test]
    fn test_terminal_phases() {
        assert!(SyncPhase::Completed.is_terminal());
        assert!(SyncPhase::Aborted.is_terminal());
        assert!(!SyncPhase::Advancing.is_terminal());
    }
}
