//! Events published by a running session

use crate::hop::HopState;
use tokio::sync::mpsc::UnboundedSender;

/// Progress notifications for a presentation layer
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// Human-readable phase or status change
    Status(String),
    /// Discovery published a hop
    HopDiscovered(HopState),
    /// The path analysis report grew (partial report)
    PathReportUpdated(String),
    /// Path analysis finished with its final report
    PathAnalysisComplete(String),
    /// The session aborted
    Failed(String),
}

/// Optional sender that ignores a closed or missing receiver
#[derive(Debug, Clone, Default)]
pub struct EventSink {
    tx: Option<UnboundedSender<SessionEvent>>,
}

impl EventSink {
    /// Publish into `tx`
    pub fn new(tx: UnboundedSender<SessionEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A sink that drops everything
    pub fn none() -> Self {
        Self::default()
    }

    /// Publish an event
    pub fn emit(&self, event: SessionEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }

    /// Publish a status line
    pub fn status(&self, message: impl Into<String>) {
        self.emit(SessionEvent::Status(message.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_delivers_and_tolerates_closed_receiver() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let sink = EventSink::new(tx);
        sink.status("discovering");
        assert!(matches!(rx.try_recv(), Ok(SessionEvent::Status(s)) if s == "discovering"));

        drop(rx);
        sink.status("nobody listening");
        EventSink::none().status("dropped");
    }
}
