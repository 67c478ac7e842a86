//! Incremental event stream emitted to the client while a run is in
//! flight (§4.8, §6).

use async_trait::async_trait;
use serde::Serialize;

use crate::types::{AssistantMessage, DecisionTrace, Judgement, Stage1Answer, Stage3Result};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Stage1Start,
    Stage1Complete { data: Vec<Stage1Answer> },
    Stage2Start,
    Stage2Complete {
        data: Vec<Judgement>,
        /// The `DecisionTrace` as known so far (§6): label/model mapping,
        /// aggregate rankings, consensus, and whether adjudication ran.
        /// Stage-3-only fields (`stage3`) are not part of this trace.
        metadata: DecisionTrace,
    },
    Stage3Start,
    Stage3Complete { data: Stage3Result },
    /// Always fires once Stage 3 settles, even when title generation
    /// failed — `title` is `None` rather than the event being skipped.
    TitleComplete { title: Option<String> },
    Complete { message: AssistantMessage },
    Error { message: String },
}

/// Delivery sink for `Event`s. `emit` returns `false` when the client has
/// gone away; the orchestrator treats that as a signal to trip its
/// cancellation token and stop doing further work (§5).
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: Event) -> bool;
}

/// Reference sink backed by a bounded `tokio::sync::mpsc` channel. A
/// closed receiver (the client disconnected) makes `emit` return `false`.
pub struct ChannelEventSink {
    sender: tokio::sync::mpsc::Sender<Event>,
}

impl ChannelEventSink {
    pub fn new(sender: tokio::sync::mpsc::Sender<Event>) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn emit(&self, event: Event) -> bool {
        self.sender.send(event).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn emit_reports_false_once_receiver_is_dropped() {
        let (tx, rx) = tokio::sync::mpsc::channel(4);
        let sink = ChannelEventSink::new(tx);
        drop(rx);
        assert!(!sink.emit(Event::Stage1Start).await);
    }

    #[tokio::test]
    async fn emit_reports_true_while_receiver_is_alive() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(4);
        let sink = ChannelEventSink::new(tx);
        assert!(sink.emit(Event::Stage1Start).await);
        assert!(matches!(rx.recv().await, Some(Event::Stage1Start)));
    }

    #[test]
    fn event_tags_are_snake_case() {
        let json = serde_json::to_string(&Event::Stage1Start).unwrap();
        assert_eq!(json, r#"{"type":"stage1_start"}"#);
    }

    #[test]
    fn title_complete_serializes_null_on_failure() {
        let json = serde_json::to_string(&Event::TitleComplete { title: None }).unwrap();
        assert_eq!(json, r#"{"type":"title_complete","title":null}"#);
    }
}
