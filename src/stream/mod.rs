//! Structured progress streaming.
//!
//! Every task publishes `StreamEvent`s to an optional subscriber. Essential
//! kinds (`cost`, `error`, report tokens) are delivered with back-pressure;
//! chatty kinds (`logs`, `images`) go through a bounded ring that evicts the
//! oldest pending event when full, so a slow subscriber can never stall the
//! research pipeline. With no subscriber attached the streamer degrades to
//! tracing output only.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::{mpsc, Notify};

use crate::core::costs::CostSnapshot;

/// One progress event, serialized as a single JSON object per the
/// streaming protocol.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Free-form progress line. `content` is a stable step key, `output`
    /// the human-readable message.
    Logs {
        content: String,
        output: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    /// One report token as it arrives from the LLM stream.
    Report { output: String },
    Cost(CostSnapshot),
    Images { urls: Vec<String> },
    Tool {
        tool_name: String,
        stage: ToolStage,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<serde_json::Value>,
    },
    ResearchProgress {
        current: usize,
        total: usize,
        progress: u8,
    },
    Error { message: String },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolStage {
    Start,
    Complete,
}

/// Bounded drop-oldest buffer for the lossy event kinds.
struct LossyRing {
    buf: Mutex<VecDeque<StreamEvent>>,
    notify: Notify,
    capacity: usize,
}

impl LossyRing {
    fn push(&self, event: StreamEvent) {
        let mut buf = self.buf.lock().expect("lossy ring poisoned");
        if buf.len() >= self.capacity {
            buf.pop_front();
        }
        buf.push_back(event);
        drop(buf);
        self.notify.notify_one();
    }
}

#[derive(Clone)]
pub struct Streamer {
    tx: Option<mpsc::Sender<StreamEvent>>,
    ring: Option<Arc<LossyRing>>,
}

impl std::fmt::Debug for Streamer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Streamer")
            .field("attached", &self.tx.is_some())
            .finish()
    }
}

impl Streamer {
    /// Create a streamer with an attached subscriber. Returns the receiver
    /// the subscriber drains; dropping it detaches cleanly.
    pub fn channel(capacity: usize) -> (Streamer, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let ring = Arc::new(LossyRing {
            buf: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            capacity: capacity.max(1),
        });

        // Forwarder drains the lossy ring into the subscriber channel.
        // The ring absorbs bursts; when it overflows, the oldest pending
        // lossy event is evicted while essential sends stay untouched.
        let forward_tx = tx.clone();
        let forward_ring = Arc::clone(&ring);
        tokio::spawn(async move {
            loop {
                forward_ring.notify.notified().await;
                loop {
                    let next = {
                        let mut buf = forward_ring.buf.lock().expect("lossy ring poisoned");
                        buf.pop_front()
                    };
                    match next {
                        Some(event) => {
                            if forward_tx.send(event).await.is_err() {
                                return; // subscriber gone
                            }
                        }
                        None => break,
                    }
                }
            }
        });

        (
            Streamer {
                tx: Some(tx),
                ring: Some(ring),
            },
            rx,
        )
    }

    /// A streamer with no subscriber; events surface through tracing only.
    pub fn detached() -> Streamer {
        Streamer { tx: None, ring: None }
    }

    pub fn is_attached(&self) -> bool {
        self.tx.is_some()
    }

    fn trace(event: &StreamEvent) {
        match event {
            StreamEvent::Logs { content, output, .. } => {
                tracing::info!(step = %content, "{}", output)
            }
            StreamEvent::Error { message } => tracing::error!("{}", message),
            StreamEvent::Tool { tool_name, stage, .. } => {
                tracing::debug!(tool = %tool_name, ?stage, "tool event")
            }
            StreamEvent::Cost(snapshot) => {
                tracing::debug!(total_cost = snapshot.total_cost, "cost update")
            }
            StreamEvent::ResearchProgress { current, total, .. } => {
                tracing::debug!("research progress {}/{}", current, total)
            }
            _ => {}
        }
    }

    /// Deliver an essential event (`cost`, `error`, report tokens),
    /// awaiting channel capacity so it is never dropped.
    async fn send_essential(&self, event: StreamEvent) {
        Self::trace(&event);
        if let Some(tx) = &self.tx {
            // A closed channel just means the subscriber went away.
            let _ = tx.send(event).await;
        }
    }

    /// Queue a lossy event (`logs`, `images`), evicting the oldest pending
    /// one when the ring is full.
    fn send_lossy(&self, event: StreamEvent) {
        Self::trace(&event);
        if let Some(ring) = &self.ring {
            ring.push(event);
        }
    }

    pub fn log(&self, step: &str, output: impl Into<String>) {
        self.send_lossy(StreamEvent::Logs {
            content: step.to_string(),
            output: output.into(),
            metadata: None,
        });
    }

    pub fn log_with_metadata(
        &self,
        step: &str,
        output: impl Into<String>,
        metadata: serde_json::Value,
    ) {
        self.send_lossy(StreamEvent::Logs {
            content: step.to_string(),
            output: output.into(),
            metadata: Some(metadata),
        });
    }

    pub fn images(&self, urls: Vec<String>) {
        if !urls.is_empty() {
            self.send_lossy(StreamEvent::Images { urls });
        }
    }

    pub async fn cost(&self, snapshot: CostSnapshot) {
        self.send_essential(StreamEvent::Cost(snapshot)).await;
    }

    pub async fn error(&self, message: impl Into<String>) {
        self.send_essential(StreamEvent::Error {
            message: message.into(),
        })
        .await;
    }

    pub async fn report_token(&self, token: impl Into<String>) {
        self.send_essential(StreamEvent::Report {
            output: token.into(),
        })
        .await;
    }

    pub fn tool(&self, tool_name: &str, stage: ToolStage, detail: Option<serde_json::Value>) {
        self.send_lossy(StreamEvent::Tool {
            tool_name: tool_name.to_string(),
            stage,
            detail,
        });
    }

    pub fn progress(&self, current: usize, total: usize) {
        let progress = if total == 0 {
            100
        } else {
            ((current as f64 / total as f64) * 100.0) as u8
        };
        self.send_lossy(StreamEvent::ResearchProgress {
            current,
            total,
            progress,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lossy_ring_drops_oldest() {
        let (streamer, mut rx) = Streamer::channel(2);
        // Fill past capacity before the forwarder can drain: the ring keeps
        // only the newest two.
        {
            let ring = streamer.ring.as_ref().unwrap();
            ring.push(StreamEvent::Logs {
                content: "a".into(),
                output: "1".into(),
                metadata: None,
            });
            ring.push(StreamEvent::Logs {
                content: "b".into(),
                output: "2".into(),
                metadata: None,
            });
            ring.push(StreamEvent::Logs {
                content: "c".into(),
                output: "3".into(),
                metadata: None,
            });
            let buf = ring.buf.lock().unwrap();
            assert_eq!(buf.len(), 2);
            match &buf[0] {
                StreamEvent::Logs { content, .. } => assert_eq!(content, "b"),
                other => panic!("unexpected event {other:?}"),
            }
        }
        drop(streamer);
        drop(rx.close());
    }

    #[tokio::test]
    async fn essential_events_are_delivered() {
        let (streamer, mut rx) = Streamer::channel(4);
        streamer.error("boom").await;
        match rx.recv().await {
            Some(StreamEvent::Error { message }) => assert_eq!(message, "boom"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test]
    async fn detached_streamer_is_silent() {
        let streamer = Streamer::detached();
        streamer.log("step", "message");
        streamer.error("err").await;
        assert!(!streamer.is_attached());
    }

    #[test]
    fn events_serialize_with_kind_tags() {
        let event = StreamEvent::ResearchProgress {
            current: 1,
            total: 4,
            progress: 25,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "research_progress");
        assert_eq!(json["progress"], 25);
    }
}
