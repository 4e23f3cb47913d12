//! Queue message types.

use serde::{Deserialize, Serialize};
use vcomp_models::{JobId, WorkerTask};

/// Message carried on the work queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QueueMessage {
    /// Burn overlays into a stage-1 base clip
    Composite(WorkerTask),
}

impl QueueMessage {
    pub fn job_id(&self) -> &JobId {
        match self {
            QueueMessage::Composite(task) => &task.job_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            QueueMessage::Composite(_) => "composite",
        }
    }

    /// Key used to drop duplicate enqueues of the same work.
    pub fn idempotency_key(&self) -> String {
        format!("{}:{}", self.kind(), self.job_id())
    }
}

/// A message handed to one consumer.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    /// Backend-assigned id used for ack
    pub message_id: String,
    pub message: QueueMessage,
    /// 1 on first delivery, incremented on every redelivery
    pub delivery_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use vcomp_models::{ArtifactRef, Stage1Result};

    #[test]
    fn test_message_is_tagged() {
        let message = QueueMessage::Composite(WorkerTask {
            job_id: JobId::from_string("j1"),
            base_clip: Stage1Result {
                artifact_ref: ArtifactRef::new("jobs/j1/stage1.mp4"),
                duration: 12.0,
            },
            overlays: vec![],
        });

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "composite");
        assert_eq!(json["job_id"], "j1");
        assert_eq!(message.idempotency_key(), "composite:j1");

        let back: QueueMessage = serde_json::from_value(json).unwrap();
        assert_eq!(back, message);
    }

    #[test]
    fn test_unknown_type_rejected() {
        let result = serde_json::from_str::<QueueMessage>(r#"{"type":"transcode","job_id":"j"}"#);
        assert!(result.is_err());
    }
}
