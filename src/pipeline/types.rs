//! Job payloads carried on the work queues.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Queue carrying [`DecomposeJob`] payloads.
pub const DECOMPOSE_QUEUE: &str = "quest-decompose";

/// Queue carrying [`InvestigateJob`] payloads.
pub const INVESTIGATE_QUEUE: &str = "task-investigate";

/// Break a quest down into an ordered task list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecomposeJob {
    pub quest_id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    /// Requested model id; the default model is used when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    /// Image references (URLs or data URIs).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Analyse an existing task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvestigateJob {
    pub investigation_id: Uuid,
    pub task_id: Uuid,
    /// Ad-hoc question from the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
}

/// Any job, tagged by `kind`. Used by producers that feed both queues from
/// one stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Job {
    Decompose(DecomposeJob),
    Investigate(InvestigateJob),
}

impl Job {
    /// Name of the queue this job belongs on.
    pub fn queue_name(&self) -> &'static str {
        match self {
            Self::Decompose(_) => DECOMPOSE_QUEUE,
            Self::Investigate(_) => INVESTIGATE_QUEUE,
        }
    }

    /// The bare payload, as carried on the job's queue.
    pub fn payload_json(&self) -> Result<String, serde_json::Error> {
        match self {
            Self::Decompose(job) => serde_json::to_string(job),
            Self::Investigate(job) => serde_json::to_string(job),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decompose_payload_uses_camel_case_and_defaults() {
        let id = Uuid::new_v4();
        let job: DecomposeJob = serde_json::from_value(json!({
            "questId": id,
            "title": "Run a marathon",
            "modelType": "deepseek-chat",
        }))
        .unwrap();

        assert_eq!(job.quest_id, id);
        assert_eq!(job.model_type.as_deref(), Some("deepseek-chat"));
        assert!(job.goal.is_none());
        assert!(job.images.is_empty());
    }

    #[test]
    fn tagged_job_routes_to_its_queue() {
        let line = format!(
            r#"{{"kind":"investigate","investigationId":"{}","taskId":"{}","prompt":"why?"}}"#,
            Uuid::new_v4(),
            Uuid::new_v4()
        );
        let job: Job = serde_json::from_str(&line).unwrap();
        assert_eq!(job.queue_name(), INVESTIGATE_QUEUE);

        let payload: serde_json::Value = serde_json::from_str(&job.payload_json().unwrap()).unwrap();
        assert!(payload.get("kind").is_none());
        assert_eq!(payload["prompt"], "why?");
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let err = serde_json::from_str::<Job>(r#"{"kind":"summarize","title":"x"}"#);
        assert!(err.is_err());
    }
}
