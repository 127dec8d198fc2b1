//! Quest decomposition: turn a quest into an ordered task list.
//!
//! Flow:
//! 1. Build the prompt from the quest fields
//! 2. Run it through the model runner (with fallback)
//! 3. Normalize the reply into task entries
//! 4. Replace the quest's tasks and activate it in one transaction
//!
//! Any failure marks the quest `failed`. Nothing is rethrown or retried.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::llm::ModelRunner;
use crate::pipeline::normalize::parse_json_from_model;
use crate::pipeline::types::DecomposeJob;
use crate::store::{Database, NewTask, QuestStatus};

/// Title of the task stored when the model produced nothing usable.
pub const PLACEHOLDER_TITLE: &str = "Review quest goals";

const PLACEHOLDER_DETAILS: &str =
    "The model did not return any usable tasks. Review the quest and add tasks manually.";

pub struct DecomposeProcessor {
    runner: Arc<ModelRunner>,
    db: Arc<dyn Database>,
}

impl DecomposeProcessor {
    pub fn new(runner: Arc<ModelRunner>, db: Arc<dyn Database>) -> Self {
        Self { runner, db }
    }

    /// Process one job to a terminal quest state. Never fails.
    pub async fn process(&self, job: DecomposeJob) {
        info!(quest_id = %job.quest_id, "Decomposing quest");

        match self.decompose(&job).await {
            Ok((count, model_id)) => {
                info!(quest_id = %job.quest_id, tasks = count, model = %model_id, "Quest decomposed");
            }
            Err(e) => {
                if let Error::ResponseShape(shape) = &e
                    && let Some(cleaned) = shape.cleaned()
                {
                    debug!(quest_id = %job.quest_id, cleaned, "Unparseable model output");
                }
                error!(quest_id = %job.quest_id, error = %e, "Quest decomposition failed");
                if let Err(e) = self
                    .db
                    .update_quest_status(job.quest_id, QuestStatus::Failed)
                    .await
                {
                    error!(quest_id = %job.quest_id, error = %e, "Failed to mark quest failed");
                }
            }
        }
    }

    async fn decompose(&self, job: &DecomposeJob) -> Result<(usize, String), Error> {
        let prompt = build_prompt(job);
        let result = self
            .runner
            .run(&prompt, job.model_type.as_deref(), &job.images)
            .await?;

        let value = parse_json_from_model(&result.content)?;
        let mut tasks = tasks_from_value(&value);
        if tasks.is_empty() {
            warn!(quest_id = %job.quest_id, "Model returned no usable tasks, storing placeholder");
            tasks.push(placeholder_task());
        }

        self.db
            .replace_tasks_and_activate(job.quest_id, &tasks)
            .await?;
        Ok((tasks.len(), result.model_id))
    }
}

/// Build the decomposition prompt.
pub fn build_prompt(job: &DecomposeJob) -> String {
    let mut prompt = String::from(
        "You are a planning assistant. Break the following quest down into an ordered \
         list of concrete, actionable tasks.\n\n",
    );

    prompt.push_str(&format!("Quest: {}\n", job.title.trim()));
    push_field(&mut prompt, "Goal", job.goal.as_deref());
    push_field(&mut prompt, "Context", job.context.as_deref());
    push_field(&mut prompt, "Constraints", job.constraints.as_deref());
    if !job.images.is_empty() {
        prompt.push_str(&format!(
            "Reference images attached: {}\n",
            job.images.len()
        ));
    }

    prompt.push_str(
        "\nRespond with ONLY a JSON array, no prose. Each element must be an object \
         with a short \"title\" and a \"details\" string explaining the step, e.g.\n\
         [{\"title\": \"...\", \"details\": \"...\"}]\n",
    );
    prompt
}

fn push_field(prompt: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        prompt.push_str(&format!("{label}: {value}\n"));
    }
}

/// Map a normalized model reply onto task entries.
///
/// Accepts a bare array or a `{"tasks": [...]}` wrapper; anything else yields
/// no tasks. Objects without a title are named `Task N` by 1-based position.
/// Plain strings become titles. Other entries are dropped.
pub fn tasks_from_value(value: &Value) -> Vec<NewTask> {
    let entries = match value {
        Value::Array(items) => items.as_slice(),
        Value::Object(map) => match map.get("tasks") {
            Some(Value::Array(items)) => items.as_slice(),
            _ => &[],
        },
        _ => &[],
    };

    entries
        .iter()
        .enumerate()
        .filter_map(|(idx, entry)| match entry {
            Value::Object(obj) => {
                let title = non_blank(obj.get("title"))
                    .unwrap_or_else(|| format!("Task {}", idx + 1));
                Some(NewTask {
                    title,
                    details: non_blank(obj.get("details")),
                })
            }
            Value::String(s) => non_blank_str(s).map(|title| NewTask {
                title,
                details: None,
            }),
            _ => None,
        })
        .collect()
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => non_blank_str(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_blank_str(s: &str) -> Option<String> {
    let trimmed = s.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn placeholder_task() -> NewTask {
    NewTask {
        title: PLACEHOLDER_TITLE.to_string(),
        details: Some(PLACEHOLDER_DETAILS.to_string()),
    }
}
