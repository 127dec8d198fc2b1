//! Task investigation: a free-form analysis of one task, stored as
//! `{summary, details}` on the investigation record.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, error, info};

use crate::error::{Error, ResponseShapeError};
use crate::llm::ModelRunner;
use crate::pipeline::normalize::parse_json_from_model;
use crate::pipeline::types::InvestigateJob;
use crate::store::{Database, InvestigationContext};

/// Summary stored when the model omits one.
pub const DEFAULT_SUMMARY: &str = "Investigation completed.";

/// Parsed investigation result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Findings {
    pub summary: String,
    pub details: String,
}

pub struct InvestigateProcessor {
    runner: Arc<ModelRunner>,
    db: Arc<dyn Database>,
}

impl InvestigateProcessor {
    pub fn new(runner: Arc<ModelRunner>, db: Arc<dyn Database>) -> Self {
        Self { runner, db }
    }

    /// Process one job to a terminal investigation state. Never fails.
    pub async fn process(&self, job: InvestigateJob) {
        let id = job.investigation_id;

        let ctx = match self.db.get_investigation_context(id).await {
            Ok(Some(ctx)) => ctx,
            Ok(None) => {
                debug!(investigation_id = %id, "Investigation not found, skipping");
                return;
            }
            Err(e) => {
                error!(investigation_id = %id, error = %e, "Failed to load investigation");
                self.mark_failed(&job, &e.to_string()).await;
                return;
            }
        };

        info!(investigation_id = %id, task_id = %ctx.task.id, "Investigating task");

        if let Err(e) = self.investigate(&job, &ctx).await {
            if let Error::ResponseShape(shape) = &e
                && let Some(cleaned) = shape.cleaned()
            {
                debug!(investigation_id = %id, cleaned, "Unparseable model output");
            }
            error!(investigation_id = %id, error = %e, "Investigation failed");
            self.mark_failed(&job, &e.to_string()).await;
        }
    }

    async fn investigate(&self, job: &InvestigateJob, ctx: &InvestigationContext) -> Result<(), Error> {
        let prompt = build_prompt(ctx, job.prompt.as_deref());
        let requested = ctx
            .investigation
            .model_type
            .as_deref()
            .or(job.model_type.as_deref());

        let result = self.runner.run(&prompt, requested, &job.images).await?;
        let findings = findings_from_value(parse_json_from_model(&result.content)?)?;

        self.db
            .complete_investigation(
                ctx.investigation.id,
                &findings.summary,
                &findings.details,
                &result.model_id,
            )
            .await?;
        info!(
            investigation_id = %ctx.investigation.id,
            model = %result.model_id,
            "Investigation completed"
        );
        Ok(())
    }

    async fn mark_failed(&self, job: &InvestigateJob, message: &str) {
        if let Err(e) = self.db.fail_investigation(job.investigation_id, message).await {
            error!(
                investigation_id = %job.investigation_id,
                error = %e,
                "Failed to record investigation failure"
            );
        }
    }
}

/// Build the investigation prompt from the task, its quest and the user's
/// questions. The prompt stored on the record and the job's ad-hoc prompt are
/// both asked; an identical pair is asked once.
pub fn build_prompt(ctx: &InvestigationContext, job_prompt: Option<&str>) -> String {
    let mut prompt = String::from(
        "You are a research assistant helping someone complete a task that is part of a larger quest.\n\n",
    );

    prompt.push_str("## Task\n");
    prompt.push_str(&format!("Title: {}\n", ctx.task.title));
    push_field(&mut prompt, "Details", ctx.task.details.as_deref());
    push_field(&mut prompt, "Owner notes", ctx.task.notes.as_deref());

    prompt.push_str("\n## Quest\n");
    prompt.push_str(&format!("Title: {}\n", ctx.quest.title));
    push_field(&mut prompt, "Goal", ctx.quest.goal.as_deref());
    push_field(&mut prompt, "Context", ctx.quest.context.as_deref());
    push_field(&mut prompt, "Constraints", ctx.quest.constraints.as_deref());

    let mut questions: Vec<&str> = Vec::new();
    for question in [ctx.investigation.prompt.as_deref(), job_prompt]
        .into_iter()
        .flatten()
        .map(str::trim)
    {
        if !question.is_empty() && !questions.contains(&question) {
            questions.push(question);
        }
    }
    if !questions.is_empty() {
        prompt.push_str("\n## Question\n");
        for question in questions {
            prompt.push_str(question);
            prompt.push('\n');
        }
    }

    prompt.push_str(
        "\nInvestigate the task and respond with ONLY a JSON object of the form \
         {\"summary\": \"one or two sentences\", \"details\": \"a thorough analysis with \
         concrete next steps\"}\n",
    );
    prompt
}

fn push_field(prompt: &mut String, label: &str, value: Option<&str>) {
    if let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) {
        prompt.push_str(&format!("{label}: {value}\n"));
    }
}

/// Read `{summary, details}` from a normalized reply, filling defaults.
pub fn findings_from_value(value: Value) -> Result<Findings, ResponseShapeError> {
    let Value::Object(map) = value else {
        return Err(ResponseShapeError::InvalidShape { kind: "array" });
    };

    let text = |key: &str| match map.get(key) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Some(Value::Null) | None => None,
        Some(Value::String(_)) => None,
        Some(other) => Some(other.to_string()),
    };

    Ok(Findings {
        summary: text("summary").unwrap_or_else(|| DEFAULT_SUMMARY.to_string()),
        details: text("details").unwrap_or_default(),
    })
}
