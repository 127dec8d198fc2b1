//! Persisted entities touched by the pipeline: quests, tasks and investigations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Quest lifecycle status. The pipeline only ever writes `Active` or `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestStatus {
    Draft,
    Active,
    Completed,
    Failed,
    Archived,
}

impl QuestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Archived => "archived",
        }
    }

    /// Parse a DB string; unknown values read as `Draft`.
    pub fn from_db(s: &str) -> Self {
        match s {
            "active" => Self::Active,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "archived" => Self::Archived,
            _ => Self::Draft,
        }
    }
}

/// A user goal to be broken down into tasks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quest {
    pub id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub goal: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub constraints: Option<String>,
    pub status: QuestStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Quest {
    /// Create a draft quest.
    pub fn new(title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            goal: None,
            context: None,
            constraints: None,
            status: QuestStatus::Draft,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_goal(mut self, goal: impl Into<String>) -> Self {
        self.goal = Some(goal.into());
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_constraints(mut self, constraints: impl Into<String>) -> Self {
        self.constraints = Some(constraints.into());
        self
    }
}

/// One step of a quest, in `order`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub quest_id: Uuid,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    /// Notes left by the task owner.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    pub order: i64,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(quest_id: Uuid, title: impl Into<String>, order: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            quest_id,
            title: title.into(),
            details: None,
            notes: None,
            order,
            created_at: Utc::now(),
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// A task produced by decomposition, before it is persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTask {
    pub title: String,
    pub details: Option<String>,
}

/// Investigation lifecycle: `Pending` → `Completed` | `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvestigationStatus {
    Pending,
    Completed,
    Failed,
}

impl InvestigationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

/// A request to analyse a task, and its outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInvestigation {
    pub id: Uuid,
    pub task_id: Uuid,
    pub status: InvestigationStatus,
    /// Ad-hoc question from the user.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    /// Model the user asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_type: Option<String>,
    /// Model that actually produced the result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TaskInvestigation {
    /// Create a pending investigation.
    pub fn new(task_id: Uuid) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            task_id,
            status: InvestigationStatus::Pending,
            prompt: None,
            model_type: None,
            model_id: None,
            summary: None,
            details: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.prompt = Some(prompt.into());
        self
    }

    pub fn with_model_type(mut self, model_type: impl Into<String>) -> Self {
        self.model_type = Some(model_type.into());
        self
    }
}

/// An investigation loaded together with its task and quest.
#[derive(Debug, Clone)]
pub struct InvestigationContext {
    pub investigation: TaskInvestigation,
    pub task: Task,
    pub quest: Quest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_quest_is_draft() {
        let quest = Quest::new("Learn Rust").with_goal("Ship a crate");
        assert_eq!(quest.status, QuestStatus::Draft);
        assert_eq!(quest.goal.as_deref(), Some("Ship a crate"));
        assert!(quest.context.is_none());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            QuestStatus::Draft,
            QuestStatus::Active,
            QuestStatus::Completed,
            QuestStatus::Failed,
            QuestStatus::Archived,
        ] {
            assert_eq!(QuestStatus::from_db(status.as_str()), status);
        }
        for status in [
            InvestigationStatus::Pending,
            InvestigationStatus::Completed,
            InvestigationStatus::Failed,
        ] {
            assert_eq!(InvestigationStatus::from_db(status.as_str()), status);
        }
        assert_eq!(QuestStatus::from_db("bogus"), QuestStatus::Draft);
    }

    #[test]
    fn new_investigation_is_pending() {
        let inv = TaskInvestigation::new(Uuid::new_v4()).with_model_type("claude-sonnet");
        assert_eq!(inv.status, InvestigationStatus::Pending);
        assert_eq!(inv.model_type.as_deref(), Some("claude-sonnet"));
        assert!(inv.model_id.is_none());
    }
}
