//! Async persistence interface used by the pipeline.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::model::{
    InvestigationContext, NewTask, Quest, QuestStatus, Task, TaskInvestigation,
};

/// Backend-agnostic database trait covering quests, tasks and investigations.
#[async_trait]
pub trait Database: Send + Sync {
    /// Run all pending schema migrations.
    async fn run_migrations(&self) -> Result<(), DatabaseError>;

    // ── Quests ──────────────────────────────────────────────────────

    /// Insert a new quest.
    async fn insert_quest(&self, quest: &Quest) -> Result<(), DatabaseError>;

    /// Get a quest by ID.
    async fn get_quest(&self, id: Uuid) -> Result<Option<Quest>, DatabaseError>;

    /// Set a quest's status. Missing quests are a no-op.
    async fn update_quest_status(&self, id: Uuid, status: QuestStatus)
    -> Result<(), DatabaseError>;

    // ── Tasks ───────────────────────────────────────────────────────

    /// Insert a single task.
    async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError>;

    /// Tasks for a quest in order.
    async fn list_tasks(&self, quest_id: Uuid) -> Result<Vec<Task>, DatabaseError>;

    /// Atomically replace a quest's tasks and mark the quest active.
    ///
    /// Deletes existing tasks, inserts `tasks` in order and sets the status;
    /// either all three happen or none do. Fails with `NotFound` if the quest
    /// does not exist.
    async fn replace_tasks_and_activate(
        &self,
        quest_id: Uuid,
        tasks: &[NewTask],
    ) -> Result<(), DatabaseError>;

    // ── Investigations ──────────────────────────────────────────────

    /// Insert a new investigation.
    async fn insert_investigation(&self, inv: &TaskInvestigation) -> Result<(), DatabaseError>;

    /// Get an investigation by ID.
    async fn get_investigation(&self, id: Uuid)
    -> Result<Option<TaskInvestigation>, DatabaseError>;

    /// Load an investigation with its task and quest; `None` if any is missing.
    async fn get_investigation_context(
        &self,
        id: Uuid,
    ) -> Result<Option<InvestigationContext>, DatabaseError>;

    /// Mark an investigation completed, clearing any previous error.
    async fn complete_investigation(
        &self,
        id: Uuid,
        summary: &str,
        details: &str,
        model_id: &str,
    ) -> Result<(), DatabaseError>;

    /// Mark an investigation failed with an error message.
    async fn fail_investigation(&self, id: Uuid, error: &str) -> Result<(), DatabaseError>;
}
