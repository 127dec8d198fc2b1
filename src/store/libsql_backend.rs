//! libSQL backend: async `Database` trait implementation.
//!
//! Supports local file and in-memory databases. A single connection is
//! shared by every job. Every statement, reads included, runs under
//! `conn_lock`: a transaction never picks up another job's statements and
//! readers never see a transaction's uncommitted rows.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::store::migrations;
use crate::store::model::{
    InvestigationContext, InvestigationStatus, NewTask, Quest, QuestStatus, Task,
    TaskInvestigation,
};
use crate::store::traits::Database;

/// libSQL database backend.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
    conn_lock: Mutex<()>,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to enable foreign keys: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
            conn_lock: Mutex::new(()),
        };
        backend.run_migrations().await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn now_str() -> String {
    Utc::now().to_rfc3339()
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

fn get_uuid(row: &libsql::Row, idx: i32, field: &str) -> Result<Uuid, DatabaseError> {
    let raw: String = row
        .get(idx)
        .map_err(|e| DatabaseError::Query(format!("{field}: {e}")))?;
    Uuid::parse_str(&raw).map_err(|e| DatabaseError::Query(format!("{field} parse: {e}")))
}

fn get_text(row: &libsql::Row, idx: i32, field: &str) -> Result<String, DatabaseError> {
    row.get(idx)
        .map_err(|e| DatabaseError::Query(format!("{field}: {e}")))
}

/// Nullable TEXT column.
fn get_opt_text(row: &libsql::Row, idx: i32) -> Option<String> {
    row.get::<String>(idx).ok()
}

const QUEST_COLUMNS: &str =
    "q.id, q.title, q.goal, q.context, q.constraints, q.status, q.created_at, q.updated_at";

const TASK_COLUMNS: &str =
    "t.id, t.quest_id, t.title, t.details, t.notes, t.position, t.created_at";
const TASK_WIDTH: i32 = 7;

const INVESTIGATION_COLUMNS: &str = "i.id, i.task_id, i.status, i.prompt, i.model_type, \
     i.model_id, i.summary, i.details, i.error, i.created_at, i.updated_at";
const INVESTIGATION_WIDTH: i32 = 11;

fn row_to_quest(row: &libsql::Row, base: i32) -> Result<Quest, DatabaseError> {
    Ok(Quest {
        id: get_uuid(row, base, "quest.id")?,
        title: get_text(row, base + 1, "quest.title")?,
        goal: get_opt_text(row, base + 2),
        context: get_opt_text(row, base + 3),
        constraints: get_opt_text(row, base + 4),
        status: QuestStatus::from_db(&get_text(row, base + 5, "quest.status")?),
        created_at: parse_datetime(&get_text(row, base + 6, "quest.created_at")?),
        updated_at: parse_datetime(&get_text(row, base + 7, "quest.updated_at")?),
    })
}

fn row_to_task(row: &libsql::Row, base: i32) -> Result<Task, DatabaseError> {
    Ok(Task {
        id: get_uuid(row, base, "task.id")?,
        quest_id: get_uuid(row, base + 1, "task.quest_id")?,
        title: get_text(row, base + 2, "task.title")?,
        details: get_opt_text(row, base + 3),
        notes: get_opt_text(row, base + 4),
        order: row
            .get(base + 5)
            .map_err(|e| DatabaseError::Query(format!("task.position: {e}")))?,
        created_at: parse_datetime(&get_text(row, base + 6, "task.created_at")?),
    })
}

fn row_to_investigation(
    row: &libsql::Row,
    base: i32,
) -> Result<TaskInvestigation, DatabaseError> {
    Ok(TaskInvestigation {
        id: get_uuid(row, base, "investigation.id")?,
        task_id: get_uuid(row, base + 1, "investigation.task_id")?,
        status: InvestigationStatus::from_db(&get_text(row, base + 2, "investigation.status")?),
        prompt: get_opt_text(row, base + 3),
        model_type: get_opt_text(row, base + 4),
        model_id: get_opt_text(row, base + 5),
        summary: get_opt_text(row, base + 6),
        details: get_opt_text(row, base + 7),
        error: get_opt_text(row, base + 8),
        created_at: parse_datetime(&get_text(row, base + 9, "investigation.created_at")?),
        updated_at: parse_datetime(&get_text(row, base + 10, "investigation.updated_at")?),
    })
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl Database for LibSqlBackend {
    async fn run_migrations(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(self.conn()).await
    }

    // ── Quests ──────────────────────────────────────────────────────

    async fn insert_quest(&self, quest: &Quest) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO quests (id, title, goal, context, constraints, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    quest.id.to_string(),
                    quest.title.as_str(),
                    opt_text(quest.goal.as_deref()),
                    opt_text(quest.context.as_deref()),
                    opt_text(quest.constraints.as_deref()),
                    quest.status.as_str(),
                    quest.created_at.to_rfc3339(),
                    quest.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_quest: {e}")))?;
        debug!(quest_id = %quest.id, "Inserted quest");
        Ok(())
    }

    async fn get_quest(&self, id: Uuid) -> Result<Option<Quest>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {QUEST_COLUMNS} FROM quests q WHERE q.id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_quest: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_quest(&row, 0)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_quest row: {e}"))),
        }
    }

    async fn update_quest_status(
        &self,
        id: Uuid,
        status: QuestStatus,
    ) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        self.conn()
            .execute(
                "UPDATE quests SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now_str(), id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("update_quest_status: {e}")))?;
        Ok(())
    }

    // ── Tasks ───────────────────────────────────────────────────────

    async fn insert_task(&self, task: &Task) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO tasks (id, quest_id, title, details, notes, position, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    task.id.to_string(),
                    task.quest_id.to_string(),
                    task.title.as_str(),
                    opt_text(task.details.as_deref()),
                    opt_text(task.notes.as_deref()),
                    task.order,
                    task.created_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_task: {e}")))?;
        Ok(())
    }

    async fn list_tasks(&self, quest_id: Uuid) -> Result<Vec<Task>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {TASK_COLUMNS} FROM tasks t WHERE t.quest_id = ?1 ORDER BY t.position ASC"
                ),
                params![quest_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks: {e}")))?;

        let mut tasks = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_tasks row: {e}")))?
        {
            tasks.push(row_to_task(&row, 0)?);
        }
        Ok(tasks)
    }

    async fn replace_tasks_and_activate(
        &self,
        quest_id: Uuid,
        tasks: &[NewTask],
    ) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_tasks begin: {e}")))?;

        let outcome = async {
            tx.execute(
                "DELETE FROM tasks WHERE quest_id = ?1",
                params![quest_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_tasks delete: {e}")))?;

            let now = now_str();
            for (order, task) in tasks.iter().enumerate() {
                tx.execute(
                    "INSERT INTO tasks (id, quest_id, title, details, notes, position, created_at)
                     VALUES (?1, ?2, ?3, ?4, NULL, ?5, ?6)",
                    params![
                        Uuid::new_v4().to_string(),
                        quest_id.to_string(),
                        task.title.as_str(),
                        opt_text(task.details.as_deref()),
                        order as i64,
                        now.as_str(),
                    ],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("replace_tasks insert: {e}")))?;
            }

            let updated = tx
                .execute(
                    "UPDATE quests SET status = ?1, updated_at = ?2 WHERE id = ?3",
                    params![QuestStatus::Active.as_str(), now.as_str(), quest_id.to_string()],
                )
                .await
                .map_err(|e| DatabaseError::Query(format!("replace_tasks activate: {e}")))?;

            if updated == 0 {
                return Err(DatabaseError::NotFound {
                    entity: "quest".into(),
                    id: quest_id.to_string(),
                });
            }
            Ok::<(), DatabaseError>(())
        }
        .await;

        if let Err(e) = outcome {
            tx.rollback()
                .await
                .map_err(|re| DatabaseError::Query(format!("replace_tasks rollback: {re}")))?;
            return Err(e);
        }

        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("replace_tasks commit: {e}")))?;
        debug!(quest_id = %quest_id, count = tasks.len(), "Replaced quest tasks");
        Ok(())
    }

    // ── Investigations ──────────────────────────────────────────────

    async fn insert_investigation(&self, inv: &TaskInvestigation) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        self.conn()
            .execute(
                "INSERT INTO task_investigations
                 (id, task_id, status, prompt, model_type, model_id, summary, details, error, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    inv.id.to_string(),
                    inv.task_id.to_string(),
                    inv.status.as_str(),
                    opt_text(inv.prompt.as_deref()),
                    opt_text(inv.model_type.as_deref()),
                    opt_text(inv.model_id.as_deref()),
                    opt_text(inv.summary.as_deref()),
                    opt_text(inv.details.as_deref()),
                    opt_text(inv.error.as_deref()),
                    inv.created_at.to_rfc3339(),
                    inv.updated_at.to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("insert_investigation: {e}")))?;
        Ok(())
    }

    async fn get_investigation(
        &self,
        id: Uuid,
    ) -> Result<Option<TaskInvestigation>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {INVESTIGATION_COLUMNS} FROM task_investigations i WHERE i.id = ?1"),
                params![id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_investigation: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_investigation(&row, 0)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_investigation row: {e}"))),
        }
    }

    async fn get_investigation_context(
        &self,
        id: Uuid,
    ) -> Result<Option<InvestigationContext>, DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        let sql = format!(
            "SELECT {INVESTIGATION_COLUMNS}, {TASK_COLUMNS}, {QUEST_COLUMNS}
             FROM task_investigations i
             JOIN tasks t ON t.id = i.task_id
             JOIN quests q ON q.id = t.quest_id
             WHERE i.id = ?1"
        );
        let mut rows = self
            .conn()
            .query(&sql, params![id.to_string()])
            .await
            .map_err(|e| DatabaseError::Query(format!("get_investigation_context: {e}")))?;

        let row = match rows.next().await {
            Ok(Some(row)) => row,
            Ok(None) => return Ok(None),
            Err(e) => {
                return Err(DatabaseError::Query(format!(
                    "get_investigation_context row: {e}"
                )));
            }
        };

        Ok(Some(InvestigationContext {
            investigation: row_to_investigation(&row, 0)?,
            task: row_to_task(&row, INVESTIGATION_WIDTH)?,
            quest: row_to_quest(&row, INVESTIGATION_WIDTH + TASK_WIDTH)?,
        }))
    }

    async fn complete_investigation(
        &self,
        id: Uuid,
        summary: &str,
        details: &str,
        model_id: &str,
    ) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        self.conn()
            .execute(
                "UPDATE task_investigations
                 SET status = ?1, summary = ?2, details = ?3, model_id = ?4, error = NULL, updated_at = ?5
                 WHERE id = ?6",
                params![
                    InvestigationStatus::Completed.as_str(),
                    summary,
                    details,
                    model_id,
                    now_str(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("complete_investigation: {e}")))?;
        Ok(())
    }

    async fn fail_investigation(&self, id: Uuid, error: &str) -> Result<(), DatabaseError> {
        let _guard = self.conn_lock.lock().await;
        self.conn()
            .execute(
                "UPDATE task_investigations SET status = ?1, error = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    InvestigationStatus::Failed.as_str(),
                    error,
                    now_str(),
                    id.to_string(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("fail_investigation: {e}")))?;
        Ok(())
    }
}
