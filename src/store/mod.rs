//! Persistence layer: libSQL-backed storage for quests, tasks and investigations.

pub mod libsql_backend;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use model::{
    InvestigationContext, InvestigationStatus, NewTask, Quest, QuestStatus, Task,
    TaskInvestigation,
};
pub use traits::Database;
