//! End-to-end tests: jobs go through the named queues, the consumers, the
//! model runner and the in-memory libSQL store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use uuid::Uuid;

use questline::error::{Error, LlmError};
use questline::llm::models::builtin_models;
use questline::llm::{AdapterTable, ModelAdapter, ModelRegistry, ModelRunner, Provider};
use questline::pipeline::{
    DECOMPOSE_QUEUE, DecomposeJob, DecomposeProcessor, INVESTIGATE_QUEUE, InvestigateJob,
    InvestigateProcessor, Job,
};
use questline::queue::{JobQueues, spawn_consumer};
use questline::store::{
    Database, InvestigationStatus, LibSqlBackend, Quest, QuestStatus, Task, TaskInvestigation,
};

/// Maximum time any test is allowed to run before we consider it hung.
const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Stub provider: replies per upstream model name, fails for anything else.
#[derive(Default)]
struct StubProvider {
    replies: HashMap<String, String>,
    calls: Mutex<Vec<String>>,
}

impl StubProvider {
    fn with(pairs: &[(&str, &str)]) -> Arc<Self> {
        Arc::new(Self {
            replies: pairs
                .iter()
                .map(|(m, r)| (m.to_string(), r.to_string()))
                .collect(),
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelAdapter for StubProvider {
    fn supports_images(&self) -> bool {
        true
    }

    async fn send(&self, model: &str, _prompt: &str, _images: &[String]) -> Result<String, Error> {
        self.calls.lock().unwrap().push(model.to_string());
        self.replies.get(model).cloned().ok_or_else(|| {
            LlmError::RequestFailed {
                provider: "stub".into(),
                reason: "HTTP 502: bad gateway".into(),
            }
            .into()
        })
    }
}

/// Run every job through fresh queues and consumers, then wait for the drain.
async fn run_jobs(db: Arc<LibSqlBackend>, provider: Arc<StubProvider>, jobs: Vec<Job>) {
    let registry = Arc::new(ModelRegistry::new(builtin_models()).unwrap());
    let table = AdapterTable::new()
        .with(Provider::OpenAi, provider.clone())
        .with(Provider::DeepSeek, provider.clone())
        .with(Provider::Anthropic, provider);
    let runner = Arc::new(ModelRunner::new(registry, table));
    let db: Arc<dyn Database> = db;

    let (queues, receivers) = JobQueues::new(8);
    let decompose = spawn_consumer(
        DECOMPOSE_QUEUE,
        receivers.decompose,
        Arc::new(DecomposeProcessor::new(runner.clone(), db.clone())),
        2,
    );
    let investigate = spawn_consumer(
        INVESTIGATE_QUEUE,
        receivers.investigate,
        Arc::new(InvestigateProcessor::new(runner, db)),
        2,
    );

    for job in &jobs {
        queues.enqueue(job).await.unwrap();
    }
    drop(queues);

    tokio::time::timeout(TEST_TIMEOUT, async {
        decompose.await.unwrap();
        investigate.await.unwrap();
    })
    .await
    .expect("consumers did not drain in time");
}

fn decompose_job(quest: &Quest, model: Option<&str>) -> Job {
    Job::Decompose(DecomposeJob {
        quest_id: quest.id,
        title: quest.title.clone(),
        goal: quest.goal.clone(),
        context: None,
        constraints: None,
        model_type: model.map(str::to_string),
        images: Vec::new(),
    })
}

#[tokio::test]
async fn decompose_and_investigate_through_queues() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let quest = Quest::new("Write a novel").with_goal("50k words by November");
    db.insert_quest(&quest).await.unwrap();

    let other = Quest::new("Repaint the hall");
    db.insert_quest(&other).await.unwrap();
    let task = Task::new(other.id, "Pick a colour", 0);
    db.insert_task(&task).await.unwrap();
    let inv = TaskInvestigation::new(task.id);
    db.insert_investigation(&inv).await.unwrap();

    let provider = StubProvider::with(&[(
        "gpt-4o-mini",
        "Here you go:\n```json\n[{\"title\": \"Outline\", \"details\": \"Three acts\"}, {\"title\": \"Draft\"}]\n```",
    ), (
        "deepseek-chat",
        "{summary: 'Go with sage green', details: 'Matches the floor'}",
    )]);

    run_jobs(
        db.clone(),
        provider,
        vec![
            decompose_job(&quest, None),
            Job::Investigate(InvestigateJob {
                investigation_id: inv.id,
                task_id: task.id,
                prompt: Some("Warm or cool?".into()),
                model_type: Some("deepseek-chat".into()),
                images: Vec::new(),
            }),
        ],
    )
    .await;

    let tasks = db.list_tasks(quest.id).await.unwrap();
    assert_eq!(tasks.len(), 2);
    assert_eq!(tasks[0].title, "Outline");
    assert_eq!(tasks[0].details.as_deref(), Some("Three acts"));
    assert_eq!(tasks[1].title, "Draft");
    assert_eq!(tasks[1].order, 1);
    assert_eq!(
        db.get_quest(quest.id).await.unwrap().unwrap().status,
        QuestStatus::Active
    );

    let stored = db.get_investigation(inv.id).await.unwrap().unwrap();
    assert_eq!(stored.status, InvestigationStatus::Completed);
    assert_eq!(stored.summary.as_deref(), Some("Go with sage green"));
    assert_eq!(stored.details.as_deref(), Some("Matches the floor"));
    assert_eq!(stored.model_id.as_deref(), Some("deepseek-chat"));
}

#[tokio::test]
async fn both_models_failing_marks_quest_failed_and_keeps_tasks() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let quest = Quest::new("Learn the cello");
    db.insert_quest(&quest).await.unwrap();
    db.insert_task(&Task::new(quest.id, "Rent a cello", 0))
        .await
        .unwrap();

    let provider = StubProvider::with(&[]);
    run_jobs(
        db.clone(),
        provider.clone(),
        vec![decompose_job(&quest, Some("gpt-4o"))],
    )
    .await;

    assert_eq!(provider.calls(), vec!["gpt-4o", "gpt-4o-mini"]);
    let tasks = db.list_tasks(quest.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Rent a cello");
    assert_eq!(
        db.get_quest(quest.id).await.unwrap().unwrap().status,
        QuestStatus::Failed
    );
}

#[tokio::test]
async fn unusable_reply_yields_placeholder_task() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let quest = Quest::new("Plan a trip");
    db.insert_quest(&quest).await.unwrap();

    run_jobs(
        db.clone(),
        StubProvider::with(&[("gpt-4o-mini", "[]")]),
        vec![decompose_job(&quest, None)],
    )
    .await;

    let tasks = db.list_tasks(quest.id).await.unwrap();
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Review quest goals");
    assert_eq!(
        db.get_quest(quest.id).await.unwrap().unwrap().status,
        QuestStatus::Active
    );
}

#[tokio::test]
async fn missing_investigation_makes_no_calls_and_no_writes() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let provider = StubProvider::with(&[("gpt-4o-mini", "{}")]);

    run_jobs(
        db.clone(),
        provider.clone(),
        vec![Job::Investigate(InvestigateJob {
            investigation_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            prompt: None,
            model_type: None,
            images: Vec::new(),
        })],
    )
    .await;

    assert!(provider.calls().is_empty());
}

#[tokio::test]
async fn many_quests_are_processed_concurrently_without_mixing() {
    let db = Arc::new(LibSqlBackend::new_memory().await.unwrap());
    let mut quests = Vec::new();
    for n in 0..6 {
        let quest = Quest::new(format!("Quest {n}"));
        db.insert_quest(&quest).await.unwrap();
        quests.push(quest);
    }

    let provider = StubProvider::with(&[(
        "gpt-4o-mini",
        r#"[{"title": "One"}, {"title": "Two"}, {"title": "Three"}]"#,
    )]);
    let jobs = quests.iter().map(|q| decompose_job(q, None)).collect();
    run_jobs(db.clone(), provider, jobs).await;

    for quest in &quests {
        let tasks = db.list_tasks(quest.id).await.unwrap();
        assert_eq!(tasks.len(), 3, "quest {} has wrong task count", quest.title);
        assert!(tasks.iter().all(|t| t.quest_id == quest.id));
    }
}
