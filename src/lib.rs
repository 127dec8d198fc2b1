//! Questline: LLM job pipeline that decomposes quests into tasks and
//! investigates individual tasks.

pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod queue;
pub mod store;
