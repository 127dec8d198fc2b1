//! Job processing pipeline.
//!
//! Every job flows through:
//! 1. `ModelRunner::run()`, which resolves the model and falls back once
//! 2. `normalize::parse_json_from_model()`, which extracts and repairs JSON
//! 3. A persistence commit recording the terminal state
//!
//! Processors never return errors to the queue. Failures are stored on the
//! owning quest or investigation.

pub mod decompose;
pub mod investigate;
pub mod normalize;
pub mod types;

pub use decompose::DecomposeProcessor;
pub use investigate::InvestigateProcessor;
pub use types::{DECOMPOSE_QUEUE, DecomposeJob, INVESTIGATE_QUEUE, InvestigateJob, Job};
