pub mod db;
pub mod engine;
pub mod error;
pub mod types;

pub use engine::{JobEngine, JobQueue};
pub use error::{JobError, Result};
pub use types::{EnqueueOpts, JobHandler, JobRecord, JobStatus, Outcome};
