//! Redis Streams job queue and job status cache.
//!
//! The queue carries analysis jobs with consumer-group delivery, retry
//! accounting and a dead letter stream; the status cache is the durable
//! side of the job table, polled by the API and used for restart resume.

mod error;
mod job;
mod queue;
mod status;

pub use error::{QueueError, QueueResult};
pub use job::{AnalyzeVideoJob, QueueJob};
pub use queue::{JobQueue, QueueConfig};
pub use status::{JobStatusEntry, StatusCache};
