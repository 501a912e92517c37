pub mod job;
pub mod pool;

pub use job::{JobOutcome, JobResult};
pub use pool::{PoolOptions, WorkerPool};
