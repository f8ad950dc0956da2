//! Worker pool: claims jobs, runs the conversion routine, renews locks while
//! it runs and reports the result back to the store.

mod context;
mod pool;

pub use context::{JobContext, ProgressReporter};
pub use pool::WorkerPool;
