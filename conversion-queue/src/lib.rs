//! # conversion-queue: Tiered Conversion Job Scheduler
//!
//! **Priority queue, retry policy and worker pool for document conversions**
//!
//! Conversion requests are queued with a priority and retry budget derived
//! from the requesting user's tier. A bounded worker pool runs them through a
//! pluggable conversion routine, renewing a time-limited lock while it works.
//! Jobs whose worker stops renewing are reclaimed and retried; lifecycle
//! events are projected onto the user-facing conversion record and forwarded
//! as notifications.
//!
//! ## Guarantees
//!
//! - **Idempotent submission**: the job ID is derived from the conversion ID,
//!   so a duplicate submission returns the job already queued
//! - **Priority then FIFO**: lower priority value first, arrival order within a band
//! - **At-least-once execution**: exactly one unexpired lock per job; a lost
//!   lock means the worker abandons its result
//! - **Bounded retries**: exponential backoff from 5s; a job that used up its
//!   attempts is terminal and never runs again
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use conversion_queue::prelude::*;
//! use std::sync::Arc;
//!
//! struct Converter;
//!
//! #[async_trait]
//! impl ConversionExecutor for Converter {
//!     async fn execute(
//!         &self,
//!         payload: &ConversionPayload,
//!         ctx: &JobContext,
//!     ) -> Result<ConversionOutcome, ConversionError> {
//!         ctx.report_progress(50, "converting").await.ok();
//!         // ... convert payload.source_file_path into payload.output_file_path
//!         Ok(ConversionOutcome::succeeded().with_page_count(4))
//!     }
//! }
//!
//! # async fn run() -> QueueResult<()> {
//! let records = Arc::new(InMemoryConversionRecords::new());
//! let scheduler = ConversionScheduler::in_memory(
//!     SchedulerConfig::from_env()?,
//!     Arc::new(Converter),
//!     records.clone(),
//!     Arc::new(TracingNotifier),
//! )?;
//! scheduler.start().await?;
//!
//! records.insert_pending("conv-42");
//! let payload = ConversionPayload::new("conv-42", "user-7", ConversionType::PdfToDocx)
//!     .with_files("/uploads/a.pdf", "/converted/a.docx", "a.pdf");
//! let handle = scheduler.submit(payload, UserTier::parse("premium")).await?;
//!
//! let snapshot = scheduler.get_job(&handle.job_id).await?;
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod collaborators;
pub mod config;
pub mod error;
pub mod observability;
pub mod policy;
pub mod projector;
pub mod reclaimer;
pub mod scheduler;
pub mod store;
pub mod submitter;
pub mod types;
pub mod worker;

// Core API exports
pub use config::{RetentionPolicy, SchedulerConfig, ShutdownPolicy, StoreConfig};
pub use error::{CollaboratorError, ConversionError, FailureReason, QueueError, QueueResult};
pub use policy::{Backoff, JobPolicy};
pub use types::{
    ConversionOutcome, ConversionPayload, ConversionType, JobEvent, JobId, JobOwner, JobRecord,
    JobSnapshot, JobState, Progress, QueueStats, UserTier, WorkerId,
};

pub use collaborators::{
    ConversionExecutor, ConversionRecordStore, ConversionStatus, ConversionUpdate, Notification,
    NotificationChannel, NotificationKind,
};
pub use projector::StatusProjector;
pub use reclaimer::StalledJobReclaimer;
pub use scheduler::ConversionScheduler;
pub use store::{EnqueueOutcome, FailOutcome, QueueStore, ReclaimedJob};
pub use submitter::{JobHandle, JobSubmitter};
pub use worker::{JobContext, WorkerPool};

// Observability exports
pub use observability::{LiveMetrics, MetricsSnapshot};

#[cfg(feature = "tracing-basic")]
pub use observability::init_tracing;

// Store implementations
#[cfg(feature = "memory")]
pub use store::memory::MemoryStore;

/// Everything needed to host the scheduler and plug in collaborators
pub mod prelude {
    // Scheduler and configuration
    pub use crate::{ConversionScheduler, SchedulerConfig, ShutdownPolicy};

    // Essential types
    pub use crate::{
        ConversionOutcome, ConversionPayload, ConversionType, JobHandle, JobId, JobSnapshot,
        JobState, QueueError, QueueResult, UserTier,
    };

    // Collaborator seams
    pub use crate::collaborators::{
        ConversionExecutor, ConversionRecordStore, InMemoryConversionRecords, NotificationChannel,
        TracingNotifier,
    };
    pub use crate::{ConversionError, JobContext};

    #[cfg(feature = "memory")]
    pub use crate::MemoryStore;

    // Essential traits
    pub use async_trait::async_trait;
}
