pub mod ids;
pub mod tier;
pub mod payload;
pub mod record;
pub mod events;

pub use ids::{JobId, WorkerId};
pub use tier::UserTier;
pub use payload::{ConversionOutcome, ConversionPayload, ConversionType};
pub use record::{JobRecord, JobSnapshot, JobState, Progress, QueueStats};
pub use events::{JobEvent, JobOwner};
