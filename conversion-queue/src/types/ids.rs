use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a job.
///
/// Derived from the conversion it serves, so re-submitting the same
/// conversion lands on the same job.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(pub String);

impl JobId {
    /// Build the deterministic job ID for a conversion
    pub fn for_conversion(conversion_id: &str) -> Self {
        Self(format!("conversion:{}", conversion_id))
    }

    /// Get the inner string value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for JobId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&str> for JobId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

/// Identity of a worker task; the lock owner recorded on active jobs
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerId(pub String);

impl WorkerId {
    /// Generate a worker ID unique to this process run
    pub fn new(pool: &str, slot: usize) -> Self {
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!("{}-{}-{}", pool, slot, &suffix[..8]))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for WorkerId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_is_deterministic() {
        assert_eq!(JobId::for_conversion("abc"), JobId::for_conversion("abc"));
        assert_eq!(JobId::for_conversion("abc").as_str(), "conversion:abc");
    }

    #[test]
    fn test_worker_ids_are_unique_per_slot_instance() {
        let a = WorkerId::new("pool", 0);
        let b = WorkerId::new("pool", 0);
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("pool-0-"));
    }
}
