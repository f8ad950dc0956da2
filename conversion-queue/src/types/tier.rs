use serde::{Deserialize, Serialize};

/// Subscription level of the user requesting a conversion
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum UserTier {
    Free,
    Basic,
    Premium,
    Enterprise,
    /// Any tier string the platform does not know about; the original text is kept
    Unrecognized(String),
}

impl UserTier {
    /// Parse a tier name leniently (case-insensitive, never fails)
    pub fn parse(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "free" => Self::Free,
            "basic" => Self::Basic,
            "premium" => Self::Premium,
            "enterprise" => Self::Enterprise,
            _ => Self::Unrecognized(value.to_string()),
        }
    }

    /// Get human-readable name
    pub fn name(&self) -> &str {
        match self {
            Self::Free => "free",
            Self::Basic => "basic",
            Self::Premium => "premium",
            Self::Enterprise => "enterprise",
            Self::Unrecognized(raw) => raw,
        }
    }
}

impl Default for UserTier {
    fn default() -> Self {
        Self::Free
    }
}

impl std::fmt::Display for UserTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for UserTier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::parse(s))
    }
}

impl From<String> for UserTier {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<&str> for UserTier {
    fn from(value: &str) -> Self {
        Self::parse(value)
    }
}

impl From<UserTier> for String {
    fn from(tier: UserTier) -> Self {
        tier.name().to_string()
    }
}
