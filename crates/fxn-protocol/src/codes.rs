use serde::{Deserialize, Serialize};

/// Response code carried by every reply and returned to API callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Code {
    #[default]
    Ok,
    Accepted,
    Error,
    Timeout,
    NotFound,
    NotAvailable,
    Unsupported,
    Invalid,
}

impl Code {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::Accepted => "accepted",
            Self::Error => "error",
            Self::Timeout => "timeout",
            Self::NotFound => "not_found",
            Self::NotAvailable => "not_available",
            Self::Unsupported => "unsupported",
            Self::Invalid => "invalid",
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Ok | Self::Accepted)
    }
}

impl std::fmt::Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
