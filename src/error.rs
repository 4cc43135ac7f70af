use std::path::PathBuf;

use thiserror::Error;

/// Run-level failures that callers match on. Everything else travels as
/// `anyhow::Error` with context attached.
#[derive(Debug, Error)]
pub enum HubError {
    #[error(
        "insufficient disk space for extraction: need {required} bytes, {available} available"
    )]
    InsufficientSpace { required: u64, available: u64 },
    #[error("config file invalid or unreadable: {0}")]
    InvalidConfig(String),
    #[error("unknown platform `{0}`; expected one of: all, google_voice, google_chat, google_mail, facebook, instagram")]
    UnknownPlatform(String),
    #[error("workspace root does not exist: {}", .0.display())]
    WorkspaceMissing(PathBuf),
}

/// Failure while turning one unit of work into stored records.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("malformed export data in {}: {reason}", path.display())]
    Malformed { path: PathBuf, reason: String },
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("store write failed: {0}")]
    Store(#[from] rusqlite::Error),
}

impl ParseError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Store failures abort the run; anything else only fails the unit.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Store(_))
    }
}

#[cfg(test)]
mod tests {
    use super::ParseError;

    #[test]
    fn only_store_errors_are_fatal() {
        let malformed = ParseError::malformed("/tmp/x.json", "bad json");
        assert!(!malformed.is_fatal());

        let io = ParseError::io(
            "/tmp/x.json",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert!(!io.is_fatal());

        let store = ParseError::Store(rusqlite::Error::InvalidQuery);
        assert!(store.is_fatal());
    }
}
