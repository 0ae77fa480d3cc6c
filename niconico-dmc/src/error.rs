//! The errors that can occur.

use std::time::Duration;
use thiserror::Error;

/// A type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// The possible errors that can occur.
#[derive(Debug, Error)]
pub enum Error {
    /// An error occurred while running the runtime.
    #[error("An error occurred while running the runtime: {0}")]
    Runtime(#[from] tokio::task::JoinError),
    /// An error occurred while spawning or talking to a process.
    #[error("An IO error occurred: {0}")]
    IO(#[from] std::io::Error),
    /// An error occurred while fetching.
    #[error("An error occurred while fetching: {0}")]
    Reqwest(#[from] reqwest::Error),
    /// An error occurred while parsing JSON.
    #[error("An error occurred while parsing JSON: {0}")]
    Serde(#[from] serde_json::Error),

    /// An error occurred while running a command.
    #[error("Failed to execute command: {0}")]
    Command(String),
    /// An error occurred due to a timeout.
    #[error("Operation timed out after {0:?}")]
    Timeout(Duration),
    /// The server answered with a non-success status.
    #[error("HTTP {status} returned by {url}")]
    Http {
        /// The status code.
        status: u16,
        /// The requested URL.
        url: String,
    },

    /// A header name or value cannot be sent.
    #[error("Invalid HTTP header: {0}")]
    InvalidHeader(String),

    /// The given URL is not a niconico watch URL.
    #[error("Unsupported URL: {0}")]
    InvalidUrl(String),
    /// The composite format URL could not be split into its identifiers.
    #[error("Invalid DMC identity: {0}")]
    InvalidIdentity(String),

    /// The video exists but has been deleted.
    #[error("The video has been deleted.")]
    Deleted,
    /// The video does not exist.
    #[error("The video is not found.")]
    NotFound,
    /// The video is only visible to community members.
    #[error("The video is community members only.")]
    MembersOnly,
    /// The thumb info API reported an error code we don't know.
    #[error("niconico reports error: {0}")]
    Upstream(String),

    /// Neither the DMC formats nor the legacy probe produced anything.
    #[error("Unable to find video info.")]
    NoPlayableFormat,
    /// The session creation call failed for this format.
    #[error("Session negotiation failed for format {format_id}: {reason}")]
    SessionNegotiation {
        /// The format the session was requested for.
        format_id: String,
        /// What went wrong.
        reason: String,
    },
    /// The media inspection tool could not analyze the legacy URL.
    #[error("Unable to probe legacy stream: {0}")]
    Probe(String),
    /// A field required to negotiate a session is missing upstream.
    #[error("Missing required field before negotiation: {0}")]
    Precondition(&'static str),
}

impl Error {
    /// Whether this is an expected content-unavailability state rather than a failure.
    pub fn is_expected(&self) -> bool {
        matches!(self, Error::Deleted | Error::NotFound | Error::MembersOnly)
    }

    /// Whether the caller should move on to another format instead of giving up.
    pub fn is_format_local(&self) -> bool {
        matches!(self, Error::SessionNegotiation { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expected_errors_are_content_states() {
        assert!(Error::Deleted.is_expected());
        assert!(Error::NotFound.is_expected());
        assert!(Error::MembersOnly.is_expected());
        assert!(!Error::Upstream("ERROR".into()).is_expected());
        assert!(!Error::NoPlayableFormat.is_expected());
    }

    #[test]
    fn upstream_message_carries_raw_code() {
        let message = Error::Upstream("INVALID_V1".into()).to_string();
        assert_eq!(message, "niconico reports error: INVALID_V1");
    }

    #[test]
    fn only_negotiation_failures_are_format_local() {
        let err = Error::SessionNegotiation {
            format_id: "h264_360p-aac_64kbps".into(),
            reason: "HTTP 403".into(),
        };
        assert!(err.is_format_local());
        assert!(!Error::Precondition("player_id").is_format_local());
    }
}
