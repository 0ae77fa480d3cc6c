use log::{error, warn};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::LazyLock;

static USER_SESSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^user_session_\d+_[[:xdigit:]]+$").unwrap());

/// Settings read from `config.toml`, every key optional.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub user_session: Option<String>,
    pub ffprobe_path: Option<PathBuf>,
    pub timeout_secs: Option<u64>,
    pub user_agent: Option<String>,
}

impl Config {
    /// `{config_dir}/nicodl/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("nicodl").join("config.toml"))
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Loads the config file. A missing or malformed file yields the defaults.
    pub fn load() -> Self {
        let Some(path) = Self::path() else {
            return Self::default();
        };
        if !path.is_file() {
            return Self::default();
        }

        match fs::read_to_string(&path).map(|content| Self::parse(&content)) {
            Ok(Ok(config)) => config,
            Ok(Err(e)) => {
                error!("Malformed config file {}: {}", path.display(), e);
                Self::default()
            }
            Err(e) => {
                error!("Could not read {}: {}", path.display(), e);
                Self::default()
            }
        }
    }

    /// Replaces the keys given on the command line.
    pub fn with_overrides(
        mut self,
        user_session: Option<String>,
        ffprobe_path: Option<PathBuf>,
        timeout_secs: Option<u64>,
    ) -> Self {
        if user_session.is_some() {
            self.user_session = user_session;
        }
        if ffprobe_path.is_some() {
            self.ffprobe_path = ffprobe_path;
        }
        if timeout_secs.is_some() {
            self.timeout_secs = timeout_secs;
        }
        self
    }

    /// The session cookie, dropped with a warning when it does not look like one.
    pub fn checked_user_session(&self) -> Option<&str> {
        let session = self.user_session.as_deref()?.trim();
        if verify_user_session(session) {
            Some(session)
        } else {
            warn!("Ignoring user_session, it must look like user_session_<id>_<hex>");
            None
        }
    }
}

fn verify_user_session(session: &str) -> bool {
    USER_SESSION.is_match(session)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_partial_files() {
        let config = Config::parse("timeout_secs = 10\nffprobe_path = \"/usr/bin/ffprobe\"\n").unwrap();
        assert_eq!(config.timeout_secs, Some(10));
        assert_eq!(config.ffprobe_path, Some(PathBuf::from("/usr/bin/ffprobe")));
        assert_eq!(config.user_session, None);

        assert_eq!(Config::parse("").unwrap(), Config::default());
        assert!(Config::parse("timeout_secs = \"soon\"").is_err());
    }

    #[test]
    fn command_line_wins() {
        let config = Config {
            user_session: Some("user_session_1_ab".into()),
            timeout_secs: Some(10),
            ..Default::default()
        }
        .with_overrides(None, Some(PathBuf::from("ffprobe")), Some(60));

        assert_eq!(config.user_session.as_deref(), Some("user_session_1_ab"));
        assert_eq!(config.ffprobe_path, Some(PathBuf::from("ffprobe")));
        assert_eq!(config.timeout_secs, Some(60));
    }

    #[test]
    fn user_session_shape() {
        let mut config = Config {
            user_session: Some(" user_session_12345_0123abcdef ".into()),
            ..Default::default()
        };
        assert_eq!(config.checked_user_session(), Some("user_session_12345_0123abcdef"));

        config.user_session = Some("hunter2".into());
        assert_eq!(config.checked_user_session(), None);
    }
}
