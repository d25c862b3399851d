//! Error taxonomy shared by the settings, store, query and web layers.

use thiserror::Error;

pub type Result<T, E = ServiceError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// A settings key is missing for a mode, or the mode itself is unknown.
    #[error("{message}")]
    Configuration { message: String, status: u16 },

    #[error("Authentication failed. {0}")]
    Authentication(String),

    #[error("Search failed. {0}")]
    Query(String),

    /// Karp could not be reached or answered with something unusable.
    #[error("Upstream error: {0}")]
    Upstream(String),

    #[error("Subtype storage error: {0}")]
    Storage(#[from] std::io::Error),

    #[error("Rendering failed: {0}")]
    Render(String),
}

impl ServiceError {
    pub fn missing_key(key: &str, mode: &str) -> Self {
        let mut message = format!("No configuration for key {key}");
        if !mode.is_empty() {
            message.push_str(&format!(" in mode {mode}"));
        }
        ServiceError::Configuration {
            message,
            status: 500,
        }
    }

    pub fn invalid_key(key: &str, mode: &str, expected: &str) -> Self {
        ServiceError::Configuration {
            message: format!("Invalid configuration for key {key} in mode {mode}: expected {expected}"),
            status: 500,
        }
    }

    pub fn unknown_mode<'a>(mode: &str, available: impl IntoIterator<Item = &'a str>) -> Self {
        let available: Vec<&str> = available.into_iter().collect();
        ServiceError::Configuration {
            message: format!("Unknown mode: {mode}. Available: {}", available.join(", ")),
            status: 400,
        }
    }

    pub fn status(&self) -> u16 {
        match self {
            ServiceError::Configuration { status, .. } => *status,
            ServiceError::Authentication(_) => 401,
            ServiceError::Query(_) => 400,
            ServiceError::Upstream(_)
            | ServiceError::Storage(_)
            | ServiceError::Render(_) => 500,
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, ServiceError::Configuration { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_key_names_key_and_mode() {
        let err = ServiceError::missing_key("resource", "term-swefin");
        assert_eq!(
            err.to_string(),
            "No configuration for key resource in mode term-swefin"
        );
        assert_eq!(err.status(), 500);
    }

    #[test]
    fn unknown_mode_is_a_client_error() {
        let err = ServiceError::unknown_mode("nope", ["a", "b"]);
        assert_eq!(err.status(), 400);
        assert!(err.to_string().contains("Available: a, b"));
    }

    #[test]
    fn prefixes_follow_kind() {
        assert_eq!(
            ServiceError::Query("Unknown language: de".into()).to_string(),
            "Search failed. Unknown language: de"
        );
        assert_eq!(ServiceError::Authentication("x".into()).status(), 401);
    }
}
