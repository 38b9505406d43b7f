//! Error types for the OpenRadio service.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("{}", friendly_network_error(.0))]
    Network(#[from] reqwest::Error),

    #[error("HTTP {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Playlist error: {0}")]
    Playlist(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Backup step '{step}' failed: {reason}")]
    Backup { step: &'static str, reason: String },

    #[error("Worker pool closed")]
    WorkerClosed,

    #[error("Service is not running")]
    ServiceGone,
}

pub type Result<T> = std::result::Result<T, ServiceError>;

fn friendly_network_error(e: &reqwest::Error) -> String {
    if e.is_builder() {
        if let Some(url) = e.url() {
            return format!("Invalid URL: {url}");
        }
        return "Invalid URL".to_string();
    }
    if e.is_connect() {
        if let Some(url) = e.url() {
            return format!("Could not connect to {}", url.host_str().unwrap_or("server"));
        }
        return "Could not connect to server".to_string();
    }
    if e.is_timeout() {
        return "Connection timed out".to_string();
    }
    format!("Network error: {e}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_message_names_url() {
        let err = ServiceError::Status {
            status: 404,
            url: "http://example.com/x".into(),
        };
        assert_eq!(err.to_string(), "HTTP 404 from http://example.com/x");
    }

    #[test]
    fn test_backup_message_names_step() {
        let err = ServiceError::Backup {
            step: "read-archive",
            reason: "missing".into(),
        };
        assert!(err.to_string().contains("read-archive"));
    }
}
