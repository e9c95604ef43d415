use crate::models::PrivilegedActionKind;
use ghostswitch_common::{ParseError, Platform, Remediation};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TunnelError {
    #[error("WireGuard tools not found on {platform}")]
    ToolNotFound {
        platform: Platform,
        remediation: Remediation,
    },

    #[error("Failed to write tunnel config {}: {source}", path.display())]
    ConfigWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid tunnel config: {0}")]
    InvalidConfig(String),

    #[error("{action} failed: {diagnostic}")]
    PrivilegedActionFailed {
        action: PrivilegedActionKind,
        diagnostic: String,
    },

    #[error("Tunnel verification failed: {0}")]
    VerificationFailed(String),

    #[error("{what} timed out after {}s", after.as_secs())]
    Timeout { what: String, after: Duration },

    #[error("Tunnel {0} is busy with another operation")]
    Busy(String),

    #[error("Tunnel {0} is already connected")]
    AlreadyConnected(String),

    #[error("Download error: {0}")]
    Download(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<ParseError> for TunnelError {
    fn from(err: ParseError) -> Self {
        TunnelError::InvalidConfig(err.to_string())
    }
}

impl TunnelError {
    pub fn user_friendly_message(&self) -> String {
        match self {
            TunnelError::ToolNotFound { remediation, .. } => format!(
                "WireGuard is not installed. {}",
                remediation.instructions()
            ),
            TunnelError::ConfigWrite { .. } => {
                "Could not save the tunnel configuration. Check disk space and permissions."
                    .to_string()
            }
            TunnelError::InvalidConfig(msg) => {
                format!("The server sent an unusable configuration: {}", msg)
            }
            TunnelError::PrivilegedActionFailed { diagnostic, .. } => {
                format!("Administrator action failed. {}", diagnostic)
            }
            TunnelError::VerificationFailed(_) => {
                "The tunnel did not come up. Please try again.".to_string()
            }
            TunnelError::Timeout { what, .. } => format!("{} took too long to respond.", what),
            TunnelError::Busy(_) => {
                "Another connection attempt is still in progress.".to_string()
            }
            TunnelError::AlreadyConnected(_) => "You are already connected.".to_string(),
            _ => self.to_string(),
        }
    }
}
