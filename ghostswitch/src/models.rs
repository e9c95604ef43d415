use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

pub use ghostswitch_common::{
    ConnectionStatus, PeerConfig, Platform, Remediation, SecretKey, StatusEvent, ToolchainInfo,
    TunnelConfig, WINDOWS_INSTALLER_URL,
};

#[derive(Clone, PartialEq, Debug)]
pub enum TunnelState {
    Disconnected,
    Connecting,
    Connected {
        interface: String,
        since: DateTime<Utc>,
        public_ip: Option<String>,
    },
    Disconnecting,
    Failed {
        reason: String,
    },
}

impl TunnelState {
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TunnelState::Connecting | TunnelState::Disconnecting)
    }

    pub fn status(&self) -> ConnectionStatus {
        match self {
            TunnelState::Disconnected => ConnectionStatus::Disconnected,
            TunnelState::Connecting => ConnectionStatus::Connecting,
            TunnelState::Connected { .. } => ConnectionStatus::Connected,
            TunnelState::Disconnecting => ConnectionStatus::Disconnecting,
            TunnelState::Failed { .. } => ConnectionStatus::Error,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivilegedActionKind {
    InstallTool,
    StartTunnel,
    StopTunnel,
}

impl fmt::Display for PrivilegedActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PrivilegedActionKind::InstallTool => f.write_str("Installing WireGuard"),
            PrivilegedActionKind::StartTunnel => f.write_str("Starting the tunnel"),
            PrivilegedActionKind::StopTunnel => f.write_str("Stopping the tunnel"),
        }
    }
}

#[derive(Clone, PartialEq, Debug)]
pub enum PrivilegedAction {
    InstallTool {
        installer: Option<PathBuf>,
    },
    StartTunnel {
        name: String,
        config_path: PathBuf,
    },
    StopTunnel {
        name: String,
        config_path: Option<PathBuf>,
    },
}

impl PrivilegedAction {
    pub fn kind(&self) -> PrivilegedActionKind {
        match self {
            PrivilegedAction::InstallTool { .. } => PrivilegedActionKind::InstallTool,
            PrivilegedAction::StartTunnel { .. } => PrivilegedActionKind::StartTunnel,
            PrivilegedAction::StopTunnel { .. } => PrivilegedActionKind::StopTunnel,
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
}

#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct InstallAttempt {
    pub method_id: String,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
    pub diagnostic: String,
}

/// Result of a privileged action that some method in the chain completed.
#[derive(Clone, PartialEq, Debug)]
pub struct PrivilegedOutcome {
    pub method_id: String,
    pub attempts: Vec<InstallAttempt>,
    pub diagnostic: String,
}

#[derive(Clone, PartialEq, Debug)]
pub struct InstallReport {
    pub attempts: Vec<InstallAttempt>,
    pub toolchain: ToolchainInfo,
}

#[derive(Clone, PartialEq, Debug)]
pub enum ConfigSource {
    Structured(TunnelConfig),
    Rendered { interface_name: String, text: String },
}

/// What the GUI hands over after the backend issued a config.
#[derive(Clone, PartialEq, Debug)]
pub struct TunnelRequest {
    pub server: String,
    pub client_ip: Option<String>,
    pub source: ConfigSource,
}

impl TunnelRequest {
    pub fn structured(server: impl Into<String>, config: TunnelConfig) -> Self {
        Self {
            server: server.into(),
            client_ip: None,
            source: ConfigSource::Structured(config),
        }
    }

    pub fn rendered(
        server: impl Into<String>,
        interface_name: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            server: server.into(),
            client_ip: None,
            source: ConfigSource::Rendered {
                interface_name: interface_name.into(),
                text: text.into(),
            },
        }
    }

    pub fn with_client_ip(mut self, ip: impl Into<String>) -> Self {
        self.client_ip = Some(ip.into());
        self
    }

    pub fn tunnel_name(&self) -> &str {
        match &self.source {
            ConfigSource::Structured(config) => &config.interface_name,
            ConfigSource::Rendered { interface_name, .. } => interface_name,
        }
    }
}

#[derive(Clone, PartialEq, Debug, Default)]
pub struct VerifyReport {
    pub connected: bool,
    pub interface: Option<String>,
    pub public_ip: Option<String>,
}

#[derive(Clone, PartialEq, Debug, Default, Serialize, Deserialize)]
pub struct TunnelStats {
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub latest_handshake: Option<String>,
}
