use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

mod wire;

pub use wire::ParseError;

pub const WINDOWS_INSTALLER_URL: &str =
    "https://download.wireguard.com/windows-client/wireguard-installer.exe";

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Windows,
    Macos,
    Linux,
}

impl Platform {
    pub fn current() -> Self {
        if cfg!(target_os = "windows") {
            Platform::Windows
        } else if cfg!(target_os = "macos") {
            Platform::Macos
        } else {
            Platform::Linux
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Windows => "windows",
            Platform::Macos => "macos",
            Platform::Linux => "linux",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manual-install fallback shown when the toolchain is missing or an
/// automated install gave up.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Remediation {
    pub download_url: String,
    pub steps: Vec<String>,
}

impl Remediation {
    pub fn for_platform(platform: Platform) -> Self {
        match platform {
            Platform::Windows => Self {
                download_url: WINDOWS_INSTALLER_URL.to_string(),
                steps: vec![
                    "Download the WireGuard installer from the link above.".to_string(),
                    "Run wireguard-installer.exe and accept the administrator prompt.".to_string(),
                    "Restart GhostSwitch once the installation has finished.".to_string(),
                ],
            },
            Platform::Linux => Self {
                download_url: "https://www.wireguard.com/install/".to_string(),
                steps: vec![
                    "Debian/Ubuntu: sudo apt-get install -y wireguard-tools".to_string(),
                    "Fedora: sudo dnf install -y wireguard-tools".to_string(),
                    "Arch: sudo pacman -S --noconfirm wireguard-tools".to_string(),
                    "Restart GhostSwitch and make sure `wg --version` works.".to_string(),
                ],
            },
            Platform::Macos => Self {
                download_url: "https://www.wireguard.com/install/".to_string(),
                steps: vec![
                    "Install Homebrew from https://brew.sh if it is missing.".to_string(),
                    "Run: brew install wireguard-tools".to_string(),
                    "Restart GhostSwitch and make sure `wg --version` works.".to_string(),
                ],
            },
        }
    }

    pub fn instructions(&self) -> String {
        let mut out = format!("Install WireGuard manually from {}", self.download_url);
        for (i, step) in self.steps.iter().enumerate() {
            out.push_str(&format!("\n  {}. {}", i + 1, step));
        }
        out
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolchainInfo {
    pub installed: bool,
    pub version: Option<String>,
    pub path: Option<String>,
    pub platform: Platform,
    pub remediation: Option<Remediation>,
}

impl ToolchainInfo {
    pub fn found(platform: Platform, version: String, path: String) -> Self {
        Self {
            installed: true,
            version: Some(version),
            path: Some(path),
            platform,
            remediation: None,
        }
    }

    pub fn missing(platform: Platform) -> Self {
        Self {
            installed: false,
            version: None,
            path: None,
            platform,
            remediation: Some(Remediation::for_platform(platform)),
        }
    }
}

/// Base64 key material that must never end up in logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecretKey(String);

impl SecretKey {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SecretKey(<redacted>)")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerConfig {
    pub public_key: String,
    #[serde(default)]
    pub preshared_key: Option<SecretKey>,
    pub endpoint: String,
    pub allowed_ips: String,
    #[serde(default)]
    pub persistent_keepalive: Option<u16>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TunnelConfig {
    pub interface_name: String,
    pub private_key: SecretKey,
    pub address: String,
    #[serde(default)]
    pub dns: Option<String>,
    #[serde(default)]
    pub mtu: Option<u16>,
    pub peers: Vec<PeerConfig>,
}

impl TunnelConfig {
    /// Renders the `[Interface]` / `[Peer]` text consumed by `wg-quick` and
    /// `wireguard.exe`.
    pub fn render(&self) -> String {
        wire::render(self)
    }

    pub fn parse(interface_name: &str, text: &str) -> Result<Self, ParseError> {
        wire::parse(interface_name, text)
    }

    /// Host part of the first `Address` entry.
    pub fn client_ip(&self) -> Option<String> {
        self.address
            .split(',')
            .map(|a| a.trim())
            .find(|a| !a.is_empty())
            .map(|a| a.split('/').next().unwrap_or(a).to_string())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Disconnecting,
    Error,
}

/// Payload pushed to the GUI whenever the tunnel state changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusEvent {
    pub status: ConnectionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    #[serde(
        rename = "publicIP",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub public_ip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interface: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl StatusEvent {
    pub fn new(status: ConnectionStatus) -> Self {
        Self {
            status,
            server: None,
            ip: None,
            public_ip: None,
            interface: None,
            message: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn with_ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    pub fn with_public_ip(mut self, public_ip: Option<String>) -> Self {
        self.public_ip = public_ip;
        self
    }

    pub fn with_interface(mut self, interface: impl Into<String>) -> Self {
        self.interface = Some(interface.into());
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests;
