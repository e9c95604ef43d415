use crate::error::TunnelError;
use crate::models::{InstallReport, Platform, PrivilegedAction, PrivilegedActionKind, Remediation};
use crate::services::detector::Detector;
use crate::services::privilege::PrivilegeChain;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const ARTIFACT_NAME: &str = "ghostswitch-wireguard-installer.exe";

#[async_trait]
pub trait ArtifactFetcher: Send + Sync {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), TunnelError>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

#[async_trait]
impl ArtifactFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, dest: &Path) -> Result<(), TunnelError> {
        info!("Downloading installer from {}", url);
        let response = self
            .client
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| TunnelError::Download(e.to_string()))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| TunnelError::Download(e.to_string()))?;
        tokio::fs::write(dest, &bytes).await?;
        Ok(())
    }
}

/// Installs the WireGuard tools through the privilege chain and confirms the
/// result by detecting again.
pub struct Installer {
    platform: Platform,
    chain: Arc<PrivilegeChain>,
    detector: Arc<Detector>,
    fetcher: Arc<dyn ArtifactFetcher>,
    installer_url: String,
    timeout: Duration,
    staging_dir: PathBuf,
}

impl Installer {
    pub fn new(
        platform: Platform,
        chain: Arc<PrivilegeChain>,
        detector: Arc<Detector>,
        fetcher: Arc<dyn ArtifactFetcher>,
        installer_url: impl Into<String>,
        timeout: Duration,
    ) -> Self {
        Self {
            platform,
            chain,
            detector,
            fetcher,
            installer_url: installer_url.into(),
            timeout,
            staging_dir: std::env::temp_dir(),
        }
    }

    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = dir.into();
        self
    }

    pub async fn install(&self) -> Result<InstallReport, TunnelError> {
        let artifact = match self.platform {
            Platform::Windows => Some(self.download().await?),
            Platform::Linux | Platform::Macos => None,
        };

        let result = self
            .chain
            .run(
                &PrivilegedAction::InstallTool {
                    installer: artifact.clone(),
                },
                self.timeout,
            )
            .await;

        if let Some(ref path) = artifact {
            discard(path);
        }

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(TunnelError::PrivilegedActionFailed { action, diagnostic }) => {
                return Err(TunnelError::PrivilegedActionFailed {
                    action,
                    diagnostic: self.with_remediation(diagnostic),
                })
            }
            Err(e) => return Err(e),
        };

        let toolchain = self.detector.detect().await;
        if !toolchain.installed {
            warn!("Install reported success but WireGuard is still missing");
            return Err(TunnelError::PrivilegedActionFailed {
                action: PrivilegedActionKind::InstallTool,
                diagnostic: self.with_remediation(format!(
                    "{}; WireGuard still not detected afterwards",
                    outcome.diagnostic
                )),
            });
        }

        info!("WireGuard installed via {}", outcome.method_id);
        Ok(InstallReport {
            attempts: outcome.attempts,
            toolchain,
        })
    }

    async fn download(&self) -> Result<PathBuf, TunnelError> {
        tokio::fs::create_dir_all(&self.staging_dir).await?;
        let dest = self.staging_dir.join(ARTIFACT_NAME);
        if let Err(e) = self.fetcher.fetch(&self.installer_url, &dest).await {
            discard(&dest);
            return Err(TunnelError::PrivilegedActionFailed {
                action: PrivilegedActionKind::InstallTool,
                diagnostic: self.with_remediation(e.to_string()),
            });
        }
        Ok(dest)
    }

    fn with_remediation(&self, diagnostic: String) -> String {
        format!(
            "{}\n{}",
            diagnostic,
            Remediation::for_platform(self.platform).instructions()
        )
    }
}

fn discard(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => info!("Removed installer artifact {:?}", path),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to remove installer artifact {:?}: {}", path, e),
    }
}
