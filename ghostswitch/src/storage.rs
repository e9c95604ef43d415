use directories::ProjectDirs;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{error, info};

const SETTINGS_FILENAME: &str = "ghostswitch_settings.json";
const SETTINGS_PATH_ENV: &str = "GHOSTSWITCH_CONFIG_PATH";
const IP_PROBE_URL_ENV: &str = "GHOSTSWITCH_IP_PROBE_URL";

pub const DEFAULT_TUNNEL_NAME: &str = "ghostswitch";
pub const DEFAULT_IP_PROBE_URL: &str = "https://api.ipify.org";
pub const DEFAULT_INSTALLER_URL: &str = crate::models::WINDOWS_INSTALLER_URL;

static SETTINGS_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

#[derive(Serialize, Deserialize, PartialEq, Clone, Debug)]
#[serde(default)]
pub struct ControllerSettings {
    pub tunnel_name: String,
    pub config_dir: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
    pub probe_timeout_secs: u64,
    pub action_timeout_secs: u64,
    pub install_timeout_secs: u64,
    pub backoff_millis: u64,
    pub verify_attempts: u32,
    pub verify_interval_millis: u64,
    pub public_ip_probe: bool,
    pub public_ip_url: String,
    pub installer_url: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            tunnel_name: DEFAULT_TUNNEL_NAME.to_string(),
            config_dir: None,
            log_dir: None,
            probe_timeout_secs: 5,
            action_timeout_secs: 30,
            install_timeout_secs: 180,
            backoff_millis: 1000,
            verify_attempts: 3,
            verify_interval_millis: 1000,
            public_ip_probe: true,
            public_ip_url: DEFAULT_IP_PROBE_URL.to_string(),
            installer_url: DEFAULT_INSTALLER_URL.to_string(),
        }
    }
}

impl ControllerSettings {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn action_timeout(&self) -> Duration {
        Duration::from_secs(self.action_timeout_secs)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_secs)
    }

    pub fn backoff(&self) -> Duration {
        Duration::from_millis(self.backoff_millis)
    }

    pub fn verify_interval(&self) -> Duration {
        Duration::from_millis(self.verify_interval_millis)
    }

    /// Where the scripted elevation method writes its transcript.
    pub fn resolved_log_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.log_dir {
            return dir.clone();
        }
        project_dirs()
            .map(|dirs| dirs.data_local_dir().join("logs"))
            .unwrap_or_else(std::env::temp_dir)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var(IP_PROBE_URL_ENV) {
            if !url.trim().is_empty() {
                self.public_ip_url = url;
            }
        }
    }
}

pub(crate) fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("com", "ghostswitch", "GhostSwitch")
}

pub fn get_settings_path() -> PathBuf {
    if let Ok(path) = std::env::var(SETTINGS_PATH_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Some(proj_dirs) = project_dirs() {
        let config_dir = proj_dirs.config_dir();
        if !config_dir.exists() {
            let _ = fs::create_dir_all(config_dir);
        }
        return config_dir.join(SETTINGS_FILENAME);
    }

    std::env::current_dir()
        .unwrap_or_default()
        .join(SETTINGS_FILENAME)
}

fn load_settings_inner() -> ControllerSettings {
    let path = get_settings_path();
    let mut settings = match fs::read_to_string(&path) {
        Ok(contents) => match serde_json::from_str::<ControllerSettings>(&contents) {
            Ok(settings) => settings,
            Err(e) => {
                error!("Failed to parse settings at {:?}: {}", path, e);
                ControllerSettings::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No settings file at {:?}; using defaults.", path);
            ControllerSettings::default()
        }
        Err(e) => {
            error!("Failed to read settings at {:?}: {}", path, e);
            ControllerSettings::default()
        }
    };

    settings.apply_env_overrides();
    settings
}

pub fn load_settings() -> ControllerSettings {
    let _guard = SETTINGS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    load_settings_inner()
}

pub fn save_settings(settings: &ControllerSettings) -> Result<(), crate::error::TunnelError> {
    let _guard = SETTINGS_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    let path = get_settings_path();
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings)?;
    fs::write(&path, json)?;
    Ok(())
}
