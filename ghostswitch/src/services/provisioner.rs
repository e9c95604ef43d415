use crate::error::TunnelError;
use crate::models::{Platform, TunnelConfig};
use crate::storage::ControllerSettings;
use base64::{prelude::BASE64_STANDARD, Engine};
use std::fs;
use std::io::Write;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

const MAX_INTERFACE_NAME: usize = 15;

/// Owns the directory holding `<name>.conf` files. Nothing else in the
/// controller writes tunnel configs.
#[derive(Clone, Debug)]
pub struct ConfigProvisioner {
    dir: PathBuf,
}

impl ConfigProvisioner {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn from_settings(settings: &ControllerSettings, platform: Platform) -> Self {
        match settings.config_dir {
            Some(ref dir) => Self::new(dir),
            None => Self::new(default_config_dir(platform)),
        }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.conf", name))
    }

    /// Validates and writes the config, replacing any previous file for the
    /// same interface.
    pub fn provision(&self, config: &TunnelConfig) -> Result<PathBuf, TunnelError> {
        validate(config)?;

        fs::create_dir_all(&self.dir).map_err(|source| TunnelError::ConfigWrite {
            path: self.dir.clone(),
            source,
        })?;

        let target = self.path_for(&config.interface_name);
        let staging = self.dir.join(format!(".{}.conf.tmp", config.interface_name));

        write_private(&staging, config.render().as_bytes())
            .and_then(|_| fs::rename(&staging, &target))
            .map_err(|source| {
                let _ = fs::remove_file(&staging);
                TunnelError::ConfigWrite {
                    path: target.clone(),
                    source,
                }
            })?;

        info!("Provisioned tunnel config {:?}", target);
        Ok(target)
    }

    /// Removes every `*.conf` whose stem starts with `prefix`. Returns how
    /// many files were deleted.
    pub fn clear(&self, prefix: &str) -> usize {
        self.clear_except(prefix, &[])
    }

    /// Like [`ConfigProvisioner::clear`], but keeps the configs of the
    /// tunnels named in `keep`.
    pub fn clear_except(&self, prefix: &str, keep: &[String]) -> usize {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return 0,
            Err(e) => {
                warn!("Cannot list config directory {:?}: {}", self.dir, e);
                return 0;
            }
        };

        let mut removed = 0;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_conf = path.extension().is_some_and(|ext| ext == "conf");
            let matches = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| {
                    stem.starts_with(prefix) && !keep.iter().any(|name| name == stem)
                });
            if !(is_conf && matches) {
                continue;
            }
            match fs::remove_file(&path) {
                Ok(()) => {
                    debug!("Removed stale config {:?}", path);
                    removed += 1;
                }
                Err(e) => warn!("Failed to remove stale config {:?}: {}", path, e),
            }
        }
        removed
    }

    pub fn remove(&self, name: &str) -> bool {
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => true,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => false,
            Err(e) => {
                warn!("Failed to remove config {:?}: {}", path, e);
                false
            }
        }
    }
}

pub fn default_config_dir(platform: Platform) -> PathBuf {
    match platform {
        Platform::Windows => directories::BaseDirs::new()
            .map(|dirs| dirs.data_local_dir().to_path_buf())
            .unwrap_or_else(std::env::temp_dir)
            .join("GhostSwitch")
            .join("Configurations"),
        Platform::Linux | Platform::Macos => PathBuf::from("/etc/wireguard"),
    }
}

/// Writes into a freshly created file so the owner-only mode always applies,
/// even over a leftover staging file.
fn write_private(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e),
    }
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

pub fn validate(config: &TunnelConfig) -> Result<(), TunnelError> {
    validate_interface_name(&config.interface_name)?;
    validate_key("PrivateKey", config.private_key.expose())?;

    let addresses: Vec<&str> = config
        .address
        .split(',')
        .map(str::trim)
        .filter(|a| !a.is_empty())
        .collect();
    if addresses.is_empty() {
        return Err(TunnelError::InvalidConfig("Address is empty".to_string()));
    }
    for address in addresses {
        validate_cidr(address)?;
    }

    if config.peers.is_empty() {
        return Err(TunnelError::InvalidConfig(
            "at least one peer is required".to_string(),
        ));
    }
    for peer in &config.peers {
        validate_key("PublicKey", &peer.public_key)?;
        if let Some(ref psk) = peer.preshared_key {
            validate_key("PresharedKey", psk.expose())?;
        }
        if peer.endpoint.trim().is_empty() {
            return Err(TunnelError::InvalidConfig("peer Endpoint is empty".to_string()));
        }
        for allowed in peer.allowed_ips.split(',').map(str::trim) {
            validate_cidr(allowed)?;
        }
    }
    Ok(())
}

fn validate_interface_name(name: &str) -> Result<(), TunnelError> {
    let valid_chars = name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '=' | '+' | '.' | '-'));
    if name.is_empty() || name.len() > MAX_INTERFACE_NAME || !valid_chars {
        return Err(TunnelError::InvalidConfig(format!(
            "interface name {:?} must be 1 to {} characters of [A-Za-z0-9_=+.-]",
            name, MAX_INTERFACE_NAME
        )));
    }
    Ok(())
}

pub(crate) fn decode_key(value: &str) -> Option<[u8; 32]> {
    let bytes = BASE64_STANDARD.decode(value.trim()).ok()?;
    bytes.try_into().ok()
}

fn validate_key(field: &str, value: &str) -> Result<(), TunnelError> {
    decode_key(value).map(|_| ()).ok_or_else(|| {
        TunnelError::InvalidConfig(format!("{} is not a 32-byte base64 key", field))
    })
}

fn validate_cidr(value: &str) -> Result<(), TunnelError> {
    let invalid = || TunnelError::InvalidConfig(format!("{:?} is not a valid CIDR", value));
    let (ip, prefix) = match value.split_once('/') {
        Some((ip, prefix)) => (ip, Some(prefix)),
        None => (value, None),
    };
    let ip: IpAddr = ip.trim().parse().map_err(|_| invalid())?;
    if let Some(prefix) = prefix {
        let prefix: u8 = prefix.trim().parse().map_err(|_| invalid())?;
        let max = if ip.is_ipv4() { 32 } else { 128 };
        if prefix > max {
            return Err(invalid());
        }
    }
    Ok(())
}
