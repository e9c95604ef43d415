use crate::models::{Platform, ToolchainInfo};
use crate::services::command::{CommandRunner, CommandSpec};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Probe {
    pub program: String,
    pub args: Vec<String>,
}

impl Probe {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    fn version(program: impl Into<String>) -> Self {
        Self::new(program, ["--version"])
    }
}

/// Ordered places where a WireGuard install usually lives.
pub fn probe_table(platform: Platform) -> Vec<Probe> {
    match platform {
        Platform::Windows => {
            let mut probes = vec![
                Probe::version(r"C:\Program Files\WireGuard\wg.exe"),
                Probe::version(r"C:\Program Files (x86)\WireGuard\wg.exe"),
            ];
            if let Ok(local) = std::env::var("LOCALAPPDATA") {
                let path = Path::new(&local).join("WireGuard").join("wg.exe");
                probes.push(Probe::version(path.to_string_lossy()));
            }
            probes.push(Probe::version("wg"));
            probes
        }
        Platform::Linux => vec![
            Probe::version("wg"),
            Probe::version("/usr/bin/wg"),
            Probe::version("/usr/local/bin/wg"),
        ],
        Platform::Macos => vec![
            Probe::version("wg"),
            Probe::version("/opt/homebrew/bin/wg"),
            Probe::version("/usr/local/bin/wg"),
        ],
    }
}

pub struct Detector {
    platform: Platform,
    probes: Vec<Probe>,
    runner: Arc<dyn CommandRunner>,
    timeout: Duration,
}

impl Detector {
    pub fn new(platform: Platform, runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            platform,
            probes: probe_table(platform),
            runner,
            timeout,
        }
    }

    pub fn with_probes(mut self, probes: Vec<Probe>) -> Self {
        self.probes = probes;
        self
    }

    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Runs the probes in order and stops at the first one that reports a
    /// version. A probe that errors, hangs or prints no version is a miss.
    pub async fn detect(&self) -> ToolchainInfo {
        for probe in &self.probes {
            let spec = CommandSpec::new(&probe.program, probe.args.clone(), self.timeout);
            match self.runner.run(&spec).await {
                Ok(output) if output.success => {
                    let version =
                        parse_version(&output.stdout).or_else(|| parse_version(&output.stderr));
                    if let Some(version) = version {
                        let path = resolve_program(&probe.program);
                        info!("WireGuard {} found at {}", version, path);
                        return ToolchainInfo::found(self.platform, version, path);
                    }
                    debug!("Probe {} printed no version", spec.display());
                }
                Ok(output) => debug!("Probe {} failed: {}", spec.display(), output.diagnostic()),
                Err(e) => debug!("Probe {} failed: {}", spec.display(), e),
            }
        }

        warn!("WireGuard tools not detected on {}", self.platform);
        ToolchainInfo::missing(self.platform)
    }
}

/// Extracts `1.0.20210914` from `wireguard-tools v1.0.20210914 - https://...`.
pub fn parse_version(text: &str) -> Option<String> {
    text.split_whitespace().find_map(|token| {
        let candidate = token.strip_prefix('v').unwrap_or(token);
        let looks_like_version = candidate.contains('.')
            && candidate.starts_with(|c: char| c.is_ascii_digit())
            && candidate.chars().all(|c| c.is_ascii_digit() || c == '.');
        looks_like_version.then(|| candidate.to_string())
    })
}

fn resolve_program(program: &str) -> String {
    if program.contains('/') || program.contains('\\') {
        return program.to_string();
    }
    let Some(paths) = std::env::var_os("PATH") else {
        return program.to_string();
    };
    let names: Vec<String> = if cfg!(windows) {
        vec![format!("{}.exe", program), program.to_string()]
    } else {
        vec![program.to_string()]
    };
    std::env::split_paths(&paths)
        .flat_map(|dir| names.iter().map(move |name| dir.join(name)))
        .find(|candidate| candidate.is_file())
        .map(|found| found.to_string_lossy().into_owned())
        .unwrap_or_else(|| program.to_string())
}

/// Binaries the privilege chain drives, located next to the detected `wg`.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct ToolPaths {
    pub wg: String,
    pub wg_quick: String,
    pub wireguard_exe: String,
}

impl ToolPaths {
    pub fn from_toolchain(info: &ToolchainInfo) -> Self {
        let wg = info.path.clone().unwrap_or_else(|| "wg".to_string());
        let sibling = |name: &str| -> String {
            match Path::new(&wg).parent() {
                Some(dir) if !dir.as_os_str().is_empty() => {
                    dir.join(name).to_string_lossy().into_owned()
                }
                _ => name.to_string(),
            }
        };
        Self {
            wg_quick: sibling("wg-quick"),
            wireguard_exe: sibling("wireguard.exe"),
            wg,
        }
    }

    pub fn defaults() -> Self {
        Self {
            wg: "wg".to_string(),
            wg_quick: "wg-quick".to_string(),
            wireguard_exe: "wireguard.exe".to_string(),
        }
    }
}

impl Default for ToolPaths {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version_from_wg_output() {
        assert_eq!(
            parse_version("wireguard-tools v1.0.20210914 - https://git.zx2c4.com/wireguard-tools/"),
            Some("1.0.20210914".to_string())
        );
        assert_eq!(parse_version("wg 1.0.20200513"), Some("1.0.20200513".to_string()));
        assert_eq!(parse_version("Usage: wg <cmd> [<args>]"), None);
        assert_eq!(parse_version(""), None);
    }

    #[test]
    fn test_probe_tables_cover_known_locations() {
        let linux = probe_table(Platform::Linux);
        assert_eq!(linux[0], Probe::new("wg", ["--version"]));
        assert!(linux.iter().any(|p| p.program == "/usr/local/bin/wg"));

        let windows = probe_table(Platform::Windows);
        assert_eq!(windows[0].program, r"C:\Program Files\WireGuard\wg.exe");
        assert_eq!(windows.last().map(|p| p.program.as_str()), Some("wg"));

        let macos = probe_table(Platform::Macos);
        assert!(macos.iter().any(|p| p.program == "/opt/homebrew/bin/wg"));
    }

    #[test]
    fn test_tool_paths_follow_detected_wg() {
        let info = ToolchainInfo::found(
            Platform::Linux,
            "1.0.20210914".to_string(),
            "/usr/local/bin/wg".to_string(),
        );
        let tools = ToolPaths::from_toolchain(&info);
        assert_eq!(tools.wg_quick, "/usr/local/bin/wg-quick");

        let bare = ToolchainInfo::found(Platform::Linux, "1.0".to_string(), "wg".to_string());
        assert_eq!(ToolPaths::from_toolchain(&bare).wg_quick, "wg-quick");
    }
}
