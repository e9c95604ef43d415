//! Privileged tool invocations and the ordered fallback chain of elevation
//! methods that runs them.

use crate::error::TunnelError;
use crate::models::{
    AttemptOutcome, InstallAttempt, Platform, PrivilegedAction, PrivilegedOutcome,
};
use crate::services::command::{CommandError, CommandRunner, CommandSpec};
use crate::services::detector::ToolPaths;
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

const LINUX_INSTALL_SCRIPT: &str = "if command -v apt-get >/dev/null 2>&1; then \
     apt-get update && apt-get install -y wireguard-tools; \
     elif command -v dnf >/dev/null 2>&1; then dnf install -y wireguard-tools; \
     elif command -v pacman >/dev/null 2>&1; then pacman -S --noconfirm wireguard-tools; \
     else echo 'no supported package manager found' >&2; exit 127; fi";

/// A base tool invocation before any elevation wrapper is applied.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
}

impl Invocation {
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

    fn shell_line(&self) -> String {
        std::iter::once(&self.program)
            .chain(self.args.iter())
            .map(|part| sh_quote(part))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Maps an action onto the platform's WireGuard tooling.
pub fn invocation_for(
    platform: Platform,
    action: &PrivilegedAction,
    tools: &ToolPaths,
) -> Invocation {
    match (platform, action) {
        (Platform::Windows, PrivilegedAction::StartTunnel { config_path, .. }) => Invocation::new(
            &tools.wireguard_exe,
            ["/installtunnelservice".to_string(), path_arg(config_path)],
        ),
        (Platform::Windows, PrivilegedAction::StopTunnel { name, .. }) => Invocation::new(
            &tools.wireguard_exe,
            ["/uninstalltunnelservice", name.as_str()],
        ),
        (Platform::Windows, PrivilegedAction::InstallTool { installer }) => match installer {
            Some(path) => Invocation::new(path_arg(path), Vec::<String>::new()),
            None => Invocation::new(
                "winget",
                [
                    "install",
                    "--id",
                    "WireGuard.WireGuard",
                    "-e",
                    "--silent",
                    "--accept-package-agreements",
                    "--accept-source-agreements",
                ],
            ),
        },
        (_, PrivilegedAction::StartTunnel { config_path, .. }) => {
            Invocation::new(&tools.wg_quick, ["up".to_string(), path_arg(config_path)])
        }
        (_, PrivilegedAction::StopTunnel { name, config_path }) => {
            let target = config_path
                .as_deref()
                .map(path_arg)
                .unwrap_or_else(|| name.clone());
            Invocation::new(&tools.wg_quick, ["down".to_string(), target])
        }
        (Platform::Macos, PrivilegedAction::InstallTool { .. }) => {
            Invocation::new("brew", ["install", "wireguard-tools"])
        }
        (_, PrivilegedAction::InstallTool { .. }) => {
            Invocation::new("sh", ["-c", LINUX_INSTALL_SCRIPT])
        }
    }
}

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

pub trait PrivilegeMethod: Send + Sync {
    fn id(&self) -> &str;
    fn wrap(&self, invocation: &Invocation, timeout: Duration) -> CommandSpec;
}

pub struct DirectMethod;

impl PrivilegeMethod for DirectMethod {
    fn id(&self) -> &str {
        "direct"
    }

    fn wrap(&self, invocation: &Invocation, timeout: Duration) -> CommandSpec {
        CommandSpec::new(&invocation.program, invocation.args.clone(), timeout)
    }
}

pub struct PkexecMethod;

impl PrivilegeMethod for PkexecMethod {
    fn id(&self) -> &str {
        "pkexec"
    }

    fn wrap(&self, invocation: &Invocation, timeout: Duration) -> CommandSpec {
        let args = std::iter::once(invocation.program.clone()).chain(invocation.args.clone());
        CommandSpec::new("pkexec", args, timeout)
    }
}

/// Non-interactive sudo: fails fast instead of waiting on a password prompt
/// nobody can answer.
pub struct SudoMethod;

impl PrivilegeMethod for SudoMethod {
    fn id(&self) -> &str {
        "sudo"
    }

    fn wrap(&self, invocation: &Invocation, timeout: Duration) -> CommandSpec {
        let args = ["-n".to_string(), invocation.program.clone()]
            .into_iter()
            .chain(invocation.args.clone());
        CommandSpec::new("sudo", args, timeout)
    }
}

pub struct OsascriptMethod;

impl PrivilegeMethod for OsascriptMethod {
    fn id(&self) -> &str {
        "osascript"
    }

    fn wrap(&self, invocation: &Invocation, timeout: Duration) -> CommandSpec {
        let script = format!(
            "do shell script \"{}\" with administrator privileges",
            applescript_escape(&invocation.shell_line())
        );
        CommandSpec::new("osascript", ["-e".to_string(), script], timeout)
    }
}

/// UAC prompt through `Start-Process -Verb RunAs`; the child's exit code is
/// passed through.
pub struct ElevatedMethod;

impl PrivilegeMethod for ElevatedMethod {
    fn id(&self) -> &str {
        "elevated"
    }

    fn wrap(&self, invocation: &Invocation, timeout: Duration) -> CommandSpec {
        let mut script = format!(
            "$p = Start-Process -FilePath {} -Verb RunAs -Wait -PassThru",
            ps_quote(&invocation.program)
        );
        if !invocation.args.is_empty() {
            let joined = invocation
                .args
                .iter()
                .map(|a| win_arg(a))
                .collect::<Vec<_>>()
                .join(" ");
            script.push_str(&format!(" -ArgumentList {}", ps_quote(&joined)));
        }
        script.push_str("; exit $p.ExitCode");
        powershell(script, timeout)
    }
}

/// Runs the tool from a PowerShell script that keeps a transcript in the log
/// directory, for diagnosing installs that fail without output.
pub struct ScriptedMethod {
    log_dir: PathBuf,
}

impl ScriptedMethod {
    pub fn new(log_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
        }
    }
}

impl PrivilegeMethod for ScriptedMethod {
    fn id(&self) -> &str {
        "scripted"
    }

    fn wrap(&self, invocation: &Invocation, timeout: Duration) -> CommandSpec {
        let transcript = self.log_dir.join("ghostswitch-privileged.log");
        let call = std::iter::once(&invocation.program)
            .chain(invocation.args.iter())
            .map(|a| ps_quote(a))
            .collect::<Vec<_>>()
            .join(" ");
        let script = format!(
            "New-Item -ItemType Directory -Force -Path {dir} | Out-Null; \
             Start-Transcript -Path {log} -Append | Out-Null; \
             & {call}; $code = $LASTEXITCODE; \
             Stop-Transcript | Out-Null; exit $code",
            dir = ps_quote(&self.log_dir.to_string_lossy()),
            log = ps_quote(&transcript.to_string_lossy()),
            call = call,
        );
        powershell(script, timeout)
    }
}

fn powershell(script: String, timeout: Duration) -> CommandSpec {
    CommandSpec::new(
        "powershell",
        [
            "-NoProfile".to_string(),
            "-NonInteractive".to_string(),
            "-ExecutionPolicy".to_string(),
            "Bypass".to_string(),
            "-Command".to_string(),
            script,
        ],
        timeout,
    )
}

pub fn methods_for(platform: Platform, log_dir: &Path) -> Vec<Arc<dyn PrivilegeMethod>> {
    match platform {
        Platform::Windows => vec![
            Arc::new(ElevatedMethod),
            Arc::new(DirectMethod),
            Arc::new(ScriptedMethod::new(log_dir)),
        ],
        Platform::Linux => vec![
            Arc::new(PkexecMethod),
            Arc::new(SudoMethod),
            Arc::new(DirectMethod),
        ],
        Platform::Macos => vec![
            Arc::new(OsascriptMethod),
            Arc::new(SudoMethod),
            Arc::new(DirectMethod),
        ],
    }
}

pub struct PrivilegeChain {
    platform: Platform,
    methods: Vec<Arc<dyn PrivilegeMethod>>,
    runner: Arc<dyn CommandRunner>,
    backoff: Duration,
    tools: Mutex<ToolPaths>,
}

impl PrivilegeChain {
    pub fn new(
        platform: Platform,
        runner: Arc<dyn CommandRunner>,
        log_dir: &Path,
        backoff: Duration,
    ) -> Self {
        Self {
            platform,
            methods: methods_for(platform, log_dir),
            runner,
            backoff,
            tools: Mutex::new(ToolPaths::default()),
        }
    }

    pub fn with_methods(mut self, methods: Vec<Arc<dyn PrivilegeMethod>>) -> Self {
        self.methods = methods;
        self
    }

    /// Points tunnel actions at the binaries found by the last detection.
    pub fn update_tools(&self, tools: ToolPaths) {
        *self.tools.lock().unwrap_or_else(|e| e.into_inner()) = tools;
    }

    /// Tries each method in order until one exits successfully. The first
    /// success ends the chain; later methods are never started.
    pub async fn run(
        &self,
        action: &PrivilegedAction,
        timeout: Duration,
    ) -> Result<PrivilegedOutcome, TunnelError> {
        let kind = action.kind();
        let invocation = {
            let tools = self.tools.lock().unwrap_or_else(|e| e.into_inner());
            invocation_for(self.platform, action, &tools)
        };
        let mut attempts: Vec<InstallAttempt> = Vec::new();

        for (idx, method) in self.methods.iter().enumerate() {
            if idx > 0 && !self.backoff.is_zero() {
                tokio::time::sleep(self.backoff).await;
            }

            let spec = method.wrap(&invocation, timeout);
            info!("{}: trying method {}", kind, method.id());
            let started_at = Utc::now();
            let (outcome, diagnostic) = match self.runner.run(&spec).await {
                Ok(output) if output.success => (AttemptOutcome::Success, String::new()),
                Ok(output) => (AttemptOutcome::Failure, output.diagnostic()),
                Err(e @ CommandError::TimedOut { .. }) => (AttemptOutcome::Timeout, e.to_string()),
                Err(e) => (AttemptOutcome::Failure, e.to_string()),
            };

            let succeeded = outcome == AttemptOutcome::Success;
            if succeeded {
                info!("{}: method {} succeeded", kind, method.id());
            } else {
                warn!("{}: method {} failed: {}", kind, method.id(), diagnostic);
            }
            attempts.push(InstallAttempt {
                method_id: method.id().to_string(),
                started_at,
                outcome,
                diagnostic,
            });

            if succeeded {
                let earlier = summarize(&attempts[..attempts.len() - 1]);
                let diagnostic = if earlier.is_empty() {
                    format!("succeeded via {}", method.id())
                } else {
                    format!("succeeded via {} after {}", method.id(), earlier)
                };
                return Ok(PrivilegedOutcome {
                    method_id: method.id().to_string(),
                    attempts,
                    diagnostic,
                });
            }
        }

        let diagnostic = if attempts.is_empty() {
            "no privilege methods available".to_string()
        } else {
            summarize(&attempts)
        };
        Err(TunnelError::PrivilegedActionFailed {
            action: kind,
            diagnostic,
        })
    }
}

fn summarize(attempts: &[InstallAttempt]) -> String {
    attempts
        .iter()
        .map(|a| format!("{}: {}", a.method_id, a.diagnostic))
        .collect::<Vec<_>>()
        .join("; ")
}

fn sh_quote(value: &str) -> String {
    let safe = !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "_-./:=@+,%".contains(c));
    if safe {
        value.to_string()
    } else {
        format!("'{}'", value.replace('\'', "'\\''"))
    }
}

fn ps_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

fn win_arg(value: &str) -> String {
    if value.is_empty() || value.contains([' ', '\t', '"']) {
        format!("\"{}\"", value.replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

fn applescript_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start(path: &str) -> PrivilegedAction {
        PrivilegedAction::StartTunnel {
            name: "ghostswitch".to_string(),
            config_path: PathBuf::from(path),
        }
    }

    #[test]
    fn test_tool_table_per_platform() {
        let tools = ToolPaths::default();

        let linux = invocation_for(Platform::Linux, &start("/etc/wireguard/gs.conf"), &tools);
        assert_eq!(
            linux,
            Invocation::new("wg-quick", ["up", "/etc/wireguard/gs.conf"])
        );

        let stop = PrivilegedAction::StopTunnel {
            name: "gs".to_string(),
            config_path: None,
        };
        assert_eq!(
            invocation_for(Platform::Macos, &stop, &tools),
            Invocation::new("wg-quick", ["down", "gs"])
        );
        assert_eq!(
            invocation_for(Platform::Windows, &stop, &tools),
            Invocation::new("wireguard.exe", ["/uninstalltunnelservice", "gs"])
        );

        let windows = invocation_for(Platform::Windows, &start(r"C:\conf\gs.conf"), &tools);
        assert_eq!(windows.args[0], "/installtunnelservice");

        let install = PrivilegedAction::InstallTool { installer: None };
        assert_eq!(invocation_for(Platform::Macos, &install, &tools).program, "brew");
        assert_eq!(invocation_for(Platform::Windows, &install, &tools).program, "winget");
    }

    #[test]
    fn test_method_order_per_platform() {
        let ids = |p| {
            methods_for(p, Path::new("/tmp"))
                .iter()
                .map(|m| m.id().to_string())
                .collect::<Vec<_>>()
        };
        assert_eq!(ids(Platform::Linux), ["pkexec", "sudo", "direct"]);
        assert_eq!(ids(Platform::Macos), ["osascript", "sudo", "direct"]);
        assert_eq!(ids(Platform::Windows), ["elevated", "direct", "scripted"]);
    }

    #[test]
    fn test_wrappers_build_expected_commands() {
        let invocation = Invocation::new("wg-quick", ["up", "/etc/wireguard/my tunnel.conf"]);
        let timeout = Duration::from_secs(30);

        let sudo = SudoMethod.wrap(&invocation, timeout);
        assert_eq!(sudo.program, "sudo");
        assert_eq!(sudo.args[..2], ["-n", "wg-quick"]);
        assert_eq!(sudo.timeout, timeout);

        let osa = OsascriptMethod.wrap(&invocation, timeout);
        assert_eq!(
            osa.args[1],
            "do shell script \"wg-quick up '/etc/wireguard/my tunnel.conf'\" with administrator privileges"
        );

        let win = Invocation::new(
            r"C:\Program Files\WireGuard\wireguard.exe",
            ["/installtunnelservice", r"C:\it's\gs.conf"],
        );
        let elevated = ElevatedMethod.wrap(&win, timeout);
        let script = elevated.args.last().unwrap();
        assert!(script.contains("-Verb RunAs -Wait -PassThru"));
        assert!(script.contains(r"C:\it''s\gs.conf"));
        assert!(script.ends_with("exit $p.ExitCode"));

        let scripted = ScriptedMethod::new("/var/log/gs").wrap(&win, timeout);
        assert!(scripted.args.last().unwrap().contains("Start-Transcript"));
    }
}
