#![allow(dead_code)]

use async_trait::async_trait;
use ghostswitch::models::{ConnectionStatus, StatusEvent};
use ghostswitch::services::command::{CommandError, CommandOutput, CommandRunner, CommandSpec};
use ghostswitch::services::status::PublicIpProbe;
use ghostswitch::{ControllerSettings, EventSink};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

pub const PRIVATE_KEY: &str = "yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=";
pub const PUBLIC_KEY: &str = "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=";
pub const PEER_KEY: &str = "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=";
pub const WG_VERSION: &str = "wireguard-tools v1.0.20210914 - https://git.zx2c4.com/wireguard-tools/";

/// What the backend hands out after a successful config request.
pub fn backend_config() -> String {
    format!(
        "[Interface]\n\
         PrivateKey = {PRIVATE_KEY}\n\
         Address = 10.8.0.2/32\n\
         DNS = 1.1.1.1, 8.8.8.8\n\
         \n\
         [Peer]\n\
         PublicKey = {PEER_KEY}\n\
         PresharedKey = {PEER_KEY}\n\
         Endpoint = 203.0.113.1:51820\n\
         AllowedIPs = 0.0.0.0/0, ::/0\n\
         PersistentKeepalive = 25\n"
    )
}

pub fn wg_show_up() -> String {
    format!(
        "interface: ghostswitch\n  public key: {PUBLIC_KEY}\n  private key: (hidden)\n  listening port: 51820\n\n\
         peer: {PEER_KEY}\n  endpoint: 203.0.113.1:51820\n  allowed ips: 0.0.0.0/0, ::/0\n  \
         latest handshake: 3 seconds ago\n  transfer: 92 B received, 180 B sent\n"
    )
}

pub fn wg_show_without_peer() -> String {
    format!("interface: ghostswitch\n  public key: {PUBLIC_KEY}\n  listening port: 51820\n")
}

pub fn test_settings(dir: &Path) -> ControllerSettings {
    ControllerSettings {
        config_dir: Some(dir.join("configs")),
        log_dir: Some(dir.join("logs")),
        backoff_millis: 0,
        verify_attempts: 2,
        verify_interval_millis: 0,
        public_ip_probe: false,
        ..ControllerSettings::default()
    }
}

#[derive(Clone, Debug)]
pub enum Reply {
    Ok(String),
    Fail(i32, String),
    Timeout,
    Hang(Duration, String),
}

/// Scripted command runner. Rules match on a substring of the full command
/// line; the first matching rule answers. A rule with several replies hands
/// them out in order and then repeats the last one. Unmatched commands are
/// reported as not found.
#[derive(Default)]
pub struct FakeRunner {
    rules: Mutex<Vec<(String, VecDeque<Reply>)>>,
    calls: Mutex<Vec<String>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&self, needle: &str, reply: Reply) -> &Self {
        let mut rules = self.rules.lock().unwrap();
        match rules.iter_mut().find(|(n, _)| n == needle) {
            Some((_, replies)) => replies.push_back(reply),
            None => rules.push((needle.to_string(), VecDeque::from([reply]))),
        }
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(needle)).count()
    }
}

#[async_trait]
impl CommandRunner for FakeRunner {
    async fn run(&self, spec: &CommandSpec) -> Result<CommandOutput, CommandError> {
        let line = spec.display();
        self.calls.lock().unwrap().push(line.clone());

        let reply = {
            let mut rules = self.rules.lock().unwrap();
            rules
                .iter_mut()
                .find(|(needle, _)| line.contains(needle.as_str()))
                .and_then(|(_, replies)| {
                    if replies.len() > 1 {
                        replies.pop_front()
                    } else {
                        replies.front().cloned()
                    }
                })
        };

        match reply {
            None => Err(CommandError::NotFound(spec.program.clone())),
            Some(Reply::Ok(stdout)) => Ok(CommandOutput {
                code: Some(0),
                success: true,
                stdout,
                stderr: String::new(),
            }),
            Some(Reply::Fail(code, stderr)) => Ok(CommandOutput {
                code: Some(code),
                success: false,
                stdout: String::new(),
                stderr,
            }),
            Some(Reply::Timeout) => Err(CommandError::TimedOut {
                program: spec.program.clone(),
                after: spec.timeout,
            }),
            Some(Reply::Hang(delay, stdout)) => {
                tokio::time::sleep(delay).await;
                Ok(CommandOutput {
                    code: Some(0),
                    success: true,
                    stdout,
                    stderr: String::new(),
                })
            }
        }
    }
}

#[derive(Default)]
pub struct RecordingSink {
    events: Mutex<Vec<StatusEvent>>,
}

impl RecordingSink {
    pub fn events(&self) -> Vec<StatusEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn statuses(&self) -> Vec<ConnectionStatus> {
        self.events().iter().map(|e| e.status).collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: StatusEvent) {
        self.events.lock().unwrap().push(event);
    }
}

pub struct StaticIpProbe(pub Option<String>);

#[async_trait]
impl PublicIpProbe for StaticIpProbe {
    async fn public_ip(&self) -> Option<String> {
        self.0.clone()
    }
}
