use crate::error::TunnelError;
use crate::models::{SecretKey, TunnelStats, VerifyReport};
use crate::services::command::{CommandError, CommandRunner, CommandSpec};
use crate::services::detector::ToolPaths;
use crate::services::provisioner::decode_key;
use async_trait::async_trait;
use base64::{prelude::BASE64_STANDARD, Engine};
use boringtun::x25519::{PublicKey, StaticSecret};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct WgInterface {
    pub name: String,
    pub public_key: Option<String>,
    pub listening_port: Option<u16>,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct WgPeer {
    pub public_key: String,
    pub endpoint: Option<String>,
    pub allowed_ips: Option<String>,
    pub latest_handshake: Option<String>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
}

#[derive(Clone, PartialEq, Eq, Debug, Default)]
pub struct WgShow {
    pub interface: Option<WgInterface>,
    pub peers: Vec<WgPeer>,
}

impl WgShow {
    pub fn is_up(&self) -> bool {
        self.interface.is_some() && !self.peers.is_empty()
    }
}

pub trait StatusParser: Send + Sync {
    fn parse(&self, output: &str) -> WgShow;
}

/// Reads the human-readable `wg show <name>` layout.
#[derive(Clone, Copy, Debug, Default)]
pub struct WgShowParser;

impl StatusParser for WgShowParser {
    fn parse(&self, output: &str) -> WgShow {
        let mut show = WgShow::default();
        let mut in_peer = false;

        for line in output.lines() {
            let Some((key, value)) = line.trim().split_once(':') else {
                continue;
            };
            let value = value.trim();
            match key.trim() {
                "interface" => {
                    show.interface = Some(WgInterface {
                        name: value.to_string(),
                        ..Default::default()
                    });
                    in_peer = false;
                }
                "peer" => {
                    show.peers.push(WgPeer {
                        public_key: value.to_string(),
                        ..Default::default()
                    });
                    in_peer = true;
                }
                "public key" if !in_peer => {
                    if let Some(iface) = show.interface.as_mut() {
                        iface.public_key = Some(value.to_string());
                    }
                }
                "listening port" if !in_peer => {
                    if let Some(iface) = show.interface.as_mut() {
                        iface.listening_port = value.parse().ok();
                    }
                }
                field if in_peer => {
                    let Some(peer) = show.peers.last_mut() else {
                        continue;
                    };
                    match field {
                        "endpoint" => peer.endpoint = Some(value.to_string()),
                        "allowed ips" => peer.allowed_ips = Some(value.to_string()),
                        "latest handshake" => peer.latest_handshake = Some(value.to_string()),
                        "transfer" => {
                            let (rx, tx) = parse_transfer(value);
                            peer.rx_bytes = rx;
                            peer.tx_bytes = tx;
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
        show
    }
}

/// `1.23 KiB received, 4.56 MiB sent` → (1259, 4781506)
fn parse_transfer(value: &str) -> (u64, u64) {
    let mut rx = 0;
    let mut tx = 0;
    for part in value.split(',') {
        let tokens: Vec<&str> = part.split_whitespace().collect();
        let [amount, unit, direction] = tokens[..] else {
            continue;
        };
        let Ok(amount) = amount.parse::<f64>() else {
            continue;
        };
        let scale: f64 = match unit {
            "B" => 1.0,
            "KiB" => 1024.0,
            "MiB" => 1024.0 * 1024.0,
            "GiB" => 1024.0 * 1024.0 * 1024.0,
            "TiB" => 1024.0 * 1024.0 * 1024.0 * 1024.0,
            _ => continue,
        };
        let bytes = (amount * scale).round() as u64;
        match direction {
            "received" => rx = bytes,
            "sent" => tx = bytes,
            _ => {}
        }
    }
    (rx, tx)
}

#[async_trait]
pub trait PublicIpProbe: Send + Sync {
    async fn public_ip(&self) -> Option<String>;
}

pub struct HttpIpProbe {
    client: reqwest::Client,
    url: String,
}

impl HttpIpProbe {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_default();
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl PublicIpProbe for HttpIpProbe {
    async fn public_ip(&self) -> Option<String> {
        let response = match self.client.get(&self.url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!("Public IP probe failed: {}", e);
                return None;
            }
        };
        match response.error_for_status() {
            Ok(r) => r
                .text()
                .await
                .ok()
                .map(|ip| ip.trim().to_string())
                .filter(|ip| !ip.is_empty()),
            Err(e) => {
                debug!("Public IP probe failed: {}", e);
                None
            }
        }
    }
}

pub fn derive_public_key(private_key: &SecretKey) -> Option<String> {
    let bytes = decode_key(private_key.expose())?;
    let secret = StaticSecret::from(bytes);
    let public = PublicKey::from(&secret);
    Some(BASE64_STANDARD.encode(public.as_bytes()))
}

pub struct StatusReporter {
    runner: Arc<dyn CommandRunner>,
    parser: Arc<dyn StatusParser>,
    ip_probe: Option<Arc<dyn PublicIpProbe>>,
    timeout: Duration,
    wg: Mutex<String>,
}

impl StatusReporter {
    pub fn new(runner: Arc<dyn CommandRunner>, timeout: Duration) -> Self {
        Self {
            runner,
            parser: Arc::new(WgShowParser),
            ip_probe: None,
            timeout,
            wg: Mutex::new(ToolPaths::default().wg),
        }
    }

    pub fn with_parser(mut self, parser: Arc<dyn StatusParser>) -> Self {
        self.parser = parser;
        self
    }

    pub fn with_ip_probe(mut self, probe: Arc<dyn PublicIpProbe>) -> Self {
        self.ip_probe = Some(probe);
        self
    }

    pub fn update_tools(&self, tools: &ToolPaths) {
        *self.wg.lock().unwrap_or_else(|e| e.into_inner()) = tools.wg.clone();
    }

    /// Runs `wg show <name>`. `Ok(None)` means the interface is not up or
    /// the query could not run at all.
    pub async fn query(&self, name: &str) -> Result<Option<WgShow>, TunnelError> {
        let wg = self.wg.lock().unwrap_or_else(|e| e.into_inner()).clone();
        let spec = CommandSpec::new(wg, ["show", name], self.timeout);
        match self.runner.run(&spec).await {
            Ok(output) if output.success => Ok(Some(self.parser.parse(&output.stdout))),
            Ok(output) => {
                debug!("{} reported: {}", spec.display(), output.diagnostic());
                Ok(None)
            }
            Err(CommandError::TimedOut { after, .. }) => Err(TunnelError::Timeout {
                what: spec.display(),
                after,
            }),
            Err(e) => {
                warn!("Status query failed: {}", e);
                Ok(None)
            }
        }
    }

    pub async fn verify(&self, name: &str) -> Result<VerifyReport, TunnelError> {
        self.verify_with_key(name, None).await
    }

    /// Connected means an interface section with at least one peer. When
    /// `expected_public_key` is given the interface key must match it.
    pub async fn verify_with_key(
        &self,
        name: &str,
        expected_public_key: Option<&str>,
    ) -> Result<VerifyReport, TunnelError> {
        let Some(show) = self.query(name).await? else {
            return Ok(VerifyReport::default());
        };
        if !show.is_up() {
            debug!("Interface {} has no active peer", name);
            return Ok(VerifyReport::default());
        }

        let interface = show.interface.as_ref().map(|i| i.name.clone());
        if let Some(expected) = expected_public_key {
            let actual = show.interface.as_ref().and_then(|i| i.public_key.as_deref());
            if actual.is_some_and(|key| key != expected) {
                warn!("Interface {} is running with a different key", name);
                return Ok(VerifyReport::default());
            }
        }

        let public_ip = match self.ip_probe {
            Some(ref probe) => probe.public_ip().await,
            None => None,
        };
        info!("Tunnel {} verified (public ip {:?})", name, public_ip);
        Ok(VerifyReport {
            connected: true,
            interface,
            public_ip,
        })
    }

    pub async fn stats(&self, name: &str) -> Result<TunnelStats, TunnelError> {
        let Some(show) = self.query(name).await? else {
            return Ok(TunnelStats::default());
        };
        Ok(TunnelStats {
            rx_bytes: show.peers.iter().map(|p| p.rx_bytes).sum(),
            tx_bytes: show.peers.iter().map(|p| p.tx_bytes).sum(),
            latest_handshake: show.peers.iter().find_map(|p| p.latest_handshake.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MULTI_PEER: &str = "interface: ghostswitch
  public key: HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=
  private key: (hidden)
  listening port: 51820

peer: xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=
  preshared key: (hidden)
  endpoint: 203.0.113.1:51820
  allowed ips: 0.0.0.0/0, ::/0
  latest handshake: 1 minute, 12 seconds ago
  transfer: 1.50 KiB received, 2.00 MiB sent
  persistent keepalive: every 25 seconds

peer: TrMvSoP4jYQlY6RIzBgbssQqY3vxI2Pi+y71lOWWXX0=
  endpoint: 198.51.100.9:51820
  allowed ips: 10.9.0.0/24
  transfer: 512 B received, 100 B sent
";

    #[test]
    fn test_parses_multi_peer_output() {
        let show = WgShowParser.parse(MULTI_PEER);
        let iface = show.interface.as_ref().unwrap();
        assert_eq!(iface.name, "ghostswitch");
        assert_eq!(
            iface.public_key.as_deref(),
            Some("HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=")
        );
        assert_eq!(iface.listening_port, Some(51820));

        assert_eq!(show.peers.len(), 2);
        assert_eq!(show.peers[0].endpoint.as_deref(), Some("203.0.113.1:51820"));
        assert_eq!(show.peers[0].rx_bytes, 1536);
        assert_eq!(show.peers[0].tx_bytes, 2 * 1024 * 1024);
        assert_eq!(
            show.peers[0].latest_handshake.as_deref(),
            Some("1 minute, 12 seconds ago")
        );
        assert_eq!(show.peers[1].allowed_ips.as_deref(), Some("10.9.0.0/24"));
        assert_eq!(show.peers[1].latest_handshake, None);
        assert_eq!(show.peers[1].rx_bytes, 512);
        assert!(show.is_up());
    }

    #[test]
    fn test_interface_without_peer_is_not_up() {
        let show = WgShowParser.parse(
            "interface: ghostswitch\n  public key: abc=\n  listening port: 40000\n",
        );
        assert!(show.interface.is_some());
        assert!(!show.is_up());
        assert!(!WgShowParser.parse("").is_up());
    }

    #[test]
    fn test_derive_public_key_matches_wg_pubkey() {
        let private = SecretKey::new("yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=");
        assert_eq!(
            derive_public_key(&private).as_deref(),
            Some("HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=")
        );
        assert_eq!(derive_public_key(&SecretKey::new("not-a-key")), None);
    }
}
