//! The INI-like tunnel file understood by `wg-quick` and the Windows
//! tunnel service. Section order, key names and casing on output must match
//! what those tools parse.

use crate::{PeerConfig, SecretKey, TunnelConfig};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("line {line}: {message}")]
    Syntax { line: usize, message: String },

    #[error("unknown section [{0}]")]
    UnknownSection(String),

    #[error("missing {key} in [{section}]")]
    MissingKey {
        section: &'static str,
        key: &'static str,
    },

    #[error("configuration has no [Interface] section")]
    NoInterface,

    #[error("configuration has no [Peer] section")]
    NoPeers,
}

pub(crate) fn render(config: &TunnelConfig) -> String {
    let mut out = String::from("[Interface]\n");
    out.push_str(&format!("PrivateKey = {}\n", config.private_key.expose()));
    out.push_str(&format!("Address = {}\n", config.address));
    if let Some(dns) = config.dns.as_deref().filter(|d| !d.trim().is_empty()) {
        out.push_str(&format!("DNS = {}\n", dns));
    }
    if let Some(mtu) = config.mtu {
        out.push_str(&format!("MTU = {}\n", mtu));
    }

    for peer in &config.peers {
        out.push_str("\n[Peer]\n");
        out.push_str(&format!("PublicKey = {}\n", peer.public_key));
        if let Some(ref psk) = peer.preshared_key {
            out.push_str(&format!("PresharedKey = {}\n", psk.expose()));
        }
        out.push_str(&format!("Endpoint = {}\n", peer.endpoint));
        out.push_str(&format!("AllowedIPs = {}\n", peer.allowed_ips));
        if let Some(keepalive) = peer.persistent_keepalive.filter(|k| *k > 0) {
            out.push_str(&format!("PersistentKeepalive = {}\n", keepalive));
        }
    }

    out
}

#[derive(Default)]
struct InterfaceDraft {
    private_key: Option<String>,
    address: Option<String>,
    dns: Option<String>,
    mtu: Option<u16>,
}

#[derive(Default)]
struct PeerDraft {
    public_key: Option<String>,
    preshared_key: Option<String>,
    endpoint: Option<String>,
    allowed_ips: Option<String>,
    persistent_keepalive: Option<u16>,
}

impl PeerDraft {
    fn finish(self) -> Result<PeerConfig, ParseError> {
        Ok(PeerConfig {
            public_key: self.public_key.ok_or(ParseError::MissingKey {
                section: "Peer",
                key: "PublicKey",
            })?,
            preshared_key: self.preshared_key.map(SecretKey::new),
            endpoint: self.endpoint.ok_or(ParseError::MissingKey {
                section: "Peer",
                key: "Endpoint",
            })?,
            allowed_ips: self.allowed_ips.ok_or(ParseError::MissingKey {
                section: "Peer",
                key: "AllowedIPs",
            })?,
            persistent_keepalive: self.persistent_keepalive,
        })
    }
}

enum Section {
    None,
    Interface,
    Peer,
}

pub(crate) fn parse(interface_name: &str, text: &str) -> Result<TunnelConfig, ParseError> {
    let mut section = Section::None;
    let mut interface: Option<InterfaceDraft> = None;
    let mut peers: Vec<PeerDraft> = Vec::new();

    for (idx, raw) in text.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw.split(['#', ';']).next().unwrap_or("").trim();
        if line.is_empty() {
            continue;
        }

        if let Some(name) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
            match name.trim().to_ascii_lowercase().as_str() {
                "interface" => {
                    if interface.is_some() {
                        return Err(ParseError::Syntax {
                            line: line_no,
                            message: "duplicate [Interface] section".to_string(),
                        });
                    }
                    interface = Some(InterfaceDraft::default());
                    section = Section::Interface;
                }
                "peer" => {
                    peers.push(PeerDraft::default());
                    section = Section::Peer;
                }
                other => return Err(ParseError::UnknownSection(other.to_string())),
            }
            continue;
        }

        let Some((key, value)) = line.split_once('=') else {
            return Err(ParseError::Syntax {
                line: line_no,
                message: format!("expected `Key = Value`, found `{}`", line),
            });
        };
        let key = key.trim().to_ascii_lowercase();
        let value = value.trim().to_string();

        match section {
            Section::None => {
                return Err(ParseError::Syntax {
                    line: line_no,
                    message: "key outside of any section".to_string(),
                })
            }
            Section::Interface => {
                let Some(draft) = interface.as_mut() else {
                    return Err(ParseError::NoInterface);
                };
                match key.as_str() {
                    "privatekey" => draft.private_key = Some(value),
                    "address" => draft.address = Some(value),
                    "dns" => draft.dns = Some(value),
                    "mtu" => draft.mtu = Some(parse_number(line_no, "MTU", &value)?),
                    _ => return Err(unsupported(line_no, &key, "Interface")),
                }
            }
            Section::Peer => {
                let Some(draft) = peers.last_mut() else {
                    return Err(ParseError::NoPeers);
                };
                match key.as_str() {
                    "publickey" => draft.public_key = Some(value),
                    "presharedkey" => draft.preshared_key = Some(value),
                    "endpoint" => draft.endpoint = Some(value),
                    "allowedips" => draft.allowed_ips = Some(value),
                    "persistentkeepalive" => {
                        draft.persistent_keepalive = if value.eq_ignore_ascii_case("off") {
                            None
                        } else {
                            Some(parse_number(line_no, "PersistentKeepalive", &value)?)
                        }
                    }
                    _ => return Err(unsupported(line_no, &key, "Peer")),
                }
            }
        }
    }

    let interface = interface.ok_or(ParseError::NoInterface)?;
    if peers.is_empty() {
        return Err(ParseError::NoPeers);
    }

    Ok(TunnelConfig {
        interface_name: interface_name.to_string(),
        private_key: SecretKey::new(interface.private_key.ok_or(ParseError::MissingKey {
            section: "Interface",
            key: "PrivateKey",
        })?),
        address: interface.address.ok_or(ParseError::MissingKey {
            section: "Interface",
            key: "Address",
        })?,
        dns: interface.dns,
        mtu: interface.mtu,
        peers: peers
            .into_iter()
            .map(PeerDraft::finish)
            .collect::<Result<Vec<_>, _>>()?,
    })
}

fn parse_number(line: usize, key: &str, value: &str) -> Result<u16, ParseError> {
    value.parse::<u16>().map_err(|_| ParseError::Syntax {
        line,
        message: format!("{} must be a number, found `{}`", key, value),
    })
}

fn unsupported(line: usize, key: &str, section: &str) -> ParseError {
    ParseError::Syntax {
        line,
        message: format!("unsupported key `{}` in [{}]", key, section),
    }
}
