use crate::*;

const BACKEND_CONFIG: &str = "[Interface]
PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=
Address = 10.8.0.2/24
DNS = 1.1.1.1, 8.8.8.8

[Peer]
PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=
PresharedKey = FpCyhws9cxwWoV4xELtfJvjJN+zQVRPISllRWgeopVE=
Endpoint = 51.112.111.180:51820
AllowedIPs = 0.0.0.0/0, ::/0
PersistentKeepalive = 25
";

fn sample_config() -> TunnelConfig {
    TunnelConfig {
        interface_name: "ghostswitch".to_string(),
        private_key: SecretKey::new("yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk="),
        address: "10.8.0.2/24".to_string(),
        dns: Some("1.1.1.1, 8.8.8.8".to_string()),
        mtu: None,
        peers: vec![PeerConfig {
            public_key: "xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=".to_string(),
            preshared_key: None,
            endpoint: "us-east.example.com:51820".to_string(),
            allowed_ips: "0.0.0.0/0".to_string(),
            persistent_keepalive: Some(25),
        }],
    }
}

#[test]
fn test_render_matches_wg_quick_layout() {
    let mut config = sample_config();
    config.peers.push(PeerConfig {
        public_key: "HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=".to_string(),
        preshared_key: None,
        endpoint: "eu.example.com:51820".to_string(),
        allowed_ips: "10.9.0.0/16".to_string(),
        persistent_keepalive: None,
    });

    let expected = "[Interface]
PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=
Address = 10.8.0.2/24
DNS = 1.1.1.1, 8.8.8.8

[Peer]
PublicKey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=
Endpoint = us-east.example.com:51820
AllowedIPs = 0.0.0.0/0
PersistentKeepalive = 25

[Peer]
PublicKey = HIgo9xNzJMWLKASShiTqIybxZ0U3wGLiUeJ1PKf8ykw=
Endpoint = eu.example.com:51820
AllowedIPs = 10.9.0.0/16
";
    assert_eq!(config.render(), expected);
}

#[test]
fn test_parse_backend_config() {
    let config = TunnelConfig::parse("ghostswitch", BACKEND_CONFIG).unwrap();
    assert_eq!(config.interface_name, "ghostswitch");
    assert_eq!(config.address, "10.8.0.2/24");
    assert_eq!(config.dns.as_deref(), Some("1.1.1.1, 8.8.8.8"));
    assert_eq!(config.peers.len(), 1);

    let peer = &config.peers[0];
    assert_eq!(peer.endpoint, "51.112.111.180:51820");
    assert_eq!(peer.allowed_ips, "0.0.0.0/0, ::/0");
    assert_eq!(peer.persistent_keepalive, Some(25));
    assert_eq!(
        peer.preshared_key.as_ref().map(|k| k.expose()),
        Some("FpCyhws9cxwWoV4xELtfJvjJN+zQVRPISllRWgeopVE=")
    );
    assert_eq!(config.client_ip().as_deref(), Some("10.8.0.2"));
}

#[test]
fn test_parse_tolerates_comments_and_casing() {
    let text = "# issued by backend
[interface]
privatekey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=
address = 10.8.0.2/32 ; client address
mtu = 1280

[PEER]
publickey = xTIBA5rboUvnH4htodjb6e697QjLERt1NAB4mZqp8Dg=
endpoint = 1.2.3.4:51820
allowedips = 0.0.0.0/0
persistentkeepalive = off
";
    let config = TunnelConfig::parse("wg0", text).unwrap();
    assert_eq!(config.mtu, Some(1280));
    assert_eq!(config.address, "10.8.0.2/32");
    assert_eq!(config.peers[0].persistent_keepalive, None);
}

#[test]
fn test_parse_rejects_interface_without_peer() {
    let text = "[Interface]
PrivateKey = yAnz5TF+lXXJte14tji3zlMNq+hd2rYUIgJBgB3fBmk=
Address = 10.8.0.2/24
";
    assert_eq!(TunnelConfig::parse("wg0", text), Err(ParseError::NoPeers));
}

#[test]
fn test_parse_rejects_missing_keys_and_unknown_input() {
    let missing = "[Interface]\nAddress = 10.8.0.2/24\n\n[Peer]\nPublicKey = a\nEndpoint = b:1\nAllowedIPs = 0.0.0.0/0\n";
    assert_eq!(
        TunnelConfig::parse("wg0", missing),
        Err(ParseError::MissingKey {
            section: "Interface",
            key: "PrivateKey"
        })
    );

    let unknown = "[Interface]\nPrivateKey = a\nAddress = b\n[Relay]\n";
    assert_eq!(
        TunnelConfig::parse("wg0", unknown),
        Err(ParseError::UnknownSection("relay".to_string()))
    );

    let post_up = "[Interface]\nPrivateKey = a\nPostUp = iptables -F\n";
    assert!(matches!(
        TunnelConfig::parse("wg0", post_up),
        Err(ParseError::Syntax { line: 3, .. })
    ));
}

#[test]
fn test_secret_key_is_redacted_in_debug() {
    let config = sample_config();
    let debug = format!("{:?}", config);
    assert!(!debug.contains("yAnz5TF"));
    assert!(debug.contains("<redacted>"));
}

#[test]
fn test_status_event_wire_names() {
    let event = StatusEvent::new(ConnectionStatus::Connected)
        .with_server("US East")
        .with_ip(Some("10.8.0.2".to_string()))
        .with_public_ip(Some("203.0.113.7".to_string()))
        .with_interface("ghostswitch");
    let json = serde_json::to_value(&event).unwrap();
    assert_eq!(json["status"], "connected");
    assert_eq!(json["server"], "US East");
    assert_eq!(json["publicIP"], "203.0.113.7");
    assert_eq!(json["interface"], "ghostswitch");
    assert!(json.get("message").is_none());
    assert!(json.get("timestamp").is_some());
}

#[test]
fn test_missing_toolchain_carries_remediation() {
    let info = ToolchainInfo::missing(Platform::Windows);
    assert!(!info.installed);
    let remediation = info.remediation.unwrap();
    assert_eq!(remediation.download_url, WINDOWS_INSTALLER_URL);
    let text = remediation.instructions();
    assert!(text.contains("\n  1. "));
    assert!(text.contains("\n  3. "));
}
