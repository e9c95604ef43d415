use ghostswitch::models::{StatusEvent, TunnelRequest};
use ghostswitch::{init_tracing, storage, EventSink, TunnelController, TunnelError};
use serde_json::json;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::error;

const USAGE: &str = "usage: ghostswitch <detect | install | connect <file> [server] [client-ip] | disconnect [name] | status [name]>";

/// Prints every event as one JSON line on stdout.
struct JsonLineSink;

impl EventSink for JsonLineSink {
    fn emit(&self, event: StatusEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => println!("{}", line),
            Err(e) => error!("Failed to serialize event: {}", e),
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match run(&args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("{}", e.user_friendly_message());
            ExitCode::FAILURE
        }
    }
}

async fn run(args: &[String]) -> Result<(), TunnelError> {
    let settings = storage::load_settings();
    let default_name = settings.tunnel_name.clone();
    let controller = TunnelController::new(settings, Arc::new(JsonLineSink));
    let arg = |idx: usize| args.get(idx).map(String::as_str);

    match arg(0) {
        Some("detect") => {
            let info = controller.detect().await;
            println!("{}", serde_json::to_string(&info)?);
        }
        Some("install") => {
            let report = controller.install_tool().await?;
            println!(
                "{}",
                json!({ "attempts": report.attempts, "toolchain": report.toolchain })
            );
        }
        Some("connect") => {
            let Some(file) = arg(1) else {
                eprintln!("{}", USAGE);
                return Err(TunnelError::InvalidConfig("missing config file".to_string()));
            };
            let text = std::fs::read_to_string(file)?;
            let server = arg(2).unwrap_or(file);
            let mut request = TunnelRequest::rendered(server, &default_name, text);
            if let Some(ip) = arg(3) {
                request = request.with_client_ip(ip);
            }
            controller.connect(request).await?;
        }
        Some("disconnect") => {
            controller.disconnect(arg(1).unwrap_or(&default_name)).await?;
        }
        Some("status") => {
            let name = arg(1).unwrap_or(&default_name);
            let report = controller.status(name).await?;
            let stats = controller.stats(name).await?;
            println!(
                "{}",
                json!({
                    "connected": report.connected,
                    "interface": report.interface,
                    "publicIP": report.public_ip,
                    "stats": stats,
                })
            );
        }
        _ => {
            eprintln!("{}", USAGE);
            return Err(TunnelError::InvalidConfig(format!(
                "unknown command {:?}",
                arg(0).unwrap_or("")
            )));
        }
    }
    Ok(())
}
