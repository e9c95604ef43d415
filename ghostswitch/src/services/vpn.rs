//! The tunnel lifecycle state machine. One controller owns every tunnel the
//! GUI asks for; each tunnel name has exactly one [`TunnelState`].

use crate::error::TunnelError;
use crate::models::{
    ConfigSource, ConnectionStatus, InstallReport, Platform, PrivilegedAction, Remediation,
    StatusEvent, ToolchainInfo, TunnelConfig, TunnelRequest, TunnelState, TunnelStats,
    VerifyReport,
};
use crate::services::command::{CommandRunner, SystemCommandRunner};
use crate::services::detector::{Detector, Probe, ToolPaths};
use crate::services::events::EventSink;
use crate::services::installer::{ArtifactFetcher, HttpFetcher, Installer};
use crate::services::privilege::{PrivilegeChain, PrivilegeMethod};
use crate::services::provisioner::ConfigProvisioner;
use crate::services::status::{
    derive_public_key, HttpIpProbe, PublicIpProbe, StatusParser, StatusReporter,
};
use crate::storage::ControllerSettings;
use chrono::Utc;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

pub struct ControllerBuilder {
    platform: Platform,
    settings: ControllerSettings,
    sink: Arc<dyn EventSink>,
    runner: Arc<dyn CommandRunner>,
    ip_probe: Option<Arc<dyn PublicIpProbe>>,
    parser: Option<Arc<dyn StatusParser>>,
    fetcher: Option<Arc<dyn ArtifactFetcher>>,
    probes: Option<Vec<Probe>>,
    methods: Option<Vec<Arc<dyn PrivilegeMethod>>>,
    staging_dir: Option<PathBuf>,
}

impl ControllerBuilder {
    pub fn new(settings: ControllerSettings, sink: Arc<dyn EventSink>) -> Self {
        Self {
            platform: Platform::current(),
            settings,
            sink,
            runner: Arc::new(SystemCommandRunner),
            ip_probe: None,
            parser: None,
            fetcher: None,
            probes: None,
            methods: None,
            staging_dir: None,
        }
    }

    pub fn platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    pub fn runner(mut self, runner: Arc<dyn CommandRunner>) -> Self {
        self.runner = runner;
        self
    }

    pub fn ip_probe(mut self, probe: Arc<dyn PublicIpProbe>) -> Self {
        self.ip_probe = Some(probe);
        self
    }

    pub fn status_parser(mut self, parser: Arc<dyn StatusParser>) -> Self {
        self.parser = Some(parser);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ArtifactFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn probes(mut self, probes: Vec<Probe>) -> Self {
        self.probes = Some(probes);
        self
    }

    pub fn methods(mut self, methods: Vec<Arc<dyn PrivilegeMethod>>) -> Self {
        self.methods = Some(methods);
        self
    }

    pub fn staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    pub fn build(self) -> TunnelController {
        let settings = self.settings;

        let mut detector =
            Detector::new(self.platform, self.runner.clone(), settings.probe_timeout());
        if let Some(probes) = self.probes {
            detector = detector.with_probes(probes);
        }
        let detector = Arc::new(detector);

        let mut chain = PrivilegeChain::new(
            self.platform,
            self.runner.clone(),
            &settings.resolved_log_dir(),
            settings.backoff(),
        );
        if let Some(methods) = self.methods {
            chain = chain.with_methods(methods);
        }
        let chain = Arc::new(chain);

        let ip_probe = self.ip_probe.or_else(|| {
            settings.public_ip_probe.then(|| {
                Arc::new(HttpIpProbe::new(&settings.public_ip_url, settings.probe_timeout()))
                    as Arc<dyn PublicIpProbe>
            })
        });
        let mut reporter = StatusReporter::new(self.runner.clone(), settings.probe_timeout());
        if let Some(probe) = ip_probe {
            reporter = reporter.with_ip_probe(probe);
        }
        if let Some(parser) = self.parser {
            reporter = reporter.with_parser(parser);
        }

        let fetcher = self
            .fetcher
            .unwrap_or_else(|| Arc::new(HttpFetcher::new(settings.install_timeout())));
        let mut installer = Installer::new(
            self.platform,
            chain.clone(),
            detector.clone(),
            fetcher,
            &settings.installer_url,
            settings.install_timeout(),
        );
        if let Some(dir) = self.staging_dir {
            installer = installer.with_staging_dir(dir);
        }

        TunnelController {
            platform: self.platform,
            provisioner: ConfigProvisioner::from_settings(&settings, self.platform),
            settings,
            detector,
            chain,
            reporter,
            installer,
            sink: self.sink,
            states: Mutex::new(HashMap::new()),
            installing: AtomicBool::new(false),
        }
    }
}

pub struct TunnelController {
    platform: Platform,
    settings: ControllerSettings,
    detector: Arc<Detector>,
    provisioner: ConfigProvisioner,
    chain: Arc<PrivilegeChain>,
    reporter: StatusReporter,
    installer: Installer,
    sink: Arc<dyn EventSink>,
    states: Mutex<HashMap<String, TunnelState>>,
    installing: AtomicBool,
}

struct InstallGuard<'a>(&'a AtomicBool);

impl Drop for InstallGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Holds a tunnel's `Connecting`/`Disconnecting` claim. If the owning future
/// is dropped or panics before [`ClaimGuard::release`], the tunnel falls back
/// to `Disconnected` and a `disconnected` event goes out.
struct ClaimGuard<'a> {
    controller: &'a TunnelController,
    name: &'a str,
    armed: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(controller: &'a TunnelController, name: &'a str) -> Self {
        Self {
            controller,
            name,
            armed: true,
        }
    }

    fn release(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        warn!("Action on {} abandoned mid-flight", self.name);
        self.controller.set_state(self.name, TunnelState::Disconnected);
        self.controller
            .sink
            .emit(StatusEvent::new(ConnectionStatus::Disconnected).with_interface(self.name));
    }
}

impl TunnelController {
    pub fn new(settings: ControllerSettings, sink: Arc<dyn EventSink>) -> Self {
        ControllerBuilder::new(settings, sink).build()
    }

    pub fn builder(settings: ControllerSettings, sink: Arc<dyn EventSink>) -> ControllerBuilder {
        ControllerBuilder::new(settings, sink)
    }

    fn lock_states(&self) -> MutexGuard<'_, HashMap<String, TunnelState>> {
        self.states.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, name: &str, state: TunnelState) {
        debug!("{} -> {:?}", name, state.status());
        self.lock_states().insert(name.to_string(), state);
    }

    pub fn state(&self, name: &str) -> TunnelState {
        self.lock_states()
            .get(name)
            .cloned()
            .unwrap_or(TunnelState::Disconnected)
    }

    pub async fn detect(&self) -> ToolchainInfo {
        let toolchain = self.detector.detect().await;
        if toolchain.installed {
            let tools = ToolPaths::from_toolchain(&toolchain);
            self.chain.update_tools(tools.clone());
            self.reporter.update_tools(&tools);
        }
        toolchain
    }

    pub async fn install_tool(&self) -> Result<InstallReport, TunnelError> {
        if self
            .installing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(TunnelError::Busy("installer".to_string()));
        }
        let _guard = InstallGuard(&self.installing);

        info!("Installing WireGuard tools on {}", self.platform);
        let report = self.installer.install().await?;
        let tools = ToolPaths::from_toolchain(&report.toolchain);
        self.chain.update_tools(tools.clone());
        self.reporter.update_tools(&tools);
        Ok(report)
    }

    /// Brings the tunnel up. Rejected with `Busy` while another action on
    /// the same tunnel is in flight; never queued.
    pub async fn connect(&self, request: TunnelRequest) -> Result<VerifyReport, TunnelError> {
        let name = request.tunnel_name().to_string();
        {
            let mut states = self.lock_states();
            match states.get(&name) {
                Some(state) if state.is_in_flight() => return Err(TunnelError::Busy(name)),
                Some(TunnelState::Connected { .. }) => {
                    return Err(TunnelError::AlreadyConnected(name))
                }
                _ => {
                    states.insert(name.clone(), TunnelState::Connecting);
                }
            }
        }
        let claim = ClaimGuard::new(self, &name);

        info!("Connecting {} to {}", name, request.server);
        self.sink.emit(
            StatusEvent::new(ConnectionStatus::Connecting)
                .with_server(&request.server)
                .with_interface(&name),
        );

        match self.bring_up(&name, &request).await {
            Ok((report, config)) => {
                claim.release();
                let ip = request.client_ip.clone().or_else(|| config.client_ip());
                let interface = report.interface.clone().unwrap_or_else(|| name.clone());
                self.set_state(
                    &name,
                    TunnelState::Connected {
                        interface: interface.clone(),
                        since: Utc::now(),
                        public_ip: report.public_ip.clone(),
                    },
                );
                info!("Tunnel {} connected", name);
                self.sink.emit(
                    StatusEvent::new(ConnectionStatus::Connected)
                        .with_server(&request.server)
                        .with_ip(ip)
                        .with_public_ip(report.public_ip.clone())
                        .with_interface(interface),
                );
                Ok(report)
            }
            Err(e) => {
                claim.release();
                self.fail(&name, &request.server, &e);
                Err(e)
            }
        }
    }

    async fn bring_up(
        &self,
        name: &str,
        request: &TunnelRequest,
    ) -> Result<(VerifyReport, TunnelConfig), TunnelError> {
        let toolchain = self.detect().await;
        if !toolchain.installed {
            return Err(TunnelError::ToolNotFound {
                platform: self.platform,
                remediation: toolchain
                    .remediation
                    .unwrap_or_else(|| Remediation::for_platform(self.platform)),
            });
        }

        let config = match request.source {
            ConfigSource::Structured(ref config) => config.clone(),
            ConfigSource::Rendered {
                ref interface_name,
                ref text,
            } => TunnelConfig::parse(interface_name, text)?,
        };

        self.clear_stale(name).await;

        let config_path = self.provisioner.provision(&config)?;

        let outcome = self
            .chain
            .run(
                &PrivilegedAction::StartTunnel {
                    name: name.to_string(),
                    config_path: config_path.clone(),
                },
                self.settings.action_timeout(),
            )
            .await?;
        info!("Start of {} accepted: {}", name, outcome.diagnostic);

        let expected_key = derive_public_key(&config.private_key);
        let attempts = self.settings.verify_attempts.max(1);
        let mut last_error = None;
        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.settings.verify_interval()).await;
            }
            match self
                .reporter
                .verify_with_key(name, expected_key.as_deref())
                .await
            {
                Ok(report) if report.connected => return Ok((report, config)),
                Ok(_) => {
                    debug!("Tunnel {} not up yet ({}/{})", name, attempt, attempts);
                    last_error = None;
                }
                Err(e) => {
                    warn!("Verification of {} failed: {}", name, e);
                    last_error = Some(e);
                }
            }
        }

        self.stop_best_effort(name, Some(config_path)).await;
        Err(last_error.unwrap_or_else(|| {
            TunnelError::VerificationFailed(format!(
                "interface {} not up after {} checks",
                name, attempts
            ))
        }))
    }

    /// Tears down leftovers from an earlier session before a new config is
    /// written. Configs of other live tunnels sharing the name prefix are
    /// left alone.
    async fn clear_stale(&self, name: &str) {
        match self.reporter.query(name).await {
            Ok(Some(show)) if show.interface.is_some() => {
                info!("Interface {} is still up; stopping it first", name);
                let path = self.provisioner.path_for(name);
                self.stop_best_effort(name, path.exists().then_some(path))
                    .await;
            }
            Ok(_) => {}
            Err(e) => warn!("Could not check for a stale {} interface: {}", name, e),
        }

        let others: Vec<String> = self
            .lock_states()
            .iter()
            .filter(|(other, state)| {
                other.as_str() != name && **state != TunnelState::Disconnected
            })
            .map(|(other, _)| other.clone())
            .collect();
        let removed = self.provisioner.clear_except(name, &others);
        if removed > 0 {
            info!("Removed {} stale config file(s) for {}", removed, name);
        }
    }

    async fn stop_best_effort(&self, name: &str, config_path: Option<PathBuf>) {
        let action = PrivilegedAction::StopTunnel {
            name: name.to_string(),
            config_path,
        };
        if let Err(e) = self.chain.run(&action, self.settings.action_timeout()).await {
            warn!("Stopping {} failed: {}", name, e);
        }
    }

    fn fail(&self, name: &str, server: &str, err: &TunnelError) {
        error!("Connecting {} failed: {}", name, err);
        self.set_state(
            name,
            TunnelState::Failed {
                reason: err.to_string(),
            },
        );
        self.sink.emit(
            StatusEvent::new(ConnectionStatus::Error)
                .with_server(server)
                .with_interface(name)
                .with_message(err.user_friendly_message()),
        );
        self.set_state(name, TunnelState::Disconnected);
        self.sink
            .emit(StatusEvent::new(ConnectionStatus::Disconnected).with_interface(name));
    }

    /// Stops the tunnel and removes its config. Always ends `Disconnected`;
    /// stop failures are only logged.
    pub async fn disconnect(&self, name: &str) -> Result<(), TunnelError> {
        {
            let mut states = self.lock_states();
            if states.get(name).is_some_and(TunnelState::is_in_flight) {
                return Err(TunnelError::Busy(name.to_string()));
            }
            states.insert(name.to_string(), TunnelState::Disconnecting);
        }
        let claim = ClaimGuard::new(self, name);

        info!("Disconnecting {}", name);
        self.sink
            .emit(StatusEvent::new(ConnectionStatus::Disconnecting).with_interface(name));

        self.detect().await;
        let path = self.provisioner.path_for(name);
        self.stop_best_effort(name, path.exists().then_some(path))
            .await;
        if self.provisioner.remove(name) {
            debug!("Removed config for {}", name);
        }

        claim.release();
        self.set_state(name, TunnelState::Disconnected);
        info!("Tunnel {} disconnected", name);
        self.sink
            .emit(StatusEvent::new(ConnectionStatus::Disconnected).with_interface(name));
        Ok(())
    }

    /// Live check of the interface without touching the state machine.
    pub async fn status(&self, name: &str) -> Result<VerifyReport, TunnelError> {
        self.detect().await;
        self.reporter.verify(name).await
    }

    pub async fn stats(&self, name: &str) -> Result<TunnelStats, TunnelError> {
        self.reporter.stats(name).await
    }

    pub fn spawn_connect(
        self: &Arc<Self>,
        request: TunnelRequest,
    ) -> JoinHandle<Result<VerifyReport, TunnelError>> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.connect(request).await })
    }

    pub fn spawn_disconnect(self: &Arc<Self>, name: String) -> JoinHandle<Result<(), TunnelError>> {
        let controller = Arc::clone(self);
        tokio::spawn(async move { controller.disconnect(&name).await })
    }
}
