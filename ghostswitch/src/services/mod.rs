pub mod command;
pub mod detector;
pub mod events;
pub mod installer;
pub mod privilege;
pub mod provisioner;
pub mod status;
pub mod vpn;

pub use command::{CommandError, CommandOutput, CommandRunner, CommandSpec, SystemCommandRunner};
pub use detector::{Detector, Probe, ToolPaths};
pub use events::{BroadcastSink, EventSink};
pub use installer::{ArtifactFetcher, HttpFetcher, Installer};
pub use privilege::{Invocation, PrivilegeChain, PrivilegeMethod};
pub use provisioner::ConfigProvisioner;
pub use status::{HttpIpProbe, PublicIpProbe, StatusParser, StatusReporter, WgShowParser};
pub use vpn::{ControllerBuilder, TunnelController};
