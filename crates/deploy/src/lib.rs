//! netbake-deploy - Build orchestration for multi-node blockchain test networks.
//!
//! A [`DeploymentRequest`] is validated, placed onto the servers of an
//! [`Inventory`] and handed to the [`ProtocolPlugin`] registered for its
//! protocol. The plugin drives the remote hosts through a
//! [`transport::RemoteTransport`] and reports progress in a [`BuildState`].

mod error;
pub use error::{
    BuildError, ParseError, PluginNotFound, RemoteError, TopologyError, ValidationError,
};

mod request;
pub use request::{DeploymentRequest, Resources};

mod validate;
pub use validate::{MAX_NODES, ValidatedRequest, check_charset, validate};

mod topology;
pub use topology::{Inventory, Node, Server, Topology, absolute_index};

mod state;
pub use state::{BuildState, BuildStatus, INITIAL_STAGE};

mod record;
pub use record::{BUILD_RECORD_FILE, BuildRecord, fingerprint};

mod settings;
pub use settings::{Settings, SshSettings};

mod registry;
pub use registry::{PluginRegistry, Protocol, ProtocolPlugin, Service};

mod testnet;
pub use testnet::{OUTPUT_LOG, Orchestrator, TestNet};

pub mod distribute;
pub mod executor;
pub mod protocols;
pub mod template;
pub mod transport;

mod fs;
