//! Protocol plugins and the registry they are looked up in.

use std::{collections::BTreeMap, collections::HashMap, future::Future};

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::{
    Node, TestNet,
    error::PluginNotFound,
    protocols::{Geth, Plumtree},
    transport::RemoteTransport,
};

/// A sidecar service a protocol runs next to its nodes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub name: String,
    pub image: String,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

/// What every protocol provides to the build engine.
pub trait ProtocolPlugin: Send + Sync {
    /// Bootstrap a fresh network on every node of `testnet`.
    fn build<T: RemoteTransport>(
        &self,
        testnet: &TestNet<'_, T>,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Bring `nodes`, already placed in the topology of `testnet`, into the
    /// running network.
    fn add_nodes<T: RemoteTransport>(
        &self,
        testnet: &TestNet<'_, T>,
        nodes: &[Node],
    ) -> impl Future<Output = Result<()>> + Send;

    /// Default protocol parameters (JSON).
    fn defaults(&self) -> &'static str;

    /// Description of the accepted parameters (JSON).
    fn params_schema(&self) -> &'static str;

    /// Sidecar services.
    fn services(&self) -> Vec<Service>;

    /// Log files on each node beyond the main output log, by name, for a
    /// network built with `params`.
    fn additional_logs(&self, params: &Map<String, Value>) -> BTreeMap<String, String>;
}

/// The supported protocols.
#[derive(Debug, Clone, Display, EnumString, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum Protocol {
    Geth(Geth),
    Plumtree(Plumtree),
}

impl Protocol {
    pub fn name(&self) -> &'static str {
        self.into()
    }
}

impl ProtocolPlugin for Protocol {
    async fn build<T: RemoteTransport>(&self, testnet: &TestNet<'_, T>) -> Result<()> {
        match self {
            Protocol::Geth(geth) => geth.build(testnet).await,
            Protocol::Plumtree(plumtree) => plumtree.build(testnet).await,
        }
    }

    async fn add_nodes<T: RemoteTransport>(&self, testnet: &TestNet<'_, T>, nodes: &[Node]) -> Result<()> {
        match self {
            Protocol::Geth(geth) => geth.add_nodes(testnet, nodes).await,
            Protocol::Plumtree(plumtree) => plumtree.add_nodes(testnet, nodes).await,
        }
    }

    fn defaults(&self) -> &'static str {
        match self {
            Protocol::Geth(geth) => geth.defaults(),
            Protocol::Plumtree(plumtree) => plumtree.defaults(),
        }
    }

    fn params_schema(&self) -> &'static str {
        match self {
            Protocol::Geth(geth) => geth.params_schema(),
            Protocol::Plumtree(plumtree) => plumtree.params_schema(),
        }
    }

    fn services(&self) -> Vec<Service> {
        match self {
            Protocol::Geth(geth) => geth.services(),
            Protocol::Plumtree(plumtree) => plumtree.services(),
        }
    }

    fn additional_logs(&self, params: &Map<String, Value>) -> BTreeMap<String, String> {
        match self {
            Protocol::Geth(geth) => geth.additional_logs(params),
            Protocol::Plumtree(plumtree) => plumtree.additional_logs(params),
        }
    }
}

/// Name-keyed table of protocol plugins.
///
/// Filled once at startup, then only read.
#[derive(Debug, Clone, Default)]
pub struct PluginRegistry {
    plugins: HashMap<String, Protocol>,
}

impl PluginRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry holding every built-in protocol under its own name.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for protocol in Protocol::iter() {
            registry.register(protocol.name(), protocol);
        }
        registry
    }

    /// Register `protocol` under `name`.
    ///
    /// # Panics
    /// If `name` is already registered.
    pub fn register(&mut self, name: impl Into<String>, protocol: Protocol) {
        let name = name.into();
        if self.plugins.contains_key(&name) {
            panic!("protocol \"{name}\" is already registered");
        }
        tracing::debug!(protocol = %name, "Registered protocol plugin");
        self.plugins.insert(name, protocol);
    }

    /// Find the plugin registered under `name`.
    pub fn lookup(&self, name: &str) -> Result<&Protocol, PluginNotFound> {
        self.plugins
            .get(name)
            .ok_or_else(|| PluginNotFound(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.plugins.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }
}
