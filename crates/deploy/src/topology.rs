//! Server and node topology.
//!
//! Every node is identified by its absolute index: the number of nodes on all
//! preceding servers plus its local index on its own server. Indices are
//! assigned once, before any concurrent work starts, and never recomputed.

use std::{net::IpAddr, path::Path};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::TopologyError;

/// A host machine that runs node containers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    /// Server id, as referenced by deployment requests.
    pub id: u64,
    /// Address used to reach the host itself (ssh).
    pub host: String,
    /// Reachable node IPs, one per hosted node, in local index order.
    pub ips: Vec<IpAddr>,
    /// Subnet the node IPs belong to.
    #[serde(default)]
    pub subnet_id: u32,
}

/// One node of a deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Node {
    /// Position of the hosting server in the topology.
    pub server_index: usize,
    /// Index of the node on its server.
    pub local_index: usize,
    /// Unique rank of the node across the deployment.
    pub absolute_index: usize,
    /// Reachable IP of the node.
    pub ip: IpAddr,
}

/// Absolute index of `local` on `server`, given the node count of every server.
///
/// Servers past the end of `counts` hold no nodes.
pub fn absolute_index(counts: &[usize], server: usize, local: usize) -> usize {
    counts.iter().take(server).sum::<usize>() + local
}

/// The resolved servers of a deployment and the nodes placed on them.
#[derive(Debug, Clone)]
pub struct Topology {
    servers: Vec<Server>,
    nodes: Vec<Node>,
}

impl Topology {
    /// Place `counts[i]` nodes on `servers[i]`.
    pub fn new(servers: Vec<Server>, counts: &[usize]) -> Result<Self, TopologyError> {
        let mut nodes = Vec::with_capacity(counts.iter().sum());

        for (server_index, server) in servers.iter().enumerate() {
            let count = counts.get(server_index).copied().unwrap_or(0);
            if count > server.ips.len() {
                return Err(TopologyError::InsufficientCapacity {
                    requested: count,
                    available: server.ips.len(),
                });
            }

            for local_index in 0..count {
                nodes.push(Node {
                    server_index,
                    local_index,
                    absolute_index: absolute_index(counts, server_index, local_index),
                    ip: server.ips[local_index],
                });
            }
        }

        if counts.len() > servers.len() && counts[servers.len()..].iter().any(|c| *c > 0) {
            return Err(TopologyError::ServerOutOfRange(servers.len()));
        }

        Ok(Self { servers, nodes })
    }

    /// Fill `servers` in order, each up to its IP count, until `node_count`
    /// nodes are placed.
    pub fn allocate(servers: Vec<Server>, node_count: usize) -> Result<Self, TopologyError> {
        let available: usize = servers.iter().map(|s| s.ips.len()).sum();
        if node_count > available {
            return Err(TopologyError::InsufficientCapacity {
                requested: node_count,
                available,
            });
        }

        let mut remaining = node_count;
        let counts: Vec<usize> = servers
            .iter()
            .map(|server| {
                let count = remaining.min(server.ips.len());
                remaining -= count;
                count
            })
            .collect();

        Self::new(servers, &counts)
    }

    /// Place `count` more nodes on the server at `server_index`, using its
    /// unused IPs. New nodes get absolute indices after every existing node.
    pub fn add_nodes(
        &mut self,
        server_index: usize,
        count: usize,
    ) -> Result<Vec<Node>, TopologyError> {
        let server = self
            .servers
            .get(server_index)
            .ok_or(TopologyError::ServerOutOfRange(server_index))?;

        let used = self.nodes_on(server_index).count();
        let free = server.ips.len() - used;
        if count > free {
            return Err(TopologyError::InsufficientCapacity {
                requested: count,
                available: free,
            });
        }

        let first_absolute = self.nodes.len();
        let added: Vec<Node> = (0..count)
            .map(|k| Node {
                server_index,
                local_index: used + k,
                absolute_index: first_absolute + k,
                ip: server.ips[used + k],
            })
            .collect();

        self.nodes.extend_from_slice(&added);
        tracing::debug!(server_index, count, first_absolute, "Nodes added to topology");
        Ok(added)
    }

    /// All servers, in placement order.
    pub fn servers(&self) -> &[Server] {
        &self.servers
    }

    /// The server hosting `node`.
    pub fn server_of(&self, node: &Node) -> &Server {
        &self.servers[node.server_index]
    }

    /// All nodes, ordered by absolute index.
    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    /// Nodes hosted on the server at `server_index`.
    pub fn nodes_on(&self, server_index: usize) -> impl Iterator<Item = &Node> {
        self.nodes
            .iter()
            .filter(move |node| node.server_index == server_index)
    }

    /// Number of nodes on each server.
    pub fn counts(&self) -> Vec<usize> {
        (0..self.servers.len())
            .map(|i| self.nodes_on(i).count())
            .collect()
    }

    /// Total number of nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the topology has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

/// The set of servers known to the infrastructure layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Inventory {
    pub servers: Vec<Server>,
}

impl Inventory {
    /// Resolve server ids to servers, keeping the order of `ids`.
    pub fn resolve(&self, ids: &[u64]) -> Result<Vec<Server>, TopologyError> {
        ids.iter()
            .map(|id| {
                self.servers
                    .iter()
                    .find(|server| server.id == *id)
                    .cloned()
                    .ok_or(TopologyError::UnknownServer(*id))
            })
            .collect()
    }

    /// Load an inventory from a TOML or JSON file (chosen by extension).
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .context(format!("Failed to read inventory from {}", path.display()))?;

        if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content).context("Failed to parse inventory file as JSON")
        } else {
            toml::from_str(&content).context("Failed to parse inventory file as TOML")
        }
    }
}
