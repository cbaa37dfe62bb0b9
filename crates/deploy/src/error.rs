//! Error types surfaced by the build engine.
//!
//! Plugins, the executor and the transport propagate [`anyhow::Error`]. The
//! types here are the classes a caller must be able to tell apart.

use std::num::ParseIntError;

use thiserror::Error;

/// A deployment request that was rejected before any remote side effect.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("servers cannot be null")]
    ServersNull,

    #[error("servers cannot be empty")]
    ServersEmpty,

    #[error("protocol cannot be empty")]
    ProtocolEmpty,

    #[error("images cannot be null")]
    ImagesNull,

    #[error("images cannot be empty")]
    ImagesEmpty,

    #[error("must have at least 1 node")]
    NoNodes,

    #[error("too many nodes: max of {max} nodes")]
    TooManyNodes { max: usize },

    #[error("\"{value}\" is not a valid integer ({source}). For node {node}")]
    Resource {
        node: usize,
        value: String,
        source: ParseIntError,
    },

    #[error("\"{value}\" contains invalid character '{character}'")]
    InvalidCharacter { value: String, character: char },
}

/// The requested protocol has no registered plugin.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no plugin registered for protocol \"{0}\"")]
pub struct PluginNotFound(pub String);

/// A remote command could not be run to a successful end.
#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("`{program}` on {target} exited with {status}: {output}")]
    CommandFailed {
        target: String,
        program: String,
        status: String,
        output: String,
    },

    #[error("failed to spawn `{program}` for {target}")]
    Spawn {
        target: String,
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{program}` on {target} did not finish within {seconds}s")]
    Timeout {
        target: String,
        program: String,
        seconds: u64,
    },
}

/// A structured value was expected in command output but not found.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("unable to find a wallet address in command output")]
    MissingAddress,

    #[error("invalid wallet address \"{0}\"")]
    InvalidAddress(String),

    #[error("unable to find a network address record in command output")]
    MissingEnode,

    #[error("malformed network address record \"{0}\"")]
    MalformedEnode(String),
}

/// The node/server topology could not be resolved for a request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TopologyError {
    #[error("unknown server id {0}")]
    UnknownServer(u64),

    #[error("not enough capacity: {requested} nodes requested but the servers only host {available}")]
    InsufficientCapacity { requested: usize, available: usize },

    #[error("server index {0} is out of range")]
    ServerOutOfRange(usize),
}

/// What the orchestrator hands back when a deployment does not complete.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    PluginNotFound(#[from] PluginNotFound),

    #[error(transparent)]
    Topology(#[from] TopologyError),

    #[error("build failed during stage \"{stage}\": {source:#}")]
    Failed {
        stage: String,
        #[source]
        source: anyhow::Error,
    },
}

impl BuildError {
    /// The last stage label reached, if the build got as far as running.
    pub fn stage(&self) -> Option<&str> {
        match self {
            BuildError::Failed { stage, .. } => Some(stage),
            _ => None,
        }
    }
}
