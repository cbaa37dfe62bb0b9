//! Structured values scraped from geth's console output.

use std::{fmt, net::IpAddr};

use alloy_core::primitives::Address;
use lazy_static::lazy_static;
use regex::Regex;

use crate::error::ParseError;

lazy_static! {
    static ref RE_BRACED: Regex =
        Regex::new(r"\{([A-Za-z0-9]+)\}").expect("failed to compile RE_BRACED regex");
    static ref RE_PREFIXED: Regex =
        Regex::new(r"\b0x[0-9a-fA-F]{40}\b").expect("failed to compile RE_PREFIXED regex");
    static ref RE_ENODE: Regex = Regex::new(
        r#"enode://([0-9a-fA-F]+)@(\[[^\]\s]+\]|[^:\s"'@/\[\]]+):([0-9]+)"#
    )
    .expect("failed to compile RE_ENODE regex");
}

/// Find the address of a freshly created account.
///
/// Accepts both the `Address: {<hex>}` form of older geth releases and a
/// `0x`-prefixed address. The first candidate that is a valid address wins.
pub fn parse_wallet_address(output: &str) -> Result<Address, ParseError> {
    let candidates: Vec<&str> = RE_BRACED
        .captures_iter(output)
        .filter_map(|captures| captures.get(1))
        .chain(RE_PREFIXED.find_iter(output))
        .map(|candidate| candidate.as_str())
        .collect();

    let first = candidates.first().ok_or(ParseError::MissingAddress)?;
    candidates
        .iter()
        .find_map(|candidate| candidate.parse::<Address>().ok())
        .ok_or_else(|| ParseError::InvalidAddress(first.to_string()))
}

/// A node's self-describing network address (`enode://<id>@<host>:<port>`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnodeRecord {
    pub node_id: String,
    pub host: String,
    pub port: u16,
}

impl EnodeRecord {
    /// The same record, reachable at `ip`.
    pub fn with_host(self, ip: IpAddr) -> Self {
        Self {
            host: ip.to_string(),
            ..self
        }
    }
}

impl fmt::Display for EnodeRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "enode://{}@[{}]:{}", self.node_id, self.host, self.port)
        } else {
            write!(f, "enode://{}@{}:{}", self.node_id, self.host, self.port)
        }
    }
}

/// Find the first well-formed enode record in `output`.
///
/// The host is usually a placeholder (`[::]` or a container-local address)
/// and has to be replaced with [`EnodeRecord::with_host`].
pub fn parse_enode(output: &str) -> Result<EnodeRecord, ParseError> {
    let start = output.find("enode://").ok_or(ParseError::MissingEnode)?;

    RE_ENODE
        .captures_iter(output)
        .find_map(|captures| {
            let port = captures[3].parse::<u16>().ok()?;
            let host = captures[2].trim_start_matches('[').trim_end_matches(']');
            Some(EnodeRecord {
                node_id: captures[1].to_string(),
                host: host.to_string(),
                port,
            })
        })
        .ok_or_else(|| {
            let record = output[start..]
                .split(|c: char| c.is_whitespace() || c == '"' || c == '\'')
                .next()
                .unwrap_or_default();
            ParseError::MalformedEnode(record.to_string())
        })
}
