//! Built-in protocol plugins.

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};

pub mod geth;
pub use geth::Geth;

pub mod plumtree;
pub use plumtree::Plumtree;

/// Overlay the request's `params` on a plugin's JSON `defaults` document and
/// read the result as the plugin's configuration.
pub(crate) fn merge_params<C: DeserializeOwned>(defaults: &str, params: &Map<String, Value>) -> Result<C> {
    let mut merged: Map<String, Value> =
        serde_json::from_str(defaults).context("Failed to parse the default parameters")?;
    merged.extend(params.iter().map(|(k, v)| (k.clone(), v.clone())));

    serde_json::from_value(Value::Object(merged)).context("Invalid protocol parameters")
}
