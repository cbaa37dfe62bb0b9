//! Genesis document generation.

use std::collections::BTreeMap;

use alloy_core::primitives::Address;
use anyhow::{Context, Result};
use serde_json::{Map, Value, json};

use super::GethConf;
use crate::template;

/// Built-in genesis template.
pub const GENESIS_TEMPLATE: &str = include_str!("../../../resources/geth/genesis.json");

/// `count` synthetic pre-funded addresses: `0x00..01`, `0x00..02`, ...
pub fn fake_accounts(count: u64) -> Vec<Address> {
    (1..=count)
        .map(|i| {
            let mut bytes = [0u8; 20];
            bytes[12..].copy_from_slice(&i.to_be_bytes());
            Address::from(bytes)
        })
        .collect()
}

/// Hex quantity in the `0x0<UPPER HEX>` form geth genesis files use.
fn quantity(value: u64) -> String {
    format!("0x0{value:X}")
}

/// Balance allocation for the node wallets and `conf.extra_accounts` fake
/// accounts.
pub fn alloc(conf: &GethConf, wallets: &[Address]) -> Map<String, Value> {
    wallets
        .iter()
        .copied()
        .chain(fake_accounts(conf.extra_accounts))
        .map(|address| {
            (
                format!("0x{}", hex::encode(address.as_slice())),
                json!({ "balance": conf.init_balance }),
            )
        })
        .collect()
}

/// Render the genesis document from `template`.
pub fn render_genesis(template: &str, conf: &GethConf, wallets: &[Address]) -> Result<String> {
    let alloc = serde_json::to_string_pretty(&alloc(conf, wallets))
        .context("Failed to serialize the genesis allocation")?;

    let values = BTreeMap::from([
        ("chainId", conf.network_id.to_string()),
        ("homesteadBlock", conf.homestead_block.to_string()),
        ("eip155Block", conf.eip155_block.to_string()),
        ("eip158Block", conf.eip158_block.to_string()),
        ("difficulty", quantity(conf.difficulty)),
        ("gasLimit", quantity(conf.gas_limit)),
        ("alloc", alloc),
    ]);

    template::render(template, &values).context("Failed to render the genesis template")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn conf() -> GethConf {
        GethConf {
            extra_accounts: 2,
            ..GethConf::default()
        }
    }

    #[test]
    fn test_fake_accounts() {
        let accounts = fake_accounts(17);
        assert_eq!(accounts.len(), 17);
        assert_eq!(
            hex::encode(accounts[0].as_slice()),
            "0000000000000000000000000000000000000001"
        );
        assert_eq!(
            hex::encode(accounts[16].as_slice()),
            "0000000000000000000000000000000000000011"
        );
        assert!(fake_accounts(0).is_empty());
    }

    #[test]
    fn test_quantity() {
        assert_eq!(quantity(100000), "0x0186A0");
        assert_eq!(quantity(4000000), "0x03D0900");
    }

    #[test]
    fn test_render_builtin_template() {
        let wallets = vec![Address::repeat_byte(0xab), Address::repeat_byte(0xcd)];
        let rendered = render_genesis(GENESIS_TEMPLATE, &conf(), &wallets).unwrap();

        let genesis: Value = serde_json::from_str(&rendered).expect("genesis is valid JSON");
        assert_eq!(genesis["config"]["chainId"], 15468);
        assert_eq!(genesis["difficulty"], "0x0186A0");

        let alloc = genesis["alloc"].as_object().unwrap();
        assert_eq!(alloc.len(), 4);
        assert_eq!(
            alloc["0xabababababababababababababababababababab"]["balance"],
            "100000000000000000000"
        );
        assert!(alloc.contains_key("0x0000000000000000000000000000000000000002"));
    }

    #[test]
    fn test_render_custom_template() {
        let rendered = render_genesis(r#"{"chain": {{chainId}}}"#, &conf(), &[]).unwrap();
        assert_eq!(rendered, r#"{"chain": 15468}"#);
    }
}
