//! Collect the identity every oracle contributes to the aggregator configuration.
//!
//! Oracle nodes report their keys as namespaced, hex-encoded strings. Every identity is validated
//! strictly: a node must report exactly one peer-to-peer key and exactly one key bundle, and
//! fixed-length keys are never truncated or padded.

use crate::{
    config::encryption::PUBLIC_KEY_LENGTH, types::decode_fixed, Address, Error, OracleClient,
    OracleId,
};
use commonware_utils::from_hex;
use futures::future::try_join_all;
use std::collections::BTreeMap;
use tracing::debug;

/// Namespace of peer-to-peer identifiers.
pub const P2P_PREFIX: &str = "p2p_";

/// Namespace of on-chain signing addresses.
pub const SIGNING_ADDRESS_PREFIX: &str = "ocrsad_";

/// Namespace of off-chain public keys.
pub const OFF_CHAIN_KEY_PREFIX: &str = "ocroff_";

/// Namespace of config (shared secret encryption) public keys.
pub const CONFIG_KEY_PREFIX: &str = "ocrcfg_";

/// Length of an off-chain public key (in bytes).
pub const OFF_CHAIN_KEY_LENGTH: usize = 32;

/// The keys and network identifiers a single oracle contributes to the configuration.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OracleIdentity {
    /// Account the oracle submits reports from.
    pub transmit_address: Address,

    /// Address whose signatures the aggregator accepts for this oracle.
    pub signing_address: Address,

    /// Key authenticating the oracle's off-chain protocol messages.
    pub off_chain_public_key: [u8; OFF_CHAIN_KEY_LENGTH],

    /// Key the shared secret is encrypted to.
    pub config_public_key: [u8; PUBLIC_KEY_LENGTH],

    /// Transport-level identifier (without namespace).
    pub peer_id: String,

    /// Identifier the oracle's API uses for its key bundle.
    pub key_bundle_id: String,
}

/// Remove `prefix` from `value` if present.
pub fn strip_prefix<'a>(value: &'a str, prefix: &str) -> &'a str {
    value.strip_prefix(prefix).unwrap_or(value)
}

fn decode_key<const N: usize>(
    oracle: &OracleId,
    field: &'static str,
    value: &str,
    prefix: &str,
) -> Result<[u8; N], Error> {
    let stripped = strip_prefix(value.trim(), prefix);
    let bytes = stripped
        .is_ascii()
        .then(|| from_hex(stripped))
        .flatten()
        .ok_or_else(|| Error::InvalidHex {
            oracle: oracle.clone(),
            field,
            value: value.to_string(),
        })?;
    let actual = bytes.len();
    bytes.try_into().map_err(|_| Error::KeyLength {
        oracle: oracle.clone(),
        field,
        expected: N,
        actual,
    })
}

pub(crate) fn decode_address(
    oracle: &OracleId,
    field: &'static str,
    value: &str,
    prefix: &str,
) -> Result<Address, Error> {
    let stripped = strip_prefix(value.trim(), prefix);
    decode_fixed(stripped)
        .map(Address::new)
        .ok_or_else(|| Error::InvalidHex {
            oracle: oracle.clone(),
            field,
            value: value.to_string(),
        })
}

fn exactly_one<T>(oracle: &OracleId, kind: &'static str, mut items: Vec<T>) -> Result<T, Error> {
    if items.len() != 1 {
        return Err(Error::KeyCount {
            oracle: oracle.clone(),
            kind,
            found: items.len(),
        });
    }
    Ok(items.remove(0))
}

/// Query `client` for its keys and assemble its identity.
pub async fn collect_identity<O: OracleClient>(
    oracle: &OracleId,
    client: &O,
    transmitter_index: usize,
) -> Result<OracleIdentity, Error> {
    // Select the transmitter among the currency keys
    let mut currency_keys = client.currency_keys().await?;
    if currency_keys.len() <= transmitter_index {
        return Err(Error::MissingTransmitter {
            oracle: oracle.clone(),
            index: transmitter_index,
            available: currency_keys.len(),
        });
    }
    let transmitter = currency_keys.swap_remove(transmitter_index);
    let transmit_address = decode_address(oracle, "transmit address", &transmitter.address, "")?;

    // Exactly one peer-to-peer key
    let p2p = exactly_one(oracle, "p2p keys", client.p2p_keys().await?)?;
    let peer_id = strip_prefix(p2p.peer_id.trim(), P2P_PREFIX).to_string();
    if peer_id.is_empty() {
        return Err(Error::EmptyPeerId(oracle.clone()));
    }

    // Exactly one key bundle
    let bundle = exactly_one(oracle, "key bundles", client.key_bundles().await?)?;
    let signing_address = decode_address(
        oracle,
        "signing address",
        &bundle.on_chain_signing_address,
        SIGNING_ADDRESS_PREFIX,
    )?;
    let off_chain_public_key = decode_key(
        oracle,
        "off-chain public key",
        &bundle.off_chain_public_key,
        OFF_CHAIN_KEY_PREFIX,
    )?;
    let config_public_key = decode_key(
        oracle,
        "config public key",
        &bundle.config_public_key,
        CONFIG_KEY_PREFIX,
    )?;

    debug!(%oracle, transmitter = %transmit_address, signer = %signing_address, "collected identity");
    Ok(OracleIdentity {
        transmit_address,
        signing_address,
        off_chain_public_key,
        config_public_key,
        peer_id,
        key_bundle_id: bundle.id,
    })
}

/// Collect the identity of every oracle concurrently.
///
/// The aggregation only succeeds if every oracle reports a valid identity.
pub async fn collect_identities<O: OracleClient>(
    oracles: &BTreeMap<OracleId, O>,
    transmitter_index: usize,
) -> Result<BTreeMap<OracleId, OracleIdentity>, Error> {
    let identities = try_join_all(oracles.iter().map(|(oracle, client)| async move {
        let identity = collect_identity(oracle, client, transmitter_index).await?;
        Ok::<_, Error>((oracle.clone(), identity))
    }))
    .await?;
    Ok(identities.into_iter().collect())
}
