//! Identifiers and chain primitives shared by every stage.

pub use alloy_primitives::{Address, TxHash, U256};
use commonware_utils::from_hex;
use std::{fmt, str::FromStr};

/// Decode a hex string of exactly `N` bytes, tolerating a `0x` prefix.
pub(crate) fn decode_fixed<const N: usize>(value: &str) -> Option<[u8; N]> {
    let value = value.trim();
    let value = value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
        .unwrap_or(value);
    if !value.is_ascii() {
        return None;
    }
    from_hex(value)?.try_into().ok()
}

/// Parse a hex-encoded address (with or without `0x`, in any case).
///
/// Mixed-case input is not checked against its checksum.
pub fn parse_address(value: &str) -> Option<Address> {
    let value = value.trim();
    if !value.is_ascii() {
        return None;
    }
    Address::from_str(value).ok()
}

macro_rules! service_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(String);

        impl $name {
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

service_id!(
    /// Stable identifier of a chain peer (for example `chain-peer-0`).
    PeerId
);

service_id!(
    /// Stable identifier of an oracle node.
    ///
    /// The lexicographic order of these identifiers is the order used for every list submitted
    /// on-chain.
    OracleId
);

service_id!(
    /// Identifier of any provisioned service (databases, data sources, ...).
    ServiceId
);

/// A host and port a service can be reached at.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Returns the `http://` URL of the endpoint.
    pub fn http(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Information a chain peer reports about itself.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    /// Transport-level node identifier.
    pub id: String,

    /// Externally addressable identifier other peers dial (`enode://...`).
    pub enode: String,
}

/// A connection reported by a chain peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PeerInfo {
    /// Node identifier of the remote peer.
    pub id: String,

    /// Remote address of the connection, if reported.
    pub remote_address: Option<String>,
}

/// The outcome of a transaction as reported by a chain client.
///
/// A receipt may exist before the transaction is included in a block (for example while it sits
/// in the pending pool), in which case `block_number` is `None`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Receipt {
    pub tx: TxHash,
    pub block_number: Option<u64>,
    pub contract_address: Option<Address>,
    pub success: bool,
}

impl Receipt {
    /// Returns true if the transaction has been included in a block.
    pub fn is_mined(&self) -> bool {
        self.block_number.is_some()
    }
}

/// A currency-holding key as listed by an oracle node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CurrencyKey {
    pub address: String,
    pub balance: Option<String>,
}

/// A peer-to-peer key as listed by an oracle node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct P2pKey {
    pub peer_id: String,
    pub public_key: String,
}

/// A protocol key bundle as listed by an oracle node.
///
/// All fields arrive exactly as the node reports them (namespaced, hex-encoded).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KeyBundle {
    pub id: String,
    pub on_chain_signing_address: String,
    pub off_chain_public_key: String,
    pub config_public_key: String,
}

/// Identifier of a job accepted by an oracle node.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobId(pub String);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
