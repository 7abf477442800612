//! Encode oracle identities into a single aggregator configuration.
//!
//! # Ordering
//!
//! The aggregator identifies oracles by their position in the signer and transmitter lists, and
//! oracles locate their encrypted shared secret (and their peers' keys) by the same position. All
//! of these lists are therefore derived from one explicit sort of the oracle set by [OracleId].
//!
//! # Threshold
//!
//! The aggregator requires `f < n`. The off-chain protocol additionally assumes `n >= 3f + 1` to
//! tolerate `f` Byzantine oracles. Smaller test networks are accepted with a warning.

use crate::{identity::OracleIdentity, Address, Error, OracleId};
use bytes::Bytes;
use commonware_codec::Encode;
use std::{collections::BTreeSet, time::Duration};
use tracing::{debug, warn};

pub mod encryption;
pub mod wire;

use encryption::{SecretEncryptor, SharedSecret};
use wire::{OffchainConfig, CONFIG_DIGEST_LENGTH, MAX_ORACLES, MAX_PEER_ID_LENGTH};

/// Version tag of the encoded configuration format.
pub const ENCODED_CONFIG_VERSION: u64 = 1;

/// Protocol parameters shared by every oracle.
#[derive(Clone, Debug)]
pub struct SharedConfigParameters {
    /// Time without progress before a new leader is elected.
    pub delta_progress: Duration,

    /// Interval at which nodes resend their latest messages.
    pub delta_resend: Duration,

    /// Duration of a single round.
    pub delta_round: Duration,

    /// Grace period for slow oracles to contribute observations.
    pub delta_grace: Duration,

    /// Maximum time between reports.
    pub delta_c: Duration,

    /// Deviation (in parts per billion) that triggers a new report.
    pub alpha_ppb: u64,

    /// Delay between transmission stages.
    pub delta_stage: Duration,

    /// Maximum number of rounds in an epoch.
    pub r_max: u8,

    /// Number of oracles transmitting in each stage. When empty, every oracle transmits in its
    /// own stage. Otherwise the stages must add up to the number of oracles (in at most
    /// [MAX_ORACLES] stages).
    pub schedule: Vec<u8>,

    /// Maximum number of faulty oracles tolerated.
    pub f: u8,

    pub shared_secret: SharedSecret,
}

impl Default for SharedConfigParameters {
    fn default() -> Self {
        Self {
            delta_progress: Duration::from_secs(30),
            delta_resend: Duration::from_secs(10),
            delta_round: Duration::from_secs(15),
            delta_grace: Duration::from_secs(2),
            delta_c: Duration::from_secs(120 * 60),
            alpha_ppb: 10_000_000,
            delta_stage: Duration::from_secs(30),
            r_max: 4,
            schedule: Vec::new(),
            f: 1,
            shared_secret: SharedSecret::new([1, 2, 3, 4, 5, 6, 7, 8, 1, 2, 3, 4, 5, 6, 7, 8]),
        }
    }
}

/// Arguments of a single `setConfig` call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedContractConfig {
    /// Oracles in configuration order.
    pub oracles: Vec<OracleId>,
    pub signers: Vec<Address>,
    pub transmitters: Vec<Address>,
    pub threshold: u8,
    pub version: u64,
    pub encoded: Bytes,
}

/// Derive the aggregator configuration from `params` and the identity of every oracle.
///
/// `identities` may be provided in any order: the result only depends on its contents.
pub fn encode_config<I, S>(
    params: &SharedConfigParameters,
    identities: I,
    encryptor: &mut S,
) -> Result<EncodedContractConfig, Error>
where
    I: IntoIterator<Item = (OracleId, OracleIdentity)>,
    S: SecretEncryptor,
{
    // Establish the configuration order
    let mut identities: Vec<(OracleId, OracleIdentity)> = identities.into_iter().collect();
    identities.sort_by(|(a, _), (b, _)| a.cmp(b));
    if identities.is_empty() {
        return Err(Error::NoOracles);
    }
    for pair in identities.windows(2) {
        if pair[0].0 == pair[1].0 {
            return Err(Error::DuplicateOracle(pair[0].0.clone()));
        }
    }
    let n = identities.len();
    if n > MAX_ORACLES {
        return Err(Error::TooManyOracles {
            count: n,
            max: MAX_ORACLES,
        });
    }

    // Validate the threshold
    let f = params.f;
    if usize::from(f) >= n {
        return Err(Error::Threshold { f, oracles: n });
    }
    if n < 3 * usize::from(f) + 1 {
        warn!(f, oracles = n, "oracle set cannot tolerate f byzantine faults");
    }

    // Derive every list from the same order
    let mut signers = Vec::with_capacity(n);
    let mut transmitters = Vec::with_capacity(n);
    let mut config_keys = Vec::with_capacity(n);
    let mut off_chain_public_keys = Vec::with_capacity(n);
    let mut peer_ids = Vec::with_capacity(n);
    let mut seen_signers = BTreeSet::new();
    let mut seen_transmitters = BTreeSet::new();
    for (oracle, identity) in &identities {
        if identity.peer_id.len() > MAX_PEER_ID_LENGTH {
            return Err(Error::PeerIdTooLong {
                oracle: oracle.clone(),
                length: identity.peer_id.len(),
                max: MAX_PEER_ID_LENGTH,
            });
        }
        if !seen_signers.insert(identity.signing_address) {
            return Err(Error::DuplicateSigner(identity.signing_address));
        }
        if !seen_transmitters.insert(identity.transmit_address) {
            return Err(Error::DuplicateTransmitter(identity.transmit_address));
        }
        signers.push(identity.signing_address);
        transmitters.push(identity.transmit_address);
        config_keys.push(identity.config_public_key);
        off_chain_public_keys.push(identity.off_chain_public_key);
        peer_ids.push(identity.peer_id.clone());
    }
    let schedule = if params.schedule.is_empty() {
        vec![1; n]
    } else {
        params.schedule.clone()
    };
    let stages: usize = schedule.iter().map(|count| usize::from(*count)).sum();
    if schedule.len() > MAX_ORACLES || stages != n {
        return Err(Error::InvalidSchedule {
            schedule,
            oracles: n,
        });
    }

    // Encrypt the shared secret to every oracle (in configuration order)
    let shared_secret = encryptor.encrypt(&params.shared_secret, &config_keys)?;
    if shared_secret.encryptions.len() != n {
        return Err(Error::Encryption("encryptor returned wrong number of encryptions"));
    }

    let offchain = OffchainConfig {
        delta_progress: params.delta_progress,
        delta_resend: params.delta_resend,
        delta_round: params.delta_round,
        delta_grace: params.delta_grace,
        delta_c: params.delta_c,
        alpha_ppb: params.alpha_ppb,
        delta_stage: params.delta_stage,
        r_max: params.r_max,
        schedule,
        off_chain_public_keys,
        peer_ids,
        shared_secret,
        f,
        config_digest: [0; CONFIG_DIGEST_LENGTH],
    };
    let encoded = offchain.encode().freeze();
    debug!(oracles = n, threshold = f, len = encoded.len(), "encoded config");
    Ok(EncodedContractConfig {
        oracles: identities.into_iter().map(|(id, _)| id).collect(),
        signers,
        transmitters,
        threshold: f,
        version: ENCODED_CONFIG_VERSION,
        encoded,
    })
}
