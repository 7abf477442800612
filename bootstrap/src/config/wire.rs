//! Binary layout of the configuration blob stored by the aggregator.
//!
//! All integers are big-endian. Lists are prefixed with their length as a `u32`, durations are
//! encoded as nanoseconds.

use super::encryption::{EncryptedSecrets, ENCRYPTION_LENGTH, PUBLIC_KEY_LENGTH};
use crate::identity::OFF_CHAIN_KEY_LENGTH;
use bytes::{Buf, BufMut};
use commonware_codec::{EncodeSize, Error, Read, ReadExt, Write};
use std::time::Duration;

/// Maximum number of oracles an aggregator accepts.
pub const MAX_ORACLES: usize = 31;

/// Maximum length of an encoded peer identifier.
pub const MAX_PEER_ID_LENGTH: usize = 128;

/// Length of the configuration digest placeholder.
pub const CONFIG_DIGEST_LENGTH: usize = 16;

/// Everything the oracles need to run the off-chain protocol that is not part of the signer and
/// transmitter lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OffchainConfig {
    pub delta_progress: Duration,
    pub delta_resend: Duration,
    pub delta_round: Duration,
    pub delta_grace: Duration,
    pub delta_c: Duration,
    pub alpha_ppb: u64,
    pub delta_stage: Duration,
    pub r_max: u8,
    pub schedule: Vec<u8>,
    pub off_chain_public_keys: Vec<[u8; OFF_CHAIN_KEY_LENGTH]>,
    pub peer_ids: Vec<String>,
    pub shared_secret: EncryptedSecrets,
    pub f: u8,
    pub config_digest: [u8; CONFIG_DIGEST_LENGTH],
}

fn write_duration(duration: &Duration, buf: &mut impl BufMut) {
    let nanos = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
    nanos.write(buf);
}

fn read_duration(buf: &mut impl Buf) -> Result<Duration, Error> {
    Ok(Duration::from_nanos(u64::read(buf)?))
}

fn write_len(len: usize, buf: &mut impl BufMut) {
    (len as u32).write(buf);
}

fn read_len(buf: &mut impl Buf, max: usize, context: &'static str) -> Result<usize, Error> {
    let len = u32::read(buf)? as usize;
    if len > max {
        return Err(Error::Invalid(context, "too many items"));
    }
    Ok(len)
}

impl Write for OffchainConfig {
    fn write(&self, buf: &mut impl BufMut) {
        write_duration(&self.delta_progress, buf);
        write_duration(&self.delta_resend, buf);
        write_duration(&self.delta_round, buf);
        write_duration(&self.delta_grace, buf);
        write_duration(&self.delta_c, buf);
        self.alpha_ppb.write(buf);
        write_duration(&self.delta_stage, buf);
        self.r_max.write(buf);

        write_len(self.schedule.len(), buf);
        for count in &self.schedule {
            count.write(buf);
        }
        write_len(self.off_chain_public_keys.len(), buf);
        for key in &self.off_chain_public_keys {
            key.write(buf);
        }
        write_len(self.peer_ids.len(), buf);
        for peer_id in &self.peer_ids {
            write_len(peer_id.len(), buf);
            buf.put_slice(peer_id.as_bytes());
        }

        self.shared_secret.dh_point.write(buf);
        self.shared_secret.secret_hash.write(buf);
        write_len(self.shared_secret.encryptions.len(), buf);
        for encryption in &self.shared_secret.encryptions {
            encryption.write(buf);
        }

        self.f.write(buf);
        self.config_digest.write(buf);
    }
}

impl EncodeSize for OffchainConfig {
    fn encode_size(&self) -> usize {
        let n = self.off_chain_public_keys.len();
        let peer_ids: usize = self.peer_ids.iter().map(|id| 4 + id.len()).sum();
        8 * 7
            + 1
            + (4 + self.schedule.len())
            + (4 + n * OFF_CHAIN_KEY_LENGTH)
            + (4 + peer_ids)
            + PUBLIC_KEY_LENGTH
            + 32
            + (4 + self.shared_secret.encryptions.len() * ENCRYPTION_LENGTH)
            + 1
            + CONFIG_DIGEST_LENGTH
    }
}

impl Read for OffchainConfig {
    type Cfg = ();

    fn read_cfg(buf: &mut impl Buf, _: &()) -> Result<Self, Error> {
        let delta_progress = read_duration(buf)?;
        let delta_resend = read_duration(buf)?;
        let delta_round = read_duration(buf)?;
        let delta_grace = read_duration(buf)?;
        let delta_c = read_duration(buf)?;
        let alpha_ppb = u64::read(buf)?;
        let delta_stage = read_duration(buf)?;
        let r_max = u8::read(buf)?;

        let len = read_len(buf, MAX_ORACLES, "schedule")?;
        let schedule = (0..len).map(|_| u8::read(buf)).collect::<Result<_, _>>()?;
        let len = read_len(buf, MAX_ORACLES, "off-chain public keys")?;
        let off_chain_public_keys = (0..len)
            .map(|_| <[u8; OFF_CHAIN_KEY_LENGTH]>::read(buf))
            .collect::<Result<_, _>>()?;
        let len = read_len(buf, MAX_ORACLES, "peer ids")?;
        let mut peer_ids = Vec::with_capacity(len);
        for _ in 0..len {
            let len = read_len(buf, MAX_PEER_ID_LENGTH, "peer id")?;
            if buf.remaining() < len {
                return Err(Error::EndOfBuffer);
            }
            let bytes = buf.copy_to_bytes(len);
            let peer_id = String::from_utf8(bytes.to_vec())
                .map_err(|_| Error::Invalid("peer id", "not utf-8"))?;
            peer_ids.push(peer_id);
        }

        let dh_point = <[u8; PUBLIC_KEY_LENGTH]>::read(buf)?;
        let secret_hash = <[u8; 32]>::read(buf)?;
        let len = read_len(buf, MAX_ORACLES, "encryptions")?;
        let encryptions = (0..len)
            .map(|_| <[u8; ENCRYPTION_LENGTH]>::read(buf))
            .collect::<Result<_, _>>()?;

        let f = u8::read(buf)?;
        let config_digest = <[u8; CONFIG_DIGEST_LENGTH]>::read(buf)?;
        Ok(Self {
            delta_progress,
            delta_resend,
            delta_round,
            delta_grace,
            delta_c,
            alpha_ppb,
            delta_stage,
            r_max,
            schedule,
            off_chain_public_keys,
            peer_ids,
            shared_secret: EncryptedSecrets {
                dh_point,
                secret_hash,
                encryptions,
            },
            f,
            config_digest,
        })
    }
}
