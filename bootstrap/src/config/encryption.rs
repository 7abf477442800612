//! Deliver the shared secret to every oracle.
//!
//! The default [X25519Encryptor] generates one ephemeral X25519 key per configuration and, for
//! every recipient, derives a ChaCha20-Poly1305 key from the Diffie-Hellman output with
//! HKDF-SHA256. Each key is used exactly once, so a constant nonce is safe.

use crate::Error;
use chacha20poly1305::{
    aead::{generic_array::typenum::Unsigned, Aead},
    AeadCore, ChaCha20Poly1305, KeyInit, KeySizeUser,
};
use hkdf::Hkdf;
use rand::{CryptoRng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt;
use x25519_dalek::{PublicKey, StaticSecret};
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the shared secret (in bytes).
pub const SHARED_SECRET_LENGTH: usize = 16;

/// Length of a config public key (in bytes).
pub const PUBLIC_KEY_LENGTH: usize = 32;

/// Length of a single encrypted shared secret (ciphertext and tag).
pub const ENCRYPTION_LENGTH: usize =
    SHARED_SECRET_LENGTH + <ChaCha20Poly1305 as AeadCore>::TagSize::USIZE;

const KEY_LENGTH: usize = <ChaCha20Poly1305 as KeySizeUser>::KeySize::USIZE;
const NONCE_LENGTH: usize = <ChaCha20Poly1305 as AeadCore>::NonceSize::USIZE;

/// Prefix of the HKDF salt.
const KDF_PREFIX: &[u8] = b"ocrnet/shared-secret/KDF/v1/";

/// The protocol-wide secret every oracle must learn.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_LENGTH]);

impl SharedSecret {
    pub const fn new(bytes: [u8; SHARED_SECRET_LENGTH]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_LENGTH] {
        &self.0
    }

    /// Returns the SHA-256 digest of the secret (published so recipients can check decryption).
    pub fn hash(&self) -> [u8; 32] {
        Sha256::digest(self.0).into()
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SharedSecret(..)")
    }
}

/// The shared secret encrypted to an ordered list of recipients.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncryptedSecrets {
    /// Public key of the ephemeral sender key.
    pub dh_point: [u8; PUBLIC_KEY_LENGTH],

    /// SHA-256 digest of the plaintext secret.
    pub secret_hash: [u8; 32],

    /// One encryption per recipient, in the order the recipients were provided.
    pub encryptions: Vec<[u8; ENCRYPTION_LENGTH]>,
}

/// Encrypt a shared secret to a list of config public keys.
pub trait SecretEncryptor {
    /// Encrypt `secret` to every recipient. The returned encryptions must follow the order of
    /// `recipients`.
    fn encrypt(
        &mut self,
        secret: &SharedSecret,
        recipients: &[[u8; PUBLIC_KEY_LENGTH]],
    ) -> Result<EncryptedSecrets, Error>;
}

/// Ephemeral-static X25519 encryptor.
pub struct X25519Encryptor<R: RngCore + CryptoRng> {
    rng: R,
}

impl<R: RngCore + CryptoRng> X25519Encryptor<R> {
    pub fn new(rng: R) -> Self {
        Self { rng }
    }
}

fn derive_cipher(
    shared: &[u8],
    dh_point: &[u8; PUBLIC_KEY_LENGTH],
    recipient: &[u8; PUBLIC_KEY_LENGTH],
) -> Result<ChaCha20Poly1305, Error> {
    let mut salt: [u8; 32] = Sha256::new()
        .chain_update(KDF_PREFIX)
        .chain_update(dh_point)
        .chain_update(recipient)
        .finalize()
        .into();
    let prk = Hkdf::<Sha256>::new(Some(salt.as_slice()), shared);
    salt.zeroize();

    let mut key = [0u8; KEY_LENGTH];
    prk.expand(b"encryption", &mut key)
        .map_err(|_| Error::Encryption("key expansion failed"))?;
    let cipher = ChaCha20Poly1305::new_from_slice(&key)
        .map_err(|_| Error::Encryption("invalid cipher key"));
    key.zeroize();
    cipher
}

impl<R: RngCore + CryptoRng> SecretEncryptor for X25519Encryptor<R> {
    fn encrypt(
        &mut self,
        secret: &SharedSecret,
        recipients: &[[u8; PUBLIC_KEY_LENGTH]],
    ) -> Result<EncryptedSecrets, Error> {
        let ephemeral = StaticSecret::random_from_rng(&mut self.rng);
        let dh_point = PublicKey::from(&ephemeral).to_bytes();

        let nonce = [0u8; NONCE_LENGTH];
        let mut encryptions = Vec::with_capacity(recipients.len());
        for recipient in recipients {
            let shared = ephemeral.diffie_hellman(&PublicKey::from(*recipient));
            if !shared.was_contributory() {
                return Err(Error::Encryption("config public key has low order"));
            }
            let cipher = derive_cipher(shared.as_bytes(), &dh_point, recipient)?;
            let ciphertext = cipher
                .encrypt((&nonce).into(), secret.as_bytes().as_slice())
                .map_err(|_| Error::Encryption("encryption failed"))?;
            let encryption: [u8; ENCRYPTION_LENGTH] = ciphertext
                .try_into()
                .map_err(|_| Error::Encryption("unexpected ciphertext length"))?;
            encryptions.push(encryption);
        }
        Ok(EncryptedSecrets {
            dh_point,
            secret_hash: secret.hash(),
            encryptions,
        })
    }
}

/// Recover the shared secret from the encryption addressed to `secret_key`.
///
/// Returns `None` if the encryption was not addressed to `secret_key` (or was tampered with).
pub fn decrypt(
    secret_key: &StaticSecret,
    dh_point: &[u8; PUBLIC_KEY_LENGTH],
    encryption: &[u8; ENCRYPTION_LENGTH],
) -> Option<SharedSecret> {
    let recipient = PublicKey::from(secret_key).to_bytes();
    let shared = secret_key.diffie_hellman(&PublicKey::from(*dh_point));
    let cipher = derive_cipher(shared.as_bytes(), dh_point, &recipient).ok()?;
    let nonce = [0u8; NONCE_LENGTH];
    let mut plaintext = cipher.decrypt((&nonce).into(), encryption.as_slice()).ok()?;
    let secret = plaintext.as_slice().try_into().ok().map(SharedSecret::new);
    plaintext.zeroize();
    secret
}
