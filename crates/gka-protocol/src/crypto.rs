//! Key-exchange primitive and secret handling.
//!
//! The protocol only needs `generate_keypair` and `agree`; everything else
//! treats secrets and public values as opaque byte strings. The shipped
//! primitive is X25519. The star-topology variant additionally wraps the
//! group secret with XChaCha20-Poly1305 under an HKDF-derived key.
use std::fmt;

use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use hkdf::Hkdf;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use x25519_dalek::{PublicKey as X25519PublicKey, StaticSecret as X25519Secret};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::GkaError;

/// HKDF info string for domain separation.
const HKDF_INFO: &[u8] = b"gka-distributed-xchacha20poly1305-v1";

/// Length of X25519 scalars and points.
pub const KEY_LEN: usize = 32;

/// Length of the XChaCha20 extended nonce.
pub const NONCE_LEN: usize = 24;

// ── Secret ──────────────────────────────────────────────────────────

/// Sensitive key material. Wiped on drop, compared in constant time, and
/// only ever printed in redacted form.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Secret(Vec<u8>);

impl Secret {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// First and last three hex digits, e.g. `3fa...9c1`.
    pub fn short_repr(&self) -> String {
        let hex = hex::encode(&self.0);
        if hex.len() <= 6 {
            return hex;
        }
        format!("{}...{}", &hex[..3], &hex[hex.len() - 3..])
    }
}

impl PartialEq for Secret {
    fn eq(&self, other: &Self) -> bool {
        self.0.ct_eq(&other.0).into()
    }
}

impl Eq for Secret {}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Secret({})", self.short_repr())
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short_repr())
    }
}

// ── PublicValue ─────────────────────────────────────────────────────

/// Public half of a keypair, safe to transmit.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PublicValue(#[serde(with = "serde_bytes")] Vec<u8>);

impl PublicValue {
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for PublicValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let hex = hex::encode(&self.0);
        let short = if hex.len() > 12 { &hex[..12] } else { &hex };
        write!(f, "PublicValue({short}...)")
    }
}

// ── KeyExchange ─────────────────────────────────────────────────────

/// Opaque Diffie-Hellman group.
///
/// `agree(a, public_of(b)) == agree(b, public_of(a))` must hold for any two
/// secrets, and the output of `agree` must itself be usable as a secret.
pub trait KeyExchange: Send + Sync {
    fn generate_keypair(&self, rng: &mut dyn RngCore) -> (Secret, PublicValue);

    fn agree(&self, secret: &Secret, peer: &PublicValue) -> Result<Secret, GkaError>;

    /// Public value belonging to `secret`.
    fn public_of(&self, secret: &Secret) -> Result<PublicValue, GkaError>;
}

/// X25519 (RFC 7748).
#[derive(Debug, Default, Clone, Copy)]
pub struct X25519Exchange;

impl X25519Exchange {
    fn scalar(secret: &Secret) -> Result<X25519Secret, GkaError> {
        let bytes: [u8; KEY_LEN] = secret.as_bytes().try_into().map_err(|_| {
            GkaError::Crypto(format!(
                "secret must be {KEY_LEN} bytes, got {}",
                secret.as_bytes().len()
            ))
        })?;
        Ok(X25519Secret::from(bytes))
    }

    fn point(public: &PublicValue) -> Result<X25519PublicKey, GkaError> {
        let bytes: [u8; KEY_LEN] = public.as_bytes().try_into().map_err(|_| {
            GkaError::Crypto(format!(
                "public value must be {KEY_LEN} bytes, got {}",
                public.as_bytes().len()
            ))
        })?;
        Ok(X25519PublicKey::from(bytes))
    }
}

impl KeyExchange for X25519Exchange {
    fn generate_keypair(&self, rng: &mut dyn RngCore) -> (Secret, PublicValue) {
        let mut bytes = [0u8; KEY_LEN];
        rng.fill_bytes(&mut bytes);
        let scalar = X25519Secret::from(bytes);
        bytes.zeroize();
        let public = X25519PublicKey::from(&scalar);
        (
            Secret(scalar.to_bytes().to_vec()),
            PublicValue(public.to_bytes().to_vec()),
        )
    }

    fn agree(&self, secret: &Secret, peer: &PublicValue) -> Result<Secret, GkaError> {
        let shared = Self::scalar(secret)?.diffie_hellman(&Self::point(peer)?);
        if !shared.was_contributory() {
            return Err(GkaError::Crypto("low-order public value".into()));
        }
        Ok(Secret(shared.as_bytes().to_vec()))
    }

    fn public_of(&self, secret: &Secret) -> Result<PublicValue, GkaError> {
        let public = X25519PublicKey::from(&Self::scalar(secret)?);
        Ok(PublicValue(public.to_bytes().to_vec()))
    }
}

// ── Group secret wrapping ───────────────────────────────────────────

/// Derive a 32-byte encryption key from a DH shared secret using HKDF-SHA256.
fn derive_key(shared_secret: &Secret) -> [u8; KEY_LEN] {
    let hkdf = Hkdf::<Sha256>::new(None, shared_secret.as_bytes());
    let mut key = [0u8; KEY_LEN];
    hkdf.expand(HKDF_INFO, &mut key)
        .expect("HKDF-SHA256 expand to 32 bytes always succeeds");
    key
}

/// Encrypt `group_secret` under a key derived from `shared_secret`.
pub fn seal_group_secret(
    shared_secret: &Secret,
    group_secret: &Secret,
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>, GkaError> {
    let mut key = derive_key(shared_secret);
    let cipher = XChaCha20Poly1305::new(&key.into());
    key.zeroize();
    cipher
        .encrypt(XNonce::from_slice(nonce), group_secret.as_bytes())
        .map_err(|e| GkaError::Crypto(format!("encryption failed: {e}")))
}

/// Decrypt a group secret sealed by [`seal_group_secret`].
pub fn open_group_secret(
    shared_secret: &Secret,
    ciphertext: &[u8],
    nonce: &[u8],
) -> Result<Secret, GkaError> {
    if nonce.len() != NONCE_LEN {
        return Err(GkaError::Crypto(format!(
            "nonce must be {NONCE_LEN} bytes, got {}",
            nonce.len()
        )));
    }
    let mut key = derive_key(shared_secret);
    let cipher = XChaCha20Poly1305::new(&key.into());
    key.zeroize();
    let plaintext = cipher
        .decrypt(XNonce::from_slice(nonce), ciphertext)
        .map_err(|_| GkaError::Crypto("decryption failed: authentication error".into()))?;
    Ok(Secret(plaintext))
}
