//! WireGuard keys and node credentials

use crate::{Error, Result};
use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use rand::RngCore;
use x25519_dalek::{PublicKey, StaticSecret};

/// Length of a Curve25519 key in bytes
pub const KEY_LEN: usize = 32;

/// A WireGuard public or private key
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct WgKey([u8; KEY_LEN]);

impl WgKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    pub fn to_base64(&self) -> String {
        STANDARD.encode(self.0)
    }
}

impl std::str::FromStr for WgKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes = STANDARD
            .decode(s.trim())
            .map_err(|e| Error::Malformed(format!("invalid key encoding: {e}")))?;
        let bytes: [u8; KEY_LEN] = bytes.try_into().map_err(|b: Vec<u8>| {
            Error::Malformed(format!("invalid key length: {} bytes", b.len()))
        })?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Display for WgKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_base64())
    }
}

impl std::fmt::Debug for WgKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WgKey({})", self.to_base64())
    }
}

/// WireGuard key pair
#[derive(Debug, Clone)]
pub struct WgKeyPair {
    pub private_key: WgKey,
    pub public_key: WgKey,
}

impl WgKeyPair {
    /// Derive the key pair belonging to a private key
    pub fn from_private(private_key: WgKey) -> Self {
        let secret = StaticSecret::from(*private_key.as_bytes());
        let public = PublicKey::from(&secret);
        Self {
            private_key,
            public_key: WgKey(*public.as_bytes()),
        }
    }
}

/// Generate a WireGuard keypair using x25519
pub fn generate_keypair() -> WgKeyPair {
    let mut private_key_bytes = [0u8; KEY_LEN];
    rand::thread_rng().fill_bytes(&mut private_key_bytes);

    // WireGuard key clamping
    private_key_bytes[0] &= 248;
    private_key_bytes[31] &= 127;
    private_key_bytes[31] |= 64;

    WgKeyPair::from_private(WgKey(private_key_bytes))
}

/// Random credential handed to a node at join time
pub fn generate_secret() -> String {
    let mut bytes = [0u8; 24];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a node credential for storage (salted Argon2, PHC string)
pub fn hash_secret(secret: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(secret.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| Error::Internal(format!("hashing node credential: {e}")))
}

/// Check a presented credential against its stored hash. An unparsable
/// stored hash never verifies.
pub fn verify_secret(secret: &str, stored_hash: &str) -> bool {
    match PasswordHash::new(stored_hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(secret.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}
