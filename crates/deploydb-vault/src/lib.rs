//! deploydb-vault — symmetric sealing of structured secrets.
//!
//! Engine configs (credentials) and realized connection descriptors are
//! JSON-serialized and sealed with ChaCha20-Poly1305 before they are written
//! to the deployment store.
//!
//! # Token format
//!
//! ```text
//! base64url( version(1) || nonce(12) || ciphertext || tag(16) )
//! ```
//!
//! A fresh random nonce is drawn per seal, so sealing the same value twice
//! yields different tokens.
//!
//! # Keys
//!
//! The key is loaded once at process start. Without one, [`Vault::ephemeral`]
//! draws a random process-lifetime key: every token sealed under it becomes
//! unreadable after a restart. There is no rotation; moving to a new key means
//! opening and re-sealing every stored token.

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine as _;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

const TOKEN_VERSION: u8 = 1;
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Result type alias for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors raised by the vault. Messages never include token or key bytes.
#[derive(Debug, Error)]
pub enum VaultError {
    #[error("invalid vault key: {0}")]
    InvalidKey(String),

    #[error("failed to serialize secret: {0}")]
    Serialize(String),

    #[error("failed to encrypt secret")]
    Encryption,

    #[error("secret could not be decrypted (wrong key or corrupted token)")]
    Decryption,

    #[error("decrypted secret has unexpected shape: {0}")]
    Deserialize(String),
}

/// Seals and opens JSON-serializable values under a single symmetric key.
#[derive(Clone)]
pub struct Vault {
    cipher: ChaCha20Poly1305,
    ephemeral: bool,
}

impl Vault {
    /// Build a vault from a base64-encoded 32-byte key.
    pub fn from_key_b64(encoded: &str) -> VaultResult<Self> {
        let key = STANDARD
            .decode(encoded.trim())
            .or_else(|_| URL_SAFE_NO_PAD.decode(encoded.trim()))
            .map_err(|_| VaultError::InvalidKey("not valid base64".to_string()))?;
        Self::from_key_bytes(&key)
    }

    /// Build a vault from raw key bytes (must be exactly 32 bytes).
    pub fn from_key_bytes(key: &[u8]) -> VaultResult<Self> {
        if key.len() != KEY_LEN {
            return Err(VaultError::InvalidKey(format!(
                "expected {KEY_LEN} bytes, got {}",
                key.len()
            )));
        }
        let cipher = ChaCha20Poly1305::new_from_slice(key)
            .map_err(|_| VaultError::InvalidKey("rejected by cipher".to_string()))?;
        Ok(Self {
            cipher,
            ephemeral: false,
        })
    }

    /// A vault with a random key that lives only as long as this process.
    pub fn ephemeral() -> Self {
        let key: [u8; KEY_LEN] = rand::random();
        let cipher = ChaCha20Poly1305::new(&key.into());
        warn!(
            "no vault key configured; using an ephemeral key. \
             Sealed deployment configs and results will be unreadable after restart"
        );
        Self {
            cipher,
            ephemeral: true,
        }
    }

    /// Use the configured key when present, otherwise fall back to an ephemeral one.
    pub fn from_config(key: Option<&str>) -> VaultResult<Self> {
        match key {
            Some(k) => Self::from_key_b64(k),
            None => Ok(Self::ephemeral()),
        }
    }

    /// Whether this vault's key will be lost on restart.
    pub fn is_ephemeral(&self) -> bool {
        self.ephemeral
    }

    /// Serialize and encrypt a value into an opaque token.
    pub fn seal<T: Serialize + ?Sized>(&self, value: &T) -> VaultResult<String> {
        let plaintext =
            serde_json::to_vec(value).map_err(|e| VaultError::Serialize(e.to_string()))?;
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from(nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plaintext.as_slice())
            .map_err(|_| VaultError::Encryption)?;

        let mut raw = Vec::with_capacity(1 + NONCE_LEN + ciphertext.len());
        raw.push(TOKEN_VERSION);
        raw.extend_from_slice(&nonce_bytes);
        raw.extend_from_slice(&ciphertext);
        Ok(URL_SAFE_NO_PAD.encode(raw))
    }

    /// Decrypt and deserialize a token produced by [`Vault::seal`].
    pub fn open<T: DeserializeOwned>(&self, token: &str) -> VaultResult<T> {
        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| VaultError::Decryption)?;
        if raw.len() < 1 + NONCE_LEN + TAG_LEN || raw[0] != TOKEN_VERSION {
            return Err(VaultError::Decryption);
        }
        let (nonce_bytes, ciphertext) = raw[1..].split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|_| VaultError::Decryption)?;
        serde_json::from_slice(&plaintext).map_err(|e| VaultError::Deserialize(e.to_string()))
    }
}

impl std::fmt::Debug for Vault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vault")
            .field("key", &"<redacted>")
            .field("ephemeral", &self.ephemeral)
            .finish()
    }
}

/// Generate a fresh base64-encoded key suitable for `[vault] key`.
pub fn generate_key() -> String {
    let key: [u8; KEY_LEN] = rand::random();
    STANDARD.encode(key)
}
