//! Private key storage
//!
//! One PEM file per owner key. A missing file is generated on demand;
//! an unreadable file is an error and is never overwritten.

use std::path::{Path, PathBuf};

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};

use super::ClientError;

/// Size of keys generated by the keystore
pub const DEFAULT_KEY_BITS: usize = 2048;

/// Private key file on disk
#[derive(Debug, Clone)]
pub struct Keystore {
    path: PathBuf,
}

impl Keystore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// `$HOME/.config/gravity/key.pem`, when a home directory is known
    pub fn default_location() -> Option<Self> {
        let home = std::env::var_os("HOME")?;
        Some(Self::new(
            PathBuf::from(home).join(".config").join("gravity").join("key.pem"),
        ))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the stored key; `None` when no key file exists
    ///
    /// Accepts PKCS#8 and PKCS#1 encodings.
    pub fn load(&self) -> Result<Option<RsaPrivateKey>, ClientError> {
        let pem = match std::fs::read_to_string(&self.path) {
            Ok(pem) => pem,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let key = RsaPrivateKey::from_pkcs8_pem(&pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(&pem))
            .map_err(|_| {
                ClientError::Key(format!("{} is not an RSA private key", self.path.display()))
            })?;

        key.validate()
            .map_err(|e| ClientError::Key(format!("key validation failed: {}", e)))?;

        Ok(Some(key))
    }

    /// Load the stored key, generating and saving one when absent
    pub fn load_or_generate(&self, bits: usize) -> Result<RsaPrivateKey, ClientError> {
        if let Some(key) = self.load()? {
            return Ok(key);
        }

        tracing::info!(path = %self.path.display(), bits, "Generating new private key");
        let key = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| ClientError::Key(e.to_string()))?;
        self.save(&key)?;
        Ok(key)
    }

    /// Write `key` as PKCS#8 PEM, owner-readable only on Unix
    pub fn save(&self, key: &RsaPrivateKey) -> Result<(), ClientError> {
        let pem = key
            .to_pkcs8_pem(LineEnding::LF)
            .map_err(|e| ClientError::Key(e.to_string()))?;

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&self.path, pem.as_bytes())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))?;
        }

        Ok(())
    }

    /// PKIX PEM of the public half, as sent at registration
    pub fn public_key_pem(key: &RsaPrivateKey) -> Result<String, ClientError> {
        RsaPublicKey::from(key)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| ClientError::Key(e.to_string()))
    }
}
