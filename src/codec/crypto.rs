//! RSA envelope encryption.
//!
//! Payloads are split into `k - 11` byte chunks (the PKCS#1 v1.5 limit for
//! a `k`-byte modulus) and each chunk becomes one `k`-byte ciphertext
//! block, so the receiver can walk the body block by block.

use std::path::{Path, PathBuf};

use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::traits::PublicKeyParts;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};
use thiserror::Error;

const PKCS1_V15_OVERHEAD: usize = 11;

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("cannot read key file {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid {kind} key in {path:?}: {reason}")]
    Invalid {
        kind: &'static str,
        path: PathBuf,
        reason: String,
    },
}

fn read_pem(path: &Path) -> Result<String, KeyError> {
    std::fs::read_to_string(path).map_err(|source| KeyError::Read {
        path: path.to_path_buf(),
        source,
    })
}

/// Load an SPKI `PUBLIC KEY` PEM block.
pub fn load_public_key(path: impl AsRef<Path>) -> Result<RsaPublicKey, KeyError> {
    let path = path.as_ref();
    let pem = read_pem(path)?;
    RsaPublicKey::from_public_key_pem(&pem).map_err(|e| KeyError::Invalid {
        kind: "public",
        path: path.to_path_buf(),
        reason: e.to_string(),
    })
}

/// Load a PKCS#8 `PRIVATE KEY` (or PKCS#1 `RSA PRIVATE KEY`) PEM block.
pub fn load_private_key(path: impl AsRef<Path>) -> Result<RsaPrivateKey, KeyError> {
    let path = path.as_ref();
    let pem = read_pem(path)?;
    RsaPrivateKey::from_pkcs8_pem(&pem)
        .or_else(|pkcs8_err| {
            RsaPrivateKey::from_pkcs1_pem(&pem).map_err(|_| pkcs8_err.to_string())
        })
        .map_err(|reason| KeyError::Invalid {
            kind: "private",
            path: path.to_path_buf(),
            reason,
        })
}

pub fn encrypt(key: &RsaPublicKey, data: &[u8]) -> Result<Vec<u8>, rsa::Error> {
    let block = key.size();
    let chunk = block - PKCS1_V15_OVERHEAD;
    let mut rng = rand::thread_rng();

    let mut out = Vec::with_capacity(data.len().div_ceil(chunk) * block);
    for piece in data.chunks(chunk) {
        out.extend_from_slice(&key.encrypt(&mut rng, Pkcs1v15Encrypt, piece)?);
    }
    Ok(out)
}

pub fn decrypt(key: &RsaPrivateKey, data: &[u8]) -> Result<Vec<u8>, rsa::Error> {
    let block = key.size();
    if data.len() % block != 0 {
        return Err(rsa::Error::Decryption);
    }

    let mut out = Vec::with_capacity(data.len());
    for piece in data.chunks(block) {
        out.extend_from_slice(&key.decrypt(Pkcs1v15Encrypt, piece)?);
    }
    Ok(out)
}
