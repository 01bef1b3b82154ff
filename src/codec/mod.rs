//! Envelope codec shared by the agent and both server transports.
//!
//! Sender: JSON → gzip → RSA, with the HMAC tag taken over the
//! compressed-but-unencrypted bytes. Receiver: RSA → HMAC check → gunzip
//! → JSON. Transports only move the resulting bytes and headers around.

pub mod crypto;
pub mod gzip;
pub mod hash;

pub use hash::{HashKey, HASH_HEADER};

use std::sync::Arc;

use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("malformed gzip stream: {0}")]
    Gzip(#[source] std::io::Error),

    #[error("request carries no HashSHA256 tag")]
    MissingTag,

    #[error("HashSHA256 tag does not match body")]
    TagMismatch,

    #[error("cannot decrypt body: {0}")]
    Decrypt(#[source] rsa::Error),

    #[error("cannot encrypt body: {0}")]
    Encrypt(#[source] rsa::Error),

    #[error("unusable hash key")]
    HashKey,
}

impl CodecError {
    /// Everything the caller could have sent correctly. Cipher failures
    /// count as server faults.
    pub fn is_client_error(&self) -> bool {
        !matches!(self, Self::Decrypt(_) | Self::Encrypt(_) | Self::HashKey)
    }
}

// ─── Sender side ─────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct EncodeOptions {
    pub compress: bool,
    pub encrypt_key: Option<Arc<RsaPublicKey>>,
    pub hash_key: Option<HashKey>,
}

/// Bytes ready for a transport plus the headers that go with them.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub body: Vec<u8>,
    pub compressed: bool,
    /// Base64 HMAC for the `HashSHA256` header / metadata entry.
    pub hash: Option<String>,
}

pub fn encode<T: Serialize + ?Sized>(
    records: &T,
    opts: &EncodeOptions,
) -> Result<Encoded, CodecError> {
    let mut body = serde_json::to_vec(records)?;
    if opts.compress {
        body = gzip::compress(&body).map_err(CodecError::Gzip)?;
    }

    let hash = opts
        .hash_key
        .as_ref()
        .map(|key| key.sign(&body))
        .transpose()?;

    if let Some(key) = &opts.encrypt_key {
        body = crypto::encrypt(key, &body).map_err(CodecError::Encrypt)?;
    }

    Ok(Encoded {
        body,
        compressed: opts.compress,
        hash,
    })
}

// ─── Receiver side ───────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct DecodeOptions {
    pub decrypt_key: Option<Arc<RsaPrivateKey>>,
    pub hash_key: Option<HashKey>,
}

impl DecodeOptions {
    /// Same integrity policy, body taken as plaintext.
    pub fn without_decryption(&self) -> Self {
        Self {
            decrypt_key: None,
            hash_key: self.hash_key.clone(),
        }
    }

    pub fn decrypt(&self, body: Vec<u8>) -> Result<Vec<u8>, CodecError> {
        match &self.decrypt_key {
            Some(key) => crypto::decrypt(key, &body).map_err(CodecError::Decrypt),
            None => Ok(body),
        }
    }

    /// With a hash key configured every body must carry a matching tag.
    pub fn verify(&self, body: &[u8], tag: Option<&str>) -> Result<(), CodecError> {
        let Some(key) = &self.hash_key else {
            return Ok(());
        };
        match tag {
            Some(tag) if !tag.is_empty() => key.verify(body, tag),
            _ => Err(CodecError::MissingTag),
        }
    }
}

/// A received body and the envelope headers that came with it.
#[derive(Debug)]
pub struct Incoming<'a> {
    pub body: Vec<u8>,
    pub compressed: bool,
    pub hash: Option<&'a str>,
}

/// Unwrap an envelope: decrypt, check integrity, gunzip, parse.
pub fn decode<T: DeserializeOwned>(
    incoming: Incoming<'_>,
    opts: &DecodeOptions,
) -> Result<T, CodecError> {
    let body = opts.decrypt(incoming.body)?;
    opts.verify(&body, incoming.hash)?;

    let plain = if incoming.compressed {
        gzip::decompress(&body).map_err(CodecError::Gzip)?
    } else {
        body
    };
    Ok(serde_json::from_slice(&plain)?)
}
