use std::fmt;
use std::sync::Arc;

use base64::prelude::*;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::CodecError;

/// Header carrying the base64 HMAC-SHA256 tag of a body.
pub const HASH_HEADER: &str = "HashSHA256";

type HmacSha256 = Hmac<Sha256>;

/// Shared HMAC key. Cheap to clone; never printed.
#[derive(Clone)]
pub struct HashKey(Arc<[u8]>);

impl HashKey {
    pub fn new(key: impl AsRef<[u8]>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    fn mac(&self) -> Result<HmacSha256, CodecError> {
        HmacSha256::new_from_slice(&self.0).map_err(|_| CodecError::HashKey)
    }

    /// Base64 tag for `body`.
    pub fn sign(&self, body: &[u8]) -> Result<String, CodecError> {
        let mut mac = self.mac()?;
        mac.update(body);
        Ok(BASE64_STANDARD.encode(mac.finalize().into_bytes()))
    }

    /// Constant-time check of a base64 tag against `body`.
    pub fn verify(&self, body: &[u8], tag: &str) -> Result<(), CodecError> {
        let expected = BASE64_STANDARD
            .decode(tag.trim())
            .map_err(|_| CodecError::TagMismatch)?;
        let mut mac = self.mac()?;
        mac.update(body);
        mac.verify_slice(&expected).map_err(|_| CodecError::TagMismatch)
    }
}

impl fmt::Debug for HashKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HashKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        // RFC 4231 test case 2
        let key = HashKey::new("Jefe");
        let tag = key.sign(b"what do ya want for nothing?").unwrap();
        assert_eq!(tag, "W9zBRr9gdU5qBCQmCJV1x1oAPwidJzmDnexYuWTsOEM=");
    }

    #[test]
    fn verify_accepts_own_tag_and_rejects_others() {
        let key = HashKey::new("secret");
        let tag = key.sign(b"payload").unwrap();
        assert!(key.verify(b"payload", &tag).is_ok());
        assert!(matches!(
            key.verify(b"payload!", &tag),
            Err(CodecError::TagMismatch)
        ));
        assert!(matches!(
            HashKey::new("other").verify(b"payload", &tag),
            Err(CodecError::TagMismatch)
        ));
        assert!(matches!(
            key.verify(b"payload", "not base64 at all"),
            Err(CodecError::TagMismatch)
        ));
    }

    #[test]
    fn debug_hides_key() {
        assert_eq!(format!("{:?}", HashKey::new("secret")), "HashKey(..)");
    }
}
