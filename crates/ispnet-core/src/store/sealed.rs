// Encryption at rest for snapshot content.
//
// Exports carry PPP and RADIUS secrets, so `FileStore` can seal blobs with
// ChaCha20-Poly1305. A sealed blob is `MAGIC || nonce || ciphertext`; the
// content digest is bound in as associated data so a blob cannot be
// swapped under another record's name.

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use sha2::{Digest, Sha256};

use crate::error::CoreError;

const MAGIC: &[u8; 8] = b"ISPNETB1";
const NONCE_LEN: usize = 12;

/// Symmetric key for snapshot blobs.
pub struct BlobKey(SecretSlice<u8>);

impl BlobKey {
    /// Derive the key from an operator passphrase.
    pub fn from_passphrase(passphrase: &SecretString) -> Result<Self, CoreError> {
        let phrase = passphrase.expose_secret();
        if phrase.trim().is_empty() {
            return Err(CoreError::validation("backup encryption key must not be empty"));
        }
        let digest = Sha256::new()
            .chain_update(b"ispnet backup key v1")
            .chain_update(phrase.as_bytes())
            .finalize();
        Ok(Self(SecretSlice::from(digest.to_vec())))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(self.0.expose_secret()))
    }
}

impl std::fmt::Debug for BlobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("BlobKey(<redacted>)")
    }
}

pub(crate) fn is_sealed(bytes: &[u8]) -> bool {
    bytes.starts_with(MAGIC)
}

pub(crate) fn seal(key: &BlobKey, digest: &str, content: &[u8]) -> Result<Vec<u8>, CoreError> {
    let nonce = ChaCha20Poly1305::generate_nonce(&mut OsRng);
    let ciphertext = key
        .cipher()
        .encrypt(
            &nonce,
            Payload {
                msg: content,
                aad: digest.as_bytes(),
            },
        )
        .map_err(|_| CoreError::Store {
            message: format!("failed to encrypt snapshot {digest}"),
        })?;
    let mut out = Vec::with_capacity(MAGIC.len() + NONCE_LEN + ciphertext.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&nonce);
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

pub(crate) fn open(key: &BlobKey, digest: &str, sealed: &[u8]) -> Result<Vec<u8>, CoreError> {
    let unreadable = |why: &str| CoreError::Store {
        message: format!("encrypted snapshot {digest} {why}"),
    };
    let body = sealed
        .strip_prefix(MAGIC.as_slice())
        .ok_or_else(|| unreadable("has no header"))?;
    if body.len() < NONCE_LEN {
        return Err(unreadable("is truncated"));
    }
    let (nonce, ciphertext) = body.split_at(NONCE_LEN);
    key.cipher()
        .decrypt(
            Nonce::from_slice(nonce),
            Payload {
                msg: ciphertext,
                aad: digest.as_bytes(),
            },
        )
        .map_err(|_| unreadable("does not decrypt with the configured key"))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn key(phrase: &str) -> BlobKey {
        BlobKey::from_passphrase(&SecretString::from(phrase.to_string())).unwrap()
    }

    #[test]
    fn sealed_content_opens_under_the_same_digest() {
        let k = key("correct horse");
        let sealed = seal(&k, "abc", b"/ppp secret add name=alice").unwrap();
        assert!(is_sealed(&sealed));
        assert_eq!(open(&k, "abc", &sealed).unwrap(), b"/ppp secret add name=alice");
        assert!(open(&k, "abd", &sealed).is_err());
        assert!(open(&key("wrong horse"), "abc", &sealed).is_err());
    }

    #[test]
    fn blank_passphrase_is_rejected() {
        let err = BlobKey::from_passphrase(&SecretString::from("  ".to_string())).unwrap_err();
        assert!(matches!(err, CoreError::Validation { .. }));
    }
}
