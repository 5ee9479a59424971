/* keygate/src/hasher.rs

Key generation and salted digests.

Key design:
- Opaque keys: SHA-256 over 16 fresh random bytes (OsRng), rendered as
  64 uppercase hex chars. Keys are never derived from caller input.

Salted digest layout (returned by `hash`):
- base64(salt) || HEX(H(salt || utf8(value)))
  • salt: 32 random bytes, base64 standard alphabet with padding (44 chars)
  • H: SHA-256 or SHA-512 depending on `HashAlgorithm`
- The salt is kept in front of the digest so `verify_hash` can recompute it.

*/

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256, Sha512};

const KEY_SEED_BYTES: usize = 16;
const SALT_BYTES: usize = 32;
// base64 of 32 bytes with padding
const SALT_PREFIX_LEN: usize = 44;

/// Digest used by [`hash`] and [`verify_hash`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha256,
    Sha512,
}

impl HashAlgorithm {
    fn digest(self, salt: &[u8], value: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => {
                let mut h = Sha256::new();
                h.update(salt);
                h.update(value);
                h.finalize().to_vec()
            }
            HashAlgorithm::Sha512 => {
                let mut h = Sha512::new();
                h.update(salt);
                h.update(value);
                h.finalize().to_vec()
            }
        }
    }

    /// Length of the hex-encoded digest.
    fn hex_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 64,
            HashAlgorithm::Sha512 => 128,
        }
    }
}

/// Produce a fresh opaque API key.
pub fn generate_key() -> String {
    let seed = random_bytes(KEY_SEED_BYTES);
    hex::encode_upper(Sha256::digest(&seed))
}

/// Salted digest of `value` for at-rest storage. Empty input is returned unchanged.
pub fn hash(value: &str, algorithm: HashAlgorithm) -> String {
    if value.is_empty() {
        return String::new();
    }
    let salt = random_bytes(SALT_BYTES);
    let digest = algorithm.digest(&salt, value.as_bytes());
    let mut out = STANDARD.encode(&salt);
    out.push_str(&hex::encode_upper(digest));
    out
}

/// Check `value` against a string previously produced by [`hash`].
pub fn verify_hash(value: &str, stored: &str, algorithm: HashAlgorithm) -> bool {
    if value.is_empty() || stored.len() != SALT_PREFIX_LEN + algorithm.hex_len() {
        return false;
    }
    let (salt_b64, digest_hex) = stored.split_at(SALT_PREFIX_LEN);
    let salt = match STANDARD.decode(salt_b64) {
        Ok(s) => s,
        Err(_) => return false,
    };
    let expected = match hex::decode(digest_hex) {
        Ok(d) => d,
        Err(_) => return false,
    };
    let actual = algorithm.digest(&salt, value.as_bytes());
    ct_eq(&actual, &expected)
}

fn random_bytes(n: usize) -> Vec<u8> {
    let mut v = vec![0u8; n];
    OsRng.fill_bytes(&mut v);
    v
}

/// Constant-time equality for two byte slices.
fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
