//! Random identifiers and ingestion secret hashing.

use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::models::PartitionName;

/// Length of the ingestion key.
pub const KEY_DIGITS: usize = 40;

/// Length of the public plant id.
pub const PUBLIC_PLANT_ID_DIGITS: usize = 15;

/// Length of the URL identifier embedded in the ingestion path.
pub const URL_ID_DIGITS: usize = 20;

/// Random bytes in a secret; hex-encoded this gives 36 characters.
pub const SECRET_BYTES: usize = 18;

const SALT_BYTES: usize = 16;
const HASH_SEPARATOR: char = '$';

/// A string of `len` uniformly random decimal digits.
pub fn random_digits(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| char::from(b'0' + rng.random_range(0..10u8)))
        .collect()
}

pub fn generate_public_plant_id() -> String {
    random_digits(PUBLIC_PLANT_ID_DIGITS)
}

pub fn generate_url_id() -> String {
    random_digits(URL_ID_DIGITS)
}

pub fn generate_key() -> String {
    random_digits(KEY_DIGITS)
}

pub fn generate_partition_name() -> PartitionName {
    PartitionName::from_number(rand::rng().random_range(0..1_000_000_000_000u64))
}

/// A fresh hex-encoded ingestion secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}

/// Hash a secret for storage as `hex(salt)$hex(sha256(salt || secret))`.
pub fn hash_secret(secret: &str) -> String {
    let mut salt = [0u8; SALT_BYTES];
    rand::rng().fill(&mut salt);
    format!(
        "{}{HASH_SEPARATOR}{}",
        hex::encode(salt),
        hex::encode(digest(&salt, secret))
    )
}

/// Check a presented secret against a stored hash in constant time.
///
/// Malformed stored hashes never verify.
pub fn verify_secret(secret: &str, stored: &str) -> bool {
    let Some((salt_hex, digest_hex)) = stored.split_once(HASH_SEPARATOR) else {
        return false;
    };
    let (Ok(salt), Ok(expected)) = (hex::decode(salt_hex), hex::decode(digest_hex)) else {
        return false;
    };

    let actual = digest(&salt, secret);
    actual.as_slice().ct_eq(expected.as_slice()).into()
}

fn digest(salt: &[u8], secret: &str) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(secret.as_bytes());
    hasher.finalize().into()
}
