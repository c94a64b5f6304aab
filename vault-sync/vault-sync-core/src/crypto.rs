//! Password hashing, vault keyhashes, and secret generation.
//!
//! All comparisons against stored hashes go through [`constant_time_eq`];
//! never compare credential material with `==`.

use rand::Rng;
use ring::constant_time;
use scrypt::Params;
use sha2::{Digest, Sha256};
use uuid::Uuid;

// scrypt N=32768, r=8, p=1, dklen=32
const SCRYPT_LOG_N: u8 = 15;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const KEY_LEN: usize = 32;

const SECRET_LEN: usize = 20;
const SECRET_ALPHABET: &[u8] =
    br##"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ!"#$%&'()*+,-./:;<=>?@[\]^_`{|}~ "##;

fn scrypt_key(pwd: &[u8], salt: &[u8]) -> [u8; KEY_LEN] {
    let params =
        Params::new(SCRYPT_LOG_N, SCRYPT_R, SCRYPT_P, KEY_LEN).expect("fixed scrypt parameters");
    let mut key = [0u8; KEY_LEN];
    scrypt::scrypt(pwd, salt, &params, &mut key).expect("non-empty output buffer");
    key
}

/// Hex-encoded scrypt hash of an account password.
pub fn hash_password(pwd: &str, salt: &str) -> String {
    hex::encode(scrypt_key(pwd.as_bytes(), salt.as_bytes()))
}

pub fn verify_password(pwd: &str, salt: &str, hash: &str) -> bool {
    constant_time_eq(&hash_password(pwd, salt), hash)
}

/// Vault keyhash: SHA-256 of the scrypt key, lowercase hex.
pub fn keyhash(pwd: &str, salt: &str) -> String {
    let key = scrypt_key(pwd.as_bytes(), salt.as_bytes());
    hex::encode(Sha256::digest(key))
}

pub fn constant_time_eq(a: &str, b: &str) -> bool {
    constant_time::verify_slices_are_equal(a.as_bytes(), b.as_bytes()).is_ok()
}

/// 20 characters drawn from the printable ASCII alphabet.
pub fn generate_secret() -> String {
    let mut rng = rand::thread_rng();
    (0..SECRET_LEN)
        .map(|_| SECRET_ALPHABET[rng.gen_range(0..SECRET_ALPHABET.len())] as char)
        .collect()
}

/// Random 128-bit bearer token, hex-encoded.
pub fn generate_token() -> String {
    Uuid::new_v4().simple().to_string()
}
