use rand::rngs::OsRng;
use rand::{Rng, RngCore};

/// ASCII letters, digits and punctuation.
const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ\
0123456789!\"#$%&'()*+,-./:;<=>?@[\\]^_`{|}~";

/// Draws `length` characters uniformly from [`ALPHABET`] using the OS CSPRNG.
pub fn generate_password(length: usize) -> String {
    (0..length)
        .map(|_| ALPHABET[OsRng.gen_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Fails when the OS random source cannot be read. Checked once at startup so
/// password generation never has to handle it per call.
pub fn check_entropy_source() -> anyhow::Result<()> {
    let mut probe = [0u8; 16];
    OsRng
        .try_fill_bytes(&mut probe)
        .map_err(|e| anyhow::anyhow!("Secure random source unavailable: {}", e))
}
