//! Identifier generation.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha20Rng;

/// Generate a random UUID v4 string using a CSPRNG.
///
/// Ids appear in URLs and audit trails and must not be guessable.
#[must_use]
pub fn new_id() -> String {
    let mut rng = ChaCha20Rng::from_entropy();
    let mut bytes: [u8; 16] = rng.gen();

    bytes[6] = (bytes[6] & 0x0f) | 0x40;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;

    let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
    format!(
        "{}-{}-{}-{}-{}",
        &hex[0..8],
        &hex[8..12],
        &hex[12..16],
        &hex[16..20],
        &hex[20..32]
    )
}
