//! Human-shareable codes.

use rand::Rng;

/// Upper-case letters and digits without the look-alikes `0 O 1 I L`.
pub const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

/// Draw a random code of `length` characters from [`CODE_ALPHABET`].
pub fn generate_code(length: usize) -> String {
    let mut rng = rand::rngs::OsRng;
    (0..length)
        .map(|_| char::from(CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())]))
        .collect()
}
