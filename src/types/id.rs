//! Random identifiers

use rand::Rng;

const HEX_DIGITS: &[u8; 16] = b"0123456789abcdef";

/// Generation strategies for ID columns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdStrategy {
    Hex { length: usize },
}

impl IdStrategy {
    pub fn generate(&self) -> String {
        match self {
            IdStrategy::Hex { length } => hex_id(*length),
        }
    }
}

/// Fresh lowercase hex string of `len` characters
pub fn hex_id(len: usize) -> String {
    let mut rng = rand::rng();
    (0..len)
        .map(|_| HEX_DIGITS[rng.random_range(0..HEX_DIGITS.len())] as char)
        .collect()
}
