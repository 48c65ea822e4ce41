use alloy_primitives::{Address, I256, U256};
use serde::{Deserialize, Serialize};

/// ERC-20 token as the fetch client and query generator see it. Equality is by address only.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Token {
    address: Address,
    decimals: u8,
    symbol: Option<String>,
}

impl PartialEq for Token {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for Token {}

impl Token {
    pub fn new(address: Address) -> Token {
        Token { address, decimals: 18, symbol: None }
    }

    pub fn new_with_data(address: Address, symbol: Option<String>, decimals: Option<u8>) -> Token {
        Token { address, symbol, decimals: decimals.unwrap_or(18) }
    }

    // For testing purposes
    pub fn repeat_byte(byte: u8) -> Token {
        Token::new(Address::repeat_byte(byte))
    }

    pub fn symbol(&self) -> Option<&str> {
        self.symbol.as_deref()
    }

    pub fn get_decimals(&self) -> u8 {
        self.decimals
    }

    pub fn get_address(&self) -> Address {
        self.address
    }

    /// Raw on-chain amount to a decimal-adjusted float.
    pub fn to_float(&self, value: U256) -> f64 {
        u256_to_f64(value) / 10f64.powi(self.decimals as i32)
    }

    /// Signed variant of [`Token::to_float`], used for swap deltas.
    pub fn to_float_sign(&self, value: I256) -> f64 {
        let f = self.to_float(value.unsigned_abs());
        if value.is_negative() { -f } else { f }
    }
}

/// Lossy conversion that keeps the magnitude of values wider than 64 bits.
pub fn u256_to_f64(value: U256) -> f64 {
    value
        .as_limbs()
        .iter()
        .rev()
        .fold(0f64, |acc, limb| acc * 18_446_744_073_709_551_616f64 + *limb as f64)
}
