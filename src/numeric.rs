// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//    http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.
use std::fmt;
use num_bigint::BigInt;
use num_traits::{Signed, Zero};

/// Errors produced converting a [`Value`] into its byte representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NumericError {
    /// The value is negative and bytes were requested.
    NegativeBytes,
    /// The originating hex literal had an odd number of hex digits.
    OddHex,
}

impl fmt::Display for NumericError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            NumericError::NegativeBytes => write!(f, "cannot convert negative value to bytes"),
            NumericError::OddHex => write!(f, "hex literal has an odd number of digits"),
        }
    }
}

impl std::error::Error for NumericError {}

/// The "leading-zero-aware integer" of §3: an arbitrary-precision signed
/// integer which additionally remembers, when it originated from a hex or
/// string literal, the exact byte/nibble form that produced it. Plain
/// arithmetic always degrades to a bare integer (`Value::from_int`) — only
/// literals carry the extra form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Value {
    int: BigInt,
    origin: Origin,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Origin {
    /// Produced by arithmetic, or a plain decimal literal: no leading-zero
    /// information to preserve.
    Plain,
    /// Came from a hex literal; `digits` is the exact digit string (without
    /// the `0x` prefix) so odd-length and leading-zero nibbles survive.
    Hex { digits: String },
    /// Came from a string literal (or another byte-producing source): the
    /// exact bytes, including any leading zero bytes.
    Bytes { bytes: Vec<u8> },
}

impl Value {
    /// Construct a plain value from an arbitrary integer; used for the
    /// result of any arithmetic operation, and for non-literal sources.
    pub fn from_int(int: BigInt) -> Self {
        Value { int, origin: Origin::Plain }
    }

    pub fn from_i64(v: i64) -> Self {
        Value::from_int(BigInt::from(v))
    }

    /// Parse a decimal literal (no leading zeros allowed by the lexer, but
    /// that's a lexical concern, not this type's).
    pub fn from_decimal(digits: &str) -> Self {
        let int = digits.parse::<BigInt>().unwrap_or_else(|_| BigInt::zero());
        Value::from_int(int)
    }

    /// Parse a hex literal's digits (without the `0x` prefix). Preserves
    /// the literal digit string so [`Value::to_bytes`] can recover leading
    /// zero nibbles and detect an odd digit count.
    pub fn from_hex_digits(digits: &str) -> Self {
        let int = if digits.is_empty() {
            BigInt::zero()
        } else {
            BigInt::parse_bytes(digits.as_bytes(), 16).unwrap_or_else(BigInt::zero)
        };
        Value { int, origin: Origin::Hex { digits: digits.to_string() } }
    }

    /// Lift a raw byte sequence (e.g. a string literal after escape
    /// processing) into a value, preserving leading zero bytes exactly.
    pub fn from_bytes(bytes: Vec<u8>) -> Self {
        let int = BigInt::from_bytes_be(num_bigint::Sign::Plus, &bytes);
        Value { int, origin: Origin::Bytes { bytes } }
    }

    /// Lossless (except for leading-zero metadata) conversion to integer.
    pub fn to_int(&self) -> BigInt {
        self.int.clone()
    }

    pub fn is_negative(&self) -> bool {
        self.int.is_negative()
    }

    /// The padded byte-string view of this value, per §3's contract.
    pub fn to_bytes(&self) -> Result<Vec<u8>, NumericError> {
        match &self.origin {
            Origin::Bytes { bytes } => Ok(bytes.clone()),
            Origin::Hex { digits } => {
                if digits.len() % 2 != 0 {
                    return Err(NumericError::OddHex);
                }
                if digits.is_empty() {
                    return Ok(Vec::new());
                }
                let mut out = Vec::with_capacity(digits.len() / 2);
                let chars: Vec<char> = digits.chars().collect();
                for pair in chars.chunks(2) {
                    let s: String = pair.iter().collect();
                    out.push(u8::from_str_radix(&s, 16).unwrap_or(0));
                }
                Ok(out)
            }
            Origin::Plain => {
                if self.int.is_negative() {
                    return Err(NumericError::NegativeBytes);
                }
                if self.int.is_zero() {
                    return Ok(Vec::new());
                }
                let (_, bytes) = self.int.to_bytes_be();
                Ok(bytes)
            }
        }
    }

    /// Minimal big-endian byte length needed to represent this value,
    /// honoring any preserved leading zeros. Used by `len`/push sizing.
    pub fn byte_len(&self) -> Result<usize, NumericError> {
        Ok(self.to_bytes()?.len())
    }

    /// Bit length of the value, ignoring any preserved leading zeros —
    /// used by the `intbits` builtin.
    pub fn bit_len(&self) -> usize {
        self.int.magnitude().bits() as usize
    }

    pub fn abs(&self) -> Value {
        Value::from_int(self.int.abs())
    }

    /// The original-case hex digit string this value was parsed from
    /// (without the `0x` prefix), if it came from a hex literal. Used by
    /// `address(...)` to decide whether EIP-55 checksum validation applies.
    pub fn hex_digits(&self) -> Option<&str> {
        match &self.origin {
            Origin::Hex { digits } => Some(digits),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.int)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_literal_preserves_leading_zero_nibble() {
        let v = Value::from_hex_digits("00ff");
        assert_eq!(v.to_bytes().unwrap(), vec![0x00, 0xff]);
    }

    #[test]
    fn odd_length_hex_is_rejected() {
        let v = Value::from_hex_digits("fff");
        assert_eq!(v.to_bytes(), Err(NumericError::OddHex));
    }

    #[test]
    fn string_bytes_preserve_leading_zero_byte() {
        let v = Value::from_bytes(vec![0x00, 0x41]);
        assert_eq!(v.to_bytes().unwrap(), vec![0x00, 0x41]);
    }

    #[test]
    fn arithmetic_loses_leading_zero_metadata() {
        let a = Value::from_hex_digits("0001");
        let b = Value::from_i64(0);
        let sum = Value::from_int(a.to_int() + b.to_int());
        // The sum is just `1`, not zero-padded to two bytes.
        assert_eq!(sum.to_bytes().unwrap(), vec![0x01]);
    }

    #[test]
    fn negative_value_rejects_bytes() {
        let v = Value::from_i64(-1);
        assert_eq!(v.to_bytes(), Err(NumericError::NegativeBytes));
    }

    #[test]
    fn zero_has_no_bytes_and_no_bits() {
        let v = Value::from_i64(0);
        assert_eq!(v.byte_len().unwrap(), 0);
        assert_eq!(v.bit_len(), 0);
    }
}
