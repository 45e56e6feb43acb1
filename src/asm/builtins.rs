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
use std::rc::Rc;

use sha2::{Digest, Sha256};
use sha3::Keccak256;

use crate::asm::error::{Abort, ErrorList, Position};
use crate::numeric::Value;

/// Extract the byte-string view of a value, turning a numeric conversion
/// failure into a diagnostic rather than a panic.
fn bytes_view(v: &Value, errors: &mut ErrorList) -> Result<Vec<u8>, Abort> {
    match v.to_bytes() {
        Ok(b) => Ok(b),
        Err(e) => {
            errors.error(Position::new(Rc::from("<builtin>"), 0), e.to_string())?;
            Ok(Vec::new())
        }
    }
}

fn want_one(name: &str, args: &[Value], errors: &mut ErrorList) -> Result<Value, Abort> {
    if args.len() != 1 {
        errors.error(Position::new(Rc::from("<builtin>"), 0), format!("'{}' expects exactly one argument", name))?;
        return Ok(Value::from_i64(0));
    }
    Ok(args[0].clone())
}

/// Dispatch a builtin expression-level function by name (C11). Called by
/// the evaluator once no user-defined expression macro shadows `name`.
pub fn call(name: &str, args: &[Value], errors: &mut ErrorList) -> Result<Value, Abort> {
    match name {
        "abs" => {
            let v = want_one(name, args, errors)?;
            Ok(v.abs())
        }
        "len" | "bytelen" => {
            let v = want_one(name, args, errors)?;
            let len = match v.byte_len() {
                Ok(n) => n,
                Err(e) => {
                    errors.error(Position::new(Rc::from("<builtin>"), 0), e.to_string())?;
                    0
                }
            };
            Ok(Value::from_i64(len as i64))
        }
        "intbits" | "bitlen" => {
            let v = want_one(name, args, errors)?;
            Ok(Value::from_i64(v.bit_len() as i64))
        }
        "sha256" => {
            let v = want_one(name, args, errors)?;
            let bytes = bytes_view(&v, errors)?;
            let digest = Sha256::digest(&bytes);
            Ok(Value::from_bytes(digest.to_vec()))
        }
        "keccak256" => {
            let v = want_one(name, args, errors)?;
            let bytes = bytes_view(&v, errors)?;
            let mut hasher = Keccak256::new();
            hasher.update(&bytes);
            Ok(Value::from_bytes(hasher.finalize().to_vec()))
        }
        "selector" => {
            let v = want_one(name, args, errors)?;
            let bytes = bytes_view(&v, errors)?;
            match std::str::from_utf8(&bytes) {
                Ok(sig) if is_function_signature(sig) => {}
                _ => {
                    errors.error(
                        Position::new(Rc::from("<builtin>"), 0),
                        "'selector' argument is not a valid function signature, expected 'name(type,type,...)'",
                    )?;
                }
            }
            let mut hasher = Keccak256::new();
            hasher.update(&bytes);
            let digest = hasher.finalize();
            Ok(Value::from_bytes(digest[0..4].to_vec()))
        }
        "address" => {
            let v = want_one(name, args, errors)?;
            let bytes = bytes_view(&v, errors)?;
            if bytes.len() > 20 {
                errors.error(Position::new(Rc::from("<builtin>"), 0), "'address' argument is wider than 20 bytes")?;
            }
            let mut padded = vec![0u8; 20usize.saturating_sub(bytes.len())];
            padded.extend_from_slice(&bytes);
            if let Some(digits) = v.hex_digits() {
                validate_address_checksum(digits, &padded, errors)?;
            }
            Ok(Value::from_bytes(padded))
        }
        other => {
            errors.error(Position::new(Rc::from("<builtin>"), 0), format!("unknown macro or builtin '{}'", other))?;
            Ok(Value::from_i64(0))
        }
    }
}

/// Hand-rolled shape check for an ABI function signature, `name(type,...)`.
/// Not a full ABI type grammar, just enough to reject obvious garbage
/// before it's silently hashed into a meaningless selector.
fn is_function_signature(s: &str) -> bool {
    let open = match s.find('(') {
        Some(i) => i,
        None => return false,
    };
    if !s.ends_with(')') {
        return false;
    }
    let name = &s[..open];
    if name.is_empty() || !name.chars().next().map_or(false, |c| c.is_ascii_alphabetic() || c == '_') {
        return false;
    }
    if !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_') {
        return false;
    }
    let params = &s[open + 1..s.len() - 1];
    if params.is_empty() {
        return true;
    }
    params.split(',').all(is_abi_type)
}

fn is_abi_type(t: &str) -> bool {
    if t.is_empty() || !t.chars().next().map_or(false, |c| c.is_ascii_alphabetic()) {
        return false;
    }
    t.chars().all(|c| c.is_ascii_alphanumeric() || c == '[' || c == ']')
}

/// Validates the EIP-55 mixed-case checksum of a hex-literal address
/// argument, but only when the literal actually used mixed case: an
/// all-lowercase (or all-digit) literal makes no checksum claim.
fn validate_address_checksum(digits: &str, padded: &[u8], errors: &mut ErrorList) -> Result<(), Abort> {
    if digits.len() > 40 || !digits.chars().any(|c| c.is_ascii_uppercase()) {
        return Ok(());
    }
    let padded_digits = format!("{:0>40}", digits);
    let expected = checksum_address(padded);
    let actual = format!("0x{}", padded_digits);
    if actual != expected {
        errors.error(Position::new(Rc::from("<builtin>"), 0), format!("'address' argument is not a valid EIP-55 checksum, expected '{}'", expected))?;
    }
    Ok(())
}

/// EIP-55 mixed-case checksum encoding of a 20-byte address, used when
/// rendering `address(...)` results for diagnostics.
pub fn checksum_address(addr: &[u8]) -> String {
    let hex: String = addr.iter().map(|b| format!("{:02x}", b)).collect();
    let mut hasher = Keccak256::new();
    hasher.update(hex.as_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(42);
    out.push_str("0x");
    for (i, c) in hex.chars().enumerate() {
        if c.is_ascii_digit() {
            out.push(c);
            continue;
        }
        let nibble = digest[i / 2];
        let hash_bit = if i % 2 == 0 { nibble >> 4 } else { nibble & 0x0f };
        if hash_bit >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn abs_negates_negative_values() {
        let mut errors = ErrorList::new(8);
        let out = call("abs", &[Value::from_i64(-5)], &mut errors).unwrap();
        assert_eq!(out.to_int(), num_bigint::BigInt::from(5));
    }

    #[test]
    fn len_uses_leading_zero_aware_byte_length() {
        let mut errors = ErrorList::new(8);
        let v = Value::from_hex_digits("0001");
        let out = call("len", &[v], &mut errors).unwrap();
        assert_eq!(out.to_int(), num_bigint::BigInt::from(2));
    }

    #[test]
    fn keccak256_of_empty_matches_known_digest() {
        let mut errors = ErrorList::new(8);
        let out = call("keccak256", &[Value::from_bytes(Vec::new())], &mut errors).unwrap();
        let bytes = out.to_bytes().unwrap();
        assert_eq!(bytes[0], 0xc5);
        assert_eq!(bytes.len(), 32);
    }

    #[test]
    fn selector_returns_four_bytes() {
        let mut errors = ErrorList::new(8);
        let v = Value::from_bytes(b"transfer(address,uint256)".to_vec());
        let out = call("selector", &[v], &mut errors).unwrap();
        assert_eq!(out.to_bytes().unwrap().len(), 4);
    }

    #[test]
    fn eip55_checksum_matches_reference_vector() {
        let addr = hex_decode("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        assert_eq!(checksum_address(&addr), "0x5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
    }

    #[test]
    fn selector_rejects_malformed_signature() {
        let mut errors = ErrorList::new(8);
        let v = Value::from_bytes(b"not a signature".to_vec());
        let _ = call("selector", &[v], &mut errors);
        assert!(errors.failed());
    }

    #[test]
    fn address_accepts_a_correctly_checksummed_literal() {
        let mut errors = ErrorList::new(8);
        let v = Value::from_hex_digits("5aAeb6053F3E94C9b9A09f33669435E7Ef1BeAed");
        let _ = call("address", &[v], &mut errors).unwrap();
        assert!(!errors.failed());
    }

    #[test]
    fn address_rejects_a_badly_checksummed_literal() {
        let mut errors = ErrorList::new(8);
        // Flip the case of the whole literal relative to the reference vector.
        let v = Value::from_hex_digits("5AAEB6053f3e94c9b9a09f33669435e7ef1beaed");
        let _ = call("address", &[v], &mut errors).unwrap();
        assert!(errors.failed());
    }

    #[test]
    fn address_accepts_an_all_lowercase_literal_without_checksum_claim() {
        let mut errors = ErrorList::new(8);
        let v = Value::from_hex_digits("5aaeb6053f3e94c9b9a09f33669435e7ef1beaed");
        let _ = call("address", &[v], &mut errors).unwrap();
        assert!(!errors.failed());
    }

    fn hex_decode(s: &str) -> Vec<u8> {
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }
}
