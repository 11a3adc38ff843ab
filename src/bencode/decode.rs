//! Bencode decoder
//!
//! Strict parser over a byte slice. Integer grammar follows BEP-3: ASCII
//! digits only, no leading zeros except for `0` itself, `-0` rejected.
//! Duplicate dictionary keys are an error; unsorted keys are accepted on
//! input (the encoder re-sorts them).

use std::collections::BTreeMap;
use std::fmt;

use super::Value;

/// Decoder failure classes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BencodeError {
    /// Input does not match the bencode grammar
    InvalidFormat,
    /// Integer literal breaks the grammar (leading zero, `-0`, empty, overflow)
    IntegerFormat,
    /// Input ended in the middle of a value
    UnexpectedEnd,
    /// A dictionary repeated a key
    DuplicateKey,
}

impl fmt::Display for BencodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BencodeError::InvalidFormat => write!(f, "invalid bencode format"),
            BencodeError::IntegerFormat => write!(f, "invalid integer format"),
            BencodeError::UnexpectedEnd => write!(f, "unexpected end of input"),
            BencodeError::DuplicateKey => write!(f, "duplicate dictionary key"),
        }
    }
}

impl std::error::Error for BencodeError {}

/// Decode a complete bencode document
///
/// Trailing bytes after the outermost value are an error.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let (value, consumed) = decode_prefix(data)?;
    if consumed != data.len() {
        return Err(BencodeError::InvalidFormat);
    }
    Ok(value)
}

/// Decode one value from the front of `data`
///
/// Returns the value and the number of bytes consumed; never reads past the
/// end of the outermost value.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), BencodeError> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.parse_value()?;
    Ok((value, decoder.pos))
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEnd)
    }

    fn bump(&mut self) -> Result<u8, BencodeError> {
        let b = self.peek()?;
        self.pos += 1;
        Ok(b)
    }

    fn parse_value(&mut self) -> Result<Value, BencodeError> {
        match self.peek()? {
            b'i' => self.parse_integer(),
            b'l' => self.parse_list(),
            b'd' => self.parse_dict(),
            b'0'..=b'9' => self.parse_bytes().map(Value::Bytes),
            _ => Err(BencodeError::InvalidFormat),
        }
    }

    fn parse_integer(&mut self) -> Result<Value, BencodeError> {
        self.bump()?; // 'i'
        let start = self.pos;
        if self.peek()? == b'-' {
            self.pos += 1;
        }
        while self.peek()? != b'e' {
            match self.bump()? {
                b'0'..=b'9' => {}
                _ => return Err(BencodeError::IntegerFormat),
            }
        }
        let digits = &self.data[start..self.pos];
        self.pos += 1; // 'e'

        let unsigned = if digits.first() == Some(&b'-') {
            &digits[1..]
        } else {
            digits
        };
        if unsigned.is_empty() {
            return Err(BencodeError::IntegerFormat);
        }
        // No leading zeros, and no negative zero
        if unsigned.len() > 1 && unsigned[0] == b'0' {
            return Err(BencodeError::IntegerFormat);
        }
        if digits == b"-0" {
            return Err(BencodeError::IntegerFormat);
        }

        std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<i64>().ok())
            .map(Value::Integer)
            .ok_or(BencodeError::IntegerFormat)
    }

    fn parse_bytes(&mut self) -> Result<Vec<u8>, BencodeError> {
        let start = self.pos;
        while self.peek()? != b':' {
            match self.bump()? {
                b'0'..=b'9' => {}
                _ => return Err(BencodeError::InvalidFormat),
            }
        }
        let length: usize = std::str::from_utf8(&self.data[start..self.pos])
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(BencodeError::InvalidFormat)?;
        self.pos += 1; // ':'

        if self.data.len() - self.pos < length {
            return Err(BencodeError::UnexpectedEnd);
        }
        let bytes = self.data[self.pos..self.pos + length].to_vec();
        self.pos += length;
        Ok(bytes)
    }

    fn parse_list(&mut self) -> Result<Value, BencodeError> {
        self.bump()?; // 'l'
        let mut items = Vec::new();
        while self.peek()? != b'e' {
            items.push(self.parse_value()?);
        }
        self.pos += 1; // 'e'
        Ok(Value::List(items))
    }

    fn parse_dict(&mut self) -> Result<Value, BencodeError> {
        self.bump()?; // 'd'
        let mut entries = BTreeMap::new();
        while self.peek()? != b'e' {
            // Keys must be byte strings
            if !self.peek()?.is_ascii_digit() {
                return Err(BencodeError::InvalidFormat);
            }
            let key = self.parse_bytes()?;
            let value = self.parse_value()?;
            if entries.insert(key, value).is_some() {
                return Err(BencodeError::DuplicateKey);
            }
        }
        self.pos += 1; // 'e'
        Ok(Value::Dict(entries))
    }
}
