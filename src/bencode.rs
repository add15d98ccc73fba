//! Bencode encoding and decoding.
//!
//! The DHT wire protocol (KRPC) serializes every message as a bencoded
//! dictionary. This module provides the minimal codec the engine needs:
//! a [`Value`] tree, [`encode`] and [`decode`]. It is not a general
//! purpose bencode library.

use bytes::Bytes;
use std::collections::BTreeMap;
use std::io::Write;
use thiserror::Error;

const MAX_DEPTH: usize = 32;

#[derive(Debug, Error)]
pub enum BencodeError {
    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("invalid integer: {0}")]
    InvalidInteger(String),

    #[error("invalid string length")]
    InvalidStringLength,

    #[error("unexpected character: {0}")]
    UnexpectedChar(char),

    #[error("trailing data after value")]
    TrailingData,

    #[error("nesting too deep")]
    NestingTooDeep,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A bencode value: integer, byte string, list, or dictionary.
///
/// Dictionary keys are raw byte strings, kept sorted by `BTreeMap` so
/// encoding is canonical.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Integer(i64),
    Bytes(Bytes),
    List(Vec<Value>),
    Dict(BTreeMap<Bytes, Value>),
}

impl Value {
    /// Creates a byte string value from a UTF-8 string.
    pub fn string(s: &str) -> Self {
        Value::Bytes(Bytes::copy_from_slice(s.as_bytes()))
    }

    pub fn as_integer(&self) -> Option<i64> {
        match self {
            Value::Integer(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&Bytes> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Returns the value as a UTF-8 string, if it is a valid UTF-8
    /// byte string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Bytes(b) => std::str::from_utf8(b).ok(),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(l) => Some(l),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&BTreeMap<Bytes, Value>> {
        match self {
            Value::Dict(d) => Some(d),
            _ => None,
        }
    }
}

/// Encodes a value to its canonical bencode byte form.
pub fn encode(value: &Value) -> Result<Vec<u8>, BencodeError> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf)?;
    Ok(buf)
}

fn encode_into<W: Write>(value: &Value, w: &mut W) -> Result<(), BencodeError> {
    match value {
        Value::Integer(i) => write!(w, "i{}e", i)?,
        Value::Bytes(b) => {
            write!(w, "{}:", b.len())?;
            w.write_all(b)?;
        }
        Value::List(items) => {
            w.write_all(b"l")?;
            for item in items {
                encode_into(item, w)?;
            }
            w.write_all(b"e")?;
        }
        Value::Dict(entries) => {
            w.write_all(b"d")?;
            for (key, val) in entries {
                write!(w, "{}:", key.len())?;
                w.write_all(key)?;
                encode_into(val, w)?;
            }
            w.write_all(b"e")?;
        }
    }
    Ok(())
}

/// Decodes a single bencode value, rejecting trailing bytes.
pub fn decode(data: &[u8]) -> Result<Value, BencodeError> {
    let mut decoder = Decoder { data, pos: 0 };
    let value = decoder.value(0)?;

    if decoder.pos != data.len() {
        return Err(BencodeError::TrailingData);
    }

    Ok(value)
}

struct Decoder<'a> {
    data: &'a [u8],
    pos: usize,
}

impl Decoder<'_> {
    fn peek(&self) -> Result<u8, BencodeError> {
        self.data
            .get(self.pos)
            .copied()
            .ok_or(BencodeError::UnexpectedEof)
    }

    fn value(&mut self, depth: usize) -> Result<Value, BencodeError> {
        if depth > MAX_DEPTH {
            return Err(BencodeError::NestingTooDeep);
        }

        match self.peek()? {
            b'i' => self.integer(),
            b'l' => self.list(depth),
            b'd' => self.dict(depth),
            b'0'..=b'9' => Ok(Value::Bytes(self.byte_string()?)),
            c => Err(BencodeError::UnexpectedChar(c as char)),
        }
    }

    fn integer(&mut self) -> Result<Value, BencodeError> {
        self.pos += 1;
        let digits = self.take_until(b'e')?;

        let s = std::str::from_utf8(digits)
            .map_err(|_| BencodeError::InvalidInteger("invalid utf8".into()))?;

        if s.is_empty() {
            return Err(BencodeError::InvalidInteger("empty".into()));
        }

        // Canonical form only: no leading zeros, no negative zero.
        if s.starts_with("-0") || (s.starts_with('0') && s.len() > 1) {
            return Err(BencodeError::InvalidInteger("leading zeros".into()));
        }

        let value: i64 = s.parse().map_err(|_| BencodeError::InvalidInteger(s.into()))?;

        self.pos += 1;
        Ok(Value::Integer(value))
    }

    fn byte_string(&mut self) -> Result<Bytes, BencodeError> {
        let digits = self.take_until(b':')?;

        let len: usize = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse().ok())
            .ok_or(BencodeError::InvalidStringLength)?;

        self.pos += 1;

        // `len` comes off the wire and may be absurd; the comparison must
        // not overflow.
        if len > self.data.len() - self.pos {
            return Err(BencodeError::UnexpectedEof);
        }

        let bytes = Bytes::copy_from_slice(&self.data[self.pos..self.pos + len]);
        self.pos += len;
        Ok(bytes)
    }

    fn list(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut items = Vec::new();

        while self.peek()? != b'e' {
            items.push(self.value(depth + 1)?);
        }

        self.pos += 1;
        Ok(Value::List(items))
    }

    fn dict(&mut self, depth: usize) -> Result<Value, BencodeError> {
        self.pos += 1;
        let mut entries = BTreeMap::new();

        while self.peek()? != b'e' {
            let key = match self.peek()? {
                b'0'..=b'9' => self.byte_string()?,
                c => return Err(BencodeError::UnexpectedChar(c as char)),
            };

            let value = self.value(depth + 1)?;
            entries.insert(key, value);
        }

        self.pos += 1;
        Ok(Value::Dict(entries))
    }

    fn take_until(&mut self, delim: u8) -> Result<&[u8], BencodeError> {
        let start = self.pos;
        while self.peek()? != delim {
            self.pos += 1;
        }
        Ok(&self.data[start..self.pos])
    }
}
