//! Streaming extraction of concatenated JSON values.
//!
//! The input is a sequence of JSON values separated by optional whitespace,
//! possibly ending mid-value at EOF. Values are parsed incrementally out of
//! a growing buffer; a malformed fragment costs only itself. After a syntax
//! error the scanner resynchronizes at the next plausible value boundary,
//! so the surrounding valid items are unaffected.
//!
//! Duplicate object keys are rejected at any depth.

use std::fmt;
use std::io::{self, BufRead};

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use serde_json::{Map, Number, Value};

/// Upper bound on a single input value. A value still incomplete past this
/// size is abandoned and reported, so hostile input cannot exhaust memory.
pub const MAX_ITEM_LEN: usize = 8 * 1024 * 1024;

const READ_CHUNK: usize = 64 * 1024;

/// A per-item failure at the input boundary. The stream remains usable.
#[derive(Debug, thiserror::Error)]
pub enum ItemError {
    #[error("JSON error in input stream: {0}")]
    Syntax(String),
    #[error("input item exceeded the maximum length of {0} bytes")]
    Oversized(usize),
}

/// Pulls one parsed JSON value at a time from a byte stream.
pub struct JsonScanner<R> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: BufRead> JsonScanner<R> {
    pub fn new(reader: R) -> JsonScanner<R> {
        JsonScanner {
            reader,
            buf: Vec::new(),
            pos: 0,
            eof: false,
        }
    }

    /// The next value, `Ok(None)` at end of input.
    ///
    /// An `Err` in the inner result is a per-item failure (malformed
    /// fragment, duplicate key, oversized value); the outer `io::Result`
    /// is a read failure on the underlying stream.
    pub fn next_item(&mut self) -> io::Result<Option<Result<Value, ItemError>>> {
        loop {
            self.skip_whitespace();
            self.compact();

            if self.buf.is_empty() {
                if self.eof {
                    return Ok(None);
                }
                self.fill()?;
                continue;
            }

            if self.buf.len() > MAX_ITEM_LEN {
                // Abandon the buffered prefix of the runaway value. The
                // scanner keeps going; the value's tail parses as noise.
                self.buf.clear();
                self.pos = 0;
                return Ok(Some(Err(ItemError::Oversized(MAX_ITEM_LEN))));
            }

            let mut iter =
                serde_json::Deserializer::from_slice(&self.buf).into_iter::<Value>();
            match iter.next() {
                Some(Ok(_)) => {
                    let end = iter.byte_offset();
                    let item = parse_strict_slice(&self.buf[..end])
                        .map_err(|e| ItemError::Syntax(e.to_string()));
                    self.pos = end;
                    return Ok(Some(item));
                }
                Some(Err(e)) if e.is_eof() && !self.eof => {
                    self.fill()?;
                }
                Some(Err(e)) if e.is_eof() => {
                    // Truncated value at end of input.
                    self.pos = self.buf.len();
                    return Ok(Some(Err(ItemError::Syntax(e.to_string()))));
                }
                Some(Err(e)) => {
                    self.resync(error_offset(&self.buf, e.line(), e.column()));
                    return Ok(Some(Err(ItemError::Syntax(e.to_string()))));
                }
                None => {
                    if self.eof {
                        return Ok(None);
                    }
                    self.fill()?;
                }
            }
        }
    }

    fn fill(&mut self) -> io::Result<()> {
        let mut chunk = [0u8; READ_CHUNK];
        let n = self.reader.read(&mut chunk)?;
        if n == 0 {
            self.eof = true;
        } else {
            self.buf.extend_from_slice(&chunk[..n]);
        }
        Ok(())
    }

    fn skip_whitespace(&mut self) {
        while self.pos < self.buf.len() && self.buf[self.pos].is_ascii_whitespace() {
            self.pos += 1;
        }
    }

    fn compact(&mut self) {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
    }

    /// Skip past a syntax error: consume up to the error position, then the
    /// rest of the offending token, so scanning resumes at the next
    /// whitespace or structural boundary.
    fn resync(&mut self, offset: usize) {
        self.pos = offset.clamp(1, self.buf.len());
        while self.pos < self.buf.len() {
            let b = self.buf[self.pos];
            if b.is_ascii_whitespace() || b == b'{' || b == b'[' {
                break;
            }
            self.pos += 1;
        }
    }
}

/// Byte offset of a serde_json `(line, column)` error position.
fn error_offset(buf: &[u8], line: usize, column: usize) -> usize {
    let mut remaining = line.saturating_sub(1);
    let mut offset = 0;
    while remaining > 0 && offset < buf.len() {
        if buf[offset] == b'\n' {
            remaining -= 1;
        }
        offset += 1;
    }
    (offset + column.saturating_sub(1)).min(buf.len())
}

// ─── Duplicate-rejecting parse ───────────────────────────────────────────────

/// A JSON value whose deserialization fails on duplicate object keys.
struct CheckedValue(Value);

impl<'de> Deserialize<'de> for CheckedValue {
    fn deserialize<D>(deserializer: D) -> Result<CheckedValue, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct CheckedVisitor;

        impl<'de> Visitor<'de> for CheckedVisitor {
            type Value = CheckedValue;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("any JSON value")
            }

            fn visit_bool<E>(self, v: bool) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::Bool(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::Number(v.into())))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::Number(v.into())))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Self::Value, E> {
                let n =
                    Number::from_f64(v).ok_or_else(|| de::Error::custom("non-finite number"))?;
                Ok(CheckedValue(Value::Number(n)))
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::String(v.to_owned())))
            }

            fn visit_string<E>(self, v: String) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::String(v)))
            }

            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(CheckedValue(Value::Null))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
                let mut items = Vec::new();
                while let Some(CheckedValue(v)) = seq.next_element()? {
                    items.push(v);
                }
                Ok(CheckedValue(Value::Array(items)))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut map = Map::new();
                while let Some((key, CheckedValue(v))) =
                    access.next_entry::<String, CheckedValue>()?
                {
                    if map.contains_key(&key) {
                        return Err(de::Error::custom(format!(
                            "duplicate object key '{key}'"
                        )));
                    }
                    map.insert(key, v);
                }
                Ok(CheckedValue(Value::Object(map)))
            }
        }

        deserializer.deserialize_any(CheckedVisitor)
    }
}

/// Parse one complete value, rejecting duplicate object keys at any depth.
pub fn parse_strict(text: &str) -> Result<Value, serde_json::Error> {
    parse_strict_slice(text.as_bytes())
}

fn parse_strict_slice(bytes: &[u8]) -> Result<Value, serde_json::Error> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    let value = CheckedValue::deserialize(&mut de)?;
    Ok(value.0)
}
