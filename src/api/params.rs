//! Query strings and scan records
//!
//! Keys travel as percent-encoded bytes in the `id`, `start` and `end`
//! parameters, so any byte string can be addressed. `+` is a literal plus,
//! not a space.

use percent_encoding::{percent_decode_str, percent_encode, AsciiSet, NON_ALPHANUMERIC};

use crate::error::{Result, StrataError};

/// Everything except `A-Z a-z 0-9 - . _ ~` is escaped
const KEY: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'.')
    .remove(b'_')
    .remove(b'~');

/// Decoded `(name, value)` pairs of one query string
#[derive(Debug, Default, PartialEq, Eq)]
pub struct QueryParams {
    pairs: Vec<(String, Vec<u8>)>,
}

impl QueryParams {
    /// Split and decode a raw query string
    ///
    /// `a=1&b` yields `[("a", "1"), ("b", "")]`. Empty segments are ignored.
    pub fn parse(query: Option<&str>) -> Result<Self> {
        let mut pairs = Vec::new();
        for segment in query.unwrap_or_default().split('&').filter(|s| !s.is_empty()) {
            let (name, value) = segment.split_once('=').unwrap_or((segment, ""));
            let name = String::from_utf8(decode(name)?).map_err(|_| {
                StrataError::Protocol("query parameter name is not UTF-8".to_string())
            })?;
            pairs.push((name, decode(value)?));
        }
        Ok(Self { pairs })
    }

    /// First value of `name`, if present and non-empty
    pub fn optional(&self, name: &str) -> Option<&[u8]> {
        self.pairs
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
            .filter(|v| !v.is_empty())
    }

    /// First value of `name`; missing or empty is a bad request
    pub fn required(&self, name: &str) -> Result<&[u8]> {
        self.optional(name)
            .ok_or_else(|| StrataError::Protocol(format!("missing or empty '{}' parameter", name)))
    }
}

/// Decode `%XX` escapes into raw bytes, refusing broken escapes
pub fn decode(input: &str) -> Result<Vec<u8>> {
    let bytes = input.as_bytes();
    for (i, _) in input.match_indices('%') {
        let escape = bytes.get(i + 1..i + 3);
        if !escape.is_some_and(|hex| hex.iter().all(u8::is_ascii_hexdigit)) {
            return Err(StrataError::Protocol(format!(
                "bad percent escape at offset {} in '{}'",
                i, input
            )));
        }
    }
    Ok(percent_decode_str(input).collect())
}

/// Encode bytes so they survive a query string or a scan record line
pub fn encode(input: &[u8]) -> String {
    percent_encode(input, KEY).to_string()
}

/// One scan record: `encode(key)=encode(value)\n`
pub fn encode_record(key: &[u8], value: &[u8]) -> String {
    format!("{}={}\n", encode(key), encode(value))
}

/// Parse a whole scan response body back into records
pub fn decode_records(body: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
    let body = std::str::from_utf8(body)
        .map_err(|_| StrataError::Protocol("scan body is not ASCII".to_string()))?;

    body.lines()
        .filter(|line| !line.is_empty())
        .map(|line| {
            let (key, value) = line.split_once('=').ok_or_else(|| {
                StrataError::Protocol(format!("scan record without separator: '{}'", line))
            })?;
            Ok((decode(key)?, decode(value)?))
        })
        .collect()
}
