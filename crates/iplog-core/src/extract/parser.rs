//! Dotted-quad scanning over arbitrary bytes
//!
//! The parser is total: invalid UTF-8, NUL bytes and other binary noise never
//! match and never fail, so a log file with corrupted regions still yields
//! every well-formed address it contains.
//!
//! Octets with leading zeros (`010.001.000.007`) are accepted as long as
//! they are in range; [`canonicalize`] turns them into the canonical form.

use std::net::Ipv4Addr;
use std::sync::OnceLock;

use regex::bytes::{Matches, Regex};

/// Four dot-separated groups of 1-3 digits, each in `[0, 255]`.
///
/// ASCII word boundaries keep `999.1.1.1` and `1.1.1.2555` from matching
/// a shorter in-range suffix or prefix.
const IPV4_PATTERN: &str = r"(?-u)\b(?:(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\.){3}(?:25[0-5]|2[0-4][0-9]|[01]?[0-9][0-9]?)\b";

static IPV4_REGEX: OnceLock<Regex> = OnceLock::new();

fn ipv4_regex() -> &'static Regex {
    IPV4_REGEX.get_or_init(|| Regex::new(IPV4_PATTERN).expect("IPv4 pattern compiles"))
}

/// Extracts syntactically valid IPv4 strings from text
///
/// # Example
///
/// ```rust
/// use iplog_core::extract::AddressParser;
///
/// let parser = AddressParser::new();
/// let found: Vec<&str> = parser.parse(b"GET / from 192.168.1.1 via 8.8.8.8").collect();
/// assert_eq!(found, ["192.168.1.1", "8.8.8.8"]);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct AddressParser {
    regex: &'static Regex,
}

impl AddressParser {
    /// Create a parser (the pattern is compiled once per process)
    pub fn new() -> Self {
        Self {
            regex: ipv4_regex(),
        }
    }

    /// Lazily yield every address in `text`, in order of first occurrence
    ///
    /// Duplicates are yielded each time they occur. Calling `parse` again on
    /// the same text restarts from the beginning.
    pub fn parse<'h>(&self, text: &'h [u8]) -> Addresses<'static, 'h> {
        Addresses {
            matches: self.regex.find_iter(text),
            text,
        }
    }
}

impl Default for AddressParser {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over the addresses found by [`AddressParser::parse`]
#[derive(Debug)]
pub struct Addresses<'r, 'h> {
    matches: Matches<'r, 'h>,
    text: &'h [u8],
}

impl<'r, 'h> Iterator for Addresses<'r, 'h> {
    type Item = &'h str;

    fn next(&mut self) -> Option<Self::Item> {
        for m in self.matches.by_ref() {
            if is_embedded(self.text, m.start(), m.end()) {
                continue;
            }
            // Matched bytes are ASCII digits and dots
            if let Ok(s) = std::str::from_utf8(m.as_bytes()) {
                return Some(s);
            }
        }
        None
    }
}

/// Whether a match is part of a longer dotted sequence like `1.2.3.4.5`
///
/// A trailing `.` that ends a sentence is fine; a `.` followed by another
/// digit group is not.
fn is_embedded(text: &[u8], start: usize, end: usize) -> bool {
    let continues = text.get(end) == Some(&b'.')
        && text.get(end + 1).is_some_and(|b| b.is_ascii_digit());
    let preceded = start >= 2 && text[start - 1] == b'.' && text[start - 2].is_ascii_digit();
    continues || preceded
}

/// Convert a dotted quad (leading zeros allowed) into an [`Ipv4Addr`]
///
/// `Ipv4Addr::from_str` rejects leading zeros, so octets are parsed by hand.
/// Returns `None` for anything that is not four in-range decimal groups.
pub fn canonicalize(quad: &str) -> Option<Ipv4Addr> {
    let mut octets = [0u8; 4];
    let mut groups = quad.split('.');

    for octet in octets.iter_mut() {
        let group = groups.next()?;
        if group.is_empty() || group.len() > 3 || !group.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *octet = group.parse::<u8>().ok()?;
    }

    if groups.next().is_some() {
        return None;
    }

    Some(Ipv4Addr::from(octets))
}
