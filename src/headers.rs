//! Eagerly-decoded SIP header storage.
//!
//! Known headers (`Via`, `From`, `To`, `Call-ID`, `CSeq`, `Contact`,
//! `Content-Length`, `Content-Type`, `Authorization`, `WWW-Authenticate`)
//! are parsed into owned values at decode time rather than kept as byte
//! ranges into the original buffer. Everything else is preserved verbatim
//! in an order-preserving spillover multimap so a proxy hop round-trips
//! unknown headers unchanged.

use indexmap::IndexMap;

use crate::error::{SipError, SipResult};

/// Maps a header's long-form lowercase name to its RFC 3261 compact form,
/// so `f`/`From` and `t`/`To` are recognized as the same header on input.
fn compact_form(long_name_lower: &str) -> Option<&'static str> {
    match long_name_lower {
        "from" => Some("f"),
        "to" => Some("t"),
        "via" => Some("v"),
        "contact" => Some("m"),
        "call-id" => Some("i"),
        "content-length" => Some("l"),
        "content-type" => Some("c"),
        "subject" => Some("s"),
        _ => None,
    }
}

/// Canonicalizes a header name as it appeared on the wire (long or
/// compact form) to its long-form lowercase key for storage.
fn canonical_name(name: &str) -> String {
    let lower = name.to_lowercase();
    match lower.as_str() {
        "f" => "from".to_string(),
        "t" => "to".to_string(),
        "v" => "via".to_string(),
        "m" => "contact".to_string(),
        "i" => "call-id".to_string(),
        "l" => "content-length".to_string(),
        "c" => "content-type".to_string(),
        "s" => "subject".to_string(),
        other => other.to_string(),
    }
}

/// Order-preserving multimap of header name (canonical lowercase) to its
/// raw, unparsed values in the order they appeared on the wire.
#[derive(Debug, Clone, Default)]
pub struct Headers {
    values: IndexMap<String, Vec<String>>,
}

impl Headers {
    pub fn new() -> Self {
        Headers {
            values: IndexMap::new(),
        }
    }

    /// Records one header line's value under its canonical name,
    /// preserving the original display form used on the wire for
    /// serialization.
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        let key = canonical_name(name);
        self.values.entry(key).or_default().push(value.into());
    }

    /// The single value for a header that must appear exactly once, or
    /// `None` if absent.
    pub fn get_one(&self, name: &str) -> Option<&str> {
        self.values
            .get(&canonical_name(name))
            .and_then(|v| v.first())
            .map(String::as_str)
    }

    /// All values for a header that may repeat (e.g. `Via`).
    pub fn get_all(&self, name: &str) -> &[String] {
        self.values
            .get(&canonical_name(name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Enforces the "exactly one" invariant for headers like `From`,
    /// `To`, `Call-ID`, and `CSeq`.
    pub fn require_one(&self, name: &str) -> SipResult<&str> {
        let key = canonical_name(name);
        match self.values.get(&key).map(Vec::as_slice) {
            Some([single]) => Ok(single.as_str()),
            Some(values) if values.len() > 1 => Err(SipError::parse_with_context(
                format!("header {name} must appear exactly once"),
                format!("found {} occurrences", values.len()),
            )),
            _ => Err(SipError::parse_with_context(
                format!("missing required header {name}"),
                name.to_string(),
            )),
        }
    }

    /// Enforces the "one or more" invariant for headers like `Via`.
    pub fn require_one_or_more(&self, name: &str) -> SipResult<&[String]> {
        match self.values.get(&canonical_name(name)).map(Vec::as_slice) {
            Some(values) if !values.is_empty() => Ok(values),
            _ => Err(SipError::parse_with_context(
                format!("missing required header {name}"),
                name.to_string(),
            )),
        }
    }

    /// Iterates headers in original insertion order, expanding repeated
    /// values into separate `(name, value)` pairs, for serialization.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values
            .iter()
            .flat_map(|(name, values)| values.iter().map(move |v| (name.as_str(), v.as_str())))
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Extracts a `;param=value` parameter from a header value, trimming
/// surrounding quotes. Used for `tag`, `branch`, `q`, `expires` and
/// similar header parameters.
pub fn extract_parameter(header_value: &str, param_name: &str) -> Option<String> {
    let param_lower = param_name.to_lowercase();
    let prefix = format!("{param_lower}=");

    for part in header_value.split(';') {
        let part = part.trim();
        if part.to_lowercase().starts_with(&prefix) {
            let value = part[part.find('=').unwrap() + 1..].trim();
            let unquoted = value.trim_matches('"');
            return Some(unquoted.to_string());
        }
    }
    None
}

/// Splits the `<uri>` / bare-uri portion off the front of an Address-like
/// header value, discarding any trailing `;param=value` parameters.
pub fn strip_params(header_value: &str) -> &str {
    header_value
        .split(';')
        .next()
        .unwrap_or(header_value)
        .trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compact_and_long_form_share_storage() {
        let mut headers = Headers::new();
        headers.insert("From", "Alice <sip:alice@atlanta.com>;tag=1");
        headers.insert("f", "Bob <sip:bob@atlanta.com>;tag=2");
        assert_eq!(headers.get_all("from").len(), 2);
        assert_eq!(headers.get_all("f").len(), 2);
    }

    #[test]
    fn require_one_rejects_duplicates() {
        let mut headers = Headers::new();
        headers.insert("Call-ID", "abc@atlanta.com");
        headers.insert("i", "def@atlanta.com");
        assert!(headers.require_one("call-id").is_err());
    }

    #[test]
    fn require_one_rejects_missing() {
        let headers = Headers::new();
        assert!(headers.require_one("to").is_err());
    }

    #[test]
    fn require_one_or_more_via() {
        let mut headers = Headers::new();
        headers.insert("Via", "SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK1");
        assert_eq!(headers.require_one_or_more("via").unwrap().len(), 1);
    }

    #[test]
    fn extract_parameter_trims_quotes() {
        let value = "Alice <sip:alice@atlanta.com>;tag=\"abc123\"";
        assert_eq!(extract_parameter(value, "tag").as_deref(), Some("abc123"));
    }

    #[test]
    fn strip_params_drops_trailing_parameters() {
        let value = "SIP/2.0/UDP pc33.atlanta.com:5060;branch=z9hG4bK1;rport";
        assert_eq!(strip_params(value), "SIP/2.0/UDP pc33.atlanta.com:5060");
    }

    #[test]
    fn iter_preserves_insertion_order() {
        let mut headers = Headers::new();
        headers.insert("Via", "hop1");
        headers.insert("Via", "hop2");
        headers.insert("To", "bob");
        let collected: Vec<_> = headers.iter().collect();
        assert_eq!(
            collected,
            vec![("via", "hop1"), ("via", "hop2"), ("to", "bob")]
        );
    }
}
