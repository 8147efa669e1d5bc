//! Input validation and sanitization for SIP messages.

use crate::error::{SipError, SipResult};

/// Validate and sanitize a header value, rejecting CRLF header-injection
/// attempts and stripping other control characters (tab excluded).
pub fn sanitize_header_value(value: &str) -> SipResult<String> {
    if value.contains("\r\n") || value.contains('\n') || value.contains('\r') {
        return Err(SipError::parse_with_context(
            "header injection attempt detected",
            "header value contains CRLF",
        ));
    }

    let sanitized: String = value
        .chars()
        .filter(|&c| c == '\t' || !c.is_control())
        .collect();

    Ok(sanitized)
}

/// Validate a SIP URI for structural and security issues.
pub fn validate_uri(uri: &str, max_depth: usize) -> SipResult<()> {
    if uri.contains('\0') {
        return Err(SipError::parse("URI contains null bytes"));
    }

    let depth = uri.matches('<').count();
    if depth > max_depth {
        return Err(SipError::parse(format!(
            "URI depth {depth} exceeds maximum {max_depth}"
        )));
    }

    let suspicious_patterns = ["../", "..\\", "%00", "%0d", "%0a"];
    for pattern in &suspicious_patterns {
        if uri.contains(pattern) {
            return Err(SipError::parse(format!(
                "URI contains suspicious pattern: {pattern}"
            )));
        }
    }

    Ok(())
}

/// Validate a header name contains only SIP token characters.
pub fn validate_header_name(name: &str) -> SipResult<()> {
    for ch in name.chars() {
        if ch.is_control()
            || "()<>@,;:\\\"/[]?={} \t".contains(ch)
        {
            return Err(SipError::parse_with_context(
                format!("invalid character '{ch}' in header name"),
                name.to_string(),
            ));
        }
    }
    Ok(())
}

/// Validate a method token: uppercase letters, reasonable length.
pub fn validate_method(method: &str) -> SipResult<()> {
    if method.is_empty() || method.len() > 32 {
        return Err(SipError::parse_with_context(
            "method name has invalid length",
            format!("length: {}", method.len()),
        ));
    }

    for ch in method.chars() {
        if !ch.is_ascii_uppercase() {
            return Err(SipError::parse_with_context(
                format!("invalid character '{ch}' in method name"),
                method.to_string(),
            ));
        }
    }

    Ok(())
}

/// Validate the SIP-version token on the start line.
pub fn validate_sip_version(version: &str) -> SipResult<()> {
    if version != "SIP/2.0" {
        return Err(SipError::parse(format!(
            "unsupported SIP version: {version}"
        )));
    }
    Ok(())
}

/// Validate a response status code falls in the SIP range.
pub fn validate_status_code(code: u16) -> SipResult<()> {
    if !(100..=699).contains(&code) {
        return Err(SipError::parse(format!("invalid status code: {code}")));
    }
    Ok(())
}
