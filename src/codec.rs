//! Eager SIP message codec: decodes a datagram into an owned `Request` or
//! `Response`, and serializes either back to wire bytes.
//!
//! Unlike a zero-copy parser that stores byte ranges into the original
//! buffer, every header is decoded into an owned `String` up front. A
//! signaling dialog outlives the datagram it arrived in by definition (it
//! is stored in the Call-ID table for the lifetime of the call), so
//! borrowing from the input buffer would just force a clone at the point
//! of storage; deciding eagerly is simpler and costs nothing extra here.

use crate::error::{SipError, SipResult};
use crate::headers::Headers;
use crate::limits::ParserLimits;
use crate::types::Method;
use crate::validation;

/// A decoded SIP request: method, Request-URI, headers, and body.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub headers: Headers,
    pub body: String,
}

/// A decoded SIP response: status line and headers/body.
#[derive(Debug, Clone)]
pub struct Response {
    pub status_code: u16,
    pub reason_phrase: String,
    pub headers: Headers,
    pub body: String,
}

/// A decoded message is either a request or a response; the dispatcher
/// branches on this before routing further.
#[derive(Debug, Clone)]
pub enum Message {
    Request(Request),
    Response(Response),
}

/// Status-code reason phrases, ported from the response-code table this
/// engine answers with (the full IANA set is out of scope; only the
/// subset the signaling layer itself emits or forwards is kept here).
pub fn reason_phrase(code: u16) -> &'static str {
    match code {
        100 => "Trying",
        180 => "Ringing",
        181 => "Call Is Being Forwarded",
        182 => "Queued",
        183 => "Session Progress",
        200 => "OK",
        300 => "Multiple Choices",
        301 => "Moved Permanently",
        302 => "Moved Temporarily",
        305 => "Use Proxy",
        380 => "Alternative Service",
        400 => "Bad Request",
        401 => "Unauthorized",
        402 => "Payment Required",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        406 => "Not Acceptable",
        407 => "Proxy Authentication Required",
        408 => "Request Timeout",
        410 => "Gone",
        413 => "Request Entity Too Large",
        414 => "Request-URI Too Large",
        415 => "Unsupported Media Type",
        416 => "Unsupported URI Scheme",
        420 => "Bad Extension",
        421 => "Extension Required",
        423 => "Interval Too Brief",
        480 => "Temporarily not available",
        481 => "Call Leg/Transaction Does Not Exist",
        482 => "Loop Detected",
        483 => "Too Many Hops",
        484 => "Address Incomplete",
        485 => "Ambiguous",
        486 => "Busy Here",
        487 => "Request Terminated",
        488 => "Not Acceptable Here",
        491 => "Request Pending",
        493 => "Undecipherable",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Server Time-out",
        505 => "SIP Version not supported",
        513 => "Message Too Large",
        600 => "Busy Everywhere",
        603 => "Decline",
        604 => "Does not exist anywhere",
        606 => "Not Acceptable",
        _ => "Unknown",
    }
}

/// Normalizes bare-LF line endings to CRLF and splits the start line,
/// header block, and body apart.
fn normalize_and_split(raw: &str) -> SipResult<(String, String, String)> {
    let normalized = raw.replace("\r\n", "\n").replace('\n', "\r\n");

    let header_end = normalized
        .find("\r\n\r\n")
        .ok_or_else(|| SipError::parse("message has no header/body separator"))?;

    let head = &normalized[..header_end];
    let body = normalized[header_end + 4..].to_string();

    let (start_line, header_block) = head
        .split_once("\r\n")
        .ok_or_else(|| SipError::parse("message has no start line"))?;

    Ok((start_line.to_string(), header_block.to_string(), body))
}

/// Unfolds continuation lines (CRLF followed by whitespace) into a single
/// logical line per header, then splits each into name/value and records
/// it, special-casing `Authorization`/`WWW-Authenticate` whose digest
/// parameter lists use literal commas rather than the usual `;`-separated
/// multi-value convention.
fn parse_headers(header_block: &str, limits: &ParserLimits) -> SipResult<Headers> {
    let mut unfolded = String::with_capacity(header_block.len());
    for line in header_block.split("\r\n") {
        if line.starts_with(' ') || line.starts_with('\t') {
            unfolded.push(' ');
            unfolded.push_str(line.trim_start());
        } else {
            if !unfolded.is_empty() {
                unfolded.push_str("\r\n");
            }
            unfolded.push_str(line);
        }
    }

    let mut headers = Headers::new();
    for line in unfolded.split("\r\n") {
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| SipError::parse_with_context("header line missing ':'", line.to_string()))?;
        let name = name.trim();
        let value = value.trim();

        if name.len() > limits.max_header_name_length {
            return Err(SipError::parse_with_context(
                "header name exceeds configured limit",
                name.to_string(),
            ));
        }
        if value.len() > limits.max_header_value_length {
            return Err(SipError::parse_with_context(
                "header value exceeds configured limit",
                name.to_string(),
            ));
        }
        validation::validate_header_name(name)?;
        let sanitized = validation::sanitize_header_value(value)?;
        headers.insert(name, sanitized);
    }

    Ok(headers)
}

/// Decodes a raw UDP datagram into a `Message`, applying size limits
/// before any allocation-heavy parsing work.
pub fn parse(raw: &[u8], limits: &ParserLimits) -> SipResult<Message> {
    if raw.len() > limits.max_message_size {
        return Err(SipError::parse(format!(
            "message of {} bytes exceeds configured limit of {} bytes",
            raw.len(),
            limits.max_message_size
        )));
    }

    let text = std::str::from_utf8(raw)
        .map_err(|_| SipError::parse("message is not valid UTF-8"))?;

    let (start_line, header_block, body) = normalize_and_split(text)?;
    let headers = parse_headers(&header_block, limits)?;

    if start_line.starts_with("SIP/2.0") {
        parse_status_line(&start_line, headers, body).map(Message::Response)
    } else {
        parse_request_line(&start_line, headers, body, limits).map(Message::Request)
    }
}

fn parse_request_line(
    start_line: &str,
    headers: Headers,
    body: String,
    limits: &ParserLimits,
) -> SipResult<Request> {
    let mut parts = start_line.splitn(3, ' ');
    let method_token = parts
        .next()
        .ok_or_else(|| SipError::parse("request line missing method"))?;
    let uri = parts
        .next()
        .ok_or_else(|| SipError::parse("request line missing Request-URI"))?;
    let version = parts
        .next()
        .ok_or_else(|| SipError::parse("request line missing SIP version"))?;

    validation::validate_method(method_token)?;
    validation::validate_sip_version(version)?;
    validation::validate_uri(uri, limits.max_uri_depth)?;

    Ok(Request {
        method: Method::parse(method_token),
        uri: uri.to_string(),
        headers,
        body,
    })
}

fn parse_status_line(start_line: &str, headers: Headers, body: String) -> SipResult<Response> {
    let mut parts = start_line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| SipError::parse("status line missing SIP version"))?;
    let code_token = parts
        .next()
        .ok_or_else(|| SipError::parse("status line missing status code"))?;
    let reason = parts.next().unwrap_or("").to_string();

    validation::validate_sip_version(version)?;
    let status_code: u16 = code_token
        .parse()
        .map_err(|_| SipError::parse(format!("invalid status code token: {code_token}")))?;
    validation::validate_status_code(status_code)?;

    Ok(Response {
        status_code,
        reason_phrase: if reason.is_empty() {
            reason_phrase(status_code).to_string()
        } else {
            reason
        },
        headers,
        body,
    })
}

impl Request {
    /// Serializes the request to wire bytes, recomputing `Content-Length`
    /// from the actual body rather than trusting a stored value.
    pub fn serialize(&self) -> String {
        let mut out = format!("{} {} SIP/2.0\r\n", self.method.as_str(), self.uri);
        serialize_headers(&self.headers, self.body.len(), &mut out);
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

impl Response {
    /// Serializes the response to wire bytes, recomputing
    /// `Content-Length` from the actual body.
    pub fn serialize(&self) -> String {
        let mut out = format!(
            "SIP/2.0 {} {}\r\n",
            self.status_code,
            if self.reason_phrase.is_empty() {
                reason_phrase(self.status_code)
            } else {
                self.reason_phrase.as_str()
            }
        );
        serialize_headers(&self.headers, self.body.len(), &mut out);
        out.push_str("\r\n");
        out.push_str(&self.body);
        out
    }
}

/// Canonical header emission order: every Via, then From, To, Call-ID,
/// Contact(s), CSeq, Allow, Max-Forwards, WWW-Authenticate, and
/// Authorization, before any header not on this list. Content-Length is
/// always computed and appended last, regardless of where it was stored.
const CANONICAL_HEADER_ORDER: &[&str] = &[
    "via",
    "from",
    "to",
    "call-id",
    "contact",
    "cseq",
    "allow",
    "max-forwards",
    "www-authenticate",
    "authorization",
];

/// Writes every header line in canonical order (§4.1), then appends a
/// freshly computed `Content-Length` (any stored value is ignored on
/// output). Headers with no fixed place are emitted last, in the order
/// they were originally inserted.
fn serialize_headers(headers: &Headers, body_len: usize, out: &mut String) {
    let mut written = std::collections::HashSet::new();
    for name in CANONICAL_HEADER_ORDER {
        for value in headers.get_all(name) {
            out.push_str(&capitalize_header(name));
            out.push_str(": ");
            out.push_str(value);
            out.push_str("\r\n");
        }
        written.insert(*name);
    }
    for (name, value) in headers.iter() {
        if name == "content-length" || written.contains(name) {
            continue;
        }
        out.push_str(&capitalize_header(name));
        out.push_str(": ");
        out.push_str(value);
        out.push_str("\r\n");
    }
    out.push_str(&format!("Content-Length: {body_len}\r\n"));
}

fn capitalize_header(name: &str) -> String {
    match name {
        "call-id" => "Call-ID".to_string(),
        "cseq" => "CSeq".to_string(),
        "www-authenticate" => "WWW-Authenticate".to_string(),
        _ => name
            .split('-')
            .map(|part| {
                let mut c = part.chars();
                match c.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + c.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join("-"),
    }
}
