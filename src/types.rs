//! Common SIP types shared across the codec, registration, and dialog
//! layers: URIs, addresses, Via hops, contacts, CSeq, and digest
//! challenge/credential records.

use std::collections::HashMap;
use std::fmt;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// SIP URI schemes. Only `sip`/`sips`/`tel` are in the grammar this engine
/// parses; anything else fails parsing rather than being represented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Default, Serialize, Deserialize)]
pub enum Scheme {
    #[default]
    #[strum(serialize = "sip")]
    Sip,
    #[strum(serialize = "sips")]
    Sips,
    #[strum(serialize = "tel")]
    Tel,
}

/// SIP request methods this engine understands. An unrecognized token on
/// the request line is represented as `Unknown` rather than rejected
/// outright, so OPTIONS-probing or vendor extensions can still route.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Display, EnumString)]
pub enum Method {
    Invite,
    Ack,
    Bye,
    Cancel,
    Register,
    Options,
    Info,
    #[strum(default)]
    Unknown(String),
}

impl Method {
    pub fn as_str(&self) -> &str {
        match self {
            Method::Invite => "INVITE",
            Method::Ack => "ACK",
            Method::Bye => "BYE",
            Method::Cancel => "CANCEL",
            Method::Register => "REGISTER",
            Method::Options => "OPTIONS",
            Method::Info => "INFO",
            Method::Unknown(m) => m.as_str(),
        }
    }

    pub fn parse(token: &str) -> Self {
        match token {
            "INVITE" => Method::Invite,
            "ACK" => Method::Ack,
            "BYE" => Method::Bye,
            "CANCEL" => Method::Cancel,
            "REGISTER" => Method::Register,
            "OPTIONS" => Method::Options,
            "INFO" => Method::Info,
            other => Method::Unknown(other.to_string()),
        }
    }

    /// Methods that establish a new dialog when they arrive without an
    /// existing Call-ID on file.
    pub fn can_establish_dialog(&self) -> bool {
        matches!(self, Method::Invite)
    }
}

/// A SIP URI: `sip:[login@]host[;transport=X][;lr]`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Uri {
    pub scheme: Scheme,
    pub login: Option<String>,
    pub host: String,
    pub transport: Option<String>,
    pub loose_routing: bool,
}

impl Uri {
    pub fn new(host: impl Into<String>) -> Self {
        Uri {
            scheme: Scheme::Sip,
            login: None,
            host: host.into(),
            transport: None,
            loose_routing: false,
        }
    }

    pub fn with_login(mut self, login: impl Into<String>) -> Self {
        self.login = Some(login.into());
        self
    }
}

impl fmt::Display for Uri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:", self.scheme)?;
        if let Some(login) = &self.login {
            write!(f, "{login}@")?;
        }
        write!(f, "{}", self.host)?;
        if let Some(transport) = &self.transport {
            write!(f, ";transport={transport}")?;
        }
        if self.loose_routing {
            write!(f, ";lr")?;
        }
        Ok(())
    }
}

/// A URI with an optional display name: `"name" <uri>` or bare `<uri>`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    pub display_name: Option<String>,
    pub uri: Uri,
}

impl Address {
    pub fn new(uri: Uri) -> Self {
        Address {
            display_name: None,
            uri,
        }
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.display_name {
            write!(f, "\"{name}\" <{}>", self.uri)
        } else {
            write!(f, "<{}>", self.uri)
        }
    }
}

/// An Address plus an optional dialog `tag` parameter: `From`/`To`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Destination {
    pub address: Address,
    pub tag: Option<String>,
}

impl Destination {
    pub fn new(address: Address) -> Self {
        Destination {
            address,
            tag: None,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    pub fn host(&self) -> &str {
        &self.address.uri.host
    }

    pub fn login(&self) -> Option<&str> {
        self.address.uri.login.as_deref()
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if let Some(tag) = &self.tag {
            write!(f, ";tag={tag}")?;
        }
        Ok(())
    }
}

/// A single Via hop: `SIP/2.0/UDP host[:port][;branch=][;received=][;rport]`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Via {
    pub host: String,
    pub branch: Option<String>,
    pub received: Option<String>,
    pub rport: bool,
}

impl Via {
    pub fn new(host: impl Into<String>) -> Self {
        Via {
            host: host.into(),
            branch: None,
            received: None,
            rport: false,
        }
    }

    pub fn with_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }
}

impl fmt::Display for Via {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SIP/2.0/UDP {}", self.host)?;
        if let Some(branch) = &self.branch {
            write!(f, ";branch={branch}")?;
        }
        if let Some(received) = &self.received {
            write!(f, ";received={received}")?;
        }
        if self.rport {
            write!(f, ";rport")?;
        }
        Ok(())
    }
}

/// A Contact header value: an Address plus optional `q` and `expires`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Contact {
    pub address: Address,
    pub q: Option<f32>,
    pub expires: Option<u32>,
}

impl Contact {
    pub fn new(address: Address) -> Self {
        Contact {
            address,
            q: None,
            expires: None,
        }
    }
}

impl fmt::Display for Contact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.address)?;
        if let Some(q) = self.q {
            write!(f, ";q={q}")?;
        }
        if let Some(expires) = self.expires {
            write!(f, ";expires={expires}")?;
        }
        Ok(())
    }
}

/// CSeq: a sequence number paired with the method it was sent with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CSeq {
    pub seq: u32,
    pub method: Method,
}

impl fmt::Display for CSeq {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.seq, self.method.as_str())
    }
}

/// Digest challenge issued by the server (`WWW-Authenticate`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WwwAuthenticate {
    pub realm: String,
    pub nonce: String,
    pub algorithm: String,
}

impl WwwAuthenticate {
    pub fn new(realm: impl Into<String>, nonce: impl Into<String>) -> Self {
        WwwAuthenticate {
            realm: realm.into(),
            nonce: nonce.into(),
            algorithm: "MD5".to_string(),
        }
    }
}

impl fmt::Display for WwwAuthenticate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest realm=\"{}\", nonce=\"{}\", algorithm={}",
            self.realm, self.nonce, self.algorithm
        )
    }
}

/// Digest credentials carried on the request (`Authorization`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub response: String,
    pub algorithm: String,
}

impl fmt::Display for Authorization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Digest username=\"{}\", realm=\"{}\", nonce=\"{}\", response=\"{}\", algorithm={}",
            self.username, self.realm, self.nonce, self.response, self.algorithm
        )
    }
}

/// Parses a `name=value[,name=value...]` digest parameter list, trimming
/// `"`-quoting per value, as used by both `Authorization` and
/// `WWW-Authenticate` bodies after the leading `Digest ` token.
pub fn parse_digest_params(body: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for part in body.split(',') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            let value = value.trim().trim_matches('"');
            params.insert(key.trim().to_string(), value.to_string());
        }
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uri_display_roundtrips_basic_form() {
        let uri = Uri::new("atlanta.com").with_login("alice");
        assert_eq!(uri.to_string(), "sip:alice@atlanta.com");
    }

    #[test]
    fn uri_display_includes_params() {
        let mut uri = Uri::new("atlanta.com");
        uri.transport = Some("UDP".to_string());
        uri.loose_routing = true;
        assert_eq!(uri.to_string(), "sip:atlanta.com;transport=UDP;lr");
    }

    #[test]
    fn destination_display_includes_tag() {
        let dest = Destination::new(Address::new(Uri::new("atlanta.com").with_login("alice")))
            .with_tag("abc123");
        assert_eq!(dest.to_string(), "<sip:alice@atlanta.com>;tag=abc123");
    }

    #[test]
    fn via_display_matches_wire_form() {
        let via = Via::new("pc33.atlanta.com:5060").with_branch("z9hG4bK776a");
        assert_eq!(via.to_string(), "SIP/2.0/UDP pc33.atlanta.com:5060;branch=z9hG4bK776a");
    }

    #[test]
    fn parse_digest_params_trims_quotes() {
        let params = parse_digest_params(
            "username=\"alice\", realm=\"atlanta.com\", nonce=\"abc\", response=\"def\"",
        );
        assert_eq!(params.get("username").map(String::as_str), Some("alice"));
        assert_eq!(params.get("realm").map(String::as_str), Some("atlanta.com"));
    }

    #[test]
    fn method_unknown_round_trips_token() {
        let m = Method::parse("SUBSCRIBE");
        assert_eq!(m.as_str(), "SUBSCRIBE");
    }
}
