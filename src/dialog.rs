//! UAS and UAC dialog state machines, and the History each one keeps of
//! every request/response it has sent or received.

use std::net::SocketAddr;
use std::sync::Arc;

use uuid::Uuid;

use crate::codec::{self, Message, Request, Response};
use crate::error::{SipError, SipResult};
use crate::headers::{extract_parameter, strip_params, Headers};
use crate::media::MediaChannel;
use crate::register::Registration;
use crate::transport::Transport;
use crate::types::{Address, CSeq, Contact, Destination, Method, Scheme, Uri, Via};

/// Parses a bare or display-named address: `"Alice" <sip:alice@atlanta.com>`
/// or `sip:alice@atlanta.com`, ignoring a trailing `;tag=...` (callers that
/// need the tag use [`parse_destination`]).
pub fn parse_address(value: &str) -> SipResult<Address> {
    let trimmed = value.trim();
    let (display_name, uri_part) = if let Some(start) = trimmed.find('<') {
        let end = trimmed
            .find('>')
            .ok_or_else(|| SipError::parse("address missing closing '>'"))?;
        let name = trimmed[..start].trim().trim_matches('"');
        let name = if name.is_empty() { None } else { Some(name.to_string()) };
        (name, &trimmed[start + 1..end])
    } else {
        (None, strip_params(trimmed))
    };

    Ok(Address {
        display_name,
        uri: parse_uri(uri_part)?,
    })
}

/// Parses a `sip:[login@]host[;params]` URI.
pub fn parse_uri(value: &str) -> SipResult<Uri> {
    let value = value.trim();
    let (scheme_token, rest) = value
        .split_once(':')
        .ok_or_else(|| SipError::parse_with_context("URI missing scheme", value.to_string()))?;

    let scheme = match scheme_token.to_lowercase().as_str() {
        "sip" => Scheme::Sip,
        "sips" => Scheme::Sips,
        "tel" => Scheme::Tel,
        other => {
            return Err(SipError::parse_with_context(
                "unsupported URI scheme",
                other.to_string(),
            ))
        }
    };

    let body = rest.split(';').next().unwrap_or(rest);
    let transport = extract_parameter(rest, "transport");
    let loose_routing = rest.split(';').any(|p| p.trim().eq_ignore_ascii_case("lr"));

    let (login, host) = match body.split_once('@') {
        Some((login, host)) => (Some(login.to_string()), host.to_string()),
        None => (None, body.to_string()),
    };

    Ok(Uri {
        scheme,
        login,
        host,
        transport,
        loose_routing,
    })
}

/// Parses a `From`/`To` header value into a [`Destination`], including its
/// `tag` parameter.
pub fn parse_destination(value: &str) -> SipResult<Destination> {
    let address = parse_address(value)?;
    let tag = extract_parameter(value, "tag");
    Ok(Destination { address, tag })
}

/// Derives the `(host, login)` key used for account/registration lookup
/// from a `From`/`To` header value.
pub fn host_login_from_address(value: &str) -> SipResult<(String, String)> {
    let address = parse_address(value)?;
    let login = address
        .uri
        .login
        .ok_or_else(|| SipError::parse("address has no login part for account lookup"))?;
    Ok((address.uri.host, login))
}

/// Parses every `Contact` header value present on a request.
pub fn parse_contacts(request: &Request) -> Vec<Contact> {
    request
        .headers
        .get_all("contact")
        .iter()
        .filter_map(|raw| {
            let address = parse_address(raw).ok()?;
            let q = extract_parameter(raw, "q").and_then(|v| v.parse().ok());
            let expires = extract_parameter(raw, "expires").and_then(|v| v.parse().ok());
            Some(Contact { address, q, expires })
        })
        .collect()
}

/// Parses a single `Via` header value.
pub fn parse_via(value: &str) -> SipResult<Via> {
    let host = strip_params(value)
        .trim_start_matches("SIP/2.0/UDP")
        .trim()
        .to_string();
    Ok(Via {
        host,
        branch: extract_parameter(value, "branch"),
        received: extract_parameter(value, "received"),
        rport: value.split(';').any(|p| p.trim().eq_ignore_ascii_case("rport")),
    })
}

fn parse_cseq(value: &str) -> SipResult<CSeq> {
    let mut parts = value.trim().splitn(2, ' ');
    let seq: u32 = parts
        .next()
        .ok_or_else(|| SipError::parse("CSeq missing sequence number"))?
        .parse()
        .map_err(|_| SipError::parse("CSeq sequence number is not an integer"))?;
    let method = parts
        .next()
        .ok_or_else(|| SipError::parse("CSeq missing method"))?;
    Ok(CSeq {
        seq,
        method: Method::parse(method),
    })
}

/// A record of every request and response a dialog has sent or received,
/// used to synthesize base headers for new messages.
#[derive(Debug, Clone, Default)]
pub struct History {
    requests: Vec<Request>,
    responses: Vec<Response>,
}

impl History {
    pub fn new() -> Self {
        History::default()
    }

    pub fn write_request(&mut self, request: Request) {
        self.requests.push(request);
    }

    pub fn write_response(&mut self, response: Response) {
        self.responses.push(response);
    }

    pub fn top_request(&self) -> Option<&Request> {
        self.requests.last()
    }

    pub fn get_invite(&self) -> Option<&Request> {
        self.requests.iter().find(|r| r.method == Method::Invite)
    }
}

/// Builds the base header block shared by every response/request a
/// dialog emits: the original Via stack with this server's hop pushed on
/// top, From/To (with the given local tag), Call-ID, and CSeq echoed
/// unchanged from the most recent request.
fn base_headers(
    invite: &Request,
    top_request: &Request,
    local_tag: &str,
    call_id: &str,
    server_host: &str,
) -> SipResult<Headers> {
    let mut headers = Headers::new();

    for via in invite.headers.require_one_or_more("via")? {
        headers.insert("Via", via.clone());
    }
    headers.insert(
        "Via",
        Via::new(server_host.to_string())
            .with_branch(Uuid::new_v4().to_string())
            .to_string(),
    );

    headers.insert("From", invite.headers.require_one("from")?.to_string());

    let mut to = parse_destination(invite.headers.require_one("to")?)?;
    to.tag = Some(local_tag.to_string());
    headers.insert("To", to.to_string());

    headers.insert("Call-ID", call_id.to_string());

    let cseq = parse_cseq(top_request.headers.require_one("cseq")?)?;
    headers.insert("CSeq", cseq.to_string());

    Ok(headers)
}

/// State of the inbound (UAS) leg of a dialog, per the table in the
/// component design: `Init → Proceeding → Accepted → Established →
/// Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UasState {
    Init,
    Proceeding,
    Accepted,
    Established,
    Terminated,
}

/// The server-side half of a dialog: the incoming leg's Call-ID, a fresh
/// local tag, its Meeting reference, and its History.
pub struct Uas {
    pub call_id: String,
    pub tag: String,
    pub state: UasState,
    pub history: History,
    pub media: Arc<dyn MediaChannel>,
    transport: Arc<dyn Transport>,
    server_host: String,
    peer: SocketAddr,
}

impl Uas {
    pub fn new(
        call_id: impl Into<String>,
        transport: Arc<dyn Transport>,
        server_host: impl Into<String>,
        peer: SocketAddr,
        media: Arc<dyn MediaChannel>,
    ) -> Self {
        Uas {
            call_id: call_id.into(),
            tag: Uuid::new_v4().to_string(),
            state: UasState::Init,
            history: History::new(),
            media,
            transport,
            server_host: server_host.into(),
            peer,
        }
    }

    fn base_headers(&self) -> SipResult<Headers> {
        let invite = self
            .history
            .get_invite()
            .ok_or_else(|| SipError::UnknownDialog {
                call_id: self.call_id.clone(),
            })?;
        let top = self.history.top_request().unwrap_or(invite);
        base_headers(invite, top, &self.tag, &self.call_id, &self.server_host)
    }

    async fn send_response(&mut self, status_code: u16) -> SipResult<()> {
        let headers = self.base_headers()?;
        let response = Response {
            status_code,
            reason_phrase: codec::reason_phrase(status_code).to_string(),
            headers,
            body: String::new(),
        };
        let bytes = response.serialize();
        self.transport.send(self.peer, bytes.as_bytes()).await?;
        self.history.write_response(response);
        Ok(())
    }

    /// `Init → Proceeding`: send `100 Trying`.
    pub async fn trying(&mut self) -> SipResult<()> {
        self.send_response(100).await?;
        self.state = UasState::Proceeding;
        Ok(())
    }

    /// `Proceeding → Proceeding`: send `180 Ringing`.
    pub async fn ringing(&mut self) -> SipResult<()> {
        self.send_response(180).await?;
        Ok(())
    }

    /// `Proceeding → Accepted`: send `200 OK`.
    pub async fn accept(&mut self) -> SipResult<()> {
        self.send_response(200).await?;
        self.state = UasState::Accepted;
        Ok(())
    }

    /// `Established → Terminated`: answer an in-dialog BYE/CANCEL.
    pub async fn end(&mut self) -> SipResult<()> {
        self.send_response(200).await?;
        self.state = UasState::Terminated;
        Ok(())
    }

    /// `Accepted → Established`: an ACK arrived for this dialog.
    pub fn acknowledge(&mut self) {
        self.state = UasState::Established;
    }

    pub fn is_terminal(&self) -> bool {
        self.state == UasState::Terminated
    }
}

/// State of the outbound (UAC) leg of a dialog, per the table in the
/// component design.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UacState {
    Init,
    Calling,
    Ringing,
    Established,
    /// A BYE we originated is outstanding, awaiting the far end's final
    /// response.
    Terminating,
    Terminated,
}

/// The client-side half of a bridged call: a freshly generated Call-ID
/// and local tag, bound to a target [`Registration`].
pub struct Uac {
    pub call_id: String,
    pub tag: String,
    pub remote_tag: Option<String>,
    pub state: UacState,
    pub history: History,
    pub registration: Registration,
    pub media: Arc<dyn MediaChannel>,
    from: Destination,
    transport: Arc<dyn Transport>,
    server_host: String,
}

impl Uac {
    pub fn new(
        transport: Arc<dyn Transport>,
        server_host: impl Into<String>,
        registration: Registration,
        from: Destination,
        media: Arc<dyn MediaChannel>,
    ) -> Self {
        Uac {
            call_id: Uuid::new_v4().to_string(),
            tag: Uuid::new_v4().to_string(),
            remote_tag: None,
            state: UacState::Init,
            history: History::new(),
            registration,
            media,
            from,
            transport,
            server_host: server_host.into(),
        }
    }

    fn peer(&self) -> SipResult<SocketAddr> {
        self.registration
            .source_address
            .ok_or_else(|| SipError::transport("target registration has no known source address"))
    }

    /// `Init → Calling`: send the outgoing INVITE with a fresh Via,
    /// `CSeq: 0 INVITE`, and Contact set to this server's own host/login.
    pub async fn call(&mut self) -> SipResult<()> {
        let mut headers = Headers::new();
        headers.insert("Call-ID", self.call_id.clone());
        headers.insert("From", self.from.to_string());
        let to = Destination {
            address: Address::new(self.registration.destination.address.uri.clone()),
            tag: None,
        };
        headers.insert("To", to.to_string());
        headers.insert(
            "Via",
            Via::new(self.server_host.clone())
                .with_branch(Uuid::new_v4().to_string())
                .to_string(),
        );
        headers.insert(
            "CSeq",
            CSeq {
                seq: 0,
                method: Method::Invite,
            }
            .to_string(),
        );
        let contact_uri = Uri::new(self.server_host.clone()).with_login(
            self.from
                .address
                .uri
                .login
                .clone()
                .unwrap_or_default(),
        );
        headers.insert(
            "Contact",
            Contact::new(Address::new(contact_uri)).to_string(),
        );

        let request = Request {
            method: Method::Invite,
            uri: to.address.uri.to_string(),
            headers,
            body: String::new(),
        };
        let bytes = request.serialize();
        self.transport.send(self.peer()?, bytes.as_bytes()).await?;
        self.history.write_request(request);
        self.state = UacState::Calling;
        Ok(())
    }

    /// `Calling/Ringing → Established`: learn the remote tag from `To`,
    /// then send ACK.
    pub async fn send_ack(&mut self) -> SipResult<()> {
        let invite = self
            .history
            .top_request()
            .cloned()
            .ok_or_else(|| SipError::UnknownDialog {
                call_id: self.call_id.clone(),
            })?;

        let mut headers = Headers::new();
        headers.insert("Call-ID", self.call_id.clone());
        headers.insert("From", invite.headers.require_one("from")?.to_string());
        let mut to = parse_destination(invite.headers.require_one("to")?)?;
        to.tag = self.remote_tag.clone();
        headers.insert("To", to.to_string());
        for via in invite.headers.require_one_or_more("via")? {
            headers.insert("Via", via.clone());
        }
        headers.insert(
            "CSeq",
            CSeq {
                seq: 0,
                method: Method::Ack,
            }
            .to_string(),
        );

        let request = Request {
            method: Method::Ack,
            uri: invite.uri.clone(),
            headers,
            body: String::new(),
        };
        let bytes = request.serialize();
        self.transport.send(self.peer()?, bytes.as_bytes()).await?;
        self.history.write_request(request);
        Ok(())
    }

    /// Handles a response arriving on this leg, advancing state and
    /// reporting which event (if any) the caller must emit on the
    /// Scenario.
    pub fn on_response(&mut self, response: &Response) -> Option<UacEvent> {
        if let Some(to) = response.headers.get_one("to") {
            if let Ok(dest) = parse_destination(to) {
                if let Some(tag) = dest.tag {
                    if !tag.is_empty() {
                        self.remote_tag = Some(tag);
                    }
                }
            }
        }

        if self.state == UacState::Terminating {
            return if response.status_code >= 200 {
                self.state = UacState::Terminated;
                Some(UacEvent::End)
            } else {
                None
            };
        }

        match response.status_code {
            100 => None,
            180 => {
                self.state = UacState::Ringing;
                Some(UacEvent::Ringing)
            }
            200..=299 => {
                self.state = UacState::Established;
                Some(UacEvent::Ready)
            }
            300..=699 => {
                self.state = UacState::Terminated;
                Some(UacEvent::End)
            }
            _ => None,
        }
    }

    /// `Established → Terminating`: originate a BYE to the far end. The
    /// leg only reaches `Terminated` once its final response arrives
    /// through [`Uac::on_response`].
    pub async fn send_bye(&mut self) -> SipResult<()> {
        let invite = self
            .history
            .top_request()
            .cloned()
            .ok_or_else(|| SipError::UnknownDialog {
                call_id: self.call_id.clone(),
            })?;

        let mut headers = Headers::new();
        headers.insert("Call-ID", self.call_id.clone());
        headers.insert("From", invite.headers.require_one("from")?.to_string());
        let mut to = parse_destination(invite.headers.require_one("to")?)?;
        to.tag = self.remote_tag.clone();
        headers.insert("To", to.to_string());
        headers.insert(
            "Via",
            Via::new(self.server_host.clone())
                .with_branch(Uuid::new_v4().to_string())
                .to_string(),
        );
        headers.insert(
            "CSeq",
            CSeq {
                seq: 1,
                method: Method::Bye,
            }
            .to_string(),
        );

        let request = Request {
            method: Method::Bye,
            uri: invite.uri.clone(),
            headers,
            body: String::new(),
        };
        let bytes = request.serialize();
        self.transport.send(self.peer()?, bytes.as_bytes()).await?;
        self.history.write_request(request);
        self.state = UacState::Terminating;
        Ok(())
    }

    /// `Established → Terminated`: answer an in-dialog BYE that arrived
    /// from the far end.
    pub async fn end(&mut self) -> SipResult<()> {
        let invite = self
            .history
            .top_request()
            .cloned()
            .ok_or_else(|| SipError::UnknownDialog {
                call_id: self.call_id.clone(),
            })?;
        let headers = base_headers(&invite, &invite, &self.tag, &self.call_id, &self.server_host)?;
        let response = Response {
            status_code: 200,
            reason_phrase: codec::reason_phrase(200).to_string(),
            headers,
            body: String::new(),
        };
        let bytes = response.serialize();
        self.transport.send(self.peer()?, bytes.as_bytes()).await?;
        self.history.write_response(response);
        self.state = UacState::Terminated;
        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state == UacState::Terminated
    }
}

/// Events a UAC leg reports up to its Scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UacEvent {
    Ringing,
    Ready,
    End,
}

/// Classifies an in-dialog message arriving for an established UAS/UAC
/// leg, used by the server dispatcher to decide which history to append
/// it to before any state transition runs.
pub fn message_call_id(message: &Message) -> Option<&str> {
    match message {
        Message::Request(req) => req.headers.get_one("call-id"),
        Message::Response(resp) => resp.headers.get_one("call-id"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_address_extracts_display_name_and_uri() {
        let addr = parse_address("\"Alice\" <sip:alice@atlanta.com>").unwrap();
        assert_eq!(addr.display_name.as_deref(), Some("Alice"));
        assert_eq!(addr.uri.host, "atlanta.com");
        assert_eq!(addr.uri.login.as_deref(), Some("alice"));
    }

    #[test]
    fn parse_address_handles_bare_uri() {
        let addr = parse_address("sip:bob@atlanta.com").unwrap();
        assert_eq!(addr.uri.host, "atlanta.com");
    }

    #[test]
    fn parse_destination_extracts_tag() {
        let dest = parse_destination("Alice <sip:alice@atlanta.com>;tag=1928301774").unwrap();
        assert_eq!(dest.tag.as_deref(), Some("1928301774"));
    }

    #[test]
    fn host_login_from_address_splits_correctly() {
        let (host, login) = host_login_from_address("sip:alice@atlanta.com").unwrap();
        assert_eq!(host, "atlanta.com");
        assert_eq!(login, "alice");
    }

    #[test]
    fn parse_via_extracts_branch() {
        let via = parse_via("SIP/2.0/UDP pc33.atlanta.com;branch=z9hG4bK776a").unwrap();
        assert_eq!(via.host, "pc33.atlanta.com");
        assert_eq!(via.branch.as_deref(), Some("z9hG4bK776a"));
    }

    #[test]
    fn parse_cseq_splits_seq_and_method() {
        let cseq = parse_cseq("314159 INVITE").unwrap();
        assert_eq!(cseq.seq, 314159);
        assert_eq!(cseq.method, Method::Invite);
    }
}
