//! REGISTER flow against the dispatcher's public API: challenge/response
//! digest auth, immediate non-auth authorization, and nonce freshness.

use std::sync::Arc;

use sip_signal::codec::{self, Message};
use sip_signal::config::Config;
use sip_signal::limits::ParserLimits;
use sip_signal::register::{expected_digest_response, Account, RegistrationType};
use sip_signal::store::MemoryStore;
use sip_signal::transport::ChannelTransport;
use sip_signal::types::parse_digest_params;
use sip_signal::Server;

fn peer(port: u16) -> std::net::SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn register_request(call_id: &str, cseq: u32, authorization: Option<&str>) -> Vec<u8> {
    let mut raw = format!(
        "REGISTER sip:atlanta.com SIP/2.0\r\n\
Via: SIP/2.0/UDP alice.pc:5060;branch=z9hG4bK{cseq}\r\n\
From: Alice <sip:alice@atlanta.com>;tag=1\r\n\
To: Alice <sip:alice@atlanta.com>\r\n\
Call-ID: {call_id}\r\n\
CSeq: {cseq} REGISTER\r\n\
Contact: <sip:alice@alice.pc:5060>\r\n"
    );
    if let Some(auth) = authorization {
        raw.push_str(&format!("Authorization: {auth}\r\n"));
    }
    raw.push_str("Content-Length: 0\r\n\r\n");
    raw.into_bytes()
}

fn parse_response(bytes: &[u8]) -> codec::Response {
    match codec::parse(bytes, &ParserLimits::default()).unwrap() {
        Message::Response(r) => r,
        Message::Request(_) => panic!("expected a response datagram"),
    }
}

fn nonce_of(response: &codec::Response) -> String {
    let challenge = response.headers.get_one("www-authenticate").unwrap();
    let params = parse_digest_params(challenge.trim_start_matches("Digest").trim_start());
    params.get("nonce").unwrap().clone()
}

async fn build_server(account: Account) -> (Server, Arc<ChannelTransport>) {
    let store = Arc::new(MemoryStore::new());
    store
        .put(
            "/account/atlanta.com/alice",
            &serde_json::to_string(&account).unwrap(),
        )
        .await
        .unwrap();
    let transport = Arc::new(ChannelTransport::new());
    let server = Server::new(Config::default(), store, transport.clone());
    (server, transport)
}

#[tokio::test]
async fn non_auth_account_is_authorized_on_first_register() {
    let (mut server, transport) = build_server(Account {
        registration_type: RegistrationType::NonAuth,
        login: "alice".to_string(),
        password: "secret".to_string(),
        incoming_scenario_id: None,
        outgoing_scenario_id: None,
    })
    .await;

    let request = register_request("reg-nonauth-1", 1, None);
    server.dispatch_datagram(peer(6001), &request).await.unwrap();

    let sent = transport.sent().await;
    assert_eq!(sent.len(), 1);
    let response = parse_response(&sent[0].1);
    assert_eq!(response.status_code, 200);
}

#[tokio::test]
async fn auth_account_challenges_then_accepts_correct_digest() {
    let (mut server, transport) = build_server(Account {
        registration_type: RegistrationType::Auth,
        login: "alice".to_string(),
        password: "secret".to_string(),
        incoming_scenario_id: None,
        outgoing_scenario_id: None,
    })
    .await;

    // First REGISTER carries no Authorization: expect a 401 challenge.
    let first = register_request("reg-auth-1", 1, None);
    server.dispatch_datagram(peer(6002), &first).await.unwrap();
    let sent = transport.sent().await;
    assert_eq!(sent.len(), 1);
    let challenge = parse_response(&sent[0].1);
    assert_eq!(challenge.status_code, 401);
    let nonce = nonce_of(&challenge);

    // Second REGISTER on the same Call-ID, with the correct digest response.
    let response = expected_digest_response(
        "alice",
        "atlanta.com",
        "secret",
        &nonce,
        "REGISTER",
        "sip:atlanta.com",
    );
    let authorization = format!(
        "Digest username=\"alice\", realm=\"atlanta.com\", nonce=\"{nonce}\", response=\"{response}\", algorithm=MD5"
    );
    let second = register_request("reg-auth-1", 2, Some(&authorization));
    server.dispatch_datagram(peer(6002), &second).await.unwrap();

    let sent = transport.sent().await;
    assert_eq!(sent.len(), 1);
    let final_response = parse_response(&sent[0].1);
    assert_eq!(final_response.status_code, 200);
}

#[tokio::test]
async fn wrong_digest_response_re_challenges_with_a_fresh_nonce() {
    let (mut server, transport) = build_server(Account {
        registration_type: RegistrationType::Auth,
        login: "alice".to_string(),
        password: "secret".to_string(),
        incoming_scenario_id: None,
        outgoing_scenario_id: None,
    })
    .await;

    let first = register_request("reg-auth-2", 1, None);
    server.dispatch_datagram(peer(6003), &first).await.unwrap();
    let sent = transport.sent().await;
    let challenge = parse_response(&sent[0].1);
    assert_eq!(challenge.status_code, 401);
    let first_nonce = nonce_of(&challenge);

    // Authorization computed against a nonce that was never issued.
    let bogus_response = expected_digest_response(
        "alice",
        "atlanta.com",
        "secret",
        "a-nonce-nobody-issued",
        "REGISTER",
        "sip:atlanta.com",
    );
    let authorization = format!(
        "Digest username=\"alice\", realm=\"atlanta.com\", nonce=\"a-nonce-nobody-issued\", response=\"{bogus_response}\", algorithm=MD5"
    );
    let second = register_request("reg-auth-2", 2, Some(&authorization));
    server.dispatch_datagram(peer(6003), &second).await.unwrap();

    let sent = transport.sent().await;
    let re_challenge = parse_response(&sent[0].1);
    assert_eq!(re_challenge.status_code, 401);
    let second_nonce = nonce_of(&re_challenge);
    assert_ne!(first_nonce, second_nonce, "a spent/mismatched nonce must never be reissued");
}
