//! Bridged-call flows against the dispatcher's public API: a CallProgram
//! bridging an inbound INVITE to a registered target, a RejectProgram
//! that never places an outgoing leg, and a BYE on an unknown Call-ID.

use std::collections::HashMap;
use std::sync::Arc;

use sip_signal::codec::{self, Message, Request, Response};
use sip_signal::config::Config;
use sip_signal::limits::ParserLimits;
use sip_signal::register::{Account, Registration, RegistrationType};
use sip_signal::scenario::{CallProgramConfig, ProgramType, RejectProgramConfig, ScenarioConfig};
use sip_signal::store::MemoryStore;
use sip_signal::transport::ChannelTransport;
use sip_signal::types::{Address, Destination, Uri};
use sip_signal::Server;

fn peer(port: u16) -> std::net::SocketAddr {
    format!("127.0.0.1:{port}").parse().unwrap()
}

fn account(incoming_scenario_id: &str) -> Account {
    Account {
        registration_type: RegistrationType::NonAuth,
        login: "alice".to_string(),
        password: "secret".to_string(),
        incoming_scenario_id: Some(incoming_scenario_id.to_string()),
        outgoing_scenario_id: None,
    }
}

fn invite_request(call_id: &str, to_uri: &str) -> Vec<u8> {
    format!(
        "INVITE {to_uri} SIP/2.0\r\n\
Via: SIP/2.0/UDP alice.pc:5060;branch=z9hG4bKalice\r\n\
From: Alice <sip:alice@atlanta.com>;tag=alice-tag\r\n\
To: Bob <{to_uri}>\r\n\
Call-ID: {call_id}\r\n\
CSeq: 1 INVITE\r\n\
Contact: <sip:alice@alice.pc:5060>\r\n\
Content-Length: 0\r\n\r\n"
    )
    .into_bytes()
}

fn ack_request(call_id: &str) -> Vec<u8> {
    format!(
        "ACK sip:bob@atlanta.com SIP/2.0\r\n\
Via: SIP/2.0/UDP alice.pc:5060;branch=z9hG4bKalice-ack\r\n\
From: Alice <sip:alice@atlanta.com>;tag=alice-tag\r\n\
To: Bob <sip:bob@atlanta.com>\r\n\
Call-ID: {call_id}\r\n\
CSeq: 1 ACK\r\n\
Content-Length: 0\r\n\r\n"
    )
    .into_bytes()
}

fn bye_request(call_id: &str, from: &str, to: &str) -> Vec<u8> {
    format!(
        "BYE sip:bob@atlanta.com SIP/2.0\r\n\
Via: SIP/2.0/UDP alice.pc:5060;branch=z9hG4bKalice-bye\r\n\
From: {from}\r\n\
To: {to}\r\n\
Call-ID: {call_id}\r\n\
CSeq: 2 BYE\r\n\
Content-Length: 0\r\n\r\n"
    )
    .into_bytes()
}

fn status_response(call_id: &str, status_code: u16) -> Vec<u8> {
    format!(
        "SIP/2.0 {status_code} {}\r\n\
Call-ID: {call_id}\r\n\
To: Bob <sip:bob@atlanta.com>;tag=bob-tag\r\n\
Content-Length: 0\r\n\r\n",
        codec::reason_phrase(status_code)
    )
    .into_bytes()
}

fn parse_request(bytes: &[u8]) -> Request {
    match codec::parse(bytes, &ParserLimits::default()).unwrap() {
        Message::Request(r) => r,
        Message::Response(_) => panic!("expected a request datagram"),
    }
}

fn parse_response(bytes: &[u8]) -> Response {
    match codec::parse(bytes, &ParserLimits::default()).unwrap() {
        Message::Response(r) => r,
        Message::Request(_) => panic!("expected a response datagram"),
    }
}

fn call_id_of(bytes: &[u8]) -> String {
    match codec::parse(bytes, &ParserLimits::default()).unwrap() {
        Message::Request(r) => r.headers.get_one("call-id").unwrap().to_string(),
        Message::Response(r) => r.headers.get_one("call-id").unwrap().to_string(),
    }
}

async fn seed_scenario(
    store: &MemoryStore,
    scenario_id: &str,
    root_kind: ProgramType,
    call_config: Option<CallProgramConfig>,
    reject_config: Option<RejectProgramConfig>,
) {
    let mut programs = HashMap::new();
    programs.insert("root".to_string(), root_kind);
    let config = ScenarioConfig {
        id: scenario_id.to_string(),
        root_id: "root".to_string(),
        programs,
    };
    store
        .put(
            &format!("/scenario-config/{scenario_id}"),
            &serde_json::to_string(&config).unwrap(),
        )
        .await
        .unwrap();
    let program_raw = match root_kind {
        ProgramType::Call => serde_json::to_string(&call_config.unwrap_or_default()).unwrap(),
        ProgramType::Reject => serde_json::to_string(&reject_config.unwrap_or_default()).unwrap(),
    };
    store
        .put(&format!("/scenario/{scenario_id}/programm/root"), &program_raw)
        .await
        .unwrap();
}

async fn seed_bob_registration(store: &MemoryStore, bob_peer: std::net::SocketAddr) {
    let destination = Destination::new(Address::new(Uri::new("atlanta.com").with_login("bob")));
    let registration = Registration::new(
        Account {
            registration_type: RegistrationType::NonAuth,
            login: "bob".to_string(),
            password: "secret".to_string(),
            incoming_scenario_id: None,
            outgoing_scenario_id: None,
        },
        Vec::new(),
        Some(bob_peer),
        destination,
        "atlanta.com",
        "bob",
        true,
    );
    let raw = serde_json::to_string(&registration).unwrap();
    store.put("/registered_uri/atlanta.com/bob", &raw).await.unwrap();
}

async fn build_server(store: Arc<MemoryStore>) -> (Server, Arc<ChannelTransport>) {
    let transport = Arc::new(ChannelTransport::new());
    let server = Server::new(Config::default(), store, transport.clone());
    (server, transport)
}

#[tokio::test]
async fn call_program_bridges_invite_and_tears_down_on_bye() {
    let store = Arc::new(MemoryStore::new());
    store
        .put(
            "/account/atlanta.com/alice",
            &serde_json::to_string(&account("bridge")).unwrap(),
        )
        .await
        .unwrap();
    seed_scenario(
        store.as_ref(),
        "bridge",
        ProgramType::Call,
        Some(CallProgramConfig::default()),
        None,
    )
    .await;
    let bob_peer = peer(7002);
    seed_bob_registration(store.as_ref(), bob_peer).await;

    let (mut server, transport) = build_server(store).await;
    let alice_peer = peer(7001);
    let alice_call_id = "alice-call-1";

    // INVITE bridges to Bob: Alice gets 100 Trying, Bob gets an INVITE.
    let invite = invite_request(alice_call_id, "sip:bob@atlanta.com");
    server.dispatch_datagram(alice_peer, &invite).await.unwrap();

    let sent = transport.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, alice_peer);
    assert_eq!(parse_response(&sent[0].1).status_code, 100);
    assert_eq!(sent[1].0, bob_peer);
    let outbound_invite = parse_request(&sent[1].1);
    assert_eq!(outbound_invite.method, sip_signal::types::Method::Invite);
    let bob_call_id = outbound_invite.headers.get_one("call-id").unwrap().to_string();
    assert_ne!(bob_call_id, alice_call_id);

    // Bob rings: Alice hears 180 Ringing too.
    let ringing_from_bob = status_response(&bob_call_id, 180);
    server.dispatch_datagram(bob_peer, &ringing_from_bob).await.unwrap();
    let sent = transport.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, alice_peer);
    assert_eq!(parse_response(&sent[0].1).status_code, 180);

    // Bob answers: Alice gets 200 OK, Bob gets an ACK.
    let ok_from_bob = status_response(&bob_call_id, 200);
    server.dispatch_datagram(bob_peer, &ok_from_bob).await.unwrap();

    let sent = transport.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, bob_peer, "ack must go to Bob before Alice hears 200 OK");
    assert_eq!(parse_request(&sent[0].1).method, sip_signal::types::Method::Ack);
    assert_eq!(sent[1].0, alice_peer);
    assert_eq!(parse_response(&sent[1].1).status_code, 200);

    // Alice ACKs, establishing her own leg.
    let ack = ack_request(alice_call_id);
    server.dispatch_datagram(alice_peer, &ack).await.unwrap();
    assert!(transport.sent().await.is_empty());

    // Alice hangs up: she gets 200 OK immediately, Bob gets a BYE request
    // (not a canned response) and the leg doesn't close until he answers.
    let bye = bye_request(
        alice_call_id,
        "Alice <sip:alice@atlanta.com>;tag=alice-tag",
        "Bob <sip:bob@atlanta.com>;tag=bob-tag",
    );
    server.dispatch_datagram(alice_peer, &bye).await.unwrap();

    let sent = transport.sent().await;
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].0, alice_peer);
    assert_eq!(parse_response(&sent[0].1).status_code, 200);
    assert_eq!(sent[1].0, bob_peer);
    let bye_to_bob = parse_request(&sent[1].1);
    assert_eq!(bye_to_bob.method, sip_signal::types::Method::Bye);
    assert_eq!(call_id_of(&sent[1].1), bob_call_id);

    // Bob answers the BYE: only now is the meeting fully disposed.
    let bye_ok = status_response(&bob_call_id, 200);
    server.dispatch_datagram(bob_peer, &bye_ok).await.unwrap();
    assert!(transport.sent().await.is_empty());

    // The meeting is gone: a stray retransmission of Bob's BYE response
    // no longer resolves to any dialog.
    server.dispatch_datagram(bob_peer, &status_response(&bob_call_id, 200)).await.unwrap();
    assert!(transport.sent().await.is_empty());
}

#[tokio::test]
async fn reject_program_never_places_an_outgoing_leg() {
    let store = Arc::new(MemoryStore::new());
    store
        .put(
            "/account/atlanta.com/alice",
            &serde_json::to_string(&account("reject")).unwrap(),
        )
        .await
        .unwrap();
    seed_scenario(
        store.as_ref(),
        "reject",
        ProgramType::Reject,
        None,
        Some(RejectProgramConfig {
            hold_media: Some("hold.wav".to_string()),
        }),
    )
    .await;

    let (mut server, transport) = build_server(store).await;
    let alice_peer = peer(7003);
    let call_id = "alice-call-2";

    let invite = invite_request(call_id, "sip:bob@atlanta.com");
    server.dispatch_datagram(alice_peer, &invite).await.unwrap();

    let sent = transport.sent().await;
    // 100 Trying, then 180 Ringing, then 200 OK with hold music: never an
    // outgoing leg to anyone else.
    assert_eq!(sent.len(), 3);
    for (dest, _) in &sent {
        assert_eq!(*dest, alice_peer);
    }
    assert_eq!(parse_response(&sent[0].1).status_code, 100);
    assert_eq!(parse_response(&sent[1].1).status_code, 180);
    assert_eq!(parse_response(&sent[2].1).status_code, 200);
}

#[tokio::test]
async fn bye_on_unknown_call_id_gets_481() {
    let store = Arc::new(MemoryStore::new());
    let (mut server, transport) = build_server(store).await;
    let peer_addr = peer(7004);

    let bye = bye_request(
        "never-seen-call-id",
        "Alice <sip:alice@atlanta.com>;tag=1",
        "Bob <sip:bob@atlanta.com>",
    );
    server.dispatch_datagram(peer_addr, &bye).await.unwrap();

    let sent = transport.sent().await;
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].0, peer_addr);
    assert_eq!(parse_response(&sent[0].1).status_code, 481);
}
