//! The signaling dispatcher: a single task draining datagrams off the
//! transport, routing each to the right dialog/meeting pair, and
//! answering with whatever the Register/Scenario layer decides.
//!
//! There is deliberately no lock around dialog state: the dispatcher
//! drains messages one at a time from its own receive loop, so a
//! Meeting's Uas/Uac/Scenario are only ever touched from this one task.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::codec::{self, Message, Request, Response};
use crate::config::Config;
use crate::dialog::{self, Uas};
use crate::error::{SipError, SipResult};
use crate::headers::Headers;
use crate::limits::ParserLimits;
use crate::media::InMemoryMixer;
use crate::meeting::Meeting;
use crate::programs;
use crate::register::{AuthOutcome, Register};
use crate::scenario::{ProgramContext, Scenario, ScenarioConfig, UacEventKind, UasEvent};
use crate::store::Store;
use crate::transport::Transport;
use crate::types::Method;

fn scenario_config_key(id: &str) -> String {
    format!("/scenario-config/{id}")
}

async fn load_scenario_config(store: &dyn Store, scenario_id: &str) -> SipResult<ScenarioConfig> {
    let raw = store
        .get(&scenario_config_key(scenario_id))
        .await?
        .ok_or_else(|| SipError::registration(format!("no scenario config for id {scenario_id}")))?;
    serde_json::from_str(&raw).map_err(|e| SipError::store(format!("corrupt scenario config: {e}")))
}

/// Builds a stand-alone response to a request that has no durable dialog
/// of its own (REGISTER, or a challenge/rejection before any Uas exists):
/// copies the Via stack, From, To (with the registration's tag if any),
/// Call-ID, and echoes CSeq unchanged.
fn build_standalone_response(request: &Request, status_code: u16) -> SipResult<Response> {
    let mut headers = Headers::new();
    for via in request.headers.require_one_or_more("via")? {
        headers.insert("Via", via.clone());
    }
    headers.insert("From", request.headers.require_one("from")?.to_string());
    headers.insert("To", request.headers.require_one("to")?.to_string());
    headers.insert("Call-ID", request.headers.require_one("call-id")?.to_string());
    headers.insert("CSeq", request.headers.require_one("cseq")?.to_string());
    Ok(Response {
        status_code,
        reason_phrase: codec::reason_phrase(status_code).to_string(),
        headers,
        body: String::new(),
    })
}

/// Whether `request` is an INVITE that has received no final response
/// yet, i.e. one a 4xx/5xx/6xx can still legally answer.
fn is_pending_invite(request: &Request) -> bool {
    request.method == Method::Invite
}

/// A live call bridge: the Meeting it bridges and the Scenario driving
/// it, kept in separate tables so neither owns the other.
struct Call {
    meeting: Meeting,
    scenario: Scenario,
}

/// The signaling engine's dispatcher: owns every live call by its
/// Meeting's id, and a Call-ID → Meeting-id index covering both the
/// inbound leg's Call-ID and every bridged outbound leg's Call-ID.
pub struct Server {
    config: Config,
    transport: Arc<dyn Transport>,
    register: Arc<Register>,
    store: Arc<dyn Store>,
    limits: ParserLimits,
    calls: HashMap<Uuid, Call>,
    call_index: HashMap<String, Uuid>,
}

impl Server {
    pub fn new(config: Config, store: Arc<dyn Store>, transport: Arc<dyn Transport>) -> Self {
        let register = Arc::new(Register::new(store.clone()));
        Server {
            config,
            transport,
            register,
            store,
            limits: ParserLimits::default(),
            calls: HashMap::new(),
            call_index: HashMap::new(),
        }
    }

    /// Answers `peer` with the status code `error` maps to, if any,
    /// building a stand-alone response from `request`. Returns `error`
    /// unchanged either way so the caller can log/propagate it.
    async fn respond_with_mapped_error(&self, peer: SocketAddr, request: &Request, error: SipError) -> SipError {
        if let Some(code) = error.as_status_code() {
            match build_standalone_response(request, code) {
                Ok(response) => {
                    if let Err(e) = self.transport.send(peer, response.serialize().as_bytes()).await {
                        tracing::error!(error = %e, peer = %peer, "failed to send mapped error response");
                    }
                }
                Err(e) => tracing::error!(error = %e, peer = %peer, "failed to build mapped error response"),
            }
        }
        error
    }

    fn ctx(&self) -> ProgramContext {
        ProgramContext {
            register: self.register.clone(),
            transport: self.transport.clone(),
            server_host: self.config.advertised_host(),
        }
    }

    /// Runs the server forever: one task ingests datagrams off the
    /// transport onto an ordered queue, and this dispatcher drains that
    /// queue sequentially, so every state transition for a given
    /// Call-ID is serialized against every other message without any
    /// per-dialog lock.
    pub async fn run(&mut self) -> SipResult<()> {
        let (tx, mut rx) = tokio::sync::mpsc::channel(256);
        let ingest_transport = self.transport.clone();
        tokio::spawn(async move {
            loop {
                match ingest_transport.recv().await {
                    Ok(datagram) => {
                        if tx.send(datagram).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => tracing::error!(error = %e, "transport receive failed"),
                }
            }
        });

        while let Some((peer, bytes)) = rx.recv().await {
            let deadline = Duration::from_secs(self.config.timeout_seconds);
            match tokio::time::timeout(deadline, self.handle_datagram(peer, &bytes)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, peer = %peer, "failed to handle datagram"),
                Err(_) => {
                    tracing::error!(peer = %peer, "per-message deadline exceeded");
                    let error = SipError::DeadlineExceeded;
                    if let Ok(Message::Request(request)) = codec::parse(&bytes, &self.limits) {
                        if is_pending_invite(&request) {
                            self.respond_with_mapped_error(peer, &request, error).await;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Dispatches one already-received datagram directly, bypassing the
    /// ingest queue and per-message deadline. Exposed for driving the
    /// dispatcher deterministically against a
    /// [`crate::transport::ChannelTransport`] in tests.
    pub async fn dispatch_datagram(&mut self, peer: SocketAddr, bytes: &[u8]) -> SipResult<()> {
        self.handle_datagram(peer, bytes).await
    }

    async fn handle_datagram(&mut self, peer: SocketAddr, bytes: &[u8]) -> SipResult<()> {
        let message = codec::parse(bytes, &self.limits)?;
        match message {
            Message::Request(request) => self.handle_request(peer, request).await,
            Message::Response(response) => self.handle_response(response).await,
        }
    }

    async fn handle_request(&mut self, peer: SocketAddr, request: Request) -> SipResult<()> {
        let call_id = request.headers.require_one("call-id")?.to_string();

        match request.method {
            Method::Register => self.handle_register(peer, &call_id, &request).await,
            Method::Invite => {
                if self.call_index.contains_key(&call_id) {
                    tracing::warn!(call_id = %call_id, "re-INVITE on an existing dialog is not supported");
                    return Ok(());
                }
                self.handle_invite(peer, &call_id, request).await
            }
            Method::Ack => self.handle_uas_ack(&call_id).await,
            Method::Bye | Method::Cancel => self.handle_uas_terminate(peer, &call_id, &request).await,
            Method::Options | Method::Info => {
                tracing::info!(call_id = %call_id, method = request.method.as_str(), "passthrough, no action taken");
                Ok(())
            }
            Method::Unknown(ref token) => {
                tracing::warn!(call_id = %call_id, method = %token, "unrecognized method");
                Ok(())
            }
        }
    }

    async fn handle_register(&mut self, peer: SocketAddr, call_id: &str, request: &Request) -> SipResult<()> {
        let outcome = match self.register.auth(call_id, request, peer).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.respond_with_mapped_error(peer, request, e).await),
        };
        match outcome {
            AuthOutcome::Authenticated(registration) => {
                tracing::info!(call_id = %call_id, login = %registration.login, host = %registration.host, "registration authorized");
                self.register.bind(call_id, &registration.host, &registration.login).await;
                let response = build_standalone_response(request, 200)?;
                self.transport.send(peer, response.serialize().as_bytes()).await?;
                Ok(())
            }
            AuthOutcome::ChallengeIssued(registration) => {
                tracing::info!(call_id = %call_id, login = %registration.login, host = %registration.host, "registration challenged");
                let mut response = build_standalone_response(request, 401)?;
                if let Some(challenge) = registration.www_authenticate.get(call_id) {
                    response.headers.insert("WWW-Authenticate", challenge.to_string());
                }
                self.transport.send(peer, response.serialize().as_bytes()).await?;
                Ok(())
            }
        }
    }

    async fn handle_invite(&mut self, peer: SocketAddr, call_id: &str, request: Request) -> SipResult<()> {
        let outcome = match self.register.auth(call_id, &request, peer).await {
            Ok(outcome) => outcome,
            Err(e) => return Err(self.respond_with_mapped_error(peer, &request, e).await),
        };
        let registration = match outcome {
            AuthOutcome::Authenticated(reg) => reg,
            AuthOutcome::ChallengeIssued(reg) => {
                tracing::info!(call_id = %call_id, "INVITE challenged, no dialog created");
                let mut response = build_standalone_response(&request, 401)?;
                if let Some(challenge) = reg.www_authenticate.get(call_id) {
                    response.headers.insert("WWW-Authenticate", challenge.to_string());
                }
                self.transport.send(peer, response.serialize().as_bytes()).await?;
                return Ok(());
            }
        };
        self.register.bind(call_id, &registration.host, &registration.login).await;

        let scenario_id = match registration.account.incoming_scenario_id.clone() {
            Some(id) => id,
            None => {
                let e = SipError::registration("account has no incoming scenario configured");
                return Err(self.respond_with_mapped_error(peer, &request, e).await);
            }
        };
        let scenario_config = match load_scenario_config(self.store.as_ref(), &scenario_id).await {
            Ok(config) => config,
            Err(e) => return Err(self.respond_with_mapped_error(peer, &request, e).await),
        };
        let mut scenario = match Scenario::load(self.store.as_ref(), &scenario_config).await {
            Ok(scenario) => scenario,
            Err(e) => return Err(self.respond_with_mapped_error(peer, &request, e).await),
        };

        let mut uas = Uas::new(
            call_id.to_string(),
            self.transport.clone(),
            self.config.advertised_host(),
            peer,
            programs::new_media_channel(),
        );
        uas.history.write_request(request.clone());
        uas.trying().await?;

        let mixer = Arc::new(InMemoryMixer::new());
        let mut meeting = Meeting::new(uas, mixer);

        let ctx = self.ctx();
        if let Err(e) = scenario.run(&mut meeting, &ctx).await {
            return Err(self.respond_with_mapped_error(peer, &request, e).await);
        }

        let meeting_id = meeting.id;
        for uac_call_id in meeting.uac_pool.keys() {
            self.call_index.insert(uac_call_id.clone(), meeting_id);
        }
        self.call_index.insert(call_id.to_string(), meeting_id);
        self.calls.insert(meeting_id, Call { meeting, scenario });

        tracing::info!(call_id = %call_id, "dialog established for new INVITE");
        Ok(())
    }

    async fn handle_uas_ack(&mut self, call_id: &str) -> SipResult<()> {
        let meeting_id = match self.call_index.get(call_id) {
            Some(id) => *id,
            None => {
                tracing::warn!(call_id = %call_id, "ACK for unknown dialog");
                return Ok(());
            }
        };
        let ctx = self.ctx();
        if let Some(call) = self.calls.get_mut(&meeting_id) {
            call.meeting.uas.acknowledge();
            call.scenario.uas_emit(UasEvent::Ready, &mut call.meeting, &ctx).await?;
        }
        Ok(())
    }

    async fn handle_uas_terminate(&mut self, peer: SocketAddr, call_id: &str, request: &Request) -> SipResult<()> {
        let meeting_id = match self.call_index.get(call_id) {
            Some(id) => *id,
            None => {
                tracing::warn!(call_id = %call_id, "BYE/CANCEL for unknown dialog");
                let response = build_standalone_response(request, 481)?;
                self.transport.send(peer, response.serialize().as_bytes()).await?;
                return Ok(());
            }
        };
        let ctx = self.ctx();
        let mut drop_call = false;
        if let Some(call) = self.calls.get_mut(&meeting_id) {
            if call.meeting.uas.call_id == call_id {
                call.meeting.uas.end().await?;
                call.scenario.uas_emit(UasEvent::End, &mut call.meeting, &ctx).await?;
            } else if let Some(uac) = call.meeting.uac_mut(call_id) {
                uac.end().await?;
                call.scenario.uac_emit(UacEventKind::End, &mut call.meeting, &ctx).await?;
            }
            drop_call = call.meeting.uas.is_terminal()
                && call.meeting.uac_pool.values().all(|uac| uac.is_terminal());
        }
        if drop_call {
            self.calls.remove(&meeting_id);
            self.call_index.retain(|_, id| *id != meeting_id);
            tracing::info!(call_id = %call_id, "meeting disposed");
        }
        Ok(())
    }

    async fn handle_response(&mut self, response: Response) -> SipResult<()> {
        let call_id = match response.headers.get_one("call-id") {
            Some(id) => id.to_string(),
            None => {
                tracing::warn!("response with no Call-ID header dropped");
                return Ok(());
            }
        };
        let meeting_id = match self.call_index.get(&call_id) {
            Some(id) => *id,
            None => {
                tracing::warn!(call_id = %call_id, "response for unknown dialog");
                return Ok(());
            }
        };
        let ctx = self.ctx();
        let mut drop_call = false;
        if let Some(call) = self.calls.get_mut(&meeting_id) {
            let event = call
                .meeting
                .uac_mut(&call_id)
                .and_then(|uac| uac.on_response(&response));
            if let Some(event) = event {
                let kind = match event {
                    dialog::UacEvent::Ringing => UacEventKind::Ringing,
                    dialog::UacEvent::Ready => UacEventKind::Ready,
                    dialog::UacEvent::End => UacEventKind::End,
                };
                call.scenario.uac_emit(kind, &mut call.meeting, &ctx).await?;
            }
            drop_call = call.meeting.uas.is_terminal()
                && call.meeting.uac_pool.values().all(|uac| uac.is_terminal());
        }
        if drop_call {
            self.calls.remove(&meeting_id);
            self.call_index.retain(|_, id| *id != meeting_id);
            tracing::info!(call_id = %call_id, "meeting disposed");
        }
        Ok(())
    }
}
