//! Account lookup, digest challenge/verify, and registration lifecycle.
//!
//! `Register` is the single gatekeeper for any request that must be tied
//! to an account: it holds an in-memory cache of `Registration` records
//! in front of the persistent `Store`, mirroring the pool the Go source
//! keeps alongside its database-backed registration table.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::codec::Request;
use crate::error::{SipError, SipResult};
use crate::store::Store;
use crate::types::{Contact, Destination, WwwAuthenticate};

/// Registration policy for an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationType {
    #[serde(rename = "AUTH_REGISTRATION")]
    Auth,
    #[serde(rename = "NON_AUTH_REGISTRATION")]
    NonAuth,
    #[serde(rename = "TRANSPARENT_REGISTRATION")]
    Transparent,
}

/// An account on file, persisted at `/account/{host}/{login}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub registration_type: RegistrationType,
    pub login: String,
    pub password: String,
    pub incoming_scenario_id: Option<String>,
    pub outgoing_scenario_id: Option<String>,
}

/// Default registration lifetime: one day, matching the source's
/// `NewRegistration` default.
pub const DEFAULT_EXPIRES_SECONDS: u32 = 60 * 60 * 24;

/// The runtime record of a successful (or pending) REGISTER binding,
/// persisted at `/register/{host}/{login}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Registration {
    pub id: Uuid,
    pub destination: Destination,
    pub host: String,
    pub login: String,
    pub authorized: bool,
    pub contacts: Vec<Contact>,
    pub source_address: Option<SocketAddr>,
    pub www_authenticate: HashMap<String, WwwAuthenticate>,
    pub expires: u32,
    pub account: Account,
}

impl Registration {
    pub fn new(
        account: Account,
        contacts: Vec<Contact>,
        source_address: Option<SocketAddr>,
        destination: Destination,
        host: impl Into<String>,
        login: impl Into<String>,
        authorized: bool,
    ) -> Self {
        Registration {
            id: Uuid::new_v4(),
            destination,
            host: host.into(),
            login: login.into(),
            authorized,
            contacts,
            source_address,
            www_authenticate: HashMap::new(),
            expires: DEFAULT_EXPIRES_SECONDS,
            account,
        }
    }
}

fn register_key(host: &str, login: &str) -> String {
    format!("/register/{host}/{login}")
}

fn account_key(host: &str, login: &str) -> String {
    format!("/account/{host}/{login}")
}

fn registered_uri_key(host: &str, login: &str) -> String {
    format!("/registered_uri/{host}/{login}")
}

/// Lowercase-hex MD5 digest over the given input, matching the source's
/// `hex.EncodeToString(md5.Sum(...))`.
fn md5_hex(input: &str) -> String {
    let mut hasher = Md5::new();
    hasher.update(input.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Computes the expected digest response for the given credentials,
/// method, and request-URI: `MD5(HA1:nonce:HA2)`.
pub fn expected_digest_response(
    login: &str,
    realm: &str,
    password: &str,
    nonce: &str,
    method: &str,
    request_uri: &str,
) -> String {
    let ha1 = md5_hex(&format!("{login}:{realm}:{password}"));
    let ha2 = md5_hex(&format!("{method}:{request_uri}"));
    md5_hex(&format!("{ha1}:{nonce}:{ha2}"))
}

/// Maps a (host, login) pair's registration state to the gatekeeper for
/// authenticated requests, backed by an in-memory cache over a `Store`.
pub struct Register {
    store: Arc<dyn Store>,
    pool: Mutex<HashMap<String, Registration>>,
    call_map: Mutex<HashMap<String, String>>,
}

impl Register {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Register {
            store,
            pool: Mutex::new(HashMap::new()),
            call_map: Mutex::new(HashMap::new()),
        }
    }

    async fn load_registration(&self, host: &str, login: &str) -> SipResult<Option<Registration>> {
        let key = register_key(host, login);
        if let Some(reg) = self.pool.lock().await.get(&key).cloned() {
            return Ok(Some(reg));
        }
        match self.store.get(&key).await? {
            Some(raw) => {
                let reg: Registration = serde_json::from_str(&raw)
                    .map_err(|e| SipError::store(format!("corrupt registration record: {e}")))?;
                self.pool.lock().await.insert(key, reg.clone());
                Ok(Some(reg))
            }
            None => Ok(None),
        }
    }

    async fn store_registration(&self, host: &str, login: &str, reg: Registration) -> SipResult<Registration> {
        let key = register_key(host, login);
        let raw = serde_json::to_string(&reg)
            .map_err(|e| SipError::store(format!("failed to serialize registration: {e}")))?;
        self.store.put(&key, &raw).await?;
        self.store
            .put(&registered_uri_key(host, login), &raw)
            .await?;
        self.pool.lock().await.insert(key, reg.clone());
        Ok(reg)
    }

    async fn load_account(&self, host: &str, login: &str) -> SipResult<Account> {
        let key = account_key(host, login);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| SipError::auth(format!("account not found: {key}")))?;
        serde_json::from_str(&raw).map_err(|e| SipError::store(format!("corrupt account record: {e}")))
    }

    /// Issues a fresh `401`-worthy digest challenge for this Call-ID,
    /// creating the registration record if one doesn't exist yet.
    async fn issue_challenge(
        &self,
        call_id: &str,
        account: Account,
        existing: Option<Registration>,
        request: &Request,
        source_address: Option<SocketAddr>,
        host: &str,
        login: &str,
        from: Destination,
    ) -> SipResult<Registration> {
        let mut registration = match existing {
            Some(reg) => reg,
            None => {
                let contacts = crate::dialog::parse_contacts(request);
                Registration::new(account, contacts, source_address, from, host, login, false)
            }
        };

        registration.www_authenticate.insert(
            call_id.to_string(),
            WwwAuthenticate::new(host.to_string(), Uuid::new_v4().to_string()),
        );

        self.store_registration(host, login, registration).await
    }

    /// The single gatekeeper for any request that must be associated with
    /// an account. On success, invokes `on_authenticated` with the
    /// authorized registration. On failure (challenge needed, account
    /// missing), returns the outcome for the caller to act on.
    pub async fn auth(&self, call_id: &str, request: &Request, source_address: SocketAddr) -> SipResult<AuthOutcome> {
        let from_value = request.headers.require_one("from")?;
        let (host, login) = crate::dialog::host_login_from_address(from_value)?;
        let from = crate::dialog::parse_destination(from_value)?;

        let cached = self.load_registration(&host, &login).await?;
        if let Some(reg) = &cached {
            if reg.authorized {
                return Ok(AuthOutcome::Authenticated(reg.clone()));
            }
        }

        let account = self.load_account(&host, &login).await?;

        if account.registration_type == RegistrationType::NonAuth {
            let mut registration = match cached {
                Some(reg) => reg,
                None => {
                    let contacts = crate::dialog::parse_contacts(request);
                    Registration::new(account, contacts, Some(source_address), from, &host, &login, true)
                }
            };
            registration.authorized = true;
            registration.source_address = Some(source_address);
            let stored = self.store_registration(&host, &login, registration).await?;
            return Ok(AuthOutcome::Authenticated(stored));
        }

        if cached.is_none() {
            let registration = self
                .issue_challenge(call_id, account, None, request, Some(source_address), &host, &login, from)
                .await?;
            return Ok(AuthOutcome::ChallengeIssued(registration));
        }

        let authorization = match request.headers.get_one("authorization") {
            Some(value) => value.to_string(),
            None => {
                let registration = self
                    .issue_challenge(call_id, account, cached, request, Some(source_address), &host, &login, from)
                    .await?;
                return Ok(AuthOutcome::ChallengeIssued(registration));
            }
        };

        let registration = cached.unwrap();
        let challenge = match registration.www_authenticate.get(call_id) {
            Some(challenge) => challenge.clone(),
            None => {
                let registration = self
                    .issue_challenge(call_id, account, Some(registration), request, Some(source_address), &host, &login, from)
                    .await?;
                return Ok(AuthOutcome::ChallengeIssued(registration));
            }
        };

        let params = crate::types::parse_digest_params(
            authorization.trim_start_matches("Digest").trim_start(),
        );
        let response = params.get("response").cloned().unwrap_or_default();

        let expected = expected_digest_response(
            &login,
            &challenge.realm,
            &account.password,
            &challenge.nonce,
            request.method.as_str(),
            &request.uri,
        );

        if response == expected {
            let mut registration = registration;
            registration.authorized = true;
            let stored = self.store_registration(&host, &login, registration).await?;
            Ok(AuthOutcome::Authenticated(stored))
        } else {
            let registration = self
                .issue_challenge(call_id, account, Some(registration), request, None, &host, &login, from)
                .await?;
            Ok(AuthOutcome::ChallengeIssued(registration))
        }
    }

    /// Memoizes the Call-ID → registration-key mapping so in-dialog
    /// messages can skip re-authentication.
    pub async fn bind(&self, call_id: &str, host: &str, login: &str) {
        self.call_map
            .lock()
            .await
            .insert(call_id.to_string(), register_key(host, login));
    }

    pub async fn load_by_call_id(&self, call_id: &str) -> SipResult<Option<Registration>> {
        let key = match self.call_map.lock().await.get(call_id).cloned() {
            Some(key) => key,
            None => return Ok(None),
        };
        if let Some(reg) = self.pool.lock().await.get(&key).cloned() {
            return Ok(Some(reg));
        }
        match self.store.get(&key).await? {
            Some(raw) => Ok(Some(serde_json::from_str(&raw).map_err(|e| {
                SipError::store(format!("corrupt registration record: {e}"))
            })?)),
            None => Ok(None),
        }
    }

    /// Locates the currently-registered endpoint for a logical callee via
    /// the secondary `/registered_uri/{host}/{login}` index.
    pub async fn load_by_destination(&self, destination: &Destination) -> SipResult<Registration> {
        let host = destination.host().to_string();
        let login = destination
            .login()
            .ok_or_else(|| SipError::registration("destination has no login part"))?
            .to_string();

        let key = registered_uri_key(&host, &login);
        let raw = self
            .store
            .get(&key)
            .await?
            .ok_or_else(|| SipError::registration(format!("no registration for {host}/{login}")))?;
        serde_json::from_str(&raw).map_err(|e| SipError::store(format!("corrupt registration record: {e}")))
    }
}

/// Result of a single `Register::auth` call: either the request may
/// proceed with an authorized registration, or a challenge has already
/// been persisted and must be sent to the peer.
pub enum AuthOutcome {
    Authenticated(Registration),
    ChallengeIssued(Registration),
}
