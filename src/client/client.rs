//! Gateway client session.
//!
//! A [`GatewayClient`] walks one session through
//! `Uninitialised → Initialised → Authenticated → InfoResolved → TokenAcquired`.
//! Each step is a single attempt; any failure moves the session to `Failed`
//! and closes its channel. A failed session may be initialised again.

use std::fmt;
use std::sync::Arc;

use tokio::time::timeout;
use tracing::{info, warn};

use super::config::ClientConfig;
use super::payload::{AccessToken, AmInfo, AuthenticateReply, AuthenticateRequest, decode, encode};
use crate::coap::{Exchange, Request, ResponseCode};
use crate::core::{
    ACCESS_TOKEN_PATH, AM_INFO_PATH, APPLICATION_JOSE, APPLICATION_JSON, AUTHENTICATE_PATH,
    GatewayError, Result,
};
use crate::crypto::{DeviceKey, ProofClaims, ProofOfPossession};
use crate::transport::SecureChannel;

/// Session state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No channel.
    Uninitialised,
    /// Secure channel established.
    Initialised,
    /// The gateway accepted the device.
    Authenticated,
    /// Access-management endpoints known.
    InfoResolved,
    /// Access token issued.
    TokenAcquired,
    /// A step failed or was abandoned; see [`GatewayClient::failure`].
    Failed,
}

/// A bootstrap session with one gateway.
pub struct GatewayClient {
    config: ClientConfig,
    key: Option<Arc<dyn DeviceKey>>,
    state: SessionState,
    failure: Option<GatewayError>,
    exchange: Option<Exchange<SecureChannel>>,
    authentication: Option<AuthenticateReply>,
    am_info: Option<AmInfo>,
    token: Option<AccessToken>,
}

impl GatewayClient {
    /// Create an uninitialised client.
    ///
    /// A missing key is reported by [`GatewayClient::initialise`].
    pub fn new(config: ClientConfig, key: Option<Arc<dyn DeviceKey>>) -> Self {
        Self {
            config,
            key,
            state: SessionState::Uninitialised,
            failure: None,
            exchange: None,
            authentication: None,
            am_info: None,
            token: None,
        }
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Why the session is `Failed`.
    pub fn failure(&self) -> Option<&GatewayError> {
        self.failure.as_ref()
    }

    /// Reply to the authentication step.
    pub fn authentication(&self) -> Option<&AuthenticateReply> {
        self.authentication.as_ref()
    }

    /// Result of the AM info step.
    pub fn am_info_result(&self) -> Option<&AmInfo> {
        self.am_info.as_ref()
    }

    /// The acquired access token.
    pub fn token(&self) -> Option<&AccessToken> {
        self.token.as_ref()
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Establish the secure channel.
    ///
    /// Allowed from `Uninitialised` and `Failed`.
    pub async fn initialise(&mut self) -> Result<()> {
        if !matches!(
            self.state,
            SessionState::Uninitialised | SessionState::Failed
        ) {
            return Err(self.invalid_state("initialise"));
        }

        self.authentication = None;
        self.am_info = None;
        self.token = None;
        self.mark_in_flight();

        let opened = SecureChannel::open(
            &self.config.address,
            self.key.as_deref(),
            &self.config.channel_config(),
        )
        .await;

        match opened {
            Ok(channel) => {
                self.exchange = Some(Exchange::new(channel, self.config.exchange_config()));
                self.advance(SessionState::Initialised);
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Authenticate the device.
    ///
    /// `request.token_id` continues an earlier authentication; leave it
    /// empty to start afresh.
    pub async fn authenticate(&mut self, request: AuthenticateRequest) -> Result<AuthenticateReply> {
        let exchange = self.begin_step("authenticate", SessionState::Initialised)?;
        let outcome = post_authenticate(&exchange, &request).await;
        let reply = self
            .finish_step(exchange, outcome, SessionState::Authenticated)
            .await?;
        self.authentication = Some(reply.clone());
        Ok(reply)
    }

    /// Fetch the access-management endpoints.
    pub async fn am_info(&mut self) -> Result<AmInfo> {
        let exchange = self.begin_step("am_info", SessionState::Authenticated)?;
        let outcome = get_am_info(&exchange).await;
        let info = self
            .finish_step(exchange, outcome, SessionState::InfoResolved)
            .await?;
        self.am_info = Some(info.clone());
        Ok(info)
    }

    /// Exchange a proof of possession for an access token.
    ///
    /// The proof is signed by the device key, bound to the discovered
    /// access token URL and to the token issued at authentication.
    pub async fn access_token(&mut self) -> Result<AccessToken> {
        if self.state != SessionState::InfoResolved {
            return Err(self.invalid_state("access_token"));
        }

        let proof = match self.sign_proof() {
            Ok(proof) => proof,
            Err(e) => return Err(self.abort(e).await),
        };
        self.request_access_token(APPLICATION_JOSE, proof.into_string().into_bytes())
            .await
    }

    /// Request an access token with a caller-supplied proof.
    pub async fn request_access_token(
        &mut self,
        content_format: u16,
        proof: Vec<u8>,
    ) -> Result<AccessToken> {
        let exchange = self.begin_step("access_token", SessionState::InfoResolved)?;
        let outcome = post_access_token(&exchange, content_format, proof).await;
        let token = self
            .finish_step(exchange, outcome, SessionState::TokenAcquired)
            .await?;
        self.token = Some(token.clone());
        Ok(token)
    }

    /// Run every step with a fresh authentication, bounded by the
    /// configured deadline.
    pub async fn run(&mut self) -> Result<AccessToken> {
        let Some(deadline) = self.config.deadline else {
            return self.run_steps().await;
        };

        match timeout(deadline, self.run_steps()).await {
            Ok(result) => result,
            Err(_) => {
                // the abandoned step already left the session Failed and
                // dropped its channel
                let e = GatewayError::Timeout {
                    operation: "bootstrap",
                    after: deadline,
                };
                Err(self.fail(e))
            }
        }
    }

    /// Close the channel.
    ///
    /// An open session returns to `Uninitialised`; a failed one stays
    /// `Failed`.
    pub async fn close(&mut self) {
        if let Some(exchange) = self.exchange.take() {
            exchange.close().await;
        }
        if self.state != SessionState::Failed {
            self.authentication = None;
            self.am_info = None;
            self.token = None;
            self.state = SessionState::Uninitialised;
        }
    }

    async fn run_steps(&mut self) -> Result<AccessToken> {
        self.initialise().await?;
        self.authenticate(AuthenticateRequest::default()).await?;
        self.am_info().await?;
        self.access_token().await
    }

    fn sign_proof(&self) -> Result<ProofOfPossession> {
        let key = self
            .key
            .as_deref()
            .ok_or_else(|| GatewayError::Identity("no signing key configured".into()))?;
        let (Some(reply), Some(info)) = (&self.authentication, &self.am_info) else {
            return Err(self.invalid_state("access_token"));
        };
        let claims = ProofClaims::with_lifetime(
            info.access_token_url.clone(),
            reply.token_id.clone(),
            self.config.proof_lifetime,
        );
        ProofOfPossession::sign(key, claims)
    }

    fn invalid_state(&self, operation: &'static str) -> GatewayError {
        GatewayError::InvalidState {
            operation,
            state: self.state,
        }
    }

    /// Mark the session as abandoned until the running step completes.
    ///
    /// A step future dropped before completion leaves this in place.
    fn mark_in_flight(&mut self) {
        self.state = SessionState::Failed;
        self.failure = Some(GatewayError::Cancelled);
    }

    fn begin_step(
        &mut self,
        operation: &'static str,
        expected: SessionState,
    ) -> Result<Exchange<SecureChannel>> {
        if self.state != expected {
            return Err(self.invalid_state(operation));
        }
        let exchange = self
            .exchange
            .take()
            .ok_or_else(|| self.invalid_state(operation))?;
        self.mark_in_flight();
        Ok(exchange)
    }

    async fn finish_step<T>(
        &mut self,
        exchange: Exchange<SecureChannel>,
        outcome: Result<T>,
        next: SessionState,
    ) -> Result<T> {
        match outcome {
            Ok(value) => {
                self.exchange = Some(exchange);
                self.advance(next);
                Ok(value)
            }
            Err(e) => {
                exchange.close().await;
                Err(self.fail(e))
            }
        }
    }

    async fn abort(&mut self, e: GatewayError) -> GatewayError {
        if let Some(exchange) = self.exchange.take() {
            exchange.close().await;
        }
        self.fail(e)
    }

    fn advance(&mut self, next: SessionState) {
        info!(address = %self.config.address, state = ?next, "session advanced");
        self.state = next;
        self.failure = None;
    }

    fn fail(&mut self, e: GatewayError) -> GatewayError {
        warn!(address = %self.config.address, error = %e, "session failed");
        self.state = SessionState::Failed;
        self.failure = Some(e.clone());
        e
    }
}

impl fmt::Debug for GatewayClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayClient")
            .field("address", &self.config.address)
            .field("state", &self.state)
            .field("failure", &self.failure)
            .finish_non_exhaustive()
    }
}

async fn post_authenticate(
    exchange: &Exchange<SecureChannel>,
    request: &AuthenticateRequest,
) -> Result<AuthenticateReply> {
    let body = encode("authenticate request", request)?;
    let response = exchange
        .exchange(
            Request::post(AUTHENTICATE_PATH)
                .content_format(APPLICATION_JSON)
                .payload(body),
        )
        .await?;
    match response.code {
        ResponseCode::Valid => decode("authenticate reply", &response.payload),
        status => Err(GatewayError::Authentication { status }),
    }
}

async fn get_am_info(exchange: &Exchange<SecureChannel>) -> Result<AmInfo> {
    let response = exchange
        .exchange(Request::get(AM_INFO_PATH).accept(APPLICATION_JSON))
        .await?;
    match response.code {
        ResponseCode::Content => decode("AM info", &response.payload),
        status => Err(GatewayError::Discovery { status }),
    }
}

async fn post_access_token(
    exchange: &Exchange<SecureChannel>,
    content_format: u16,
    proof: Vec<u8>,
) -> Result<AccessToken> {
    let response = exchange
        .exchange(
            Request::post(ACCESS_TOKEN_PATH)
                .content_format(content_format)
                .accept(APPLICATION_JSON)
                .payload(proof),
        )
        .await?;
    match response.code {
        ResponseCode::Changed => decode("access token", &response.payload),
        status => Err(GatewayError::TokenExchange { status }),
    }
}
