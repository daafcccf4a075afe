//! JSON bodies exchanged with the gateway endpoints.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::{GatewayError, Result};

/// Body of `POST /authenticate`.
///
/// Unknown fields are carried in `extra` and sent as-is.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    /// Continuation token from an earlier attempt.
    #[serde(rename = "tokenId", default, skip_serializing_if = "Option::is_none")]
    pub token_id: Option<String>,

    /// Additional callback fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl AuthenticateRequest {
    /// A request continuing from `token_id`.
    pub fn with_token(token_id: impl Into<String>) -> Self {
        Self {
            token_id: Some(token_id.into()),
            extra: Map::new(),
        }
    }
}

/// Body of a successful `/authenticate` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthenticateReply {
    /// Continuation token identifying the authenticated session.
    #[serde(rename = "tokenId")]
    pub token_id: String,

    /// Optional confirmation value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confirmation: Option<String>,

    /// Remaining fields.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Access-management endpoints, from `GET /aminfo`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AmInfo {
    /// URL the access token request binds to.
    #[serde(rename = "accessTokenUrl")]
    pub access_token_url: String,

    /// Version of the things endpoint.
    #[serde(rename = "thingsVersion")]
    pub things_version: String,
}

/// The access token issued by the gateway: an arbitrary JSON object.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AccessToken(Map<String, Value>);

impl AccessToken {
    /// Field lookup.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    /// Check for an empty token object.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The token fields.
    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Consume into the token fields.
    pub fn into_inner(self) -> Map<String, Value> {
        self.0
    }
}

impl From<Map<String, Value>> for AccessToken {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Decode a JSON response body, naming `what` on failure.
pub(crate) fn decode<T: DeserializeOwned>(what: &str, payload: &[u8]) -> Result<T> {
    serde_json::from_slice(payload)
        .map_err(|e| GatewayError::Protocol(format!("undecodable {what}: {e}")))
}

/// Encode a JSON request body.
pub(crate) fn encode<T: Serialize>(what: &str, body: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(body).map_err(|e| GatewayError::Protocol(format!("encode {what}: {e}")))
}
