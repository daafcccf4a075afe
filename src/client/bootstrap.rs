//! One-call bootstrap of a thing against its gateway.

use std::sync::Arc;

use tracing::debug;

use super::client::GatewayClient;
use super::config::ClientConfig;
use super::payload::{AccessToken, AmInfo};
use crate::core::{GatewayError, Result};
use crate::crypto::DeviceKey;

/// Outcome of a successful bootstrap.
#[derive(Debug, Clone)]
pub struct BootstrapResult {
    /// The issued access token.
    pub token: AccessToken,
    /// Access-management endpoints reported by the gateway.
    pub am_info: AmInfo,
    /// Continuation token of the authenticated session.
    pub token_id: String,
}

/// Bootstrap against the gateway at `address` with default settings.
pub async fn bootstrap(address: &str, key: Arc<dyn DeviceKey>) -> Result<BootstrapResult> {
    bootstrap_with(ClientConfig::new(address), Some(key)).await
}

/// Bootstrap with an explicit configuration.
///
/// The session is closed before returning, whatever the outcome.
pub async fn bootstrap_with(
    config: ClientConfig,
    key: Option<Arc<dyn DeviceKey>>,
) -> Result<BootstrapResult> {
    let mut client = GatewayClient::new(config, key);
    let outcome = client.run().await;
    let result = outcome.and_then(|token| collect(&client, token));
    client.close().await;
    debug!(ok = result.is_ok(), "bootstrap finished");
    result
}

fn collect(client: &GatewayClient, token: AccessToken) -> Result<BootstrapResult> {
    let (Some(reply), Some(am_info)) = (client.authentication(), client.am_info_result()) else {
        return Err(GatewayError::InvalidState {
            operation: "bootstrap",
            state: client.state(),
        });
    };
    Ok(BootstrapResult {
        token,
        am_info: am_info.clone(),
        token_id: reply.token_id.clone(),
    })
}
