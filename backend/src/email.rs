//! Outbound login-token delivery boundary.
//!
//! Mail transport is an external collaborator; the prototype logs the token
//! and local flows use dev bypass mode instead.

use crate::errors::ApiError;

pub fn bypass_enabled() -> bool {
    std::env::var("BYPASS_EMAIL_REGISTRATION")
        .map(|v| v == "true")
        .unwrap_or(false)
}

/// Hand a login token to the delivery channel.
pub async fn deliver_login_token(email: &str, name: &str, token: &str) -> Result<(), ApiError> {
    // No mail provider is wired in; an operator-attached log shipper routes
    // the token in deployments that need real delivery.
    tracing::info!(%email, %name, %token, "sending login token");
    Ok(())
}
