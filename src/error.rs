/// Failure categories surfaced by the monitor.
///
/// Modules return `anyhow::Result` and raise one of these at the point of
/// failure, so callers can recover the category with
/// `err.downcast_ref::<MonitorError>()` through any added context.
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("could not read secret '{name}': {reason}")]
    SecretAccess { name: String, reason: String },

    #[error("authorization failed: {0}")]
    Authorization(String),

    #[error("token exchange failed: {0}")]
    TokenExchange(String),

    #[error("device request failed ({status}): {body}")]
    ApiRequest { status: u16, body: String },

    #[error("alert delivery failed for {failed} of {total} recipients")]
    Notification { failed: usize, total: usize },
}
