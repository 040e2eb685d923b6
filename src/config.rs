use std::time::Duration;

/// Runtime settings for the payment saga.
///
/// Defaults match the production system: 6-digit codes valid for 5 minutes,
/// 10-second bound on every collaborator call.
#[derive(Debug, Clone)]
pub struct Settings {
    /// How long an issued code stays verifiable.
    pub code_ttl: Duration,
    /// Number of digits in a one-time code.
    pub code_length: usize,
    /// Upper bound on any single call to a collaborator service.
    pub call_timeout: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            code_ttl: Duration::from_secs(5 * 60),
            code_length: 6,
            call_timeout: Duration::from_secs(10),
        }
    }
}
