//! Post-update health verification.
//!
//! What "healthy" means after an OS update is deployment-specific, so the
//! check is a pluggable policy rather than a hard-coded probe.

use async_trait::async_trait;

/// Post-update health policy, evaluated in the verifying phase.
#[async_trait]
pub trait HealthCheck: Send + Sync {
    /// Returns `Ok(())` when the node is healthy, or the reason it is not.
    async fn verify(&self) -> Result<(), String>;
}

/// Passes unconditionally. The default when no deployment-specific check
/// is configured: the node rebooted and the agent is running, which is the
/// minimum signal that the update took.
pub struct AlwaysHealthy;

#[async_trait]
impl HealthCheck for AlwaysHealthy {
    async fn verify(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Health check with a settable verdict, for tests.
pub struct MockHealthCheck {
    verdict: std::sync::Mutex<Result<(), String>>,
}

impl MockHealthCheck {
    pub fn healthy() -> Self {
        Self {
            verdict: std::sync::Mutex::new(Ok(())),
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            verdict: std::sync::Mutex::new(Err(reason.into())),
        }
    }

    pub fn set_verdict(&self, verdict: Result<(), String>) {
        *self.verdict.lock().unwrap() = verdict;
    }
}

#[async_trait]
impl HealthCheck for MockHealthCheck {
    async fn verify(&self) -> Result<(), String> {
        self.verdict.lock().unwrap().clone()
    }
}
