use crate::error::{ProviderError, Result};
use std::time::Duration;

/// Stability-window rule for deciding that a streamed/rendered reply
/// has finished: the observed output is final once it is unchanged and
/// non-empty across `stability_count` consecutive checks spaced by
/// `check_interval`. Exceeding `timeout` overall is a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponsePolicy {
    pub check_interval: Duration,
    pub stability_count: u32,
    pub timeout: Duration,
}

impl Default for ResponsePolicy {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(2),
            stability_count: 3,
            timeout: Duration::from_secs(90),
        }
    }
}

impl ResponsePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.check_interval.is_zero() {
            return Err(ProviderError::Surface(
                "response policy check_interval must be > 0".to_string(),
            ));
        }
        if self.stability_count == 0 {
            return Err(ProviderError::Surface(
                "response policy stability_count must be >= 1".to_string(),
            ));
        }
        if self.timeout < self.check_interval {
            return Err(ProviderError::Surface(
                "response policy timeout must be >= check_interval".to_string(),
            ));
        }
        Ok(())
    }
}
