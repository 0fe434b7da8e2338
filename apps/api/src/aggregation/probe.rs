use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::prediction_client::PredictionSource;

#[derive(Debug, Clone, Copy)]
struct ProbeSnapshot {
    available: bool,
    checked_at: Instant,
}

/// Time-bounded, TTL-cached liveness check of the prediction service.
///
/// The cached flag is the only state shared across requests. Two requests may
/// both refresh it when it expires; the last writer wins.
pub struct AvailabilityProbe {
    source: Arc<dyn PredictionSource>,
    timeout: Duration,
    ttl: Duration,
    cached: RwLock<Option<ProbeSnapshot>>,
}

impl AvailabilityProbe {
    pub fn new(source: Arc<dyn PredictionSource>, timeout: Duration, ttl: Duration) -> Self {
        Self {
            source,
            timeout,
            ttl,
            cached: RwLock::new(None),
        }
    }

    /// Never fails: timeouts, refused connections and non-2xx all read as `false`.
    pub async fn is_available(&self) -> bool {
        if let Some(snapshot) = *self.cached.read().await {
            if snapshot.checked_at.elapsed() < self.ttl {
                return snapshot.available;
            }
        }

        let available = match tokio::time::timeout(self.timeout, self.source.health()).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                debug!("Prediction service health check failed: {e}");
                false
            }
            Err(_) => {
                debug!(
                    "Prediction service health check timed out after {}ms",
                    self.timeout.as_millis()
                );
                false
            }
        };

        let mut cached = self.cached.write().await;
        if cached.map(|s| s.available) != Some(available) {
            info!("Prediction service availability changed: available={available}");
        }
        *cached = Some(ProbeSnapshot {
            available,
            checked_at: Instant::now(),
        });

        available
    }
}
