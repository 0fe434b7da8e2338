use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::aggregation::merge::merge;
use crate::models::city::{CityRecord, EnrichedCityRecord, PredictionRecord};
use crate::prediction_client::PredictionError;

#[derive(Debug)]
pub enum DegradeReason {
    /// The availability probe said no; nothing was fetched.
    Unavailable,
    /// The fetch failed or ran past its budget.
    Failed(PredictionError),
}

/// Per-request enrichment path. Starts at `Probe` and settles exactly once on
/// `Enhanced` (carrying whatever was fetched) or `Degraded`. There is no way back
/// and no retry.
#[derive(Debug)]
pub enum Enrichment<T> {
    Probe,
    Enhanced(T),
    Degraded(DegradeReason),
}

impl<T> Enrichment<T> {
    /// Settles the path. `fetch` is only polled when the probe succeeded, and is
    /// bounded by `budget`. Settled paths are returned unchanged.
    pub async fn resolve<F>(self, available: bool, budget: Duration, fetch: F) -> Self
    where
        F: Future<Output = Result<T, PredictionError>>,
    {
        match self {
            Enrichment::Probe if !available => {
                debug!("Prediction service unavailable, serving un-enriched results");
                Enrichment::Degraded(DegradeReason::Unavailable)
            }
            Enrichment::Probe => match tokio::time::timeout(budget, fetch).await {
                Ok(Ok(fetched)) => Enrichment::Enhanced(fetched),
                Ok(Err(e)) => {
                    warn!("Prediction fetch failed, serving un-enriched results: {e}");
                    Enrichment::Degraded(DegradeReason::Failed(e))
                }
                Err(_) => {
                    warn!(
                        "Prediction fetch exceeded {}ms, serving un-enriched results",
                        budget.as_millis()
                    );
                    Enrichment::Degraded(DegradeReason::Failed(PredictionError::Timeout(budget)))
                }
            },
            settled => settled,
        }
    }

    pub fn is_enhanced(&self) -> bool {
        matches!(self, Enrichment::Enhanced(_))
    }
}

impl Enrichment<Vec<PredictionRecord>> {
    /// Applies the settled path to one page of records.
    ///
    /// Enhanced: every record is marked `ml_enhanced`, unmatched ones keep the
    /// default score, and without an explicit sort the page is ordered by score
    /// (stable, so ties keep store order). Anything else: every record gets the
    /// default, in store order.
    pub fn apply(&self, records: Vec<CityRecord>, explicit_sort: bool) -> Vec<EnrichedCityRecord> {
        match self {
            Enrichment::Enhanced(predictions) => {
                let mut cities = merge(records, predictions);
                for city in &mut cities {
                    city.ml_enhanced = true;
                }
                if !explicit_sort {
                    cities.sort_by(|a, b| b.predicted_score.total_cmp(&a.predicted_score));
                }
                cities
            }
            Enrichment::Probe | Enrichment::Degraded(_) => {
                records.into_iter().map(EnrichedCityRecord::plain).collect()
            }
        }
    }
}
