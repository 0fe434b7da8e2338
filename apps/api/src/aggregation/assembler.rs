use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::aggregation::enrichment::Enrichment;
use crate::aggregation::merge::{merge, MergeKey};
use crate::aggregation::pagination::{PageWindow, PaginationState};
use crate::aggregation::probe::AvailabilityProbe;
use crate::cities::query::CityQuery;
use crate::cities::store::{within_budget, CityRef, CityStore, SavedCities};
use crate::errors::AppError;
use crate::models::city::{EnrichedCityRecord, PredictionRecord};
use crate::prediction_client::{
    PageRequest, PredictionError, PredictionSource, UpstreamPagination,
};

/// Pagination metadata as emitted: computed from the record store's total, or
/// the prediction service's own block passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum PageMeta {
    Computed(PaginationState),
    Upstream(UpstreamPagination),
}

#[derive(Debug, Clone, Serialize)]
pub struct CityPage {
    pub cities: Vec<EnrichedCityRecord>,
    pub pagination: PageMeta,
    /// Always the pagination authority's total, never the enriched count.
    pub total: u64,
    pub ml_enhanced: bool,
}

#[derive(Debug, Clone, Copy)]
pub struct AssemblerSettings {
    pub prediction_timeout: Duration,
    pub store_timeout: Duration,
    /// How many top predictions to pull when enriching a listing page.
    pub prediction_fetch_limit: u32,
}

/// Builds enriched, paginated city responses from the record store and the
/// prediction service.
#[derive(Clone)]
pub struct ResultAssembler {
    store: Arc<dyn CityStore>,
    saved: Arc<dyn SavedCities>,
    predictions: Arc<dyn PredictionSource>,
    probe: Arc<AvailabilityProbe>,
    settings: AssemblerSettings,
}

impl ResultAssembler {
    pub fn new(
        store: Arc<dyn CityStore>,
        saved: Arc<dyn SavedCities>,
        predictions: Arc<dyn PredictionSource>,
        probe: Arc<AvailabilityProbe>,
        settings: AssemblerSettings,
    ) -> Self {
        Self {
            store,
            saved,
            predictions,
            probe,
            settings,
        }
    }

    /// Filtered listing. The record store is the pagination authority.
    pub async fn listing(
        &self,
        query: &CityQuery,
        window: PageWindow,
    ) -> Result<CityPage, AppError> {
        let (available, fetched) = tokio::join!(
            self.probe.is_available(),
            within_budget(self.settings.store_timeout, self.store.find(query, window)),
        );
        let (records, total) = fetched?;

        let path = Enrichment::Probe
            .resolve(available, self.settings.prediction_timeout, self.top_predictions())
            .await;
        let ml_enhanced = path.is_enhanced();
        let cities = path.apply(records, query.sort.explicit);

        debug!(
            "Assembled listing page {} ({} cities, total {}, ml_enhanced={})",
            window.page,
            cities.len(),
            total,
            ml_enhanced
        );

        Ok(CityPage {
            cities,
            pagination: PageMeta::Computed(PaginationState::new(window, total)),
            total,
            ml_enhanced,
        })
    }

    /// Preference-driven listing. The prediction service is the pagination
    /// authority; if it cannot answer, or its rows cannot be hydrated, the
    /// unfiltered record-store listing is served instead and the record store
    /// takes over as authority.
    pub async fn personalized(
        &self,
        preferences: &Value,
        window: PageWindow,
    ) -> Result<CityPage, AppError> {
        let available = self.probe.is_available().await;
        let page = PageRequest {
            limit: window.limit,
            page: window.page,
        };
        let path = Enrichment::Probe
            .resolve(
                available,
                self.settings.prediction_timeout,
                self.predictions.personalized(preferences, page),
            )
            .await;

        let response = match path {
            Enrichment::Enhanced(response) => response,
            Enrichment::Probe | Enrichment::Degraded(_) => {
                return self.fallback_listing(window).await
            }
        };

        let mut keys: Vec<MergeKey> =
            response.data.iter().map(MergeKey::of_prediction).collect();
        keys.sort();
        keys.dedup();
        let hydrated =
            within_budget(self.settings.store_timeout, self.store.find_by_keys(&keys)).await;
        let records = match hydrated {
            Ok(records) => records,
            Err(e) => {
                warn!("Personalized hydration failed, serving un-enriched listing: {e}");
                return self.fallback_listing(window).await;
            }
        };

        let cities = rank_like_predictions(merge(records, &response.data), &response.data);
        if cities.len() < response.data.len() {
            warn!(
                "{} of {} personalized predictions have no matching city record",
                response.data.len() - cities.len(),
                response.data.len()
            );
        }

        Ok(CityPage {
            cities,
            pagination: PageMeta::Upstream(response.pagination),
            total: response.total,
            ml_enhanced: true,
        })
    }

    /// Single city by id or slug, enriched from its country's predictions.
    pub async fn city(&self, city: &CityRef) -> Result<EnrichedCityRecord, AppError> {
        let (available, found) = tokio::join!(
            self.probe.is_available(),
            within_budget(self.settings.store_timeout, self.store.get(city)),
        );
        let record = found?.ok_or_else(|| AppError::NotFound(format!("City {city} not found")))?;

        let path = Enrichment::Probe
            .resolve(
                available,
                self.settings.prediction_timeout,
                self.country_predictions(&record.country),
            )
            .await;

        path.apply(vec![record], true)
            .into_iter()
            .next()
            .ok_or_else(|| {
                AppError::Internal(anyhow::anyhow!("enrichment dropped the city record"))
            })
    }

    /// A user's saved cities, newest first. The saved order is kept even when
    /// enriched.
    pub async fn saved_page(
        &self,
        user_id: Uuid,
        window: PageWindow,
    ) -> Result<CityPage, AppError> {
        let (available, fetched) = tokio::join!(
            self.probe.is_available(),
            within_budget(
                self.settings.store_timeout,
                self.saved.list_saved(user_id, window)
            ),
        );
        let (records, total) = fetched?;

        let path = Enrichment::Probe
            .resolve(available, self.settings.prediction_timeout, self.top_predictions())
            .await;
        let ml_enhanced = path.is_enhanced();
        let mut cities = path.apply(records, true);
        for city in &mut cities {
            city.is_saved = Some(true);
        }

        Ok(CityPage {
            cities,
            pagination: PageMeta::Computed(PaginationState::new(window, total)),
            total,
            ml_enhanced,
        })
    }

    /// Marks each city with whether `user_id` saved it, using one batched lookup
    /// over the whole page. No-op without a user.
    pub async fn annotate_saved(
        &self,
        user_id: Option<Uuid>,
        cities: &mut [EnrichedCityRecord],
    ) -> Result<(), AppError> {
        let Some(user_id) = user_id else {
            return Ok(());
        };
        if cities.is_empty() {
            return Ok(());
        }

        let ids: Vec<Uuid> = cities.iter().map(|c| c.city.id).collect();
        let saved = within_budget(
            self.settings.store_timeout,
            self.saved.saved_among(user_id, &ids),
        )
        .await?;

        for city in cities.iter_mut() {
            city.is_saved = Some(saved.contains(&city.city.id));
        }
        Ok(())
    }

    /// Unfiltered, un-enriched store listing used when the personalized query
    /// cannot be answered.
    async fn fallback_listing(&self, window: PageWindow) -> Result<CityPage, AppError> {
        let (records, total) = within_budget(
            self.settings.store_timeout,
            self.store.find(&CityQuery::default(), window),
        )
        .await?;

        Ok(CityPage {
            cities: records.into_iter().map(EnrichedCityRecord::plain).collect(),
            pagination: PageMeta::Computed(PaginationState::new(window, total)),
            total,
            ml_enhanced: false,
        })
    }

    async fn country_predictions(
        &self,
        country: &str,
    ) -> Result<Vec<PredictionRecord>, PredictionError> {
        let predictions = self
            .predictions
            .by_country(country, self.settings.prediction_fetch_limit)
            .await?;
        Ok(predictions.data)
    }

    async fn top_predictions(&self) -> Result<Vec<PredictionRecord>, PredictionError> {
        let top = self
            .predictions
            .top_n(self.settings.prediction_fetch_limit)
            .await?;
        Ok(top.data)
    }
}

/// Orders merged cities by their prediction's position and drops any row the
/// merge could not match, so the page is uniformly enhanced.
fn rank_like_predictions(
    cities: Vec<EnrichedCityRecord>,
    predictions: &[PredictionRecord],
) -> Vec<EnrichedCityRecord> {
    let mut rank: HashMap<MergeKey, usize> = HashMap::with_capacity(predictions.len());
    for (position, prediction) in predictions.iter().enumerate() {
        rank.entry(MergeKey::of_prediction(prediction)).or_insert(position);
    }

    let mut ranked: Vec<(usize, EnrichedCityRecord)> = cities
        .into_iter()
        .filter(|c| c.ml_enhanced)
        .filter_map(|c| {
            rank.get(&MergeKey::of_city(&c.city))
                .map(|&position| (position, c))
        })
        .collect();
    ranked.sort_by_key(|(position, _)| *position);
    ranked.into_iter().map(|(_, city)| city).collect()
}
