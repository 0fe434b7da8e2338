/// Prediction Client: the single point of entry for calls to the city scoring service.
///
/// The client is constructed once at startup from `Config` and injected through
/// `AppState` as `Arc<dyn PredictionSource>`, so tests can substitute a fake.
/// It never retries: a failed call degrades the current request instead.
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::models::city::PredictionRecord;

#[derive(Debug, Error)]
pub enum PredictionError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Timed out after {0:?}")]
    Timeout(Duration),
}

/// Bulk ranking: `GET /predictions/top`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TopPredictions {
    #[serde(default, deserialize_with = "lenient_seq")]
    pub data: Vec<PredictionRecord>,
    #[serde(default)]
    pub total: u64,
}

/// Per-country ranking: `GET /predictions/country/{country}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CountryPredictions {
    #[serde(default, deserialize_with = "lenient_seq")]
    pub data: Vec<PredictionRecord>,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub country: String,
}

/// Pagination block returned by the personalized query. It is authoritative for
/// the personalized path and is re-emitted as-is, unknown fields included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamPagination {
    pub offset: u64,
    pub current_page: u64,
    pub total_pages: u64,
    pub has_next_page: bool,
    pub has_prev_page: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Preference-driven query: `POST /predictions/personalized`.
#[derive(Debug, Clone, Deserialize)]
pub struct PersonalizedPredictions {
    #[serde(default, deserialize_with = "lenient_seq")]
    pub data: Vec<PredictionRecord>,
    pub total: u64,
    pub limit: u32,
    pub pagination: UpstreamPagination,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PageRequest {
    pub limit: u32,
    pub page: u32,
}

#[derive(Debug, Serialize)]
struct PersonalizedRequest<'a> {
    preferences: &'a Value,
    limit: u32,
    page: u32,
}

/// The scoring service as seen by the aggregation layer.
#[async_trait]
pub trait PredictionSource: Send + Sync {
    /// Lightweight liveness call. Any `Err` means "do not enrich".
    async fn health(&self) -> Result<(), PredictionError>;

    async fn top_n(&self, limit: u32) -> Result<TopPredictions, PredictionError>;

    async fn by_country(
        &self,
        country: &str,
        limit: u32,
    ) -> Result<CountryPredictions, PredictionError>;

    /// `preferences` is forwarded verbatim.
    async fn personalized(
        &self,
        preferences: &Value,
        page: PageRequest,
    ) -> Result<PersonalizedPredictions, PredictionError>;
}

/// HTTP implementation of `PredictionSource`.
#[derive(Clone)]
pub struct PredictionClient {
    client: Client,
    base_url: String,
}

impl PredictionClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, PredictionError> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
    ) -> Result<T, PredictionError> {
        let response = request.send().await?;
        let status = response.status();

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(PredictionError::Api {
                status: status.as_u16(),
                message,
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl PredictionSource for PredictionClient {
    async fn health(&self) -> Result<(), PredictionError> {
        let response = self.client.get(self.url("/health")).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(PredictionError::Api {
                status: status.as_u16(),
                message: "health check failed".to_string(),
            });
        }
        Ok(())
    }

    async fn top_n(&self, limit: u32) -> Result<TopPredictions, PredictionError> {
        let request = self
            .client
            .get(self.url("/predictions/top"))
            .query(&[("limit", limit)]);
        let top: TopPredictions = self.send_json(request).await?;
        debug!("Fetched {} top predictions (total {})", top.data.len(), top.total);
        Ok(top)
    }

    async fn by_country(
        &self,
        country: &str,
        limit: u32,
    ) -> Result<CountryPredictions, PredictionError> {
        let mut url = reqwest::Url::parse(&self.url("/predictions/country/"))
            .map_err(|e| PredictionError::Api {
                status: 0,
                message: format!("invalid prediction URL: {e}"),
            })?;
        url.path_segments_mut()
            .map_err(|_| PredictionError::Api {
                status: 0,
                message: "prediction URL cannot carry a path".to_string(),
            })?
            .pop_if_empty()
            .push(country);

        let request = self.client.get(url).query(&[("limit", limit)]);
        let predictions: CountryPredictions = self.send_json(request).await?;
        debug!(
            "Fetched {} predictions for country '{}'",
            predictions.data.len(),
            country
        );
        Ok(predictions)
    }

    async fn personalized(
        &self,
        preferences: &Value,
        page: PageRequest,
    ) -> Result<PersonalizedPredictions, PredictionError> {
        let body = PersonalizedRequest {
            preferences,
            limit: page.limit,
            page: page.page,
        };
        let request = self
            .client
            .post(self.url("/predictions/personalized"))
            .json(&body);
        let personalized: PersonalizedPredictions = self.send_json(request).await?;
        debug!(
            "Fetched {} personalized predictions (page {}/{})",
            personalized.data.len(),
            personalized.pagination.current_page,
            personalized.pagination.total_pages
        );
        Ok(personalized)
    }
}

/// Decodes `data` as a sequence when it is one; anything else (null, object,
/// string) becomes an empty sequence rather than a decode failure.
fn lenient_seq<'de, D, T>(deserializer: D) -> Result<Vec<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    match Value::deserialize(deserializer)? {
        Value::Array(items) => {
            serde_json::from_value(Value::Array(items)).map_err(serde::de::Error::custom)
        }
        _ => Ok(Vec::new()),
    }
}
