//! Merge: joins record-store cities with prediction-service scores.
//!
//! The two sources share no numeric id, so the join runs on `MergeKey`, a
//! normalized `name_country` composite. Both sides go through the same
//! normalization; a mismatch there silently drops every score.

use std::collections::HashMap;
use std::fmt;

use crate::models::city::{CityRecord, EnrichedCityRecord, PredictionRecord};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MergeKey(String);

impl MergeKey {
    pub fn new(name: &str, country: &str) -> Self {
        Self(format!("{}_{}", normalize(name), normalize(country)))
    }

    pub fn of_city(city: &CityRecord) -> Self {
        Self::new(&city.name, &city.country)
    }

    pub fn of_prediction(prediction: &PredictionRecord) -> Self {
        Self::new(&prediction.name, &prediction.country)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MergeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trims, collapses inner whitespace runs to one space, and lowercases.
fn normalize(value: &str) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Indexes predictions by key. Duplicate keys keep the highest score so the
/// index does not depend on the order the service returned rows in.
pub fn index_predictions(predictions: &[PredictionRecord]) -> HashMap<MergeKey, f64> {
    let mut index: HashMap<MergeKey, f64> = HashMap::with_capacity(predictions.len());
    for prediction in predictions {
        index
            .entry(MergeKey::of_prediction(prediction))
            .and_modify(|score| {
                if prediction.predicted_score.total_cmp(score).is_gt() {
                    *score = prediction.predicted_score;
                }
            })
            .or_insert(prediction.predicted_score);
    }
    index
}

/// Attaches a score to every record that has a prediction. Unmatched records
/// keep the default score and `ml_enhanced = false`. Record order is preserved.
pub fn merge(
    records: Vec<CityRecord>,
    predictions: &[PredictionRecord],
) -> Vec<EnrichedCityRecord> {
    if records.is_empty() || predictions.is_empty() {
        return records.into_iter().map(EnrichedCityRecord::plain).collect();
    }

    let index = index_predictions(predictions);
    records
        .into_iter()
        .map(|city| match index.get(&MergeKey::of_city(&city)) {
            Some(&score) => EnrichedCityRecord {
                city,
                predicted_score: score,
                ml_enhanced: true,
                is_saved: None,
            },
            None => EnrichedCityRecord::plain(city),
        })
        .collect()
}
