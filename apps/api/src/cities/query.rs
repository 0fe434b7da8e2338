use serde::Deserialize;
use uuid::Uuid;

use crate::errors::AppError;

/// Raw query string for city listing endpoints. Everything arrives as text so
/// pagination can be normalized instead of rejected.
#[derive(Debug, Default, Deserialize)]
pub struct CityListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub country: Option<String>,
    pub climate: Option<String>,
    pub min_cost: Option<String>,
    pub max_cost: Option<String>,
    pub min_safety: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
    pub user_id: Option<String>,
    pub q: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityFilter {
    pub search: Option<String>,
    pub country: Option<String>,
    pub climate: Option<String>,
    pub min_cost: Option<f64>,
    pub max_cost: Option<f64>,
    pub min_safety: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortField {
    Name,
    Country,
    MonthlyCost,
    SafetyScore,
    NightlifeRating,
    TransportRating,
}

impl SortField {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "name" => Some(SortField::Name),
            "country" => Some(SortField::Country),
            "monthly_cost_usd" => Some(SortField::MonthlyCost),
            "safety_score" => Some(SortField::SafetyScore),
            "nightlife_rating" => Some(SortField::NightlifeRating),
            "transport_rating" => Some(SortField::TransportRating),
            _ => None,
        }
    }

    /// Column name. Only these literals are ever interpolated into SQL.
    pub fn column(self) -> &'static str {
        match self {
            SortField::Name => "name",
            SortField::Country => "country",
            SortField::MonthlyCost => "monthly_cost_usd",
            SortField::SafetyScore => "safety_score",
            SortField::NightlifeRating => "nightlife_rating",
            SortField::TransportRating => "transport_rating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

impl SortOrder {
    pub fn keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CitySort {
    pub field: SortField,
    pub order: SortOrder,
    /// Whether the caller asked for an ordering. An explicit sort is never
    /// overridden by score ordering.
    pub explicit: bool,
}

impl Default for CitySort {
    fn default() -> Self {
        Self {
            field: SortField::Name,
            order: SortOrder::Asc,
            explicit: false,
        }
    }
}

impl CitySort {
    /// Unknown fields fall back to `name ASC`. An unrecognised order falls back
    /// to ASC.
    pub fn from_params(sort_by: Option<&str>, sort_order: Option<&str>) -> Self {
        let sort_by = sort_by.map(str::trim).filter(|s| !s.is_empty());
        let sort_order = sort_order.map(str::trim).filter(|s| !s.is_empty());
        let explicit = sort_by.is_some() || sort_order.is_some();

        let order = match sort_order {
            Some(o) if o.eq_ignore_ascii_case("desc") => SortOrder::Desc,
            _ => SortOrder::Asc,
        };

        match sort_by {
            None => Self {
                field: SortField::Name,
                order,
                explicit,
            },
            Some(raw) => match SortField::parse(raw) {
                Some(field) => Self {
                    field,
                    order,
                    explicit,
                },
                None => Self {
                    explicit,
                    ..Self::default()
                },
            },
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CityQuery {
    pub filter: CityFilter,
    pub sort: CitySort,
}

impl CityQuery {
    pub fn from_params(params: &CityListParams) -> Result<Self, AppError> {
        let filter = CityFilter {
            search: non_empty(params.q.as_deref()),
            country: non_empty(params.country.as_deref()),
            climate: non_empty(params.climate.as_deref()),
            min_cost: parse_number("min_cost", params.min_cost.as_deref())?,
            max_cost: parse_number("max_cost", params.max_cost.as_deref())?,
            min_safety: parse_number("min_safety", params.min_safety.as_deref())?,
        };

        if let (Some(min), Some(max)) = (filter.min_cost, filter.max_cost) {
            if min > max {
                return Err(AppError::InvalidParam {
                    param: "min_cost",
                    message: format!("min_cost ({min}) cannot exceed max_cost ({max})"),
                });
            }
        }

        Ok(Self {
            filter,
            sort: CitySort::from_params(params.sort_by.as_deref(), params.sort_order.as_deref()),
        })
    }
}

pub fn parse_user_id(raw: Option<&str>) -> Result<Option<Uuid>, AppError> {
    match non_empty(raw) {
        None => Ok(None),
        Some(raw) => Uuid::parse_str(&raw)
            .map(Some)
            .map_err(|_| AppError::InvalidParam {
                param: "user_id",
                message: format!("user_id '{raw}' is not a valid UUID"),
            }),
    }
}

fn non_empty(raw: Option<&str>) -> Option<String> {
    raw.map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_number(param: &'static str, raw: Option<&str>) -> Result<Option<f64>, AppError> {
    let Some(raw) = non_empty(raw) else {
        return Ok(None);
    };
    match raw.parse::<f64>() {
        Ok(v) if v.is_finite() => Ok(Some(v)),
        _ => Err(AppError::InvalidParam {
            param,
            message: format!("{param} must be a number, got '{raw}'"),
        }),
    }
}
