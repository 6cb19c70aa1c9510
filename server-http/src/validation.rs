use crate::api::requests::EpisodesParams;
use catalog::{EpisodeQuery, SortField};
use tracing::debug;

// Constants for validation ranges
const DEFAULT_LIMIT: usize = 10;
const MAX_LIMIT: usize = 100;

#[derive(Debug, PartialEq, Eq)]
pub enum ValidationError {
    Malformed {
        field: &'static str,
        value: String,
        expected: &'static str,
    },
    InvalidId { field: &'static str, value: i64 },
    OutOfRange {
        field: &'static str,
        value: i64,
        min: i64,
        max: i64,
    },
}

impl ValidationError {
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::Malformed { field, .. } => field,
            ValidationError::InvalidId { field, .. } => field,
            ValidationError::OutOfRange { field, .. } => field,
        }
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Malformed {
                field,
                value,
                expected,
            } => {
                write!(f, "Field '{}' must be {}, got '{}'", field, expected, value)
            }
            ValidationError::InvalidId { field, value } => {
                write!(f, "Field '{}' must be a positive id, got {}", field, value)
            }
            ValidationError::OutOfRange {
                field,
                value,
                min,
                max,
            } => {
                write!(
                    f,
                    "Field '{}' value {} is out of range (min: {}, max: {})",
                    field, value, min, max
                )
            }
        }
    }
}

impl std::error::Error for ValidationError {}

pub struct EpisodeQueryFactory;

impl EpisodeQueryFactory {
    /// Validates the query string and returns an [`EpisodeQuery`] with defaults applied.
    ///
    /// A `limit` above the maximum is capped rather than rejected. An unknown
    /// `sort_field` falls back to `published_at`.
    pub fn from_params(params: EpisodesParams) -> Result<EpisodeQuery, ValidationError> {
        let user_id = Self::validate_id("user_id", params.user_id.as_deref())?;
        let category_id = Self::validate_id("category_id", params.category_id.as_deref())?;

        let limit = match Self::parse_int("limit", params.limit.as_deref())? {
            None => DEFAULT_LIMIT,
            Some(value) if value < 1 => {
                return Err(ValidationError::OutOfRange {
                    field: "limit",
                    value,
                    min: 1,
                    max: MAX_LIMIT as i64,
                });
            }
            Some(limit) => limit.min(MAX_LIMIT as i64) as usize,
        };

        let offset = match Self::parse_int("offset", params.offset.as_deref())? {
            None => 0,
            Some(value) if value < 0 => {
                return Err(ValidationError::OutOfRange {
                    field: "offset",
                    value,
                    min: 0,
                    max: i64::MAX,
                });
            }
            Some(offset) => offset as usize,
        };

        Ok(EpisodeQuery {
            user_id,
            category_id,
            sort_field: Self::parse_sort_field(params.sort_field.as_deref()),
            asc: Self::parse_bool("asc", params.asc.as_deref())?.unwrap_or(false),
            limit,
            offset,
        })
    }

    fn parse_int(field: &'static str, raw: Option<&str>) -> Result<Option<i64>, ValidationError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some(raw) => raw.parse().map(Some).map_err(|_| ValidationError::Malformed {
                field,
                value: raw.to_string(),
                expected: "an integer",
            }),
        }
    }

    fn parse_bool(field: &'static str, raw: Option<&str>) -> Result<Option<bool>, ValidationError> {
        match raw.map(str::trim) {
            None | Some("") => Ok(None),
            Some("true" | "1") => Ok(Some(true)),
            Some("false" | "0") => Ok(Some(false)),
            Some(raw) => Err(ValidationError::Malformed {
                field,
                value: raw.to_string(),
                expected: "true or false",
            }),
        }
    }

    fn validate_id(field: &'static str, raw: Option<&str>) -> Result<Option<i64>, ValidationError> {
        match Self::parse_int(field, raw)? {
            Some(value) if value <= 0 => Err(ValidationError::InvalidId { field, value }),
            other => Ok(other),
        }
    }

    fn parse_sort_field(sort_field: Option<&str>) -> SortField {
        match sort_field {
            None | Some("") => SortField::default(),
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                debug!("Unknown sort field '{}', using published_at", raw);
                SortField::default()
            }),
        }
    }
}
