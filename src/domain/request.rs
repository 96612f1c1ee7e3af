//! Validation of incoming travel requests.
//!
//! The orchestrator accepts a request only when `destination`, `budget` and
//! `travelers` are present and sane. The validated request is the immutable
//! snapshot every stage task is built from.

use chrono::NaiveDate;
use serde_json::{Map, Value};
use thiserror::Error;

/// Longest trip a request may ask for, in days.
pub const MAX_TRIP_DAYS: u32 = 365;

/// Why a user request was rejected. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Missing destination, budget, or travelers (`{0}` is required)")]
    Missing(&'static str),
    #[error("Invalid `{field}`: expected {expected}")]
    Invalid {
        field: &'static str,
        expected: &'static str,
    },
}

/// Optional fixed travel dates supplied by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TravelDates {
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
}

/// A validated travel request.
#[derive(Debug, Clone, PartialEq)]
pub struct TravelRequest {
    pub destination: String,
    pub budget: f64,
    pub travelers: u32,
    pub duration: Option<u32>,
    pub vibe: Option<String>,
    pub origin: Option<String>,
    pub travel_dates: TravelDates,
}

impl TravelRequest {
    /// Validates a user payload.
    pub fn from_payload(payload: &Map<String, Value>) -> Result<Self, ValidationError> {
        let destination = match payload.get("destination") {
            None | Some(Value::Null) => return Err(ValidationError::Missing("destination")),
            Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(_) => {
                return Err(ValidationError::Invalid {
                    field: "destination",
                    expected: "a non-empty string",
                })
            }
        };

        let budget = match payload.get("budget") {
            None | Some(Value::Null) => return Err(ValidationError::Missing("budget")),
            Some(value) => value
                .as_f64()
                .filter(|b| b.is_finite() && *b > 0.0)
                .ok_or(ValidationError::Invalid {
                    field: "budget",
                    expected: "a number greater than zero",
                })?,
        };

        let travelers = match payload.get("travelers") {
            None | Some(Value::Null) => return Err(ValidationError::Missing("travelers")),
            Some(value) => value
                .as_u64()
                .filter(|t| *t >= 1)
                .and_then(|t| u32::try_from(t).ok())
                .ok_or(ValidationError::Invalid {
                    field: "travelers",
                    expected: "a whole number of at least 1",
                })?,
        };

        let duration = match payload.get("duration") {
            None | Some(Value::Null) => None,
            Some(value) => Some(
                value
                    .as_u64()
                    .filter(|d| (1..=u64::from(MAX_TRIP_DAYS)).contains(d))
                    .and_then(|d| u32::try_from(d).ok())
                    .ok_or(ValidationError::Invalid {
                        field: "duration",
                        expected: "a whole number of days between 1 and 365",
                    })?,
            ),
        };

        Ok(Self {
            destination,
            budget,
            travelers,
            duration,
            vibe: optional_string(payload, "vibe"),
            origin: optional_string(payload, "origin"),
            travel_dates: parse_travel_dates(payload)?,
        })
    }
}

fn optional_string(payload: &Map<String, Value>, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_travel_dates(payload: &Map<String, Value>) -> Result<TravelDates, ValidationError> {
    let Some(dates) = payload.get("travel_dates").and_then(Value::as_object) else {
        return Ok(TravelDates::default());
    };

    let parse = |key: &str, field: &'static str| -> Result<Option<NaiveDate>, ValidationError> {
        match dates.get(key).and_then(Value::as_str) {
            None => Ok(None),
            Some(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .map(Some)
                .map_err(|_| ValidationError::Invalid {
                    field,
                    expected: "a YYYY-MM-DD date",
                }),
        }
    };

    Ok(TravelDates {
        start_date: parse("start_date", "travel_dates.start_date")?,
        end_date: parse("end_date", "travel_dates.end_date")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_accepts_minimal_request() {
        let request = TravelRequest::from_payload(&payload(json!({
            "destination": "Goa",
            "budget": 15000,
            "travelers": 2,
            "duration": 4
        })))
        .unwrap();
        assert_eq!(request.destination, "Goa");
        assert_eq!(request.budget, 15000.0);
        assert_eq!(request.travelers, 2);
        assert_eq!(request.duration, Some(4));
        assert_eq!(request.vibe, None);
        assert_eq!(request.travel_dates, TravelDates::default());
    }

    #[test]
    fn test_missing_fields_are_reported() {
        let cases = [
            (json!({"budget": 100, "travelers": 1}), "destination"),
            (json!({"destination": "Goa", "travelers": 1}), "budget"),
            (json!({"destination": "Goa", "budget": 100}), "travelers"),
            (
                json!({"destination": null, "budget": 100, "travelers": 1}),
                "destination",
            ),
        ];
        for (value, field) in cases {
            assert_eq!(
                TravelRequest::from_payload(&payload(value)),
                Err(ValidationError::Missing(field))
            );
        }
    }

    #[test]
    fn test_rejects_blank_destination_and_bad_numbers() {
        let blank = TravelRequest::from_payload(&payload(json!({
            "destination": "  ", "budget": 100, "travelers": 1
        })));
        assert!(matches!(
            blank,
            Err(ValidationError::Invalid {
                field: "destination",
                ..
            })
        ));

        let zero_budget = TravelRequest::from_payload(&payload(json!({
            "destination": "Goa", "budget": 0, "travelers": 1
        })));
        assert!(matches!(
            zero_budget,
            Err(ValidationError::Invalid { field: "budget", .. })
        ));

        let no_travelers = TravelRequest::from_payload(&payload(json!({
            "destination": "Goa", "budget": 10, "travelers": 0
        })));
        assert!(matches!(
            no_travelers,
            Err(ValidationError::Invalid {
                field: "travelers",
                ..
            })
        ));

        let string_budget = TravelRequest::from_payload(&payload(json!({
            "destination": "Goa", "budget": "lots", "travelers": 1
        })));
        assert!(string_budget.is_err());
    }

    #[test]
    fn test_duration_is_bounded() {
        let request = |duration: Value| {
            TravelRequest::from_payload(&payload(json!({
                "destination": "Goa", "budget": 100, "travelers": 1, "duration": duration
            })))
        };
        assert_eq!(request(json!(MAX_TRIP_DAYS)).unwrap().duration, Some(MAX_TRIP_DAYS));
        for duration in [json!(0), json!(MAX_TRIP_DAYS + 1), json!(2_000_000), json!(-3)] {
            assert_eq!(
                request(duration),
                Err(ValidationError::Invalid {
                    field: "duration",
                    expected: "a whole number of days between 1 and 365",
                })
            );
        }
    }

    #[test]
    fn test_parses_travel_dates() {
        let request = TravelRequest::from_payload(&payload(json!({
            "destination": "Goa",
            "budget": 100,
            "travelers": 1,
            "travel_dates": {"start_date": "2025-11-23", "end_date": "2025-11-30"}
        })))
        .unwrap();
        assert_eq!(
            request.travel_dates.start_date,
            NaiveDate::from_ymd_opt(2025, 11, 23)
        );
        assert_eq!(
            request.travel_dates.end_date,
            NaiveDate::from_ymd_opt(2025, 11, 30)
        );

        let bad = TravelRequest::from_payload(&payload(json!({
            "destination": "Goa",
            "budget": 100,
            "travelers": 1,
            "travel_dates": {"start_date": "next week"}
        })));
        assert!(bad.is_err());
    }

    proptest! {
        #[test]
        fn prop_positive_budget_and_travelers_are_accepted(
            budget in 1u32..10_000_000,
            travelers in 1u32..50,
        ) {
            let request = TravelRequest::from_payload(&payload(json!({
                "destination": "Manali",
                "budget": budget,
                "travelers": travelers,
            })));
            prop_assert!(request.is_ok());
        }

        #[test]
        fn prop_non_positive_budget_is_rejected(budget in -1_000_000i64..=0) {
            let request = TravelRequest::from_payload(&payload(json!({
                "destination": "Manali",
                "budget": budget,
                "travelers": 1,
            })));
            prop_assert!(request.is_err());
        }
    }
}
