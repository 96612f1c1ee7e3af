//! Task payload builders, one per stage.
//!
//! Every task payload also carries `workflow_id` so stage workers that only
//! look at the payload can echo it back.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::domain::{Workflow, WorkflowId};
use crate::protocol::StageRole;

/// Values used when the request leaves a field out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskDefaults {
    pub origin: String,
    pub vibe: String,
    pub duration_days: u32,
    /// Days from today to the default departure date.
    pub departure_offset_days: u32,
}

impl Default for TaskDefaults {
    fn default() -> Self {
        Self {
            origin: "Mumbai".to_string(),
            vibe: "comfortable travel".to_string(),
            duration_days: 4,
            departure_offset_days: 30,
        }
    }
}

/// Inputs shared by every builder.
#[derive(Debug, Clone, Copy)]
pub struct TaskContext<'a> {
    pub defaults: &'a TaskDefaults,
    pub today: NaiveDate,
}

/// Resolved departure and return dates for a trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripDates {
    pub departure: NaiveDate,
    pub return_date: NaiveDate,
}

impl<'a> TaskContext<'a> {
    pub fn new(defaults: &'a TaskDefaults, today: NaiveDate) -> Self {
        Self { defaults, today }
    }

    fn vibe(&self, wf: &Workflow) -> String {
        wf.original_request
            .vibe
            .clone()
            .unwrap_or_else(|| self.defaults.vibe.clone())
    }

    fn origin(&self, wf: &Workflow) -> String {
        wf.original_request
            .origin
            .clone()
            .unwrap_or_else(|| self.defaults.origin.clone())
    }

    fn duration(&self, wf: &Workflow) -> u32 {
        wf.original_request
            .duration
            .unwrap_or(self.defaults.duration_days)
    }

    /// User-supplied dates win; otherwise departure is the configured offset
    /// from today and return is departure plus the trip duration.
    pub fn trip_dates(&self, wf: &Workflow) -> TripDates {
        let dates = wf.original_request.travel_dates;
        let offset = u64::from(self.defaults.departure_offset_days);
        let duration = u64::from(self.duration(wf));
        let departure = dates.start_date.unwrap_or_else(|| {
            self.today
                .checked_add_days(Days::new(offset))
                .unwrap_or(self.today)
        });
        let return_date = dates.end_date.unwrap_or_else(|| {
            self.today
                .checked_add_days(Days::new(offset + duration))
                .unwrap_or(departure)
        });
        TripDates {
            departure,
            return_date,
        }
    }
}

fn date(d: NaiveDate) -> String {
    d.format("%Y-%m-%d").to_string()
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn with_workflow_id(id: &WorkflowId, value: Value) -> Map<String, Value> {
    let mut map = object(value);
    map.insert("workflow_id".to_string(), json!(id.as_str()));
    map
}

fn collected_field(wf: &Workflow, stage: StageRole, key: &str) -> Option<Value> {
    wf.collected(stage)
        .and_then(|payload| payload.get(key))
        .filter(|v| !v.is_null())
        .cloned()
}

/// Flight cost reported by the flight stage, zero when absent.
pub fn total_flight_cost(wf: &Workflow) -> f64 {
    collected_field(wf, StageRole::Flight, "total_flight_cost")
        .and_then(|v| v.as_f64())
        .unwrap_or(0.0)
}

pub fn budget_task(wf: &Workflow, cx: &TaskContext<'_>) -> Map<String, Value> {
    let request = &wf.original_request;
    with_workflow_id(
        &wf.id,
        json!({
            "budget": request.budget,
            "vibe": cx.vibe(wf),
            "destination": request.destination,
            "travelers": request.travelers,
            "duration": cx.duration(wf),
            "origin": cx.origin(wf),
        }),
    )
}

/// `flight_budget` is the share of the total the flight stage may spend.
pub fn flight_task(
    wf: &Workflow,
    cx: &TaskContext<'_>,
    flight_budget: f64,
    optimized_budget: Option<Value>,
) -> Map<String, Value> {
    let request = &wf.original_request;
    let dates = cx.trip_dates(wf);
    with_workflow_id(
        &wf.id,
        json!({
            "origin": cx.origin(wf),
            "destination": request.destination,
            "budget": flight_budget,
            "travelers": request.travelers,
            "vibe": cx.vibe(wf),
            "duration": cx.duration(wf),
            "departure_date": date(dates.departure),
            "return_date": date(dates.return_date),
            "optimized_budget": optimized_budget,
            "total_budget": request.budget,
        }),
    )
}

pub fn hotel_task(
    wf: &Workflow,
    cx: &TaskContext<'_>,
    budget_remaining: f64,
) -> Map<String, Value> {
    let request = &wf.original_request;
    let dates = cx.trip_dates(wf);
    with_workflow_id(
        &wf.id,
        json!({
            "destination": request.destination,
            "budget_remaining": budget_remaining,
            "travelers": request.travelers,
            "vibe": cx.vibe(wf),
            "duration": cx.duration(wf),
            "departure_date": date(dates.departure),
            "return_date": date(dates.return_date),
            "total_flight_cost": total_flight_cost(wf),
            "total_budget": request.budget,
        }),
    )
}

pub fn weather_task(wf: &Workflow, cx: &TaskContext<'_>) -> Map<String, Value> {
    let dates = cx.trip_dates(wf);
    let start = date(dates.departure);
    let end = date(dates.return_date);
    with_workflow_id(
        &wf.id,
        json!({
            "destination": wf.original_request.destination,
            "start_date": start,
            "end_date": end,
            "departure_date": start,
            "return_date": end,
        }),
    )
}

/// Assembles everything collected so far. Missing stages contribute empty
/// data.
pub fn itinerary_task(wf: &Workflow, cx: &TaskContext<'_>) -> Map<String, Value> {
    let request = &wf.original_request;
    let flight_cost = total_flight_cost(wf);
    let weather = wf
        .collected(StageRole::Weather)
        .cloned()
        .map(Value::Object)
        .unwrap_or_else(|| json!({}));
    with_workflow_id(
        &wf.id,
        json!({
            "destination": request.destination,
            "travelers": request.travelers,
            "user_vibe": cx.vibe(wf),
            "duration": cx.duration(wf),
            "flights": collected_field(wf, StageRole::Flight, "flights").unwrap_or_else(|| json!([])),
            "total_flight_cost": flight_cost,
            "hotels": collected_field(wf, StageRole::Hotel, "hotels").unwrap_or_else(|| json!([])),
            "budget_remaining": request.budget - flight_cost,
            "optimized_budget": collected_field(wf, StageRole::Budget, "optimized_budget"),
            "weather": weather,
            "source": collected_field(wf, StageRole::Flight, "source").unwrap_or_else(|| json!("estimated")),
        }),
    )
}
