//! Built-in stage handlers for local runs.
//!
//! These produce plausible, deterministic data without calling any external
//! service: a vibe-based budget split, mock flights and hotels sized to the
//! budget, a seasonal-ish forecast and a templated itinerary.

use async_trait::async_trait;
use chrono::{Days, NaiveDate};
use serde_json::{json, Map, Value};
use std::fmt::Write as _;
use std::sync::Arc;

use super::StageHandler;
use crate::domain::request::MAX_TRIP_DAYS;
use crate::protocol::{Message, StageRole};

/// One handler per stage.
pub fn reference_handlers() -> Vec<Arc<dyn StageHandler>> {
    vec![
        Arc::new(BudgetOptimizer),
        Arc::new(FlightBooker),
        Arc::new(HotelScout),
        Arc::new(WeatherAgent),
        Arc::new(ItineraryBuilder),
    ]
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn number(payload: &Map<String, Value>, key: &str) -> Option<f64> {
    payload.get(key).and_then(Value::as_f64)
}

fn text<'a>(payload: &'a Map<String, Value>, key: &str, default: &'a str) -> &'a str {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(default)
}

fn count(payload: &Map<String, Value>, key: &str, default: u64) -> u64 {
    payload
        .get(key)
        .and_then(Value::as_u64)
        .filter(|n| *n >= 1)
        .unwrap_or(default)
}

/// Shares of the total budget per spending category.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Allocation {
    pub name: &'static str,
    pub flights: f64,
    pub accommodation: f64,
    pub activities: f64,
    pub food_transport: f64,
    pub buffer: f64,
}

const COMFORTABLE: Allocation = Allocation {
    name: "comfortable travel",
    flights: 0.25,
    accommodation: 0.40,
    activities: 0.20,
    food_transport: 0.12,
    buffer: 0.03,
};

const KEYWORD_STRATEGIES: &[(&[&str], Allocation)] = &[
    (
        &["beach", "yoga", "peaceful", "relax"],
        Allocation {
            name: "peaceful beach",
            flights: 0.25,
            accommodation: 0.35,
            activities: 0.20,
            food_transport: 0.15,
            buffer: 0.05,
        },
    ),
    (
        &["mountain", "adventure", "trek", "hike"],
        Allocation {
            name: "mountain adventure",
            flights: 0.30,
            accommodation: 0.30,
            activities: 0.25,
            food_transport: 0.12,
            buffer: 0.03,
        },
    ),
    (
        &["luxury", "premium", "luxurious", "5-star"],
        Allocation {
            name: "luxury premium experience",
            flights: 0.20,
            accommodation: 0.50,
            activities: 0.20,
            food_transport: 0.08,
            buffer: 0.02,
        },
    ),
    (
        &["budget", "cheap", "economy", "save"],
        Allocation {
            name: "budget friendly travel",
            flights: 0.30,
            accommodation: 0.30,
            activities: 0.15,
            food_transport: 0.20,
            buffer: 0.05,
        },
    ),
    (
        &["romantic", "couple", "honeymoon"],
        Allocation {
            name: "romantic couples getaway",
            flights: 0.25,
            accommodation: 0.45,
            activities: 0.20,
            food_transport: 0.08,
            buffer: 0.02,
        },
    ),
    (
        &["family", "kids", "children"],
        Allocation {
            name: "family friendly vacation",
            flights: 0.25,
            accommodation: 0.40,
            activities: 0.20,
            food_transport: 0.12,
            buffer: 0.03,
        },
    ),
];

/// Picks the split for a vibe by keyword, first match wins.
pub fn allocation_for_vibe(vibe: &str) -> Allocation {
    let vibe = vibe.to_lowercase();
    KEYWORD_STRATEGIES
        .iter()
        .find(|(keywords, _)| keywords.iter().any(|k| vibe.contains(k)))
        .map(|(_, allocation)| *allocation)
        .unwrap_or(COMFORTABLE)
}

pub struct BudgetOptimizer;

#[async_trait]
impl StageHandler for BudgetOptimizer {
    fn role(&self) -> StageRole {
        StageRole::Budget
    }

    async fn handle(&self, task: &Message) -> anyhow::Result<Map<String, Value>> {
        let payload = &task.payload;
        let total = number(payload, "budget")
            .filter(|b| *b > 0.0)
            .ok_or_else(|| anyhow::anyhow!("Budget is required"))?;
        let vibe = text(payload, "vibe", COMFORTABLE.name);
        let allocation = allocation_for_vibe(vibe);

        let flights = total * allocation.flights;
        let optimized = json!({
            "total_budget": total,
            "category_allocations": {
                "flights": flights,
                "accommodation": total * allocation.accommodation,
                "activities": total * allocation.activities,
                "food_transport": total * allocation.food_transport,
                "buffer": total * allocation.buffer,
            },
            "vibe_strategy": vibe,
            "strategy": allocation.name,
            "remaining_budget_after_flights": total - flights,
        });
        tracing::debug!(strategy = allocation.name, total, flights, "Budget optimized");

        Ok(object(json!({
            "optimized_budget": optimized,
            "original_budget": total,
            "vibe": vibe,
            "destination": payload.get("destination"),
            "travelers": payload.get("travelers"),
            "duration": payload.get("duration"),
            "origin": payload.get("origin"),
            "strategy_used": allocation.name,
        })))
    }
}

/// Per-ticket price cap for mock fares.
const MAX_MOCK_FARE: f64 = 15000.0;

pub struct FlightBooker;

#[async_trait]
impl StageHandler for FlightBooker {
    fn role(&self) -> StageRole {
        StageRole::Flight
    }

    async fn handle(&self, task: &Message) -> anyhow::Result<Map<String, Value>> {
        let payload = &task.payload;
        let destination = text(payload, "destination", "");
        if destination.is_empty() {
            anyhow::bail!("Destination is required");
        }
        let origin = text(payload, "origin", "Mumbai");
        let budget = number(payload, "budget").unwrap_or(0.0);
        let travelers = count(payload, "travelers", 1);

        let base = (budget * 0.7).min(MAX_MOCK_FARE);
        let route = format!("{} → {}", origin, destination);
        let flights = json!([
            {
                "airline": "Air India",
                "flight_number": "AI101",
                "departure": route,
                "departure_time": "08:00 AM",
                "arrival_time": "10:00 AM",
                "class": "Economy",
                "price": base,
            },
            {
                "airline": "IndiGo",
                "flight_number": "6E205",
                "departure": route,
                "departure_time": "02:00 PM",
                "arrival_time": "04:00 PM",
                "class": "Economy",
                "price": base * 0.9,
            },
        ]);
        let cheapest = flights[1].clone();
        let total_flight_cost = base * 0.9 * travelers as f64;

        Ok(object(json!({
            "success": true,
            "flights": flights,
            "selected_flight": cheapest,
            "total_flight_cost": total_flight_cost,
            "budget_remaining": budget - total_flight_cost,
            "travelers": travelers,
            "destination": destination,
            "source": "mock_data",
        })))
    }
}

pub struct HotelScout;

#[async_trait]
impl StageHandler for HotelScout {
    fn role(&self) -> StageRole {
        StageRole::Hotel
    }

    async fn handle(&self, task: &Message) -> anyhow::Result<Map<String, Value>> {
        let payload = &task.payload;
        let destination = text(payload, "destination", "the city");
        let budget_remaining = number(payload, "budget_remaining").unwrap_or(0.0).max(0.0);
        let nights = count(payload, "duration", 4);
        // Hotels get 60% of what is left, spread over the stay.
        let per_night = (budget_remaining * 0.6 / nights as f64).round();

        let hotels = json!([
            {
                "name": format!("Comfort Stay {}", destination),
                "price": (per_night * 0.8).round(),
                "rating": 4.2,
                "location": format!("Central {}", destination),
                "amenities": ["Free WiFi", "Air Conditioning", "Restaurant"],
                "breakfast_included": true,
            },
            {
                "name": format!("Budget Inn {}", destination),
                "price": (per_night * 0.6).round(),
                "rating": 3.7,
                "location": format!("{} City Center", destination),
                "amenities": ["Free WiFi", "Air Conditioning"],
                "breakfast_included": false,
            },
        ]);

        Ok(object(json!({
            "hotels": hotels,
            "hotel_count": 2,
            "destination": destination,
            "budget_remaining": budget_remaining,
            "source": "realistic_fallback",
            "status": "success",
        })))
    }
}

/// Longest forecast produced, in days.
const MAX_FORECAST_DAYS: u64 = 31;

pub struct WeatherAgent;

impl WeatherAgent {
    fn climate(destination: &str) -> (i64, &'static [&'static str]) {
        match destination.to_lowercase().as_str() {
            "mumbai" => (32, &["sunny", "partly cloudy", "humid", "light rain"]),
            "goa" => (30, &["sunny", "partly cloudy", "humid", "clear"]),
            "manali" => (18, &["clear", "partly cloudy", "cool", "breezy"]),
            "bangalore" => (26, &["pleasant", "partly cloudy", "clear", "sunny"]),
            _ => (28, &["sunny", "clear", "haze", "partly cloudy"]),
        }
    }
}

#[async_trait]
impl StageHandler for WeatherAgent {
    fn role(&self) -> StageRole {
        StageRole::Weather
    }

    async fn handle(&self, task: &Message) -> anyhow::Result<Map<String, Value>> {
        let payload = &task.payload;
        let destination = text(payload, "destination", "");
        let parse = |key: &str| {
            NaiveDate::parse_from_str(text(payload, key, ""), "%Y-%m-%d")
                .map_err(|e| anyhow::anyhow!("Invalid {}: {}", key, e))
        };
        let start = parse("start_date")?;
        let end = parse("end_date")?;

        let (base_temp, patterns) = Self::climate(destination);
        const VARIATION: [i64; 8] = [-2, -1, 0, 1, 2, 1, 0, -1];
        let mut forecast = Map::new();
        for day in 0..MAX_FORECAST_DAYS {
            let Some(date) = start.checked_add_days(Days::new(day)) else {
                break;
            };
            if date > end {
                break;
            }
            let i = day as usize;
            forecast.insert(
                date.format("%Y-%m-%d").to_string(),
                json!({
                    "temp": base_temp + VARIATION[i % VARIATION.len()],
                    "description": patterns[i % patterns.len()],
                    "humidity": 60 + (day * 5) % 25,
                }),
            );
        }

        Ok(object(json!({
            "destination": destination,
            "forecast": forecast,
            "source": "mock_forecast",
        })))
    }
}

pub struct ItineraryBuilder;

#[async_trait]
impl StageHandler for ItineraryBuilder {
    fn role(&self) -> StageRole {
        StageRole::Itinerary
    }

    async fn handle(&self, task: &Message) -> anyhow::Result<Map<String, Value>> {
        let payload = &task.payload;
        let destination = text(payload, "destination", "");
        if destination.is_empty() {
            anyhow::bail!("Destination is required");
        }
        let travelers = count(payload, "travelers", 1);
        let duration = count(payload, "duration", 4).min(u64::from(MAX_TRIP_DAYS));
        let vibe = text(payload, "user_vibe", COMFORTABLE.name);
        let flight_cost = number(payload, "total_flight_cost").unwrap_or(0.0);
        let remaining = number(payload, "budget_remaining").unwrap_or(0.0).max(0.0);

        let mut plan = String::new();
        writeln!(plan, "TRAVEL ITINERARY: {}", destination)?;
        writeln!(
            plan,
            "{} traveler(s) | {} days | {} style",
            travelers, duration, vibe
        )?;
        writeln!(plan)?;

        writeln!(plan, "FLIGHTS (total {:.0})", flight_cost)?;
        for flight in payload
            .get("flights")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
        {
            let airline = flight.get("airline").and_then(Value::as_str).unwrap_or("Flight");
            let price = flight.get("price").and_then(Value::as_f64).unwrap_or(0.0);
            writeln!(plan, "- {} at {:.0} per person", airline, price)?;
        }

        let stay = payload
            .get("hotels")
            .and_then(Value::as_array)
            .and_then(|hotels| hotels.first())
            .and_then(|hotel| hotel.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("to be arranged on arrival");
        writeln!(plan, "STAY: {}", stay)?;
        writeln!(plan)?;

        writeln!(plan, "BUDGET")?;
        writeln!(plan, "- Accommodation: {:.0}", remaining * 0.6)?;
        writeln!(plan, "- Activities & food: {:.0}", remaining * 0.3)?;
        writeln!(plan, "- Buffer: {:.0}", remaining * 0.1)?;
        writeln!(plan)?;

        let forecast = payload
            .get("weather")
            .and_then(|w| w.get("forecast"))
            .and_then(Value::as_object);
        let daily_activities = remaining * 0.3 / duration as f64 / travelers as f64;
        for day in 1..=duration {
            let weather = forecast
                .and_then(|f| f.values().nth((day - 1) as usize))
                .and_then(|d| d.get("description"))
                .and_then(Value::as_str)
                .unwrap_or("weather unknown");
            writeln!(
                plan,
                "DAY {}: explore {} ({}), about {:.0} per person for activities",
                day, destination, weather, daily_activities
            )?;
        }

        Ok(object(json!({
            "itinerary": plan,
            "destination": destination,
            "status": "success",
        })))
    }
}
