//! Value objects describing a transfer.

use chrono::{DateTime, Utc};
use common::{DroverId, UserId};
use realtime::OfferDetails;
use serde::{Deserialize, Serialize};

/// Money amount in cents.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub fn zero() -> Self {
        Self(0)
    }

    pub fn cents(&self) -> i64 {
        self.0
    }

    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }
}

impl std::fmt::Display for Money {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        write!(f, "{sign}{}.{:02}", self.0.abs() / 100, self.0.abs() % 100)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Address {
    pub city: String,
    pub coordinates: Coordinates,
    /// Free-text street line.
    pub line: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub brand: String,
    pub model: String,
    pub year: u16,
    pub plate: String,
    pub vin: String,
}

impl std::fmt::Display for Vehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} ({}) {}", self.brand, self.model, self.year, self.plate)
    }
}

/// Route figures computed by the external routing collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteEstimate {
    pub distance_m: u64,
    pub duration_s: u64,
    pub price: Money,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Card,
    BankTransfer,
    Cash,
}

impl PaymentMethod {
    /// Card payments are captured before the transfer opens for dispatch.
    pub fn requires_capture(&self) -> bool {
        matches!(self, PaymentMethod::Card)
    }
}

/// Everything the client supplies when booking a transfer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferDetails {
    pub origin: Address,
    pub destination: Address,
    pub vehicle: Vehicle,
    pub pickup_at: DateTime<Utc>,
    pub route: RouteEstimate,
    pub payment_method: PaymentMethod,
}

impl TransferDetails {
    /// Returns the first problem found, if any.
    pub fn validate(&self) -> Result<(), String> {
        if self.origin.city.trim().is_empty() || self.destination.city.trim().is_empty() {
            return Err("origin and destination city are required".to_string());
        }
        if !self.origin.coordinates.is_valid() || !self.destination.coordinates.is_valid() {
            return Err("coordinates out of range".to_string());
        }
        if self.vehicle.plate.trim().is_empty() {
            return Err("vehicle plate is required".to_string());
        }
        if self.route.price.is_negative() {
            return Err(format!("negative price: {}", self.route.price));
        }
        Ok(())
    }

    /// Summary pushed to drovers with an offer.
    pub fn offer_summary(&self) -> OfferDetails {
        OfferDetails {
            origin_city: self.origin.city.clone(),
            destination_city: self.destination.city.clone(),
            pickup_at: self.pickup_at,
            distance_m: self.route.distance_m,
            duration_s: self.route.duration_s,
            price_cents: self.route.price.cents(),
            vehicle: self.vehicle.to_string(),
        }
    }
}

/// Who asked for a status change. Recorded on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum Actor {
    /// Automated flows: verification phase close, payment webhook.
    System,
    Admin(UserId),
    Drover(DroverId),
    Client(UserId),
}

impl Actor {
    pub fn user_id(&self) -> Option<UserId> {
        match self {
            Actor::System => None,
            Actor::Admin(id) | Actor::Drover(id) | Actor::Client(id) => Some(*id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Actor::System => "system",
            Actor::Admin(_) => "admin",
            Actor::Drover(_) => "drover",
            Actor::Client(_) => "client",
        }
    }
}

impl std::fmt::Display for Actor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.user_id() {
            Some(id) => write!(f, "{}:{id}", self.kind()),
            None => f.write_str(self.kind()),
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn money_display() {
        assert_eq!(Money::from_cents(18_505).to_string(), "185.05");
        assert_eq!(Money::from_cents(-250).to_string(), "-2.50");
    }

    #[test]
    fn valid_details_pass() {
        assert!(fixtures::details().validate().is_ok());
    }

    #[test]
    fn missing_city_is_rejected() {
        let mut details = fixtures::details();
        details.destination.city = "  ".to_string();
        assert!(details.validate().is_err());
    }

    #[test]
    fn out_of_range_coordinates_are_rejected() {
        let mut details = fixtures::details();
        details.origin.coordinates.lat = 91.0;
        assert!(details.validate().is_err());
    }

    #[test]
    fn negative_price_is_rejected() {
        let mut details = fixtures::details();
        details.route.price = Money::from_cents(-1);
        assert!(details.validate().unwrap_err().contains("negative price"));
    }

    #[test]
    fn offer_summary_carries_route_figures() {
        let summary = fixtures::details().offer_summary();
        assert_eq!(summary.origin_city, "Lisbon");
        assert_eq!(summary.price_cents, 18_500);
        assert_eq!(summary.vehicle, "Renault Clio (2021) AA-00-BB");
    }

    #[test]
    fn actor_serializes_with_kind_tag() {
        let id = UserId::new();
        let json = serde_json::to_value(Actor::Drover(id)).unwrap();
        assert_eq!(json["kind"], "drover");
        assert_eq!(json["id"], id.to_string());
        let system = serde_json::to_value(Actor::System).unwrap();
        assert_eq!(system, serde_json::json!({"kind": "system"}));
    }

    #[test]
    fn only_card_requires_capture() {
        assert!(PaymentMethod::Card.requires_capture());
        assert!(!PaymentMethod::Cash.requires_capture());
        assert!(!PaymentMethod::BankTransfer.requires_capture());
    }
}
