//! Transaction error classification
//!
//! The game reports departure failures as free text. This is the one place
//! that text is mapped onto a category; the engine never inspects it directly.

use crate::domain::TransactionFailure;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionDisposition {
    /// Lost a race with another trigger; not a failure
    AlreadyDeparted,
    /// Destination-price or emission-only anomaly; dropped without notification
    Anomaly,
    Failure(TransactionFailure),
}

/// Ordered rules, first match wins. Patterns are lowercase.
const RULES: &[(&[&str], Rule)] = &[
    (
        &["already departed", "already at sea", "already enroute", "not in port"],
        Rule::AlreadyDeparted,
    ),
    (
        &["destination price", "price anomaly", "emission only", "emissions only"],
        Rule::Anomaly,
    ),
    (
        &["insufficient fuel", "not enough fuel", "fuel too low"],
        Rule::Fail(Kind::Fuel),
    ),
    (
        &["insufficient co2", "not enough co2", "co2 certificates"],
        Rule::Fail(Kind::Co2),
    ),
    (
        &["insufficient funds", "not enough cash", "not enough money", "insufficient cash"],
        Rule::Fail(Kind::Cash),
    ),
    (&["maintenance", "drydock"], Rule::Fail(Kind::Maintenance)),
    (&["timed out", "timeout"], Rule::Fail(Kind::Timeout)),
    (
        &["rate limit", "too many requests", "429"],
        Rule::Fail(Kind::RateLimited),
    ),
    (
        &["no route", "route not found", "route unavailable", "invalid route"],
        Rule::Fail(Kind::Route),
    ),
];

#[derive(Debug, Clone, Copy)]
enum Kind {
    Fuel,
    Co2,
    Cash,
    Maintenance,
    Timeout,
    RateLimited,
    Route,
}

#[derive(Debug, Clone, Copy)]
enum Rule {
    AlreadyDeparted,
    Anomaly,
    Fail(Kind),
}

pub fn classify_transaction_error(message: &str) -> TransactionDisposition {
    let lowered = message.to_lowercase();

    let rule = RULES
        .iter()
        .find(|(patterns, _)| patterns.iter().any(|p| lowered.contains(p)))
        .map(|(_, rule)| *rule);

    match rule {
        Some(Rule::AlreadyDeparted) => TransactionDisposition::AlreadyDeparted,
        Some(Rule::Anomaly) => TransactionDisposition::Anomaly,
        Some(Rule::Fail(kind)) => TransactionDisposition::Failure(match kind {
            Kind::Fuel => TransactionFailure::InsufficientFuel,
            Kind::Co2 => TransactionFailure::InsufficientCo2,
            Kind::Cash => TransactionFailure::InsufficientCash,
            Kind::Maintenance => TransactionFailure::InMaintenance,
            Kind::Timeout => TransactionFailure::Timeout,
            Kind::RateLimited => TransactionFailure::RateLimited,
            Kind::Route => TransactionFailure::RouteUnavailable,
        }),
        None => TransactionDisposition::Failure(TransactionFailure::Other(
            message.trim().to_string(),
        )),
    }
}
