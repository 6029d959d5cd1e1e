/// Currency helpers for commission amounts.
///
/// All monetary values in the store are kept in cents (1 unit = 100 cents)
/// so balances add up exactly. Amounts only become `f64` on the wire.

/// Convert an amount to cents (multiply by 100, rounding half away from zero)
pub fn to_cents(amount: f64) -> i64 {
    (amount * 100.0).round() as i64
}

/// Convert cents back to an amount
pub fn from_cents(cents: i64) -> f64 {
    cents as f64 / 100.0
}

/// Validate an incoming amount and convert it to cents
pub fn parse_amount_to_cents(amount: f64) -> Result<i64, String> {
    if !amount.is_finite() {
        Err("Amount must be a finite number".to_string())
    } else if amount < 0.0 {
        Err("Amount cannot be negative".to_string())
    } else {
        Ok(to_cents(amount))
    }
}

/// Serde adapter for cent fields that travel as decimal amounts.
pub mod cents_as_amount {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::{from_cents, to_cents};

    pub fn serialize<S: Serializer>(cents: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(from_cents(*cents))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        f64::deserialize(deserializer).map(to_cents)
    }
}
