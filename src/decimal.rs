//! Exact decimal parsing for request bodies.
//!
//! `BigDecimal`'s own `Deserialize` widens JSON numbers to `f64`, so a client's `0.1`
//! arrives as `0.1000000000000000055...`. Money fields use these helpers instead, which
//! read the number's text.

use bigdecimal::BigDecimal;
use serde::de::{self, Deserializer, MapAccess, Visitor};
use serde::Deserialize;
use std::fmt;
use std::str::FromStr;

/// Key serde_json uses to pass a number's raw text under `arbitrary_precision`.
const JSON_NUMBER_TOKEN: &str = "$serde_json::private::Number";

struct ExactDecimalVisitor;

impl<'de> Visitor<'de> for ExactDecimalVisitor {
    type Value = BigDecimal;

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a decimal number or a numeric string")
    }

    fn visit_str<E>(self, value: &str) -> Result<BigDecimal, E>
    where
        E: de::Error,
    {
        BigDecimal::from_str(value.trim())
            .map_err(|_| E::custom(format!("invalid decimal '{}'", value)))
    }

    fn visit_u64<E>(self, value: u64) -> Result<BigDecimal, E>
    where
        E: de::Error,
    {
        Ok(BigDecimal::from(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<BigDecimal, E>
    where
        E: de::Error,
    {
        Ok(BigDecimal::from(value))
    }

    fn visit_u128<E>(self, value: u128) -> Result<BigDecimal, E>
    where
        E: de::Error,
    {
        Ok(BigDecimal::from(value))
    }

    fn visit_i128<E>(self, value: i128) -> Result<BigDecimal, E>
    where
        E: de::Error,
    {
        Ok(BigDecimal::from(value))
    }

    /// Reached from `serde_json::Value`, which only yields a float when its shortest
    /// form reproduces the original text. Parsing that form keeps the client's digits.
    fn visit_f64<E>(self, value: f64) -> Result<BigDecimal, E>
    where
        E: de::Error,
    {
        if !value.is_finite() {
            return Err(E::custom("decimal must be finite"));
        }
        self.visit_str(&value.to_string())
    }

    fn visit_map<A>(self, mut map: A) -> Result<BigDecimal, A::Error>
    where
        A: MapAccess<'de>,
    {
        match map.next_key::<String>()? {
            Some(key) if key == JSON_NUMBER_TOKEN => {
                let text: String = map.next_value()?;
                self.visit_str(&text)
            }
            _ => Err(de::Error::invalid_type(de::Unexpected::Map, &self)),
        }
    }
}

/// `deserialize_with` target for required money fields.
pub fn exact<'de, D>(deserializer: D) -> Result<BigDecimal, D::Error>
where
    D: Deserializer<'de>,
{
    deserializer.deserialize_any(ExactDecimalVisitor)
}

#[derive(Deserialize)]
struct Exact(#[serde(deserialize_with = "exact")] BigDecimal);

/// `deserialize_with` target for optional money fields. Pair with `#[serde(default)]`.
pub fn exact_option<'de, D>(deserializer: D) -> Result<Option<BigDecimal>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Exact>::deserialize(deserializer)?.map(|Exact(value)| value))
}
