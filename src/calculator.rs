//! Line-item and document-total arithmetic shared by proposals and invoices.
//!
//! Both document types price their items through this module only, so their totals
//! agree digit for digit. Everything here is pure: no I/O, no clock, no logging above
//! `debug`.

use crate::errors::AppError;
use bigdecimal::{BigDecimal, RoundingMode, Zero};
use serde::{Deserialize, Serialize};

/// Number of decimal places money is rounded to.
pub const CENT_SCALE: i64 = 2;

/// A priced line on a proposal or invoice.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    /// Service or product description.
    #[serde(alias = "service")]
    pub description: String,
    pub quantity: BigDecimal,
    /// Rate per unit.
    #[serde(alias = "price", alias = "rate")]
    pub unit_price: BigDecimal,
    /// `quantity * unit_price`, unrounded.
    #[serde(alias = "total")]
    pub amount: BigDecimal,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A line as supplied by a caller. Any amount the client computed is not accepted here.
#[derive(Debug, Clone, Deserialize)]
pub struct LineItemInput {
    #[serde(alias = "service")]
    pub description: String,
    #[serde(deserialize_with = "crate::decimal::exact")]
    pub quantity: BigDecimal,
    #[serde(alias = "price", alias = "rate", deserialize_with = "crate::decimal::exact")]
    pub unit_price: BigDecimal,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Subtotal, tax and total of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub subtotal: BigDecimal,
    pub tax: BigDecimal,
    pub total: BigDecimal,
}

/// Items and totals produced by a full recompute.
#[derive(Debug, Clone, PartialEq)]
pub struct PricedDocument {
    pub items: Vec<LineItem>,
    pub tax_rate: BigDecimal,
    pub totals: DocumentTotals,
}

/// Computes `quantity * unit_rate`. No rounding at line level.
///
/// # Errors
///
/// * `AppError::Validation` - if either operand is negative.
pub fn line_amount(quantity: &BigDecimal, unit_rate: &BigDecimal) -> Result<BigDecimal, AppError> {
    if quantity < &BigDecimal::zero() {
        return Err(AppError::Validation(format!(
            "Quantity cannot be negative (got {})",
            quantity
        )));
    }
    if unit_rate < &BigDecimal::zero() {
        return Err(AppError::Validation(format!(
            "Unit price cannot be negative (got {})",
            unit_rate
        )));
    }
    Ok(quantity * unit_rate)
}

/// Rounds half-up to the cent.
pub fn round_to_cents(value: &BigDecimal) -> BigDecimal {
    value.with_scale_round(CENT_SCALE, RoundingMode::HalfUp)
}

/// Computes subtotal, tax and total from item amounts.
///
/// `tax = round_half_up(subtotal * tax_rate_percent / 100, cents)` and
/// `total = subtotal + tax`.
pub fn document_totals<'a, I>(amounts: I, tax_rate_percent: &BigDecimal) -> Result<DocumentTotals, AppError>
where
    I: IntoIterator<Item = &'a BigDecimal>,
{
    validate_tax_rate(tax_rate_percent)?;

    let subtotal = amounts
        .into_iter()
        .fold(BigDecimal::zero(), |acc, amount| acc + amount);
    let tax = round_to_cents(&(&subtotal * tax_rate_percent / BigDecimal::from(100)));
    let total = &subtotal + &tax;

    tracing::debug!(
        "Document totals: subtotal={} rate={}% tax={} total={}",
        subtotal,
        tax_rate_percent,
        tax,
        total
    );

    Ok(DocumentTotals {
        subtotal,
        tax,
        total,
    })
}

/// Prices caller-supplied lines and recomputes the whole document from scratch.
pub fn price_document(
    inputs: &[LineItemInput],
    tax_rate_percent: &BigDecimal,
) -> Result<PricedDocument, AppError> {
    let items = inputs
        .iter()
        .enumerate()
        .map(|(index, input)| price_line(index, input))
        .collect::<Result<Vec<_>, _>>()?;

    let totals = document_totals(items.iter().map(|item| &item.amount), tax_rate_percent)?;

    Ok(PricedDocument {
        items,
        tax_rate: tax_rate_percent.clone(),
        totals,
    })
}

/// Recomputes totals for already-priced items (e.g. after a tax-rate change).
pub fn reprice_items(items: Vec<LineItem>, tax_rate_percent: &BigDecimal) -> Result<PricedDocument, AppError> {
    let inputs: Vec<LineItemInput> = items
        .into_iter()
        .map(|item| LineItemInput {
            description: item.description,
            quantity: item.quantity,
            unit_price: item.unit_price,
            notes: item.notes,
        })
        .collect();
    price_document(&inputs, tax_rate_percent)
}

fn price_line(index: usize, input: &LineItemInput) -> Result<LineItem, AppError> {
    let description = input.description.trim();
    if description.is_empty() {
        return Err(AppError::Validation(format!(
            "Line item {} is missing a description",
            index + 1
        )));
    }

    let amount = line_amount(&input.quantity, &input.unit_price).map_err(|e| match e {
        AppError::Validation(msg) => AppError::Validation(format!("Line item {}: {}", index + 1, msg)),
        other => other,
    })?;

    Ok(LineItem {
        description: description.to_string(),
        quantity: input.quantity.clone(),
        unit_price: input.unit_price.clone(),
        amount,
        notes: input
            .notes
            .as_ref()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty()),
    })
}

fn validate_tax_rate(tax_rate_percent: &BigDecimal) -> Result<(), AppError> {
    if tax_rate_percent < &BigDecimal::zero() {
        return Err(AppError::Validation(format!(
            "Tax rate cannot be negative (got {})",
            tax_rate_percent
        )));
    }
    if tax_rate_percent > &BigDecimal::from(100) {
        return Err(AppError::Validation(format!(
            "Tax rate cannot exceed 100% (got {})",
            tax_rate_percent
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn dec(s: &str) -> BigDecimal {
        BigDecimal::from_str(s).unwrap()
    }

    fn input(description: &str, quantity: &str, price: &str) -> LineItemInput {
        LineItemInput {
            description: description.to_string(),
            quantity: dec(quantity),
            unit_price: dec(price),
            notes: None,
        }
    }

    #[test]
    fn test_line_amount_is_unrounded() {
        assert_eq!(line_amount(&dec("1.5"), &dec("33.333")).unwrap(), dec("49.9995"));
        assert_eq!(line_amount(&dec("0"), &dec("10")).unwrap(), dec("0"));
    }

    #[test]
    fn test_line_amount_rejects_negatives() {
        assert!(line_amount(&dec("-1"), &dec("10")).unwrap_err().is_validation());
        assert!(line_amount(&dec("1"), &dec("-0.01")).unwrap_err().is_validation());
    }

    #[test]
    fn test_two_line_quote_at_seven_percent() {
        let doc = price_document(
            &[input("Labor", "2", "75"), input("Materials", "1", "350")],
            &dec("7"),
        )
        .unwrap();

        assert_eq!(doc.totals.subtotal, dec("500.00"));
        assert_eq!(doc.totals.tax, dec("35.00"));
        assert_eq!(doc.totals.total, dec("535.00"));
        assert_eq!(doc.items[0].amount, dec("150"));
    }

    #[test]
    fn test_tax_rounds_half_up() {
        // 0.10 * 5% = 0.005 -> 0.01
        let totals = document_totals([dec("0.10")].iter(), &dec("5")).unwrap();
        assert_eq!(totals.tax, dec("0.01"));

        // 0.50 * 5% = 0.025 -> 0.03 (half-even would give 0.02)
        let totals = document_totals([dec("0.50")].iter(), &dec("5")).unwrap();
        assert_eq!(totals.tax, dec("0.03"));
    }

    #[test]
    fn test_empty_document_is_zero() {
        let totals = document_totals(std::iter::empty(), &dec("8.25")).unwrap();
        assert_eq!(totals.subtotal, dec("0"));
        assert_eq!(totals.tax, dec("0"));
        assert_eq!(totals.total, dec("0"));
    }

    #[test]
    fn test_invalid_tax_rate() {
        assert!(document_totals(std::iter::empty(), &dec("-1")).is_err());
        assert!(document_totals(std::iter::empty(), &dec("100.01")).is_err());
    }

    #[test]
    fn test_blank_description_rejected() {
        let err = price_document(&[input("  ", "1", "1")], &dec("0")).unwrap_err();
        assert!(err.to_string().contains("Line item 1"));
    }

    #[test]
    fn test_reprice_keeps_order() {
        let doc = price_document(
            &[input("B", "1", "2"), input("A", "3", "4")],
            &dec("0"),
        )
        .unwrap();
        let repriced = reprice_items(doc.items, &dec("10")).unwrap();

        assert_eq!(repriced.items[0].description, "B");
        assert_eq!(repriced.items[1].description, "A");
        assert_eq!(repriced.totals.total, dec("15.40"));
    }
}
