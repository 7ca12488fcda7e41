//! Contact-field validation shared by leads, customers and subcontractors.

use crate::errors::AppError;
use bigdecimal::BigDecimal;
use phonenumber::country::Id as CountryId;
use phonenumber::Mode;
use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

fn email_regex() -> &'static Regex {
    static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();
    EMAIL_REGEX.get_or_init(|| {
        // RFC 5322 simplified: local@domain.tld
        Regex::new(
            r"^[a-zA-Z0-9.!#$%&'*+/=?^_`{|}~-]+@[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?(?:\.[a-zA-Z0-9](?:[a-zA-Z0-9-]{0,61}[a-zA-Z0-9])?)+$",
        )
        .expect("email regex is valid")
    })
}

/// Validate email address
///
/// Checks for:
/// - Minimum length and presence of `@` and `.`
/// - Simplified RFC 5322 structure with a dotted domain
pub fn is_valid_email(email: &str) -> bool {
    if email.len() < 5 || !email.contains('@') || !email.contains('.') {
        return false;
    }

    if !email_regex().is_match(email) {
        tracing::warn!("Invalid email format: {}", email);
        return false;
    }

    true
}

/// Trims and lowercases an email, rejecting malformed ones.
pub fn normalize_email(raw: &str) -> Result<String, AppError> {
    let email = raw.trim().to_lowercase();
    if !is_valid_email(&email) {
        return Err(AppError::Validation(format!("Invalid email address '{}'", raw.trim())));
    }
    Ok(email)
}

/// Like [`normalize_email`], treating blank input as absent.
pub fn normalize_optional_email(raw: Option<String>) -> Result<Option<String>, AppError> {
    match optional_text(raw) {
        Some(email) => normalize_email(&email).map(Some),
        None => Ok(None),
    }
}

/// Parses an ISO 3166 alpha-2 region code such as `US` or `BR`.
pub fn parse_region(code: &str) -> Result<CountryId, AppError> {
    code.trim()
        .to_ascii_uppercase()
        .parse::<CountryId>()
        .map_err(|_| AppError::Validation(format!("Unknown phone region '{}'", code)))
}

/// Validate and normalize a phone number
///
/// Numbers without a leading `+` are read in `region`. Returns E.164 (`+16502530000`).
pub fn normalize_phone(raw: &str, region: CountryId) -> Result<String, AppError> {
    let trimmed = raw.trim();
    if trimmed.len() < 7 {
        return Err(AppError::Validation(format!("Phone number '{}' is too short", trimmed)));
    }

    match phonenumber::parse(Some(region), trimmed) {
        Ok(number) if phonenumber::is_valid(&number) => {
            let formatted = number.format().mode(Mode::E164).to_string();
            tracing::debug!("Normalized phone {} -> {}", trimmed, formatted);
            Ok(formatted)
        }
        Ok(_) => {
            tracing::warn!("Invalid phone number: {}", trimmed);
            Err(AppError::Validation(format!("Invalid phone number '{}'", trimmed)))
        }
        Err(e) => {
            tracing::warn!("Failed to parse phone '{}': {:?}", trimmed, e);
            Err(AppError::Validation(format!("Invalid phone number '{}'", trimmed)))
        }
    }
}

pub fn normalize_optional_phone(raw: Option<String>, region: CountryId) -> Result<Option<String>, AppError> {
    match optional_text(raw) {
        Some(phone) => normalize_phone(&phone, region).map(Some),
        None => Ok(None),
    }
}

/// Trimmed value of a required text field.
pub fn require_text(field: &str, value: &str) -> Result<String, AppError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AppError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// Trimmed value, with blank strings collapsed to `None`.
pub fn optional_text(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

/// Sorted, de-duplicated, trimmed set of specialties.
pub fn normalize_specialties(raw: Vec<String>) -> Vec<String> {
    raw.into_iter()
        .map(|s| s.trim().to_lowercase())
        .filter(|s| !s.is_empty())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

pub fn validate_rating(rating: &BigDecimal) -> Result<(), AppError> {
    let zero = BigDecimal::from(0);
    let five = BigDecimal::from(5);
    if rating < &zero || rating > &five {
        return Err(AppError::Validation(format!(
            "Rating must be between 0 and 5, got {}",
            rating
        )));
    }
    Ok(())
}

pub fn validate_non_negative(field: &str, value: &BigDecimal) -> Result<(), AppError> {
    if value < &BigDecimal::from(0) {
        return Err(AppError::Validation(format!("{} cannot be negative", field)));
    }
    Ok(())
}
