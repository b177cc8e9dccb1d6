//! Record normalization and confidence scoring.
//!
//! Runs once per record before it is persisted. Text fields are cleaned,
//! missing contact fields are recovered from composite card text with
//! German-format patterns, and the confidence score is fixed.

use lazy_static::lazy_static;
use regex::Regex;

use crate::types::record::{ExtractedRecord, ProviderRecord};

lazy_static! {
    static ref WHITESPACE: Regex = Regex::new(r"\s+").unwrap();

    // +49 30 1234567, 030-1234567, (030) 1234567
    static ref PHONE_PATTERNS: Vec<Regex> = vec![
        Regex::new(r"\+49[\s\-]?\d{2,4}[\s\-]?\d{3,}[\s\-]?\d{2,}").unwrap(),
        Regex::new(r"0\d{2,4}[\s\-/]?\d{3,}[\s\-/]?\d{2,}").unwrap(),
        Regex::new(r"\(\d{2,4}\)[\s\-]?\d{3,}[\s\-]?\d{2,}").unwrap(),
    ];
    static ref PHONE_STRIP: Regex = Regex::new(r"[^\d\+\(\)]").unwrap();

    static ref EMAIL: Regex =
        Regex::new(r"\b[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}\b").unwrap();

    static ref POSTAL_CODE: Regex = Regex::new(r"\b\d{5}\b").unwrap();
    static ref POSTAL_CITY: Regex = Regex::new(r"\b\d{5}\s+([^\s,;]+)").unwrap();
}

/// Share of the score carried by name, address, phone and email.
const CORE_WEIGHT: f64 = 70.0;
const BONUS: f64 = 10.0;
const MAX_SCORE: f64 = 100.0;

/// Normalize a raw record and compute its confidence score.
pub fn normalize(raw: ProviderRecord) -> ExtractedRecord {
    let raw_text = clean_text(raw.raw_text);
    let address = clean_text(raw.address);

    let phone = clean_text(raw.phone)
        .and_then(|p| clean_phone(&p))
        .or_else(|| raw_text.as_deref().and_then(extract_phone));

    let email = clean_text(raw.email).or_else(|| raw_text.as_deref().and_then(extract_email));

    let postal_code = clean_text(raw.postal_code)
        .or_else(|| address.as_deref().and_then(extract_postal_code))
        .or_else(|| raw_text.as_deref().and_then(extract_postal_code));

    let city = clean_text(raw.city).or_else(|| address.as_deref().and_then(extract_city));

    let mut record = ExtractedRecord {
        name: clean_text(raw.name),
        specialty: clean_text(raw.specialty),
        address,
        city,
        postal_code,
        phone,
        email,
        website: clean_text(raw.website),
        rating: raw.rating.filter(|r| r.is_finite()),
        review_count: raw.review_count,
        source_url: clean_text(raw.source_url),
        confidence_score: 0.0,
    };
    record.confidence_score = confidence_score(&record);
    record
}

/// Completeness score in `[0, 100]`.
///
/// Name, address, phone and email share 70 points equally. Rating,
/// website and specialty add 10 each.
pub fn confidence_score(record: &ExtractedRecord) -> f64 {
    let core = [
        record.name.is_some(),
        record.address.is_some(),
        record.phone.is_some(),
        record.email.is_some(),
    ];
    let filled = core.iter().filter(|present| **present).count() as f64;
    let mut score = filled / core.len() as f64 * CORE_WEIGHT;

    if record.rating.is_some() {
        score += BONUS;
    }
    if record.website.is_some() {
        score += BONUS;
    }
    if record.specialty.is_some() {
        score += BONUS;
    }
    score.min(MAX_SCORE)
}

/// Collapse runs of whitespace and trim. Empty becomes `None`.
pub fn clean_text(value: Option<String>) -> Option<String> {
    let value = value?;
    let collapsed = WHITESPACE.replace_all(value.trim(), " ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed.into_owned())
    }
}

/// First German phone number in `text`, reduced to digits, `+` and parentheses.
pub fn extract_phone(text: &str) -> Option<String> {
    PHONE_PATTERNS
        .iter()
        .find_map(|pattern| pattern.find(text))
        .and_then(|m| clean_phone(m.as_str()))
}

fn clean_phone(phone: &str) -> Option<String> {
    let cleaned = PHONE_STRIP.replace_all(phone, "");
    if cleaned.chars().any(|c| c.is_ascii_digit()) {
        Some(cleaned.into_owned())
    } else {
        None
    }
}

/// First email address in `text`.
pub fn extract_email(text: &str) -> Option<String> {
    EMAIL.find(text).map(|m| m.as_str().to_string())
}

/// First five-digit token in `text`.
pub fn extract_postal_code(text: &str) -> Option<String> {
    POSTAL_CODE.find(text).map(|m| m.as_str().to_string())
}

/// The word following the postal code.
pub fn extract_city(address: &str) -> Option<String> {
    POSTAL_CITY
        .captures(address)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}
