//! Provider records - raw adapter output and the normalized, scored form.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::session::SessionId;

/// A provider as an adapter found it, before normalization.
///
/// Fields hold whatever text the page offered. `raw_text` carries composite
/// card text from which phone, email and postal code can be recovered when
/// the page does not expose them separately.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderRecord {
    pub name: Option<String>,
    pub specialty: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub source_url: Option<String>,

    /// Unstructured text of the whole result card.
    pub raw_text: Option<String>,
}

impl ProviderRecord {
    /// Create a record with just a name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn with_specialty(mut self, specialty: impl Into<String>) -> Self {
        self.specialty = Some(specialty.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_phone(mut self, phone: impl Into<String>) -> Self {
        self.phone = Some(phone.into());
        self
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_website(mut self, website: impl Into<String>) -> Self {
        self.website = Some(website.into());
        self
    }

    pub fn with_rating(mut self, rating: f64) -> Self {
        self.rating = Some(rating);
        self
    }

    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn with_raw_text(mut self, text: impl Into<String>) -> Self {
        self.raw_text = Some(text.into());
        self
    }
}

/// A normalized provider with its confidence score.
///
/// Immutable once created. The score is computed from field presence at
/// creation time and never re-evaluated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRecord {
    pub name: Option<String>,
    pub specialty: Option<String>,
    pub address: Option<String>,
    pub city: Option<String>,
    pub postal_code: Option<String>,
    pub phone: Option<String>,
    pub email: Option<String>,
    pub website: Option<String>,
    pub rating: Option<f64>,
    pub review_count: Option<u32>,
    pub source_url: Option<String>,

    /// Completeness score in `[0, 100]`.
    pub confidence_score: f64,
}

/// Identifier assigned by the record store.
pub type RecordId = i64;

/// A record as persisted for a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub session_id: SessionId,

    /// 1-based page the record was found on.
    pub page_number: u32,

    pub record: ExtractedRecord,
    pub created_at: DateTime<Utc>,
}
