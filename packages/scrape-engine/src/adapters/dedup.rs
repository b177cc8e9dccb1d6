//! Per-session duplicate suppression.

use std::collections::HashSet;

use crate::types::record::ProviderRecord;

/// Remembers `(name, address)` pairs already emitted in a session.
///
/// Keys are trimmed and lowercased. Records without a name are dropped.
#[derive(Debug, Default)]
pub struct ProviderDedup {
    seen: HashSet<(String, String)>,
}

impl ProviderDedup {
    pub fn new() -> Self {
        Self::default()
    }

    /// True the first time a provider is seen.
    pub fn admit(&mut self, record: &ProviderRecord) -> bool {
        let name = match record.name.as_deref().map(str::trim) {
            Some(name) if !name.is_empty() => name.to_lowercase(),
            _ => return false,
        };
        let address = record
            .address
            .as_deref()
            .map(|a| a.trim().to_lowercase())
            .unwrap_or_default();
        self.seen.insert((name, address))
    }

    /// Keep only first sightings, preserving order.
    pub fn filter(&mut self, records: Vec<ProviderRecord>) -> Vec<ProviderRecord> {
        records.into_iter().filter(|r| self.admit(r)).collect()
    }

    /// Distinct providers seen so far.
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dedup_case_and_whitespace_insensitive() {
        let mut dedup = ProviderDedup::new();
        let records = vec![
            ProviderRecord::named("Dr. Anna Schmidt").with_address("Hauptstr. 1, 10115 Berlin"),
            ProviderRecord::named("  dr. anna schmidt ").with_address("HAUPTSTR. 1, 10115 BERLIN"),
            ProviderRecord::named("Dr. Anna Schmidt").with_address("Nebenweg 2, 10117 Berlin"),
        ];
        let kept = dedup.filter(records);
        assert_eq!(kept.len(), 2);
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn test_nameless_records_dropped() {
        let mut dedup = ProviderDedup::new();
        assert!(!dedup.admit(&ProviderRecord::default()));
        assert!(!dedup.admit(&ProviderRecord::named("   ")));
        assert!(dedup.is_empty());
    }

    #[test]
    fn test_dedup_spans_pages() {
        let mut dedup = ProviderDedup::new();
        assert_eq!(dedup.filter(vec![ProviderRecord::named("A")]).len(), 1);
        assert_eq!(dedup.filter(vec![ProviderRecord::named("a"), ProviderRecord::named("B")]).len(), 1);
    }
}
