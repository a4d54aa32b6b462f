//! Gallery store collaborator.
//!
//! The engine never holds the gallery; callers hand it a snapshot per
//! request. [`MemoryGallery`] is the in-process store the CLI uses.

use facematch_core::IdentityRecord;
use serde::{Deserialize, Serialize};

pub trait GalleryStore {
    /// Snapshot of every registered record, in registration order.
    fn get_all(&self) -> Vec<IdentityRecord>;
    fn add(&mut self, record: IdentityRecord);
    fn clear(&mut self);
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemoryGallery {
    records: Vec<IdentityRecord>,
}

impl MemoryGallery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_records(records: Vec<IdentityRecord>) -> Self {
        Self { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Distinct labels, in order of first registration.
    pub fn labels(&self) -> Vec<&str> {
        let mut labels: Vec<&str> = Vec::new();
        for record in &self.records {
            if !labels.contains(&record.label.as_str()) {
                labels.push(&record.label);
            }
        }
        labels
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

impl GalleryStore for MemoryGallery {
    fn get_all(&self) -> Vec<IdentityRecord> {
        self.records.clone()
    }

    fn add(&mut self, record: IdentityRecord) {
        tracing::debug!(id = %record.id, label = %record.label, "gallery add");
        self.records.push(record);
    }

    fn clear(&mut self) {
        tracing::debug!(count = self.records.len(), "gallery clear");
        self.records.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facematch_core::Embedding;

    #[test]
    fn test_repeated_label_keeps_independent_records() {
        let mut gallery = MemoryGallery::new();
        gallery.add(IdentityRecord::new("Alice", Embedding::new(vec![1.0, 0.0])));
        gallery.add(IdentityRecord::new("Bob", Embedding::new(vec![0.0, 1.0])));
        gallery.add(IdentityRecord::new("Alice", Embedding::new(vec![0.9, 0.1])));

        assert_eq!(gallery.len(), 3);
        assert_eq!(gallery.labels(), vec!["Alice", "Bob"]);
        let all = gallery.get_all();
        assert_eq!(all[0].embedding.values, vec![1.0, 0.0]);
        assert_eq!(all[2].embedding.values, vec![0.9, 0.1]);
    }

    #[test]
    fn test_snapshot_is_detached() {
        let mut gallery = MemoryGallery::new();
        gallery.add(IdentityRecord::new("Alice", Embedding::new(vec![1.0])));
        let snapshot = gallery.get_all();
        gallery.clear();
        assert!(gallery.is_empty());
        assert_eq!(snapshot.len(), 1);
    }

    #[test]
    fn test_json_is_a_plain_record_list() {
        let gallery = MemoryGallery::from_records(vec![IdentityRecord::new(
            "Alice",
            Embedding::new(vec![0.5, 0.25]),
        )]);
        let json = gallery.to_json().unwrap();
        assert!(json.trim_start().starts_with('['));
        assert_eq!(MemoryGallery::from_json(&json).unwrap(), gallery);
    }
}
