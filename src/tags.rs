//! Provenance tags written onto vaulted objects and their origins

use crate::event::CorrelationId;
use chrono::{DateTime, SecondsFormat, Utc};
use cheyenne_core_interface::{StorageClass, TagMap};

pub const TAG_EVENT_UUID: &str = "uncomn:cheyenne:VaultEventUUID";
pub const TAG_PROCESSED_TIME: &str = "uncomn:cheyenne:VaultEventProcessedTime";
pub const TAG_PROCESSING: &str = "uncomn:cheyenne:VaultProcessing";

/// Origin tag selecting the vault storage class
pub const TAG_VAULT_STORAGE: &str = "uncomn:cheyenne:VaultStorage";

/// `TAG_VAULT_STORAGE` value (any case) requesting cold storage
pub const COLD_STORAGE_VALUE: &str = "glacier";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStatus {
    Completed,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Completed => "COMPLETED",
        }
    }
}

/// Provenance written once per successful duplication
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaultTagSet {
    pub correlation_id: CorrelationId,
    pub processed_at: DateTime<Utc>,
    pub status: ProcessingStatus,
}

impl VaultTagSet {
    pub fn completed(correlation_id: CorrelationId, processed_at: DateTime<Utc>) -> Self {
        Self {
            correlation_id,
            processed_at,
            status: ProcessingStatus::Completed,
        }
    }

    /// UTC, millisecond precision, explicit `+00:00` offset
    pub fn processed_time(&self) -> String {
        self.processed_at.to_rfc3339_opts(SecondsFormat::Millis, false)
    }

    pub fn to_tag_map(&self) -> TagMap {
        let mut tags = TagMap::new();
        tags.insert(TAG_EVENT_UUID.to_string(), self.correlation_id.to_string());
        tags.insert(TAG_PROCESSED_TIME.to_string(), self.processed_time());
        tags.insert(TAG_PROCESSING.to_string(), self.status.as_str().to_string());
        tags
    }
}

/// Origin tags overlaid with provenance; provenance wins on key collisions
pub fn merge_tags(origin: TagMap, provenance: &TagMap) -> TagMap {
    let mut merged = origin;
    merged.extend(provenance.iter().map(|(k, v)| (k.clone(), v.clone())));
    merged
}

/// Pick the vault storage class from the origin's tags
pub fn storage_class_for(origin_tags: &TagMap) -> StorageClass {
    match origin_tags.get(TAG_VAULT_STORAGE) {
        Some(value) if value.eq_ignore_ascii_case(COLD_STORAGE_VALUE) => StorageClass::ArchivalCold,
        _ => StorageClass::ArchivalInfrequentAccess,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn tags(pairs: &[(&str, &str)]) -> TagMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_processed_time_format() {
        let at = Utc.with_ymd_and_hms(2021, 6, 1, 12, 30, 5).unwrap()
            + chrono::Duration::milliseconds(42);
        let set = VaultTagSet::completed(CorrelationId::generate(), at);
        assert_eq!(set.processed_time(), "2021-06-01T12:30:05.042+00:00");
    }

    #[test]
    fn test_tag_map_contents() {
        let id = CorrelationId::generate();
        let map = VaultTagSet::completed(id, Utc::now()).to_tag_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map[TAG_EVENT_UUID], id.to_string());
        assert_eq!(map[TAG_PROCESSING], "COMPLETED");
    }

    #[test]
    fn test_merge_preserves_unrelated_tags() {
        let provenance = VaultTagSet::completed(CorrelationId::generate(), Utc::now()).to_tag_map();
        let merged = merge_tags(tags(&[("env", "prod")]), &provenance);
        assert_eq!(merged.len(), 4);
        assert_eq!(merged["env"], "prod");
        assert_eq!(merged[TAG_PROCESSING], "COMPLETED");
    }

    #[test]
    fn test_merge_overwrites_previous_provenance() {
        let provenance = VaultTagSet::completed(CorrelationId::generate(), Utc::now()).to_tag_map();
        let merged = merge_tags(
            tags(&[(TAG_EVENT_UUID, "old"), (TAG_PROCESSED_TIME, "2099-01-01T00:00:00.000+00:00")]),
            &provenance,
        );
        assert_eq!(merged[TAG_EVENT_UUID], provenance[TAG_EVENT_UUID]);
        assert_eq!(merged[TAG_PROCESSED_TIME], provenance[TAG_PROCESSED_TIME]);
    }

    #[test]
    fn test_storage_class_selection() {
        for value in ["glacier", "GLACIER", "Glacier"] {
            assert_eq!(
                storage_class_for(&tags(&[(TAG_VAULT_STORAGE, value)])),
                StorageClass::ArchivalCold
            );
        }
        assert_eq!(
            storage_class_for(&tags(&[(TAG_VAULT_STORAGE, "deep")])),
            StorageClass::ArchivalInfrequentAccess
        );
        assert_eq!(
            storage_class_for(&tags(&[("VaultStorage", "glacier")])),
            StorageClass::ArchivalInfrequentAccess
        );
        assert_eq!(storage_class_for(&TagMap::new()), StorageClass::ArchivalInfrequentAccess);
    }
}
