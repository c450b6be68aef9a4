//! The data model: snapshots, item ids, field records, and schema profiles
//! (§3 "Data model").

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Either a numeric or string item identity, per schema.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ItemId {
    Numeric(i64),
    String(String),
}

impl ItemId {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ItemId::Numeric(_))
    }
}

/// Default field record shape when no schema is embedded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldRecord {
    pub price: f64,
    pub quantity: f64,
}

/// One timestamped, multi-item observation.
///
/// `items` preserves insertion order as provided by the caller — the encoder
/// never reorders it (§5 "Ordering guarantees").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: i64,
    pub items: Vec<(ItemId, FieldRecord)>,
    /// Extra schema-field values, keyed by field name, parallel to `items`
    /// (one map entry's value vec has the same length as `items`). Empty when
    /// the legacy `{price, quantity}` schema is in effect.
    pub extra_fields: BTreeMap<String, Vec<f64>>,
}

impl Snapshot {
    pub fn new(timestamp: i64) -> Self {
        Self { timestamp, items: Vec::new(), extra_fields: BTreeMap::new() }
    }

    pub fn with_item(mut self, id: ItemId, record: FieldRecord) -> Self {
        self.items.push((id, record));
        self
    }
}

/// Field type as declared by a schema profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldType {
    Numeric,
    Categorical { enum_map: BTreeMap<String, u32> },
}

/// Hint steering which codec family a schema field prefers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CodecHint {
    Time,
    Value,
    Structural,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    pub field_type: FieldType,
    pub codec_hint: Option<CodecHint>,
}

/// Whether item identities in this file are numeric or string-valued.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ItemIdKind {
    Numeric,
    String,
}

/// Embedded, immutable-once-written schema description (§3 "Schema profile").
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaProfile {
    pub profile_id: String,
    pub version: u32,
    pub item_id_kind: ItemIdKind,
    pub fields: Vec<SchemaField>,
}

impl SchemaProfile {
    /// The `{price, quantity}` schema assumed when no schema blob is present.
    pub fn legacy() -> Self {
        SchemaProfile {
            profile_id: "legacy".to_string(),
            version: 1,
            item_id_kind: ItemIdKind::Numeric,
            fields: vec![
                SchemaField { name: "price".to_string(), field_type: FieldType::Numeric, codec_hint: Some(CodecHint::Value) },
                SchemaField { name: "quantity".to_string(), field_type: FieldType::Numeric, codec_hint: Some(CodecHint::Value) },
            ],
        }
    }

    pub fn is_legacy(&self) -> bool {
        self.profile_id == "legacy"
    }

    /// Schema fields beyond the fixed `{price, quantity}` pair, in
    /// declaration order, each assigned a stream id starting at
    /// `STREAM_ID_SCHEMA_EXTRA_BASE` (§3 "one stream per additional schema
    /// field starting from a reserved base id").
    pub fn extra_fields(&self) -> Vec<(&SchemaField, u8)> {
        self.fields
            .iter()
            .filter(|f| f.name != "price" && f.name != "quantity")
            .enumerate()
            .map(|(i, f)| (f, crate::format::STREAM_ID_SCHEMA_EXTRA_BASE + i as u8))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legacy_schema_has_two_fields() {
        let s = SchemaProfile::legacy();
        assert!(s.is_legacy());
        assert_eq!(s.fields.len(), 2);
        assert_eq!(s.item_id_kind, ItemIdKind::Numeric);
    }

    #[test]
    fn snapshot_builder_preserves_order() {
        let snap = Snapshot::new(1000)
            .with_item(ItemId::Numeric(2), FieldRecord { price: 1.0, quantity: 2.0 })
            .with_item(ItemId::Numeric(1), FieldRecord { price: 3.0, quantity: 4.0 });
        assert_eq!(snap.items[0].0, ItemId::Numeric(2));
        assert_eq!(snap.items[1].0, ItemId::Numeric(1));
    }
}
