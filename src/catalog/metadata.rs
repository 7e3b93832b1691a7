//! Table metadata, snapshots and data files

use crate::partition::PartitionSpec;
use crate::types::{ScalarValue, Schema};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

pub const FORMAT_VERSION: i32 = 2;

/// `namespace.name`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableIdent {
    pub namespace: String,
    pub name: String,
}

impl TableIdent {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
        }
    }

    /// Parse `namespace.name`
    pub fn parse(s: &str) -> Option<Self> {
        let (namespace, name) = s.rsplit_once('.')?;
        if namespace.is_empty() || name.is_empty() {
            return None;
        }
        Some(Self::new(namespace, name))
    }
}

impl fmt::Display for TableIdent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.name)
    }
}

/// A data file written by a commit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataFile {
    pub file_path: String,
    /// One value per partition spec field
    pub partition: Vec<ScalarValue>,
    pub partition_path: String,
    pub record_count: u64,
    pub file_size_in_bytes: u64,
}

/// Immutable view of a table after a commit. `data_files` is the complete
/// live file set as of this snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub snapshot_id: i64,
    pub parent_snapshot_id: Option<i64>,
    pub sequence_number: i64,
    pub timestamp_ms: i64,
    pub operation: String,
    pub data_files: Vec<DataFile>,
    #[serde(default)]
    pub summary: HashMap<String, String>,
}

impl Snapshot {
    pub fn total_records(&self) -> u64 {
        self.data_files.iter().map(|f| f.record_count).sum()
    }
}

/// Everything the catalog stores about one table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableMetadata {
    pub format_version: i32,
    pub table_uuid: uuid::Uuid,
    pub namespace: String,
    pub name: String,
    pub location: String,
    pub schema: Schema,
    pub partition_spec: PartitionSpec,
    pub current_snapshot_id: Option<i64>,
    pub snapshots: Vec<Snapshot>,
    pub last_sequence_number: i64,
    pub last_updated_ms: i64,
    #[serde(default)]
    pub properties: HashMap<String, String>,
}

impl TableMetadata {
    pub fn ident(&self) -> TableIdent {
        TableIdent::new(&self.namespace, &self.name)
    }

    pub fn current_snapshot(&self) -> Option<&Snapshot> {
        self.current_snapshot_id
            .and_then(|id| self.snapshot_by_id(id))
    }

    pub fn snapshot_by_id(&self, snapshot_id: i64) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.snapshot_id == snapshot_id)
    }

    /// Snapshots in commit order
    pub fn history(&self) -> &[Snapshot] {
        &self.snapshots
    }

    /// Live data files of the current snapshot
    pub fn data_files(&self) -> &[DataFile] {
        self.current_snapshot()
            .map(|s| s.data_files.as_slice())
            .unwrap_or(&[])
    }

    /// Build the next snapshot, appending `added` to the current file set
    pub fn new_append_snapshot(&self, added: Vec<DataFile>) -> Snapshot {
        let mut data_files = self.data_files().to_vec();
        let added_records: u64 = added.iter().map(|f| f.record_count).sum();
        let added_files = added.len();
        data_files.extend(added);

        let snapshot_id = self
            .snapshots
            .iter()
            .map(|s| s.snapshot_id)
            .max()
            .map_or(1, |id| id + 1);
        let summary = HashMap::from([
            ("added-data-files".to_string(), added_files.to_string()),
            ("added-records".to_string(), added_records.to_string()),
            ("total-data-files".to_string(), data_files.len().to_string()),
        ]);

        Snapshot {
            snapshot_id,
            parent_snapshot_id: self.current_snapshot_id,
            sequence_number: self.last_sequence_number + 1,
            timestamp_ms: now_ms(),
            operation: "append".to_string(),
            data_files,
            summary,
        }
    }

    /// Copy of this metadata with `snapshot` appended and made current
    pub fn with_appended_snapshot(&self, snapshot: Snapshot) -> TableMetadata {
        let mut next = self.clone();
        next.last_sequence_number = next.last_sequence_number.max(snapshot.sequence_number);
        next.last_updated_ms = snapshot.timestamp_ms;
        next.current_snapshot_id = Some(snapshot.snapshot_id);
        next.snapshots.push(snapshot);
        next
    }
}

pub(crate) fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Arguments to [`super::Catalog::create_table`]
#[derive(Debug, Clone)]
pub struct TableCreation {
    pub name: String,
    pub location: String,
    pub schema: Schema,
    pub partition_spec: PartitionSpec,
    pub properties: HashMap<String, String>,
}

impl TableCreation {
    pub fn new(name: impl Into<String>, location: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            location: location.into(),
            schema,
            partition_spec: PartitionSpec::unpartitioned(),
            properties: HashMap::new(),
        }
    }

    pub fn with_partition_spec(mut self, spec: PartitionSpec) -> Self {
        self.partition_spec = spec;
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Fresh metadata with empty history
    pub(crate) fn into_metadata(self, namespace: &str) -> TableMetadata {
        TableMetadata {
            format_version: FORMAT_VERSION,
            table_uuid: uuid::Uuid::new_v4(),
            namespace: namespace.to_string(),
            name: self.name,
            location: self.location,
            schema: self.schema,
            partition_spec: self.partition_spec,
            current_snapshot_id: None,
            snapshots: Vec::new(),
            last_sequence_number: 0,
            last_updated_ms: now_ms(),
            properties: self.properties,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PrimitiveType;

    fn metadata() -> TableMetadata {
        let mut builder = Schema::builder();
        builder.add_field(1, "id", PrimitiveType::Long, true).unwrap();
        TableCreation::new("t", "/tmp/t", builder.build()).into_metadata("ns")
    }

    fn data_file(path: &str, rows: u64) -> DataFile {
        DataFile {
            file_path: path.to_string(),
            partition: vec![],
            partition_path: String::new(),
            record_count: rows,
            file_size_in_bytes: 10,
        }
    }

    #[test]
    fn test_ident() {
        let ident = TableIdent::parse("sales.orders").unwrap();
        assert_eq!(ident, TableIdent::new("sales", "orders"));
        assert_eq!(ident.to_string(), "sales.orders");
        assert!(TableIdent::parse("orders").is_none());
        assert_eq!(metadata().ident().to_string(), "ns.t");
    }

    #[test]
    fn test_append_snapshots() {
        let m0 = metadata();
        assert!(m0.current_snapshot().is_none());

        let s1 = m0.new_append_snapshot(vec![data_file("a", 2)]);
        let m1 = m0.with_appended_snapshot(s1);
        let s2 = m1.new_append_snapshot(vec![data_file("b", 3)]);
        let m2 = m1.with_appended_snapshot(s2);

        assert_eq!(m2.history().len(), 2);
        let current = m2.current_snapshot().unwrap();
        assert_eq!(current.snapshot_id, 2);
        assert_eq!(current.parent_snapshot_id, Some(1));
        assert_eq!(current.total_records(), 5);
        assert_eq!(m2.snapshot_by_id(1).unwrap().data_files.len(), 1);
        assert_eq!(m2.last_sequence_number, 2);
        // m0 untouched
        assert!(m0.snapshots.is_empty());
    }

    #[test]
    fn test_json_round_trip() {
        let m = metadata();
        let json = serde_json::to_string_pretty(&m).unwrap();
        let back: TableMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(back, m);
    }
}
