use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};

/// MIME type sentinel marking a directory node.
pub const FOLDER_MIME_TYPE: &str = "folder";

/// A node in the metadata tree.
///
/// The `id` is shared with the content store entry holding the bytes of a
/// file. Folders never have a content store entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, bincode::Encode, bincode::Decode)]
#[serde(rename_all = "camelCase")]
pub struct FileRecord {
    id: String,
    name: String,
    mime_type: String,
    size: u64,
    #[serde(serialize_with = "millis_as_rfc3339")]
    date_created: i64,
    #[serde(serialize_with = "millis_as_rfc3339")]
    last_modified: i64,
    parents: Vec<String>,
}

/// Field-level patch applied by `Metadata::update`.
///
/// Only these fields may change after creation; `id`, `mimeType` and
/// `dateCreated` are fixed.
#[derive(Debug, Clone, Default)]
pub struct RecordPatch {
    pub parents: Option<Vec<String>>,
    pub name: Option<String>,
    pub size: Option<u64>,
}

impl RecordPatch {
    pub fn name(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    pub fn parents(parents: Vec<String>) -> Self {
        Self {
            parents: Some(parents),
            ..Default::default()
        }
    }

    pub fn size(size: u64) -> Self {
        Self {
            size: Some(size),
            ..Default::default()
        }
    }

    /// A patch that changes nothing but `lastModified`.
    pub fn touch() -> Self {
        Self::default()
    }
}

impl FileRecord {
    pub fn new(
        id: impl Into<String>,
        parent_id: impl Into<String>,
        mime_type: impl Into<String>,
        name: impl Into<String>,
        size: u64,
    ) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: mime_type.into(),
            size,
            date_created: now,
            last_modified: now,
            parents: vec![parent_id.into()],
        }
    }

    /// A folder without parents.
    pub fn new_root(id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            name: name.into(),
            mime_type: FOLDER_MIME_TYPE.to_string(),
            size: 0,
            date_created: now,
            last_modified: now,
            parents: Vec::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn parents(&self) -> &[String] {
        &self.parents
    }

    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn date_created(&self) -> DateTime<Utc> {
        from_millis(self.date_created)
    }

    pub fn last_modified(&self) -> DateTime<Utc> {
        from_millis(self.last_modified)
    }

    pub(crate) fn date_created_millis(&self) -> i64 {
        self.date_created
    }

    pub(crate) fn last_modified_millis(&self) -> i64 {
        self.last_modified
    }

    /// Applies the patch and stamps `lastModified`.
    pub(crate) fn apply(&mut self, patch: RecordPatch) {
        if let Some(parents) = patch.parents {
            self.parents = parents;
        }
        if let Some(name) = patch.name {
            self.name = name;
        }
        if let Some(size) = patch.size {
            self.size = size;
        }
        // never move backwards, even if the wall clock does
        self.last_modified = now_millis().max(self.last_modified);
    }

    pub fn to_vec(&self) -> Result<Vec<u8>> {
        Ok(bincode::encode_to_vec(self, bincode::config::standard())?)
    }

    pub fn from_slice(data: &[u8]) -> Result<Self> {
        let (record, _len) = bincode::decode_from_slice(data, bincode::config::standard())?;
        Ok(record)
    }

    /// JSON view of the record, restricted to `fields` when given.
    pub fn project(&self, fields: Option<&[RecordField]>) -> Result<serde_json::Map<String, serde_json::Value>> {
        let mut map = match serde_json::to_value(self)? {
            serde_json::Value::Object(map) => map,
            _ => return Err(Error::Backend("record did not serialize to an object".to_string())),
        };
        if let Some(fields) = fields {
            map.retain(|key, _| fields.iter().any(|f| f.key() == key));
        }
        Ok(map)
    }
}

/// Selectable record fields for `inspect` projections.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordField {
    Id,
    Name,
    MimeType,
    Size,
    DateCreated,
    LastModified,
    Parents,
}

impl RecordField {
    pub fn key(&self) -> &'static str {
        match self {
            RecordField::Id => "id",
            RecordField::Name => "name",
            RecordField::MimeType => "mimeType",
            RecordField::Size => "size",
            RecordField::DateCreated => "dateCreated",
            RecordField::LastModified => "lastModified",
            RecordField::Parents => "parents",
        }
    }
}

impl FromStr for RecordField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "id" => Ok(RecordField::Id),
            "name" => Ok(RecordField::Name),
            "mimeType" | "mime_type" => Ok(RecordField::MimeType),
            "size" => Ok(RecordField::Size),
            "dateCreated" | "date_created" => Ok(RecordField::DateCreated),
            "lastModified" | "last_modified" => Ok(RecordField::LastModified),
            "parents" => Ok(RecordField::Parents),
            other => Err(Error::InvalidParameters(format!("unknown record field '{other}'"))),
        }
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
}

fn millis_as_rfc3339<S: Serializer>(ms: &i64, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&from_millis(*ms).to_rfc3339())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_serialization() {
        let record = FileRecord::new("B1", "A1", "text/plain", "b.txt", 10);
        let decoded = FileRecord::from_slice(&record.to_vec().unwrap()).unwrap();
        assert_eq!(record, decoded);
    }

    #[test]
    fn test_apply_patch_touches_last_modified() {
        let mut record = FileRecord::new("B1", "A1", "text/plain", "b.txt", 10);
        let before = record.last_modified_millis();
        record.apply(RecordPatch::name("c.txt"));
        assert_eq!(record.name(), "c.txt");
        assert_eq!(record.size(), 10);
        assert_eq!(record.parents(), ["A1".to_string()]);
        assert!(record.last_modified_millis() >= before);
        assert_eq!(record.date_created_millis(), before);
    }

    #[test]
    fn test_projection() {
        let record = FileRecord::new("B1", "A1", "text/plain", "b.txt", 10);
        let full = record.project(None).unwrap();
        assert_eq!(full.len(), 7);
        assert_eq!(full["mimeType"], "text/plain");

        let fields = [RecordField::Name, RecordField::Size];
        let partial = record.project(Some(&fields)).unwrap();
        assert_eq!(partial.len(), 2);
        assert_eq!(partial["name"], "b.txt");
        assert_eq!(partial["size"], 10);
    }

    #[test]
    fn test_root_is_folder() {
        let root = FileRecord::new_root("A1", "A");
        assert!(root.is_folder());
        assert!(root.is_root());
        assert_eq!("mimeType".parse::<RecordField>().unwrap(), RecordField::MimeType);
        assert!("owner".parse::<RecordField>().is_err());
    }
}
