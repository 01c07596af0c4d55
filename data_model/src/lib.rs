pub mod test_objects;

use std::fmt::{self, Display};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub const DEFAULT_CATEGORY: &str = "Autre";

/// Owner or record identifier.
///
/// The catalog and the clients use numeric ids, but nothing enforces that, so
/// anything that doesn't parse as an integer is kept as text. Numeric ids
/// serialize as JSON numbers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema)]
#[serde(untagged)]
pub enum Identifier {
    Numeric(i64),
    Text(String),
}

pub type OwnerId = Identifier;
pub type DocumentId = Identifier;

/// Owner recorded when an upload doesn't name one.
pub const PLACEHOLDER_OWNER: OwnerId = Identifier::Numeric(1);

impl Identifier {
    /// Text that would not read back the same once re-formatted as a number
    /// (`007`, `+5`) stays text.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        match raw.parse::<i64>() {
            Ok(n) if n.to_string() == raw => Identifier::Numeric(n),
            _ => Identifier::Text(raw.to_string()),
        }
    }

    /// Like [`Identifier::parse`], but an empty value means "not supplied".
    pub fn parse_non_empty(raw: &str) -> Option<Self> {
        if raw.trim().is_empty() {
            None
        } else {
            Some(Self::parse(raw))
        }
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Identifier::Numeric(n) => write!(f, "{}", n),
            Identifier::Text(s) => f.write_str(s),
        }
    }
}

/// A file as it was committed to the blob store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedBlob {
    pub storage_name: String,
    pub original_name: String,
    pub size_bytes: u64,
    /// Uppercase extension token of `original_name`, e.g. `PDF`.
    pub extension: String,
    pub stored_at: DateTime<Utc>,
}

/// Optional text fields submitted next to an uploaded file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmittedMetadata {
    pub title: Option<String>,
    pub category: Option<String>,
    pub description: Option<String>,
    pub user_id: Option<OwnerId>,
}

#[derive(Debug, Clone)]
pub struct DescriptorDefaults {
    pub category: String,
    pub owner: OwnerId,
}

impl Default for DescriptorDefaults {
    fn default() -> Self {
        Self {
            category: DEFAULT_CATEGORY.to_string(),
            owner: PLACEHOLDER_OWNER,
        }
    }
}

/// Describes a stored upload. This is the payload handed to the metadata
/// catalog when the document is indexed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct DocumentDescriptor {
    pub name: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub category: String,
    pub url: String,
    pub user_id: OwnerId,
    #[serde(default)]
    pub description: String,
    pub filename: String,
    pub original_name: String,
    pub size: u64,
    #[serde(with = "iso_millis")]
    #[schema(value_type = String, format = DateTime)]
    pub upload_date: DateTime<Utc>,
}

impl DocumentDescriptor {
    pub fn from_upload(
        blob: &UploadedBlob,
        url: String,
        metadata: &SubmittedMetadata,
        defaults: &DescriptorDefaults,
    ) -> Self {
        Self {
            name: non_empty(&metadata.title).unwrap_or_else(|| blob.original_name.clone()),
            doc_type: blob.extension.clone(),
            category: non_empty(&metadata.category)
                .unwrap_or_else(|| defaults.category.clone()),
            url,
            user_id: metadata
                .user_id
                .clone()
                .unwrap_or_else(|| defaults.owner.clone()),
            description: metadata.description.clone().unwrap_or_default(),
            filename: blob.storage_name.clone(),
            original_name: blob.original_name.clone(),
            size: blob.size_bytes,
            upload_date: blob.stored_at,
        }
    }
}

/// Response body of the local-profile upload endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LocalUploadDescriptor {
    pub filename: String,
    pub local_url: String,
    pub original_name: String,
    pub size: u64,
    #[serde(rename = "type")]
    pub doc_type: String,
}

impl LocalUploadDescriptor {
    pub fn from_upload(blob: &UploadedBlob, local_url: String) -> Self {
        Self {
            filename: blob.storage_name.clone(),
            local_url,
            original_name: blob.original_name.clone(),
            size: blob.size_bytes,
            doc_type: blob.extension.clone(),
        }
    }
}

/// A document reconstructed from blob store metadata alone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ListedDocument {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub doc_type: String,
    pub category: String,
    pub url: String,
    pub user_id: OwnerId,
    pub size: u64,
    #[serde(with = "iso_millis")]
    #[schema(value_type = String, format = DateTime)]
    pub upload_date: DateTime<Utc>,
}

/// A document record held by the metadata catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct CatalogDocument {
    pub id: DocumentId,
    #[serde(flatten)]
    pub descriptor: DocumentDescriptor,
}

/// Progress of a document through blob write and catalog indexing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum IndexingState {
    BlobWritten,
    CatalogPending,
    Indexed,
    Failed,
}

impl IndexingState {
    /// Whether moving from `self` to `next` is a legal step.
    pub fn can_transition_to(self, next: IndexingState) -> bool {
        use IndexingState::*;
        matches!(
            (self, next),
            (BlobWritten, CatalogPending) |
                (BlobWritten, Failed) |
                (CatalogPending, Indexed) |
                (CatalogPending, Failed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, IndexingState::Indexed | IndexingState::Failed)
    }
}

impl Display for IndexingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IndexingState::BlobWritten => "blob_written",
            IndexingState::CatalogPending => "catalog_pending",
            IndexingState::Indexed => "indexed",
            IndexingState::Failed => "failed",
        };
        f.write_str(s)
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value
        .as_ref()
        .filter(|v| !v.trim().is_empty())
        .cloned()
}

// ISO-8601 with millisecond precision, e.g. `2024-06-10T08:15:30.123Z`.
mod iso_millis {
    use chrono::{DateTime, SecondsFormat, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&dt.to_rfc3339_opts(SecondsFormat::Millis, true))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
