//! Entity model: the local representation of one remote store resource.
//!
//! An [`Entity`] is a kind plus the raw property tree the server returned,
//! optionally bound to the datastore it was fetched through. Identity is
//! the server-assigned identifier and nothing else: two entities with the
//! same id are equal no matter how their property trees differ.
//!
//! Resource kinds do not inherit behaviour from each other; each
//! [`EntityType`] declares the set of [`Capability`] flags it supports and
//! the generic client refuses operations outside that set.

use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use serde_json::Value;

use crate::error::StoreError;

/// Optional behaviour a resource kind can support.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    Tags,
    Comments,
    Sharings,
    Events,
    PartialEdit,
    Logs,
    ReUpload,
}

/// Every resource kind the store exposes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityType {
    Upload,
    StoredData,
    Configuration,
    Offering,
    Processing,
    ProcessingExecution,
    CheckExecution,
    Datastore,
    Annexe,
    Static,
    Metadata,
    Key,
}

impl EntityType {
    /// Technical name, used to derive route names (`{name}_get`, ...).
    pub fn name(&self) -> &'static str {
        match self {
            EntityType::Upload => "upload",
            EntityType::StoredData => "stored_data",
            EntityType::Configuration => "configuration",
            EntityType::Offering => "offering",
            EntityType::Processing => "processing",
            EntityType::ProcessingExecution => "processing_execution",
            EntityType::CheckExecution => "check_execution",
            EntityType::Datastore => "datastore",
            EntityType::Annexe => "annexe",
            EntityType::Static => "static",
            EntityType::Metadata => "metadata",
            EntityType::Key => "key",
        }
    }

    /// Display label for messages and the string projection.
    pub fn label(&self) -> &'static str {
        match self {
            EntityType::Upload => "Upload",
            EntityType::StoredData => "StoredData",
            EntityType::Configuration => "Configuration",
            EntityType::Offering => "Offering",
            EntityType::Processing => "Processing",
            EntityType::ProcessingExecution => "ProcessingExecution",
            EntityType::CheckExecution => "CheckExecution",
            EntityType::Datastore => "Datastore",
            EntityType::Annexe => "Annexe",
            EntityType::Static => "Static",
            EntityType::Metadata => "Metadata",
            EntityType::Key => "Key",
        }
    }

    /// Extra fields requested when listing this kind, when the server
    /// only returns a summary by default.
    pub fn list_fields(&self) -> Option<&'static str> {
        match self {
            EntityType::Upload => Some("name,type,visibility,srs,status,size"),
            EntityType::StoredData => Some("name,type,status,size,srs"),
            _ => None,
        }
    }

    /// Capabilities this kind supports.
    pub fn capabilities(&self) -> &'static [Capability] {
        use Capability::*;
        match self {
            EntityType::Upload => &[Tags, Comments, Sharings, Events, PartialEdit],
            EntityType::StoredData => &[Tags, Comments, Sharings, Events, PartialEdit],
            EntityType::Configuration => &[Tags, Comments, Events, PartialEdit],
            EntityType::ProcessingExecution => &[Logs],
            EntityType::CheckExecution => &[Logs],
            EntityType::Annexe => &[PartialEdit, ReUpload],
            EntityType::Static => &[PartialEdit, ReUpload],
            EntityType::Metadata => &[ReUpload],
            EntityType::Key => &[PartialEdit],
            _ => &[],
        }
    }

    pub fn supports(&self, capability: Capability) -> bool {
        self.capabilities().contains(&capability)
    }

    /// All kinds, in CLI listing order.
    pub fn all() -> &'static [EntityType] {
        &[
            EntityType::Upload,
            EntityType::StoredData,
            EntityType::Configuration,
            EntityType::Offering,
            EntityType::Processing,
            EntityType::ProcessingExecution,
            EntityType::CheckExecution,
            EntityType::Datastore,
            EntityType::Annexe,
            EntityType::Static,
            EntityType::Metadata,
            EntityType::Key,
        ]
    }
}

impl FromStr for EntityType {
    type Err = StoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        EntityType::all()
            .iter()
            .find(|kind| kind.name() == value)
            .copied()
            .ok_or_else(|| {
                StoreError::Unsupported(format!(
                    "unknown entity type '{value}', expected one of: {}",
                    EntityType::all()
                        .iter()
                        .map(|k| k.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            })
    }
}

/// Local representation of one remote resource instance.
#[derive(Debug, Clone)]
pub struct Entity {
    kind: EntityType,
    properties: Value,
    datastore: Option<String>,
}

impl Entity {
    /// Wraps a property tree as returned by the server.
    pub fn new(kind: EntityType, properties: Value, datastore: Option<String>) -> Self {
        Self {
            kind,
            properties,
            datastore,
        }
    }

    /// Wraps a bare identifier, enough to address the entity for deletion.
    pub fn from_id(kind: EntityType, id: &str, datastore: Option<String>) -> Self {
        Self::new(kind, serde_json::json!({ "_id": id }), datastore)
    }

    /// Server-assigned identifier. Empty when the property tree carries
    /// no `_id`, which only happens for malformed server payloads.
    pub fn id(&self) -> &str {
        self.properties
            .get("_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
    }

    pub fn kind(&self) -> EntityType {
        self.kind
    }

    pub fn datastore(&self) -> Option<&str> {
        self.datastore.as_deref()
    }

    /// The full property tree, exactly as the server sent it.
    pub fn properties(&self) -> &Value {
        &self.properties
    }

    /// Replaces the whole property tree. Used by refresh: stale keys
    /// absent from the new payload are dropped, never merged over.
    pub fn replace_properties(&mut self, properties: Value) {
        self.properties = properties;
    }

    /// Dotted-path lookup into the property tree; array segments may be
    /// numeric indices.
    pub fn get(&self, path: &str) -> Option<&Value> {
        json_get(&self.properties, path)
    }

    /// Dotted-path lookup rendered as a string; non-string scalars are
    /// stringified, structured values are rendered as compact JSON.
    pub fn get_str(&self, path: &str) -> Option<String> {
        match self.get(path)? {
            Value::String(s) => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    /// RFC 3339 timestamp stored at the given path, if any.
    pub fn get_datetime(&self, path: &str) -> Option<DateTime<FixedOffset>> {
        let raw = self.get(path)?.as_str()?;
        DateTime::parse_from_rfc3339(raw).ok()
    }

    /// Projection of selected properties, for table-style display.
    pub fn store_properties(&self, keeps: &[&str]) -> HashMap<String, String> {
        keeps
            .iter()
            .map(|key| (key.to_string(), self.get_str(key).unwrap_or_default()))
            .collect()
    }

    /// Properties serialized as JSON, optionally indented.
    pub fn to_json(&self, indent: bool) -> String {
        let rendered = if indent {
            serde_json::to_string_pretty(&self.properties)
        } else {
            serde_json::to_string(&self.properties)
        };
        rendered.unwrap_or_else(|_| "{}".to_string())
    }
}

// Identity is identifier-based, not value-based: this is what lets the
// cascade delete engine deduplicate candidates in a set.
impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Entity {}

impl Hash for Entity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

impl fmt::Display for Entity {
    /// Diagnostic projection: identifier plus a few well-known display
    /// attributes when present. Not a full serialization.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut infos = vec![format!("id={}", self.id())];
        for attribute in ["name", "layer_name", "technical_name"] {
            if let Some(value) = self.get_str(attribute) {
                infos.push(format!("{attribute}={value}"));
            }
        }
        write!(f, "{}({})", self.kind.label(), infos.join(", "))
    }
}

/// Dotted-path lookup into a JSON value; array segments may be numeric
/// indices.
pub fn json_get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.').try_fold(value, |node, segment| match node {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// Parses a `name=value,name=value` filter string into a map.
///
/// Spaces around names and values are trimmed. A token without exactly
/// one `=` is a [`StoreError::FilterFormat`].
pub fn filter_dict_from_str(filters: Option<&str>) -> Result<HashMap<String, String>, StoreError> {
    let mut parsed = HashMap::new();
    let Some(filters) = filters else {
        return Ok(parsed);
    };
    if filters.trim().is_empty() {
        return Ok(parsed);
    }
    for token in filters.split(',') {
        let parts: Vec<&str> = token.split('=').collect();
        if parts.len() != 2 {
            return Err(StoreError::FilterFormat(token.to_string()));
        }
        parsed.insert(parts[0].trim().to_string(), parts[1].trim().to_string());
    }
    Ok(parsed)
}
