//! Document schemas and the index mappings derived from them.

use crate::error::{Result, SearchError};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;

/// Name of the exact-match sub-field added to keyword-enabled text fields.
pub const KEYWORD_SUBFIELD: &str = "keyword";

/// Ordered field list describing a document type.
///
/// # Example
///
/// ```rust
/// use trawler_search::{DocumentSchema, FieldDescriptor};
///
/// let schema = DocumentSchema::new()
///     .field(FieldDescriptor::text("name").with_keyword())
///     .field(FieldDescriptor::integer("age"));
///
/// let mapping = schema.to_mapping("people").unwrap();
/// assert_eq!(mapping["properties"]["name"]["fields"]["keyword"]["type"], "keyword");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DocumentSchema {
    fields: Vec<FieldDescriptor>,
    dynamic: Option<String>,
}

impl DocumentSchema {
    /// Create an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a field.
    pub fn field(mut self, field: FieldDescriptor) -> Self {
        self.fields.push(field);
        self
    }

    /// Set the mapping's `dynamic` policy (`true`, `false`, `strict`).
    pub fn dynamic(mut self, dynamic: impl Into<String>) -> Self {
        self.dynamic = Some(dynamic.into());
        self
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    /// Derive the mapping body for `index`.
    ///
    /// Fails with [`SearchError::Mapping`] on empty or duplicate field names,
    /// or a keyword sub-field requested on a non-text field.
    pub fn to_mapping(&self, index: &str) -> Result<Value> {
        let invalid = |reason: String| SearchError::Mapping {
            index: index.to_string(),
            reason,
        };

        let mut seen = HashSet::new();
        let mut mapping = Mapping::new();

        for descriptor in &self.fields {
            if descriptor.name.trim().is_empty() {
                return Err(invalid("field name must not be empty".to_string()));
            }
            if !seen.insert(descriptor.name.as_str()) {
                return Err(invalid(format!("duplicate field '{}'", descriptor.name)));
            }
            if descriptor.keyword && descriptor.field_type != FieldType::Text {
                return Err(invalid(format!(
                    "keyword sub-field requires a text field, '{}' is {}",
                    descriptor.name,
                    descriptor.field_type.as_str()
                )));
            }

            let mut field = MappingField::new(descriptor.field_type);
            if descriptor.keyword {
                field = field.sub_field(KEYWORD_SUBFIELD, MappingField::new(FieldType::Keyword));
            }
            mapping = mapping.field(descriptor.name.clone(), field);
        }

        if let Some(dynamic) = &self.dynamic {
            mapping = mapping.dynamic(dynamic.clone());
        }

        Ok(mapping.to_json())
    }
}

/// One field of a [`DocumentSchema`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    /// Field name in the document source.
    pub name: String,
    /// Engine field type.
    pub field_type: FieldType,
    /// Add an exact-match `keyword` sub-field (text fields only).
    pub keyword: bool,
}

impl FieldDescriptor {
    /// Create a field of any type.
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            keyword: false,
        }
    }

    /// Full-text field.
    pub fn text(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Text)
    }

    /// Exact-match field.
    pub fn keyword(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Keyword)
    }

    /// 32-bit integer field.
    pub fn integer(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Integer)
    }

    /// 64-bit integer field.
    pub fn long(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Long)
    }

    /// Double field.
    pub fn double(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Double)
    }

    /// Boolean field.
    pub fn boolean(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Boolean)
    }

    /// Date field.
    pub fn date(name: impl Into<String>) -> Self {
        Self::new(name, FieldType::Date)
    }

    /// Add a `keyword` sub-field, making a text field filterable and aggregatable.
    pub fn with_keyword(mut self) -> Self {
        self.keyword = true;
        self
    }
}

/// Field mapping configuration.
#[derive(Debug, Clone, Default)]
pub struct Mapping {
    /// Field definitions.
    pub properties: Map<String, Value>,
    /// Dynamic mapping setting.
    pub dynamic: Option<String>,
}

impl Mapping {
    /// Create a new mapping.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field.
    pub fn field(mut self, name: impl Into<String>, field: MappingField) -> Self {
        self.properties.insert(name.into(), field.to_json());
        self
    }

    /// Set dynamic mapping.
    pub fn dynamic(mut self, dynamic: impl Into<String>) -> Self {
        self.dynamic = Some(dynamic.into());
        self
    }

    /// Render as a `mappings` body.
    pub fn to_json(&self) -> Value {
        let mut mapping = Map::new();

        if let Some(dynamic) = &self.dynamic {
            mapping.insert("dynamic".to_string(), json!(dynamic));
        }
        mapping.insert(
            "properties".to_string(),
            Value::Object(self.properties.clone()),
        );

        Value::Object(mapping)
    }
}

/// Field mapping definition.
#[derive(Debug, Clone)]
pub struct MappingField {
    /// Field type.
    pub field_type: FieldType,
    /// Multi-fields indexed from the same source value.
    pub fields: Map<String, Value>,
}

impl MappingField {
    /// Create a field of the given type.
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            fields: Map::new(),
        }
    }

    /// Add a multi-field.
    pub fn sub_field(mut self, name: impl Into<String>, field: MappingField) -> Self {
        self.fields.insert(name.into(), field.to_json());
        self
    }

    fn to_json(&self) -> Value {
        let mut field = Map::new();
        field.insert("type".to_string(), json!(self.field_type.as_str()));
        if !self.fields.is_empty() {
            field.insert("fields".to_string(), Value::Object(self.fields.clone()));
        }
        Value::Object(field)
    }
}

/// Field types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    /// Full-text searchable field.
    Text,
    /// Exact match keyword field.
    Keyword,
    /// 64-bit integer.
    Long,
    /// 32-bit integer.
    Integer,
    /// 16-bit integer.
    Short,
    /// Double precision float.
    Double,
    /// Single precision float.
    Float,
    /// Boolean.
    Boolean,
    /// Date.
    Date,
    /// Object.
    Object,
    /// Nested.
    Nested,
    /// Geo point.
    GeoPoint,
    /// IP address.
    Ip,
}

impl FieldType {
    /// Engine type name.
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldType::Text => "text",
            FieldType::Keyword => "keyword",
            FieldType::Long => "long",
            FieldType::Integer => "integer",
            FieldType::Short => "short",
            FieldType::Double => "double",
            FieldType::Float => "float",
            FieldType::Boolean => "boolean",
            FieldType::Date => "date",
            FieldType::Object => "object",
            FieldType::Nested => "nested",
            FieldType::GeoPoint => "geo_point",
            FieldType::Ip => "ip",
        }
    }
}
