//! Document trait and search hits.

use crate::schema::DocumentSchema;
use serde::{de::DeserializeOwned, Serialize};

/// Trait for documents stored through a [`crate::Repository`].
///
/// Documents carry no id of their own; the engine assigns one on
/// [`crate::Repository::index_document`].
///
/// # Example
///
/// ```rust
/// use trawler_search::{Document, DocumentSchema, FieldDescriptor};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Person {
///     name: String,
///     age: u32,
/// }
///
/// impl Document for Person {
///     fn schema() -> DocumentSchema {
///         DocumentSchema::new()
///             .field(FieldDescriptor::text("name").with_keyword())
///             .field(FieldDescriptor::integer("age"))
///     }
/// }
/// ```
pub trait Document: Serialize + DeserializeOwned + Send + Sync {
    /// Field layout used to derive the index mapping.
    fn schema() -> DocumentSchema;
}

/// A document returned by a search, with its engine id.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit<T> {
    /// Engine assigned id.
    pub id: String,
    /// Decoded document source.
    pub doc: T,
}
