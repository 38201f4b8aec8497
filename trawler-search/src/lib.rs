//! Typed document storage and exhaustive retrieval over an
//! OpenSearch/Elasticsearch compatible cluster.
//!
//! This crate provides:
//! - Index bootstrap from a document schema, bound behind a stable alias
//! - Typed document CRUD with read-after-write visibility
//! - Scroll-driven search that returns every match and always releases its cursor
//! - An in-memory engine for tests and local development
//!
//! # Example
//!
//! ```rust,no_run
//! use trawler_search::prelude::*;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Serialize, Deserialize)]
//! struct Person {
//!     name: String,
//!     age: u32,
//! }
//!
//! impl Document for Person {
//!     fn schema() -> DocumentSchema {
//!         DocumentSchema::new()
//!             .field(FieldDescriptor::text("name").with_keyword())
//!             .field(FieldDescriptor::integer("age"))
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
//!     let config = SearchConfig::from_env()?;
//!     let people = Repository::<Person>::connect(&config).await?;
//!
//!     people.index_document(&Person { name: "Jane".to_string(), age: 30 }).await?;
//!
//!     let oldest_first = PageRequest::new(Query::match_all())
//!         .with_sort(Sort::new().by("age", SortOrder::Desc))
//!         .with_page_size(100);
//!
//!     for hit in people.search(&oldest_first).await? {
//!         println!("{} {:?}", hit.id, hit.doc);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod config;
mod document;
mod error;
mod index;
mod memory;
mod observer;
mod pool;
mod query;
mod repository;
mod schema;
mod scroll;
mod session;
mod transport;

pub use config::{SearchConfig, TlsConfig, ENV_PREFIX};
pub use document::{Document, Hit};
pub use error::{Result, SearchError};
pub use index::{AliasManager, IndexBootstrapper, IndexDescriptor};
pub use memory::MemoryTransport;
pub use observer::{LoggingObserver, NoopObserver, RequestObserver};
pub use pool::RoundRobinConnectionPool;
pub use query::{
    Aggregation, AggregationResult, Aggregations, BoolQuery, BoolQueryBuilder, ExistsQuery,
    MatchQuery, Query, RangeQuery, Sort, SortField, SortOrder, TermQuery, TermsQuery,
};
pub use repository::Repository;
pub use schema::{DocumentSchema, FieldDescriptor, FieldType, Mapping, MappingField, KEYWORD_SUBFIELD};
pub use scroll::{
    ttl_param, PageRequest, ResultSet, ScrollCursor, ScrollPaginator, DEFAULT_CURSOR_TTL,
    DEFAULT_PAGE_SIZE,
};
pub use session::{Session, SessionFactory};
pub use transport::{EngineRequest, EngineResponse, OpenSearchTransport, RequestKind, Transport};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        Aggregation, Aggregations, Document, DocumentSchema, FieldDescriptor, PageRequest, Query,
        Repository, Result, ResultSet, SearchConfig, SearchError, Session, SessionFactory, Sort,
        SortOrder,
    };
}
