//! Index bootstrap and alias management.

use crate::{
    config::SearchConfig,
    error::{Result, SearchError},
    schema::DocumentSchema,
    session::Session,
    transport::{log_rejection, rejected, EngineRequest},
};
use serde_json::{json, Value};
use trawler_log::{debug, error, info};

const ALREADY_EXISTS: &str = "resource_already_exists_exception";
const MAPPER_PARSING: &str = "mapper_parsing_exception";

/// Where a document type lives: a concrete index and the alias it is read
/// and written through.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexDescriptor {
    index_name: String,
    alias_name: String,
    shard_count: u32,
    replica_count: u32,
}

impl IndexDescriptor {
    /// Describe `index_name`, bound to `alias_name` or to itself when no alias is given.
    pub fn new(index_name: impl Into<String>, alias_name: Option<&str>) -> Self {
        let index_name = index_name.into();
        let alias_name = alias_name
            .map(str::to_string)
            .unwrap_or_else(|| index_name.clone());

        Self {
            index_name,
            alias_name,
            shard_count: 1,
            replica_count: 0,
        }
    }

    /// Descriptor for the index, alias and topology in `config`.
    pub fn from_config(config: &SearchConfig) -> Self {
        Self::new(&config.index_name, config.alias_name.as_deref())
            .with_topology(config.number_of_shards, config.number_of_replicas)
    }

    /// Set shard and replica counts used at creation.
    pub fn with_topology(mut self, shards: u32, replicas: u32) -> Self {
        self.shard_count = shards;
        self.replica_count = replicas;
        self
    }

    /// Concrete index name.
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Alias name.
    pub fn alias_name(&self) -> &str {
        &self.alias_name
    }

    /// Primary shard count.
    pub fn shard_count(&self) -> u32 {
        self.shard_count
    }

    /// Replica count.
    pub fn replica_count(&self) -> u32 {
        self.replica_count
    }

    /// True when the alias differs from the index and must be bound.
    pub fn has_alias(&self) -> bool {
        self.alias_name != self.index_name
    }

    fn create_body(&self, mappings: Value) -> Value {
        json!({
            "settings": {
                "number_of_shards": self.shard_count,
                "number_of_replicas": self.replica_count,
            },
            "mappings": mappings,
        })
    }
}

/// Creates an index and binds its alias if they do not already exist.
#[derive(Debug, Clone)]
pub struct IndexBootstrapper {
    session: Session,
}

impl IndexBootstrapper {
    /// Create a bootstrapper over `session`.
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Make sure the index described by `descriptor` exists with a mapping
    /// derived from `schema`, and that its alias is bound.
    ///
    /// Idempotent. An existing index is left untouched, mapping included. An
    /// alias already bound to a different index is an [`SearchError::Alias`]:
    /// binding it a second time would leave it without a single write index.
    pub async fn ensure(&self, descriptor: &IndexDescriptor, schema: &DocumentSchema) -> Result<()> {
        let mappings = schema.to_mapping(descriptor.index_name())?;
        let aliases = self.session.aliases();

        let needs_alias = if descriptor.has_alias() {
            self.alias_unbound(&aliases, descriptor).await?
        } else {
            false
        };

        if aliases.index_exists(descriptor.index_name()).await? {
            debug!("Index {} already exists", descriptor.index_name());
        } else {
            self.create(descriptor, mappings).await?;
        }

        if needs_alias {
            aliases
                .create_alias(descriptor.alias_name(), descriptor.index_name())
                .await?;
        }

        Ok(())
    }

    /// True when the alias still has to be bound; an error when it already
    /// points somewhere else.
    async fn alias_unbound(&self, aliases: &AliasManager, descriptor: &IndexDescriptor) -> Result<bool> {
        let (alias, index) = (descriptor.alias_name(), descriptor.index_name());
        let bound = aliases.bound_indices(alias).await?;

        if bound.iter().any(|name| name == index) {
            debug!("Alias {} already bound to {}", alias, index);
            return Ok(false);
        }
        if !bound.is_empty() {
            let reason = format!("alias is already bound to {}", bound.join(", "));
            error!("Refusing to bind alias {} to {}: {}", alias, index, reason);
            return Err(SearchError::Alias {
                alias: alias.to_string(),
                index: index.to_string(),
                reason,
            });
        }

        Ok(true)
    }

    async fn create(&self, descriptor: &IndexDescriptor, mappings: Value) -> Result<()> {
        let index = descriptor.index_name();
        info!(
            "Creating index {} ({} shards, {} replicas)",
            index,
            descriptor.shard_count(),
            descriptor.replica_count()
        );

        let request = EngineRequest::CreateIndex {
            index: index.to_string(),
            body: descriptor.create_body(mappings),
        };
        let response = self.session.send(&request).await?;

        if response.is_success() {
            return Ok(());
        }

        match response.error_type() {
            Some(ALREADY_EXISTS) => {
                debug!("Index {} was created concurrently", index);
                Ok(())
            }
            Some(MAPPER_PARSING) => {
                log_rejection(&request, &response);
                Err(SearchError::Mapping {
                    index: index.to_string(),
                    reason: response.error_reason(),
                })
            }
            _ => {
                log_rejection(&request, &response);
                Err(SearchError::IndexCreation {
                    index: index.to_string(),
                    reason: response.error_reason(),
                })
            }
        }
    }
}

/// Alias and index administration.
///
/// Every call is a round trip; nothing about alias state is cached.
#[derive(Debug, Clone)]
pub struct AliasManager {
    session: Session,
}

impl AliasManager {
    /// Create an alias manager over `session`.
    pub fn new(session: Session) -> Self {
        Self { session }
    }

    /// Bind `alias` to `index`.
    pub async fn create_alias(&self, alias: &str, index: &str) -> Result<()> {
        info!("Creating alias {} for index {}", alias, index);

        let request = EngineRequest::PutAlias {
            index: index.to_string(),
            alias: alias.to_string(),
        };
        let response = self.session.send(&request).await?;

        if !response.is_success() {
            log_rejection(&request, &response);
            return Err(SearchError::Alias {
                alias: alias.to_string(),
                index: index.to_string(),
                reason: response.error_reason(),
            });
        }

        Ok(())
    }

    /// Unbind `alias` from `index`.
    pub async fn delete_alias(&self, alias: &str, index: &str) -> Result<()> {
        info!("Deleting alias {} from index {}", alias, index);

        let request = EngineRequest::DeleteAlias {
            index: index.to_string(),
            alias: alias.to_string(),
        };
        let response = self.session.send(&request).await?;

        if !response.is_success() {
            log_rejection(&request, &response);
            return Err(SearchError::Alias {
                alias: alias.to_string(),
                index: index.to_string(),
                reason: response.error_reason(),
            });
        }

        Ok(())
    }

    /// Delete `index` together with every alias bound to it.
    ///
    /// A missing index is an error.
    pub async fn delete_index(&self, index: &str) -> Result<()> {
        info!("Deleting index: {}", index);

        let request = EngineRequest::DeleteIndex {
            index: index.to_string(),
        };
        let response = self.session.send(&request).await?;

        if !response.is_success() {
            log_rejection(&request, &response);
            return Err(SearchError::IndexCreation {
                index: index.to_string(),
                reason: response.error_reason(),
            });
        }

        Ok(())
    }

    /// Check whether `alias` is bound to `index`.
    pub async fn alias_exists(&self, alias: &str, index: &str) -> Result<bool> {
        debug!("Checking if alias {} is bound to {}", alias, index);

        let request = EngineRequest::AliasExists {
            index: index.to_string(),
            alias: alias.to_string(),
        };
        self.check_exists(&request).await
    }

    /// Indices `alias` is currently bound to, sorted; empty when unbound.
    pub async fn bound_indices(&self, alias: &str) -> Result<Vec<String>> {
        debug!("Looking up indices behind alias {}", alias);

        let request = EngineRequest::GetAlias {
            alias: alias.to_string(),
        };
        let response = self.session.send(&request).await?;

        if response.is_not_found() {
            return Ok(Vec::new());
        }
        if !response.is_success() {
            return Err(rejected(&request, response));
        }

        let mut indices: Vec<String> = response
            .body
            .as_object()
            .map(|listing| listing.keys().cloned().collect())
            .unwrap_or_default();
        indices.sort();
        Ok(indices)
    }

    /// Check whether `index` exists.
    pub async fn index_exists(&self, index: &str) -> Result<bool> {
        debug!("Checking if index exists: {}", index);

        let request = EngineRequest::IndexExists {
            index: index.to_string(),
        };
        self.check_exists(&request).await
    }

    async fn check_exists(&self, request: &EngineRequest) -> Result<bool> {
        let response = self.session.send(request).await?;

        match response.status {
            200..=299 => Ok(true),
            404 => Ok(false),
            _ => Err(rejected(request, response)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryTransport;
    use crate::schema::FieldDescriptor;
    use crate::transport::{EngineResponse, RequestKind};

    fn schema() -> DocumentSchema {
        DocumentSchema::new()
            .field(FieldDescriptor::text("name").with_keyword())
            .field(FieldDescriptor::integer("age"))
    }

    fn session(transport: &MemoryTransport) -> Session {
        Session::with_transport(
            transport.clone(),
            SearchConfig::new("http://localhost:9200", "people-v1"),
        )
    }

    #[test]
    fn test_descriptor_defaults_alias_to_index() {
        let descriptor = IndexDescriptor::new("people", None);
        assert_eq!(descriptor.alias_name(), "people");
        assert!(!descriptor.has_alias());

        let descriptor = IndexDescriptor::new("people-v1", Some("people"));
        assert!(descriptor.has_alias());
    }

    #[test]
    fn test_descriptor_from_config() {
        let config = SearchConfig::new("http://localhost:9200", "people-v1")
            .with_alias("people")
            .with_topology(3, 2);
        let descriptor = IndexDescriptor::from_config(&config);

        assert_eq!(descriptor.alias_name(), "people");
        assert_eq!(descriptor.shard_count(), 3);
        assert_eq!(descriptor.replica_count(), 2);
    }

    #[tokio::test]
    async fn test_ensure_creates_index_and_alias() {
        let transport = MemoryTransport::new();
        let session = session(&transport);
        let descriptor = IndexDescriptor::new("people-v1", Some("people")).with_topology(2, 1);

        IndexBootstrapper::new(session.clone())
            .ensure(&descriptor, &schema())
            .await
            .unwrap();

        let aliases = session.aliases();
        assert!(aliases.index_exists("people-v1").await.unwrap());
        assert!(aliases.alias_exists("people", "people-v1").await.unwrap());

        let create = transport
            .requests()
            .await
            .into_iter()
            .find(|r| r.kind() == RequestKind::CreateIndex)
            .unwrap();
        match create {
            EngineRequest::CreateIndex { body, .. } => {
                assert_eq!(body["settings"]["number_of_shards"], 2);
                assert_eq!(body["settings"]["number_of_replicas"], 1);
                assert_eq!(body["mappings"]["properties"]["age"]["type"], "integer");
            }
            other => panic!("unexpected request: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent() {
        let transport = MemoryTransport::new();
        let bootstrapper = IndexBootstrapper::new(session(&transport));
        let descriptor = IndexDescriptor::new("people-v1", Some("people"));

        bootstrapper.ensure(&descriptor, &schema()).await.unwrap();
        bootstrapper.ensure(&descriptor, &schema()).await.unwrap();

        assert_eq!(transport.count_of(RequestKind::CreateIndex).await, 1);
        assert_eq!(transport.count_of(RequestKind::PutAlias).await, 1);
    }

    #[tokio::test]
    async fn test_ensure_without_alias_skips_alias_calls() {
        let transport = MemoryTransport::new();
        IndexBootstrapper::new(session(&transport))
            .ensure(&IndexDescriptor::new("people", None), &schema())
            .await
            .unwrap();

        assert_eq!(transport.count_of(RequestKind::GetAlias).await, 0);
        assert_eq!(transport.count_of(RequestKind::PutAlias).await, 0);
    }

    #[tokio::test]
    async fn test_alias_bound_elsewhere_is_not_rebound() {
        let transport = MemoryTransport::new();
        let session = session(&transport);
        let bootstrapper = IndexBootstrapper::new(session.clone());

        bootstrapper
            .ensure(&IndexDescriptor::new("items-v1", Some("items")), &schema())
            .await
            .unwrap();
        let err = bootstrapper
            .ensure(&IndexDescriptor::new("items-v2", Some("items")), &schema())
            .await
            .unwrap_err();

        match err {
            SearchError::Alias { alias, index, reason } => {
                assert_eq!(alias, "items");
                assert_eq!(index, "items-v2");
                assert!(reason.contains("items-v1"));
            }
            other => panic!("unexpected error: {other:?}"),
        }

        let aliases = session.aliases();
        assert_eq!(aliases.bound_indices("items").await.unwrap(), vec!["items-v1"]);
        assert!(!aliases.index_exists("items-v2").await.unwrap());
        assert_eq!(transport.count_of(RequestKind::PutAlias).await, 1);

        // the first index keeps accepting writes through the alias
        let write = session
            .send(&EngineRequest::IndexDocument {
                index: "items".into(),
                body: json!({ "name": "kept" }),
            })
            .await
            .unwrap();
        assert!(write.is_success());
    }

    #[tokio::test]
    async fn test_bound_indices_of_unbound_alias_is_empty() {
        let transport = MemoryTransport::new();
        let aliases = session(&transport).aliases();
        assert!(aliases.bound_indices("nobody").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_creation_counts_as_success() {
        let transport = MemoryTransport::new();
        transport
            .reject_nth(
                RequestKind::CreateIndex,
                1,
                EngineResponse::new(
                    400,
                    json!({ "error": { "type": ALREADY_EXISTS, "reason": "index [people] already exists" } }),
                ),
            )
            .await;

        let result = IndexBootstrapper::new(session(&transport))
            .ensure(&IndexDescriptor::new("people", None), &schema())
            .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_mapper_parsing_maps_to_mapping_error() {
        let transport = MemoryTransport::new();
        transport
            .reject_nth(
                RequestKind::CreateIndex,
                1,
                EngineResponse::new(
                    400,
                    json!({ "error": { "type": MAPPER_PARSING, "reason": "no handler for type" } }),
                ),
            )
            .await;

        let err = IndexBootstrapper::new(session(&transport))
            .ensure(&IndexDescriptor::new("people", None), &schema())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Mapping { .. }));
    }

    #[tokio::test]
    async fn test_other_rejection_maps_to_index_creation_error() {
        let transport = MemoryTransport::new();
        transport
            .reject_nth(
                RequestKind::CreateIndex,
                1,
                EngineResponse::new(
                    403,
                    json!({ "error": { "type": "security_exception", "reason": "forbidden" } }),
                ),
            )
            .await;

        let err = IndexBootstrapper::new(session(&transport))
            .ensure(&IndexDescriptor::new("people", None), &schema())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::IndexCreation { .. }));
    }

    #[tokio::test]
    async fn test_invalid_schema_sends_nothing() {
        let transport = MemoryTransport::new();
        let schema = schema().field(FieldDescriptor::integer("age"));

        let err = IndexBootstrapper::new(session(&transport))
            .ensure(&IndexDescriptor::new("people", None), &schema)
            .await
            .unwrap_err();

        assert!(matches!(err, SearchError::Mapping { .. }));
        assert!(transport.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_alias_rejection() {
        let transport = MemoryTransport::new();
        let aliases = session(&transport).aliases();

        let err = aliases.create_alias("people", "missing").await.unwrap_err();
        assert!(matches!(err, SearchError::Alias { .. }));
    }

    #[tokio::test]
    async fn test_delete_index_removes_aliases() {
        let transport = MemoryTransport::new();
        let session = session(&transport);
        IndexBootstrapper::new(session.clone())
            .ensure(&IndexDescriptor::new("people-v1", Some("people")), &schema())
            .await
            .unwrap();

        let aliases = session.aliases();
        aliases.delete_index("people-v1").await.unwrap();

        assert!(!aliases.index_exists("people-v1").await.unwrap());
        assert!(!aliases.alias_exists("people", "people-v1").await.unwrap());
    }

    #[tokio::test]
    async fn test_delete_missing_index_fails() {
        let transport = MemoryTransport::new();
        let err = session(&transport)
            .aliases()
            .delete_index("missing")
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::IndexCreation { .. }));
    }

    #[tokio::test]
    async fn test_delete_alias() {
        let transport = MemoryTransport::new();
        let session = session(&transport);
        IndexBootstrapper::new(session.clone())
            .ensure(&IndexDescriptor::new("people-v1", Some("people")), &schema())
            .await
            .unwrap();

        let aliases = session.aliases();
        aliases.delete_alias("people", "people-v1").await.unwrap();
        assert!(!aliases.alias_exists("people", "people-v1").await.unwrap());
        assert!(aliases.delete_alias("people", "people-v1").await.is_err());
    }
}
