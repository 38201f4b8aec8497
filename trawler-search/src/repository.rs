//! Typed document repository.

use crate::{
    config::SearchConfig,
    document::Document,
    error::{Result, SearchError},
    index::{AliasManager, IndexBootstrapper, IndexDescriptor},
    query::Query,
    scroll::{PageRequest, ResultSet, ScrollPaginator},
    session::{Session, SessionFactory},
    transport::{rejected, EngineRequest, EngineResponse},
};
use serde::Serialize;
use serde_json::{json, Value};
use std::marker::PhantomData;
use trawler_log::{debug, info};

const DOCUMENT_MISSING: &str = "document_missing_exception";

/// Store and retrieve documents of one type.
///
/// Writes by engine id go to the alias for new documents and to the concrete
/// index for everything else; all of them wait for a refresh so the next
/// search sees them. Cheap to clone.
///
/// # Example
///
/// ```rust,no_run
/// use trawler_search::{Document, DocumentSchema, FieldDescriptor, PageRequest, Repository, SearchConfig};
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
///
/// # async fn run() -> trawler_search::Result<()> {
/// let config = SearchConfig::new("http://localhost:9200", "people-v1").with_alias("people");
/// let people = Repository::<Person>::connect(&config).await?;
///
/// let id = people.index_document(&Person { name: "Jane".into(), age: 30 }).await?;
/// let jane = people.get_document_by_id(&id).await?;
/// let everyone = people.search(&PageRequest::default()).await?;
/// # Ok(())
/// # }
/// ```
pub struct Repository<T> {
    session: Session,
    descriptor: IndexDescriptor,
    paginator: ScrollPaginator<T>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Repository<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            descriptor: self.descriptor.clone(),
            paginator: self.paginator.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for Repository<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl<T: Document> Repository<T> {
    /// Open a session from `config` and bootstrap the configured index.
    pub async fn connect(config: &SearchConfig) -> Result<Self> {
        let session = SessionFactory::build(config)?;
        Self::with_descriptor(session, IndexDescriptor::from_config(config)).await
    }

    /// Bootstrap `index` (bound to `alias`, if given) over an existing session.
    ///
    /// Shard and replica counts come from the session's configuration.
    pub async fn open(session: Session, index: &str, alias: Option<&str>) -> Result<Self> {
        let descriptor = IndexDescriptor::new(index, alias).with_topology(
            session.config().number_of_shards,
            session.config().number_of_replicas,
        );
        Self::with_descriptor(session, descriptor).await
    }

    /// Bootstrap `descriptor` and return a repository over it.
    ///
    /// Fails without returning a repository if bootstrap fails.
    pub async fn with_descriptor(session: Session, descriptor: IndexDescriptor) -> Result<Self> {
        IndexBootstrapper::new(session.clone())
            .ensure(&descriptor, &T::schema())
            .await?;

        info!(
            "Repository ready on {} (alias {})",
            descriptor.index_name(),
            descriptor.alias_name()
        );

        let paginator = ScrollPaginator::new(session.clone(), descriptor.alias_name());
        Ok(Self {
            session,
            descriptor,
            paginator,
            _marker: PhantomData,
        })
    }

    /// Where documents live.
    pub fn descriptor(&self) -> &IndexDescriptor {
        &self.descriptor
    }

    /// The session requests go through.
    pub fn session(&self) -> &Session {
        &self.session
    }

    /// Alias and index administration.
    pub fn aliases(&self) -> AliasManager {
        self.session.aliases()
    }

    fn index(&self) -> String {
        self.descriptor.index_name().to_string()
    }

    fn not_found(&self, request: &EngineRequest, response: &EngineResponse, id: &str) -> SearchError {
        debug!("{} found nothing: {}", request.endpoint(), response.body);
        SearchError::NotFound {
            index: self.index(),
            id: id.to_string(),
        }
    }

    /// Store `doc` under an engine generated id, returned.
    pub async fn index_document(&self, doc: &T) -> Result<String> {
        let alias = self.descriptor.alias_name();
        debug!("Indexing document through {}", alias);

        let request = EngineRequest::IndexDocument {
            index: alias.to_string(),
            body: serde_json::to_value(doc)?,
        };
        let response = self.session.send(&request).await?;

        if !response.is_success() {
            return Err(rejected(&request, response));
        }

        match response.body["_id"].as_str() {
            Some(id) => Ok(id.to_string()),
            None => Err(SearchError::ServerResponse {
                endpoint: request.endpoint(),
                status: response.status,
                reason: "response carries no _id".to_string(),
                payload: Some(response.body),
            }),
        }
    }

    /// Fetch a document by id.
    pub async fn get_document_by_id(&self, id: &str) -> Result<T> {
        debug!("Getting document {} from index {}", id, self.descriptor.index_name());

        let request = EngineRequest::GetDocument {
            index: self.index(),
            id: id.to_string(),
        };
        let response = self.session.send(&request).await?;

        if response.is_not_found() && response.error_type().is_none() {
            return Err(self.not_found(&request, &response, id));
        }
        if !response.is_success() {
            return Err(rejected(&request, response));
        }

        let source = response
            .body
            .get("_source")
            .cloned()
            .ok_or_else(|| SearchError::ServerResponse {
                endpoint: request.endpoint(),
                status: response.status,
                reason: "response carries no _source".to_string(),
                payload: Some(response.body.clone()),
            })?;

        Ok(serde_json::from_value(source)?)
    }

    /// Check whether a document exists.
    pub async fn document_exists(&self, id: &str) -> Result<bool> {
        match self.get_document_by_id(id).await {
            Ok(_) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Merge `partial` into an existing document.
    pub async fn update_document<P>(&self, id: &str, partial: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        debug!("Updating document {} in index {}", id, self.descriptor.index_name());
        let body = json!({ "doc": serde_json::to_value(partial)? });
        self.update(id, body).await
    }

    /// Merge `partial` into a document, creating it from `partial` when absent.
    pub async fn upsert_document<P>(&self, id: &str, partial: &P) -> Result<()>
    where
        P: Serialize + ?Sized,
    {
        debug!("Upserting document {} in index {}", id, self.descriptor.index_name());
        let body = json!({ "doc": serde_json::to_value(partial)?, "doc_as_upsert": true });
        self.update(id, body).await
    }

    async fn update(&self, id: &str, body: Value) -> Result<()> {
        let request = EngineRequest::UpdateDocument {
            index: self.index(),
            id: id.to_string(),
            body,
        };
        let response = self.session.send(&request).await?;

        if response.is_not_found() && response.error_type() == Some(DOCUMENT_MISSING) {
            return Err(self.not_found(&request, &response, id));
        }
        if !response.is_success() {
            return Err(rejected(&request, response));
        }

        Ok(())
    }

    /// Delete a document. A missing id is an error.
    pub async fn delete_document(&self, id: &str) -> Result<()> {
        debug!("Deleting document {} from index {}", id, self.descriptor.index_name());

        let request = EngineRequest::DeleteDocument {
            index: self.index(),
            id: id.to_string(),
        };
        let response = self.session.send(&request).await?;

        if response.is_not_found() && response.body["result"] == "not_found" {
            return Err(self.not_found(&request, &response, id));
        }
        if !response.is_success() {
            return Err(rejected(&request, response));
        }

        Ok(())
    }

    /// Count documents matching `query`.
    pub async fn count(&self, query: &Query) -> Result<u64> {
        let request = EngineRequest::Count {
            index: self.descriptor.alias_name().to_string(),
            body: json!({ "query": query.to_json() }),
        };
        let response = self.session.send(&request).await?;

        if !response.is_success() {
            return Err(rejected(&request, response));
        }

        Ok(response.body["count"].as_u64().unwrap_or(0))
    }

    /// Make every write so far visible to search.
    pub async fn refresh(&self) -> Result<()> {
        let request = EngineRequest::Refresh {
            index: self.descriptor.alias_name().to_string(),
        };
        let response = self.session.send(&request).await?;

        if !response.is_success() {
            return Err(rejected(&request, response));
        }

        Ok(())
    }

    /// Every match of `request` after its page offset, in engine order.
    pub async fn search(&self, request: &PageRequest) -> Result<ResultSet<T>> {
        self.paginator.search(request).await
    }
}
