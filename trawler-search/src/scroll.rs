//! Exhaustive result retrieval over the scroll protocol.
//!
//! A search opens a cursor with the first request, keeps asking for the next
//! batch until one comes back empty, and releases the cursor on every exit
//! path. The engine refuses `from` inside a scroll context, so the page
//! offset is applied while draining: the first `offset` hits are dropped and
//! every match after them is returned.

use crate::{
    document::{Document, Hit},
    error::{Result, SearchError},
    query::{AggregationResult, Aggregations, Query, Sort},
    session::Session,
    transport::{rejected, EngineRequest, EngineResponse},
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;
use trawler_log::{debug, warn};

/// Cursor keep-alive used when none is set.
pub const DEFAULT_CURSOR_TTL: Duration = Duration::from_secs(60);

/// Batch size used when none is set.
pub const DEFAULT_PAGE_SIZE: usize = 10;

/// What to search for and where to start.
#[derive(Debug, Clone, PartialEq)]
pub struct PageRequest {
    /// Query fragment.
    pub query: Query,
    /// Sort keys; empty means relevance order.
    pub sort: Sort,
    /// Aggregations, computed by the first request only.
    pub aggregations: Option<Aggregations>,
    /// Hits per round trip.
    pub page_size: usize,
    /// Pages to skip before the first returned hit.
    pub page_index: usize,
    /// How long the engine keeps the cursor between round trips.
    pub cursor_ttl: Duration,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(Query::MatchAll)
    }
}

impl PageRequest {
    /// Search for `query` from the first hit.
    pub fn new(query: Query) -> Self {
        Self {
            query,
            sort: Sort::new(),
            aggregations: None,
            page_size: DEFAULT_PAGE_SIZE,
            page_index: 0,
            cursor_ttl: DEFAULT_CURSOR_TTL,
        }
    }

    /// Set sort keys.
    pub fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    /// Attach aggregations.
    pub fn with_aggregations(mut self, aggregations: Aggregations) -> Self {
        self.aggregations = Some(aggregations);
        self
    }

    /// Set hits per round trip.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set how many pages to skip.
    pub fn with_page_index(mut self, page_index: usize) -> Self {
        self.page_index = page_index;
        self
    }

    /// Set cursor keep-alive.
    pub fn with_cursor_ttl(mut self, ttl: Duration) -> Self {
        self.cursor_ttl = ttl;
        self
    }

    /// Number of hits skipped by the first request.
    pub fn offset(&self) -> Option<usize> {
        self.page_index.checked_mul(self.page_size)
    }

    fn validate(&self) -> Result<usize> {
        if self.page_size == 0 {
            return Err(SearchError::InvalidRequest(
                "page_size must be at least 1".to_string(),
            ));
        }
        if self.cursor_ttl.is_zero() {
            return Err(SearchError::InvalidRequest(
                "cursor_ttl must be positive".to_string(),
            ));
        }
        self.offset().ok_or_else(|| {
            SearchError::InvalidRequest(format!(
                "page {} of size {} overflows the offset",
                self.page_index, self.page_size
            ))
        })
    }

    fn first_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), self.query.to_json());
        body.insert("size".to_string(), json!(self.page_size));

        if !self.sort.is_empty() {
            body.insert("sort".to_string(), self.sort.to_json());
        }
        if let Some(aggs) = self.aggregations.as_ref().filter(|a| !a.is_empty()) {
            body.insert("aggs".to_string(), aggs.to_json());
        }

        Value::Object(body)
    }
}

/// Render a keep-alive in the engine's time unit syntax.
pub fn ttl_param(ttl: Duration) -> String {
    let millis = ttl.as_millis();
    if millis % 60_000 == 0 && millis > 0 {
        format!("{}m", millis / 60_000)
    } else if millis % 1_000 == 0 {
        format!("{}s", millis / 1_000)
    } else {
        format!("{}ms", millis)
    }
}

/// Every hit of a search, in engine order.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultSet<T> {
    /// Accumulated hits.
    pub hits: Vec<Hit<T>>,
    /// Total matches reported by the first response.
    pub total: u64,
    /// Aggregation results from the first response.
    pub aggregations: HashMap<String, AggregationResult>,
}

impl<T> ResultSet<T> {
    /// Number of hits returned.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// True when nothing was returned.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Iterate over returned documents.
    pub fn documents(&self) -> impl Iterator<Item = &T> {
        self.hits.iter().map(|hit| &hit.doc)
    }

    /// Consume into documents, dropping ids.
    pub fn into_documents(self) -> Vec<T> {
        self.hits.into_iter().map(|hit| hit.doc).collect()
    }

    /// Ids of returned hits.
    pub fn ids(&self) -> Vec<&str> {
        self.hits.iter().map(|hit| hit.id.as_str()).collect()
    }

    /// Named aggregation result.
    pub fn aggregation(&self, name: &str) -> Option<&AggregationResult> {
        self.aggregations.get(name)
    }
}

impl<T> IntoIterator for ResultSet<T> {
    type Item = Hit<T>;
    type IntoIter = std::vec::IntoIter<Hit<T>>;

    fn into_iter(self) -> Self::IntoIter {
        self.hits.into_iter()
    }
}

/// A server-side scroll context.
///
/// Released exactly once: explicitly through [`ScrollCursor::release`], or,
/// when dropped unreleased, by a clear request spawned on the current tokio
/// runtime.
pub struct ScrollCursor {
    session: Session,
    id: Option<String>,
    ttl: String,
}

impl ScrollCursor {
    fn new(session: Session, id: Option<String>, ttl: String) -> Self {
        Self { session, id, ttl }
    }

    /// Current cursor id.
    pub fn id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    /// Keep-alive sent with every continue request.
    pub fn ttl(&self) -> &str {
        &self.ttl
    }

    /// Fetch the next batch, adopting the rotated id.
    ///
    /// Returns `None` when no cursor is open.
    async fn advance(&mut self) -> Result<Option<Value>> {
        let Some(scroll_id) = self.id.clone() else {
            return Ok(None);
        };

        let request = EngineRequest::Scroll {
            scroll_id,
            scroll: self.ttl.clone(),
        };
        let response = self.session.send(&request).await?;

        if !response.is_success() {
            return Err(rejected(&request, response));
        }

        self.adopt(&response.body);
        Ok(Some(response.body))
    }

    fn adopt(&mut self, body: &Value) {
        if let Some(id) = body["_scroll_id"].as_str() {
            self.id = Some(id.to_string());
        }
    }

    /// Release the cursor on the engine.
    ///
    /// An already expired cursor counts as released. The id is kept until
    /// the round trip completes, so a release cancelled midway falls back to
    /// the release on drop.
    pub async fn release(mut self) -> Result<()> {
        let Some(scroll_id) = self.id.clone() else {
            return Ok(());
        };
        let outcome = release(&self.session, scroll_id).await;
        self.id = None;
        outcome
    }
}

async fn release(session: &Session, scroll_id: String) -> Result<()> {
    debug!("Releasing scroll cursor");
    let request = EngineRequest::ClearScroll { scroll_id };
    let response: EngineResponse = session.send(&request).await?;

    if response.is_success() || response.is_not_found() {
        Ok(())
    } else {
        Err(rejected(&request, response))
    }
}

impl Drop for ScrollCursor {
    fn drop(&mut self) {
        let Some(scroll_id) = self.id.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let session = self.session.clone();
                handle.spawn(async move {
                    if let Err(e) = release(&session, scroll_id).await {
                        warn!("Abandoned scroll cursor could not be released: {}", e);
                    }
                });
            }
            Err(_) => {
                warn!(
                    "Scroll cursor dropped outside a runtime; it expires after {}",
                    self.ttl
                );
            }
        }
    }
}

impl std::fmt::Debug for ScrollCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScrollCursor")
            .field("open", &self.id.is_some())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// Runs searches against one index or alias.
#[derive(Debug)]
pub struct ScrollPaginator<T> {
    session: Session,
    target: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for ScrollPaginator<T> {
    fn clone(&self) -> Self {
        Self {
            session: self.session.clone(),
            target: self.target.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Document> ScrollPaginator<T> {
    /// Search `target` (an index or alias) over `session`.
    pub fn new(session: Session, target: impl Into<String>) -> Self {
        Self {
            session,
            target: target.into(),
            _marker: PhantomData,
        }
    }

    /// The index or alias searched.
    pub fn target(&self) -> &str {
        &self.target
    }

    /// Return every match of `request` after its page offset.
    pub async fn search(&self, request: &PageRequest) -> Result<ResultSet<T>> {
        let offset = request.validate()?;
        let ttl = ttl_param(request.cursor_ttl);

        debug!(
            "Searching {} from offset {} in batches of {}",
            self.target, offset, request.page_size
        );

        let first = EngineRequest::Search {
            index: self.target.clone(),
            body: request.first_body(),
            scroll: ttl.clone(),
        };
        let response = self.session.send(&first).await?;

        let mut cursor = ScrollCursor::new(self.session.clone(), None, ttl);
        cursor.adopt(&response.body);

        let drained = if response.is_success() {
            self.drain(&mut cursor, &first, response.body, offset).await
        } else {
            Err(rejected(&first, response))
        };
        let released = cursor.release().await;

        match (drained, released) {
            (Ok(results), Ok(())) => Ok(results),
            (Ok(results), Err(e)) => {
                warn!("Search on {} completed but cursor release failed: {}", self.target, e);
                Ok(results)
            }
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_error)) => {
                warn!("Cursor release after failed search also failed: {}", release_error);
                Err(e)
            }
        }
    }

    async fn drain(
        &self,
        cursor: &mut ScrollCursor,
        first: &EngineRequest,
        body: Value,
        offset: usize,
    ) -> Result<ResultSet<T>> {
        let total = total_hits(&body);
        let aggregations = parse_aggregations(&body);
        let mut skip = offset;
        let mut hits = Vec::new();
        let mut last_batch = decode_hits::<T>(first, &body, &mut skip, &mut hits)?;

        while last_batch > 0 {
            let Some(body) = cursor.advance().await? else {
                break;
            };
            last_batch = decode_hits::<T>(first, &body, &mut skip, &mut hits)?;
        }

        debug!("Search on {} returned {} hits", self.target, hits.len());

        Ok(ResultSet {
            hits,
            total,
            aggregations,
        })
    }
}

fn total_hits(body: &Value) -> u64 {
    let total = &body["hits"]["total"];
    total["value"].as_u64().or_else(|| total.as_u64()).unwrap_or(0)
}

fn parse_aggregations(body: &Value) -> HashMap<String, AggregationResult> {
    body["aggregations"]
        .as_object()
        .map(|aggs| {
            aggs.iter()
                .map(|(name, value)| {
                    (
                        name.clone(),
                        AggregationResult {
                            value: value.clone(),
                        },
                    )
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Decode one batch into `hits`, first dropping up to `skip` of its hits.
/// Returns the batch size as sent by the engine, skipped hits included.
fn decode_hits<T: Document>(
    request: &EngineRequest,
    body: &Value,
    skip: &mut usize,
    hits: &mut Vec<Hit<T>>,
) -> Result<usize> {
    let malformed = |reason: &str| SearchError::ServerResponse {
        endpoint: request.endpoint(),
        status: 200,
        reason: reason.to_string(),
        payload: Some(body.clone()),
    };

    let Some(raw_hits) = body["hits"]["hits"].as_array() else {
        return Err(malformed("response carries no hits array"));
    };

    let skipped = (*skip).min(raw_hits.len());
    *skip -= skipped;

    for hit in &raw_hits[skipped..] {
        let id = hit["_id"]
            .as_str()
            .ok_or_else(|| malformed("hit without _id"))?
            .to_string();
        let source = hit
            .get("_source")
            .ok_or_else(|| malformed("hit without _source"))?;
        let doc = serde_json::from_value(source.clone())?;
        hits.push(Hit { id, doc });
    }

    Ok(raw_hits.len())
}
