//! Round trips to the search cluster.
//!
//! Every request the client issues is one [`EngineRequest`]. A [`Transport`]
//! turns it into an [`EngineResponse`]; [`OpenSearchTransport`] does so over
//! HTTP with the `opensearch` driver and [`crate::MemoryTransport`] evaluates
//! it in process.

use crate::error::{Result, SearchError};
use async_trait::async_trait;
use opensearch::{
    ClearScrollParts, CountParts, DeleteParts, GetParts, IndexParts, OpenSearch, ScrollParts,
    SearchParts, UpdateParts,
    http::response::Response,
    indices::{
        IndicesCreateParts, IndicesDeleteAliasParts, IndicesDeleteParts,
        IndicesExistsAliasParts, IndicesExistsParts, IndicesGetAliasParts, IndicesPutAliasParts,
        IndicesRefreshParts,
    },
    params::Refresh,
};
use serde_json::{Value, json};
use std::fmt;
use trawler_log::{debug, error, trace};

/// A single request to the cluster.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineRequest {
    /// `HEAD /`
    Ping,
    /// `HEAD /{index}`
    IndexExists {
        /// Index name.
        index: String,
    },
    /// `PUT /{index}` with settings and mappings.
    CreateIndex {
        /// Index name.
        index: String,
        /// Settings and mappings body.
        body: Value,
    },
    /// `DELETE /{index}`
    DeleteIndex {
        /// Index name.
        index: String,
    },
    /// `HEAD /{index}/_alias/{alias}`
    AliasExists {
        /// Index name.
        index: String,
        /// Alias name.
        alias: String,
    },
    /// `GET /_alias/{alias}`, listing the indices the alias is bound to.
    GetAlias {
        /// Alias name.
        alias: String,
    },
    /// `PUT /{index}/_alias/{alias}`
    PutAlias {
        /// Index name.
        index: String,
        /// Alias name.
        alias: String,
    },
    /// `DELETE /{index}/_alias/{alias}`
    DeleteAlias {
        /// Index name.
        index: String,
        /// Alias name.
        alias: String,
    },
    /// `POST /{index}/_doc?refresh=wait_for` with an engine generated id.
    IndexDocument {
        /// Index or alias name.
        index: String,
        /// Document source.
        body: Value,
    },
    /// `GET /{index}/_doc/{id}`
    GetDocument {
        /// Index name.
        index: String,
        /// Document ID.
        id: String,
    },
    /// `POST /{index}/_update/{id}?refresh=wait_for`
    UpdateDocument {
        /// Index name.
        index: String,
        /// Document ID.
        id: String,
        /// `{"doc": ...}` body, optionally with `doc_as_upsert`.
        body: Value,
    },
    /// `DELETE /{index}/_doc/{id}?refresh=wait_for`
    DeleteDocument {
        /// Index name.
        index: String,
        /// Document ID.
        id: String,
    },
    /// `POST /{index}/_search?scroll={scroll}` opening a cursor.
    Search {
        /// Index or alias name.
        index: String,
        /// Search body (query, sort, from, size, aggs).
        body: Value,
        /// Cursor keep-alive, e.g. `1m`.
        scroll: String,
    },
    /// `POST /_search/scroll` continuing a cursor.
    Scroll {
        /// Current cursor id.
        scroll_id: String,
        /// Cursor keep-alive.
        scroll: String,
    },
    /// `DELETE /_search/scroll` releasing a cursor.
    ClearScroll {
        /// Cursor id to release.
        scroll_id: String,
    },
    /// `POST /{index}/_count`
    Count {
        /// Index or alias name.
        index: String,
        /// `{"query": ...}` body.
        body: Value,
    },
    /// `POST /{index}/_refresh`
    Refresh {
        /// Index or alias name.
        index: String,
    },
}

/// Discriminant of an [`EngineRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// See [`EngineRequest::Ping`].
    Ping,
    /// See [`EngineRequest::IndexExists`].
    IndexExists,
    /// See [`EngineRequest::CreateIndex`].
    CreateIndex,
    /// See [`EngineRequest::DeleteIndex`].
    DeleteIndex,
    /// See [`EngineRequest::AliasExists`].
    AliasExists,
    /// See [`EngineRequest::GetAlias`].
    GetAlias,
    /// See [`EngineRequest::PutAlias`].
    PutAlias,
    /// See [`EngineRequest::DeleteAlias`].
    DeleteAlias,
    /// See [`EngineRequest::IndexDocument`].
    IndexDocument,
    /// See [`EngineRequest::GetDocument`].
    GetDocument,
    /// See [`EngineRequest::UpdateDocument`].
    UpdateDocument,
    /// See [`EngineRequest::DeleteDocument`].
    DeleteDocument,
    /// See [`EngineRequest::Search`].
    Search,
    /// See [`EngineRequest::Scroll`].
    Scroll,
    /// See [`EngineRequest::ClearScroll`].
    ClearScroll,
    /// See [`EngineRequest::Count`].
    Count,
    /// See [`EngineRequest::Refresh`].
    Refresh,
}

impl RequestKind {
    /// HEAD requests carry no response body.
    pub fn is_head(&self) -> bool {
        matches!(
            self,
            RequestKind::Ping | RequestKind::IndexExists | RequestKind::AliasExists
        )
    }
}

impl EngineRequest {
    /// The request's discriminant.
    pub fn kind(&self) -> RequestKind {
        match self {
            EngineRequest::Ping => RequestKind::Ping,
            EngineRequest::IndexExists { .. } => RequestKind::IndexExists,
            EngineRequest::CreateIndex { .. } => RequestKind::CreateIndex,
            EngineRequest::DeleteIndex { .. } => RequestKind::DeleteIndex,
            EngineRequest::AliasExists { .. } => RequestKind::AliasExists,
            EngineRequest::GetAlias { .. } => RequestKind::GetAlias,
            EngineRequest::PutAlias { .. } => RequestKind::PutAlias,
            EngineRequest::DeleteAlias { .. } => RequestKind::DeleteAlias,
            EngineRequest::IndexDocument { .. } => RequestKind::IndexDocument,
            EngineRequest::GetDocument { .. } => RequestKind::GetDocument,
            EngineRequest::UpdateDocument { .. } => RequestKind::UpdateDocument,
            EngineRequest::DeleteDocument { .. } => RequestKind::DeleteDocument,
            EngineRequest::Search { .. } => RequestKind::Search,
            EngineRequest::Scroll { .. } => RequestKind::Scroll,
            EngineRequest::ClearScroll { .. } => RequestKind::ClearScroll,
            EngineRequest::Count { .. } => RequestKind::Count,
            EngineRequest::Refresh { .. } => RequestKind::Refresh,
        }
    }

    /// Method and path, used in logs and errors.
    pub fn endpoint(&self) -> String {
        match self {
            EngineRequest::Ping => "HEAD /".to_string(),
            EngineRequest::IndexExists { index } => format!("HEAD /{}", index),
            EngineRequest::CreateIndex { index, .. } => format!("PUT /{}", index),
            EngineRequest::DeleteIndex { index } => format!("DELETE /{}", index),
            EngineRequest::AliasExists { index, alias } => {
                format!("HEAD /{}/_alias/{}", index, alias)
            }
            EngineRequest::GetAlias { alias } => format!("GET /_alias/{}", alias),
            EngineRequest::PutAlias { index, alias } => format!("PUT /{}/_alias/{}", index, alias),
            EngineRequest::DeleteAlias { index, alias } => {
                format!("DELETE /{}/_alias/{}", index, alias)
            }
            EngineRequest::IndexDocument { index, .. } => {
                format!("POST /{}/_doc?refresh=wait_for", index)
            }
            EngineRequest::GetDocument { index, id } => format!("GET /{}/_doc/{}", index, id),
            EngineRequest::UpdateDocument { index, id, .. } => {
                format!("POST /{}/_update/{}?refresh=wait_for", index, id)
            }
            EngineRequest::DeleteDocument { index, id } => {
                format!("DELETE /{}/_doc/{}?refresh=wait_for", index, id)
            }
            EngineRequest::Search { index, scroll, .. } => {
                format!("POST /{}/_search?scroll={}", index, scroll)
            }
            EngineRequest::Scroll { .. } => "POST /_search/scroll".to_string(),
            EngineRequest::ClearScroll { .. } => "DELETE /_search/scroll".to_string(),
            EngineRequest::Count { index, .. } => format!("POST /{}/_count", index),
            EngineRequest::Refresh { index } => format!("POST /{}/_refresh", index),
        }
    }
}

impl fmt::Display for EngineRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.endpoint())
    }
}

/// Status and decoded JSON body of a cluster response.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineResponse {
    /// HTTP status code.
    pub status: u16,
    /// Decoded body; `Value::Null` for HEAD requests and empty bodies.
    pub body: Value,
}

impl EngineResponse {
    /// Create a response.
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    /// 2xx status.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// 404 status.
    pub fn is_not_found(&self) -> bool {
        self.status == 404
    }

    /// `error.type` of an engine error body.
    pub fn error_type(&self) -> Option<&str> {
        self.body["error"]["type"].as_str()
    }

    /// `error.reason` of an engine error body, or a generic reason.
    pub fn error_reason(&self) -> String {
        self.body["error"]["reason"]
            .as_str()
            .or_else(|| self.body["error"].as_str())
            .map(str::to_string)
            .unwrap_or_else(|| format!("unexpected status {}", self.status))
    }
}

/// Log the endpoint and raw payload of a rejected request.
pub(crate) fn log_rejection(request: &EngineRequest, response: &EngineResponse) {
    error!(
        "{} rejected with status {}: {}",
        request.endpoint(),
        response.status,
        response.body
    );
}

/// Build a [`SearchError::ServerResponse`] for a rejected request, logging it
/// first.
pub(crate) fn rejected(request: &EngineRequest, response: EngineResponse) -> SearchError {
    log_rejection(request, &response);
    let endpoint = request.endpoint();
    let reason = response.error_reason();
    SearchError::ServerResponse {
        endpoint,
        status: response.status,
        reason,
        payload: (!response.body.is_null()).then_some(response.body),
    }
}

/// Sends [`EngineRequest`]s to a cluster.
///
/// Implementations must be safe to share between concurrent calls; a
/// transport holds no per-call state.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Perform one round trip.
    ///
    /// Errors are reserved for failures to obtain a response at all; an HTTP
    /// error status is returned as an ordinary [`EngineResponse`].
    async fn send(&self, request: &EngineRequest) -> Result<EngineResponse>;
}

/// [`Transport`] backed by the `opensearch` driver.
#[derive(Clone)]
pub struct OpenSearchTransport {
    client: OpenSearch,
}

impl OpenSearchTransport {
    /// Wrap a configured driver client.
    pub fn new(client: OpenSearch) -> Self {
        Self { client }
    }

    /// The underlying driver client.
    pub fn inner(&self) -> &OpenSearch {
        &self.client
    }

    async fn dispatch(
        &self,
        request: &EngineRequest,
    ) -> std::result::Result<Response, opensearch::Error> {
        let client = &self.client;

        match request {
            EngineRequest::Ping => client.ping().send().await,
            EngineRequest::IndexExists { index } => {
                client
                    .indices()
                    .exists(IndicesExistsParts::Index(&[index.as_str()]))
                    .send()
                    .await
            }
            EngineRequest::CreateIndex { index, body } => {
                client
                    .indices()
                    .create(IndicesCreateParts::Index(index))
                    .body(body.clone())
                    .send()
                    .await
            }
            EngineRequest::DeleteIndex { index } => {
                client
                    .indices()
                    .delete(IndicesDeleteParts::Index(&[index.as_str()]))
                    .send()
                    .await
            }
            EngineRequest::AliasExists { index, alias } => {
                client
                    .indices()
                    .exists_alias(IndicesExistsAliasParts::IndexName(
                        &[index.as_str()],
                        &[alias.as_str()],
                    ))
                    .send()
                    .await
            }
            EngineRequest::GetAlias { alias } => {
                client
                    .indices()
                    .get_alias(IndicesGetAliasParts::Name(&[alias.as_str()]))
                    .send()
                    .await
            }
            EngineRequest::PutAlias { index, alias } => {
                client
                    .indices()
                    .put_alias(IndicesPutAliasParts::IndexName(&[index.as_str()], alias))
                    .send()
                    .await
            }
            EngineRequest::DeleteAlias { index, alias } => {
                client
                    .indices()
                    .delete_alias(IndicesDeleteAliasParts::IndexName(
                        &[index.as_str()],
                        &[alias.as_str()],
                    ))
                    .send()
                    .await
            }
            EngineRequest::IndexDocument { index, body } => {
                client
                    .index(IndexParts::Index(index))
                    .refresh(Refresh::WaitFor)
                    .body(body.clone())
                    .send()
                    .await
            }
            EngineRequest::GetDocument { index, id } => {
                client.get(GetParts::IndexId(index, id)).send().await
            }
            EngineRequest::UpdateDocument { index, id, body } => {
                client
                    .update(UpdateParts::IndexId(index, id))
                    .refresh(Refresh::WaitFor)
                    .body(body.clone())
                    .send()
                    .await
            }
            EngineRequest::DeleteDocument { index, id } => {
                client
                    .delete(DeleteParts::IndexId(index, id))
                    .refresh(Refresh::WaitFor)
                    .send()
                    .await
            }
            EngineRequest::Search {
                index,
                body,
                scroll,
            } => {
                client
                    .search(SearchParts::Index(&[index.as_str()]))
                    .scroll(scroll)
                    .body(body.clone())
                    .send()
                    .await
            }
            EngineRequest::Scroll { scroll_id, scroll } => {
                client
                    .scroll(ScrollParts::None)
                    .body(json!({ "scroll": scroll, "scroll_id": scroll_id }))
                    .send()
                    .await
            }
            EngineRequest::ClearScroll { scroll_id } => {
                client
                    .clear_scroll(ClearScrollParts::None)
                    .body(json!({ "scroll_id": [scroll_id] }))
                    .send()
                    .await
            }
            EngineRequest::Count { index, body } => {
                client
                    .count(CountParts::Index(&[index.as_str()]))
                    .body(body.clone())
                    .send()
                    .await
            }
            EngineRequest::Refresh { index } => {
                client
                    .indices()
                    .refresh(IndicesRefreshParts::Index(&[index.as_str()]))
                    .send()
                    .await
            }
        }
    }
}

#[async_trait]
impl Transport for OpenSearchTransport {
    async fn send(&self, request: &EngineRequest) -> Result<EngineResponse> {
        let response = self.dispatch(request).await.map_err(|e| {
            SearchError::Connection(format!("{} failed: {}", request.endpoint(), e))
        })?;

        let status = response.status_code().as_u16();
        if request.kind().is_head() {
            return Ok(EngineResponse::new(status, Value::Null));
        }

        let text = response.text().await.map_err(|e| {
            SearchError::Connection(format!("{} body unreadable: {}", request.endpoint(), e))
        })?;
        trace!("{} -> {} {}", request.endpoint(), status, text);

        Ok(EngineResponse::new(status, decode_body(text)))
    }
}

/// Parse a response body. Text that is not JSON, such as a proxy's error
/// page, is kept verbatim as a string so the status check still sees it.
fn decode_body(text: String) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    match serde_json::from_str(&text) {
        Ok(body) => body,
        Err(e) => {
            debug!("Response body is not JSON ({}); keeping it as text", e);
            Value::String(text)
        }
    }
}

impl fmt::Debug for OpenSearchTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenSearchTransport").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        let request = EngineRequest::PutAlias {
            index: "people-v1".into(),
            alias: "people".into(),
        };
        assert_eq!(request.endpoint(), "PUT /people-v1/_alias/people");
        assert_eq!(request.kind(), RequestKind::PutAlias);

        let request = EngineRequest::GetAlias {
            alias: "people".into(),
        };
        assert_eq!(request.endpoint(), "GET /_alias/people");
        assert!(!request.kind().is_head());

        let request = EngineRequest::Search {
            index: "people".into(),
            body: json!({}),
            scroll: "1m".into(),
        };
        assert_eq!(request.to_string(), "POST /people/_search?scroll=1m");
    }

    #[test]
    fn test_head_kinds() {
        assert!(RequestKind::IndexExists.is_head());
        assert!(RequestKind::AliasExists.is_head());
        assert!(!RequestKind::Search.is_head());
    }

    #[test]
    fn test_error_reason() {
        let response = EngineResponse::new(
            400,
            json!({ "error": { "type": "mapper_parsing_exception", "reason": "bad type" } }),
        );
        assert!(!response.is_success());
        assert_eq!(response.error_type(), Some("mapper_parsing_exception"));
        assert_eq!(response.error_reason(), "bad type");

        let bare = EngineResponse::new(502, Value::Null);
        assert_eq!(bare.error_reason(), "unexpected status 502");
    }

    #[test]
    fn test_decode_body() {
        assert_eq!(decode_body(String::new()), Value::Null);
        assert_eq!(decode_body("  \n".to_string()), Value::Null);
        assert_eq!(decode_body(r#"{"count":3}"#.to_string()), json!({ "count": 3 }));
        assert_eq!(
            decode_body("<html>502 Bad Gateway</html>".to_string()),
            Value::String("<html>502 Bad Gateway</html>".to_string())
        );
    }

    #[test]
    fn test_non_json_error_page_is_a_server_response() {
        let request = EngineRequest::Count {
            index: "people".into(),
            body: json!({}),
        };
        let page = "<html><body>502 Bad Gateway</body></html>";
        let response = EngineResponse::new(502, decode_body(page.to_string()));

        match rejected(&request, response) {
            SearchError::ServerResponse {
                status,
                reason,
                payload,
                ..
            } => {
                assert_eq!(status, 502);
                assert_eq!(reason, "unexpected status 502");
                assert_eq!(payload, Some(Value::String(page.to_string())));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_rejected_keeps_payload() {
        let request = EngineRequest::Refresh {
            index: "people".into(),
        };
        let err = rejected(
            &request,
            EngineResponse::new(500, json!({ "error": "boom" })),
        );

        match err {
            SearchError::ServerResponse {
                endpoint,
                status,
                reason,
                payload,
            } => {
                assert_eq!(endpoint, "POST /people/_refresh");
                assert_eq!(status, 500);
                assert_eq!(reason, "boom");
                assert!(payload.is_some());
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
