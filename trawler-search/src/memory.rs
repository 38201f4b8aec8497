//! In-process search engine.
//!
//! [`MemoryTransport`] answers [`EngineRequest`]s from memory with the same
//! statuses and body shapes a cluster would send, so the whole client can be
//! exercised without one. It evaluates `match_all`, `term`, `terms`, `match`,
//! `range`, `exists` and `bool` queries, sorts on document fields, computes
//! `terms` and metric aggregations and hands out a new scroll id on every
//! continue request.
//!
//! Faults can be scheduled per request kind: a transport failure
//! ([`MemoryTransport::fail_nth`]), a canned engine answer
//! ([`MemoryTransport::reject_nth`]) or a delay ([`MemoryTransport::stall`]).

use crate::error::{Result, SearchError};
use crate::transport::{EngineRequest, EngineResponse, RequestKind, Transport};
use async_trait::async_trait;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use trawler_log::trace;

const FIELD_TYPES: &[&str] = &[
    "text", "keyword", "long", "integer", "short", "byte", "double", "float", "boolean", "date",
    "object", "nested", "geo_point", "ip", "binary",
];

/// In-memory [`Transport`].
///
/// Clones share state, so a test can keep one handle for inspection while a
/// [`crate::Session`] owns another.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<EngineState>>,
}

impl MemoryTransport {
    /// Create an empty engine.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the `n`th upcoming request of `kind` (1 = the next one) fail
    /// without a response.
    pub async fn fail_nth(&self, kind: RequestKind, n: usize) {
        self.schedule(kind, n, Fault::Fail).await;
    }

    /// Answer the `n`th upcoming request of `kind` with `response` instead of
    /// evaluating it.
    pub async fn reject_nth(&self, kind: RequestKind, n: usize, response: EngineResponse) {
        self.schedule(kind, n, Fault::Respond(response)).await;
    }

    /// Delay every request of `kind` by `delay` before evaluating it.
    pub async fn stall(&self, kind: RequestKind, delay: Duration) {
        self.state.lock().await.stalls.insert(kind, delay);
    }

    async fn schedule(&self, kind: RequestKind, n: usize, fault: Fault) {
        self.state.lock().await.faults.push(ScheduledFault {
            kind,
            remaining: n.max(1),
            fault,
        });
    }

    /// Every request received, in order.
    pub async fn requests(&self) -> Vec<EngineRequest> {
        self.state.lock().await.log.clone()
    }

    /// Number of requests of `kind` received.
    pub async fn count_of(&self, kind: RequestKind) -> usize {
        self.state
            .lock()
            .await
            .log
            .iter()
            .filter(|r| r.kind() == kind)
            .count()
    }

    /// Cursor ids released by clear-scroll requests, in order.
    pub async fn released_cursors(&self) -> Vec<String> {
        self.state.lock().await.released.clone()
    }

    /// Scroll contexts still open.
    pub async fn open_cursors(&self) -> usize {
        self.state.lock().await.cursors.len()
    }

    /// Documents stored in `index`.
    pub async fn document_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .await
            .indices
            .get(index)
            .map(|i| i.docs.len())
            .unwrap_or(0)
    }
}

impl fmt::Debug for MemoryTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryTransport").finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn send(&self, request: &EngineRequest) -> Result<EngineResponse> {
        let kind = request.kind();

        let stall = {
            let mut state = self.state.lock().await;
            state.log.push(request.clone());

            match state.take_fault(kind) {
                Some(Fault::Fail) => {
                    return Err(SearchError::Connection(format!(
                        "{}: injected transport failure",
                        request.endpoint()
                    )));
                }
                Some(Fault::Respond(response)) => return Ok(response),
                None => state.stalls.get(&kind).copied(),
            }
        };

        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }

        let response = self.state.lock().await.apply(request);
        trace!("{} -> {}", request.endpoint(), response.status);
        Ok(response)
    }
}

enum Fault {
    Fail,
    Respond(EngineResponse),
}

struct ScheduledFault {
    kind: RequestKind,
    remaining: usize,
    fault: Fault,
}

struct StoredIndex {
    docs: Vec<(String, Value)>,
}

struct ScrollContext {
    context: u64,
    step: u64,
    total: usize,
    size: usize,
    remaining: Vec<Value>,
}

#[derive(Default)]
struct EngineState {
    indices: BTreeMap<String, StoredIndex>,
    aliases: BTreeMap<String, BTreeSet<String>>,
    cursors: HashMap<String, ScrollContext>,
    next_doc: u64,
    next_context: u64,
    log: Vec<EngineRequest>,
    released: Vec<String>,
    faults: Vec<ScheduledFault>,
    stalls: HashMap<RequestKind, Duration>,
}

type Outcome<T> = std::result::Result<T, EngineResponse>;

fn engine_error(status: u16, error_type: &str, reason: impl Into<String>) -> EngineResponse {
    let reason = reason.into();
    EngineResponse::new(
        status,
        json!({
            "error": {
                "root_cause": [{ "type": error_type, "reason": reason }],
                "type": error_type,
                "reason": reason,
            },
            "status": status,
        }),
    )
}

fn index_not_found(index: &str) -> EngineResponse {
    engine_error(
        404,
        "index_not_found_exception",
        format!("no such index [{}]", index),
    )
}

fn acknowledged() -> EngineResponse {
    EngineResponse::new(200, json!({ "acknowledged": true }))
}

impl EngineState {
    fn take_fault(&mut self, kind: RequestKind) -> Option<Fault> {
        let mut fired = None;
        for (position, scheduled) in self.faults.iter_mut().enumerate() {
            if scheduled.kind != kind {
                continue;
            }
            scheduled.remaining = scheduled.remaining.saturating_sub(1);
            if scheduled.remaining == 0 && fired.is_none() {
                fired = Some(position);
            }
        }
        fired.map(|position| self.faults.remove(position).fault)
    }

    fn apply(&mut self, request: &EngineRequest) -> EngineResponse {
        let outcome = match request {
            EngineRequest::Ping => Ok(EngineResponse::new(200, Value::Null)),
            EngineRequest::IndexExists { index } => Ok(self.head(
                self.indices.contains_key(index) || self.aliases.contains_key(index),
            )),
            EngineRequest::CreateIndex { index, body } => self.create_index(index, body),
            EngineRequest::DeleteIndex { index } => self.delete_index(index),
            EngineRequest::AliasExists { index, alias } => Ok(self.head(
                self.aliases
                    .get(alias)
                    .is_some_and(|bound| bound.contains(index)),
            )),
            EngineRequest::GetAlias { alias } => Ok(self.get_alias(alias)),
            EngineRequest::PutAlias { index, alias } => self.put_alias(index, alias),
            EngineRequest::DeleteAlias { index, alias } => self.delete_alias(index, alias),
            EngineRequest::IndexDocument { index, body } => self.index_document(index, body),
            EngineRequest::GetDocument { index, id } => self.get_document(index, id),
            EngineRequest::UpdateDocument { index, id, body } => {
                self.update_document(index, id, body)
            }
            EngineRequest::DeleteDocument { index, id } => self.delete_document(index, id),
            EngineRequest::Search { index, body, .. } => self.search(index, body),
            EngineRequest::Scroll { scroll_id, .. } => self.scroll(scroll_id),
            EngineRequest::ClearScroll { scroll_id } => Ok(self.clear_scroll(scroll_id)),
            EngineRequest::Count { index, body } => self.count(index, body),
            EngineRequest::Refresh { index } => self
                .targets(index)
                .map(|_| EngineResponse::new(200, json!({ "_shards": { "failed": 0 } }))),
        };

        outcome.unwrap_or_else(|rejection| rejection)
    }

    fn head(&self, exists: bool) -> EngineResponse {
        EngineResponse::new(if exists { 200 } else { 404 }, Value::Null)
    }

    /// Concrete indices behind an index or alias name.
    fn targets(&self, name: &str) -> Outcome<Vec<String>> {
        if self.indices.contains_key(name) {
            return Ok(vec![name.to_string()]);
        }
        match self.aliases.get(name) {
            Some(bound) if !bound.is_empty() => Ok(bound.iter().cloned().collect()),
            _ => Err(index_not_found(name)),
        }
    }

    fn write_target(&self, name: &str) -> Outcome<String> {
        let mut targets = self.targets(name)?;
        if targets.len() > 1 {
            return Err(engine_error(
                400,
                "illegal_argument_exception",
                format!(
                    "no write index is defined for alias [{}]; the alias points to multiple indices",
                    name
                ),
            ));
        }
        Ok(targets.remove(0))
    }

    fn create_index(&mut self, index: &str, body: &Value) -> Outcome<EngineResponse> {
        if self.indices.contains_key(index) || self.aliases.contains_key(index) {
            return Err(engine_error(
                400,
                "resource_already_exists_exception",
                format!("index [{}] already exists", index),
            ));
        }
        if index.is_empty() || index != index.to_lowercase() {
            return Err(engine_error(
                400,
                "invalid_index_name_exception",
                format!("Invalid index name [{}], must be lowercase", index),
            ));
        }

        if let Some(properties) = body["mappings"]["properties"].as_object() {
            for (field, definition) in properties {
                let field_type = definition["type"].as_str().unwrap_or("object");
                if !FIELD_TYPES.contains(&field_type) {
                    return Err(engine_error(
                        400,
                        "mapper_parsing_exception",
                        format!(
                            "No handler for type [{}] declared on field [{}]",
                            field_type, field
                        ),
                    ));
                }
            }
        }

        self.indices
            .insert(index.to_string(), StoredIndex { docs: Vec::new() });

        Ok(EngineResponse::new(
            200,
            json!({ "acknowledged": true, "shards_acknowledged": true, "index": index }),
        ))
    }

    fn delete_index(&mut self, index: &str) -> Outcome<EngineResponse> {
        if self.indices.remove(index).is_none() {
            return Err(index_not_found(index));
        }

        for bound in self.aliases.values_mut() {
            bound.remove(index);
        }
        self.aliases.retain(|_, bound| !bound.is_empty());

        Ok(acknowledged())
    }

    fn get_alias(&self, alias: &str) -> EngineResponse {
        match self.aliases.get(alias) {
            Some(bound) if !bound.is_empty() => {
                let listing: Map<String, Value> = bound
                    .iter()
                    .map(|index| (index.clone(), json!({ "aliases": { alias: {} } })))
                    .collect();
                EngineResponse::new(200, Value::Object(listing))
            }
            _ => EngineResponse::new(
                404,
                json!({ "error": format!("alias [{}] missing", alias), "status": 404 }),
            ),
        }
    }

    fn put_alias(&mut self, index: &str, alias: &str) -> Outcome<EngineResponse> {
        if !self.indices.contains_key(index) {
            return Err(index_not_found(index));
        }
        if self.indices.contains_key(alias) {
            return Err(engine_error(
                400,
                "invalid_alias_name_exception",
                format!(
                    "Invalid alias name [{}]: an index exists with the same name as the alias",
                    alias
                ),
            ));
        }

        self.aliases
            .entry(alias.to_string())
            .or_default()
            .insert(index.to_string());

        Ok(acknowledged())
    }

    fn delete_alias(&mut self, index: &str, alias: &str) -> Outcome<EngineResponse> {
        let removed = self
            .aliases
            .get_mut(alias)
            .is_some_and(|bound| bound.remove(index));

        if !removed {
            return Err(engine_error(
                404,
                "aliases_not_found_exception",
                format!("aliases [{}] missing", alias),
            ));
        }

        self.aliases.retain(|_, bound| !bound.is_empty());
        Ok(acknowledged())
    }

    fn docs_mut(&mut self, name: &str) -> Outcome<(String, &mut Vec<(String, Value)>)> {
        let index = self.write_target(name)?;
        match self.indices.get_mut(&index) {
            Some(stored) => Ok((index, &mut stored.docs)),
            None => Err(index_not_found(name)),
        }
    }

    fn index_document(&mut self, name: &str, body: &Value) -> Outcome<EngineResponse> {
        if !body.is_object() {
            return Err(engine_error(
                400,
                "mapper_parsing_exception",
                "failed to parse, document is empty or not an object",
            ));
        }

        self.next_doc += 1;
        let id = format!("{:016x}", self.next_doc.wrapping_mul(0x9e37_79b9_7f4a_7c15));
        let (index, docs) = self.docs_mut(name)?;
        docs.push((id.clone(), body.clone()));

        Ok(EngineResponse::new(
            201,
            json!({ "_index": index, "_id": id, "_version": 1, "result": "created" }),
        ))
    }

    fn get_document(&mut self, name: &str, id: &str) -> Outcome<EngineResponse> {
        let (index, docs) = self.docs_mut(name)?;

        Ok(match docs.iter().find(|(doc_id, _)| doc_id == id) {
            Some((_, source)) => EngineResponse::new(
                200,
                json!({ "_index": index, "_id": id, "found": true, "_source": source }),
            ),
            None => EngineResponse::new(
                404,
                json!({ "_index": index, "_id": id, "found": false }),
            ),
        })
    }

    fn update_document(&mut self, name: &str, id: &str, body: &Value) -> Outcome<EngineResponse> {
        let Some(partial) = body["doc"].as_object() else {
            return Err(engine_error(
                400,
                "action_request_validation_exception",
                "Validation Failed: 1: script or doc is missing;",
            ));
        };
        let upsert = body["doc_as_upsert"].as_bool().unwrap_or(false);
        let (index, docs) = self.docs_mut(name)?;

        if let Some((_, source)) = docs.iter_mut().find(|(doc_id, _)| doc_id == id) {
            let before = source.clone();
            merge(source, partial);
            let result = if *source == before { "noop" } else { "updated" };
            return Ok(EngineResponse::new(
                200,
                json!({ "_index": index, "_id": id, "result": result }),
            ));
        }

        if upsert {
            docs.push((id.to_string(), Value::Object(partial.clone())));
            return Ok(EngineResponse::new(
                201,
                json!({ "_index": index, "_id": id, "result": "created" }),
            ));
        }

        Err(engine_error(
            404,
            "document_missing_exception",
            format!("[{}]: document missing", id),
        ))
    }

    fn delete_document(&mut self, name: &str, id: &str) -> Outcome<EngineResponse> {
        let (index, docs) = self.docs_mut(name)?;

        Ok(match docs.iter().position(|(doc_id, _)| doc_id == id) {
            Some(position) => {
                docs.remove(position);
                EngineResponse::new(
                    200,
                    json!({ "_index": index, "_id": id, "result": "deleted" }),
                )
            }
            None => EngineResponse::new(
                404,
                json!({ "_index": index, "_id": id, "result": "not_found" }),
            ),
        })
    }

    /// Matching hits across the target's indices, sorted.
    fn matching(&self, name: &str, query: &Value, sort: &Value) -> Outcome<Vec<Value>> {
        let mut hits = Vec::new();

        for index in self.targets(name)? {
            let Some(stored) = self.indices.get(&index) else {
                continue;
            };
            for (id, source) in &stored.docs {
                let matched = matches(query, source)
                    .map_err(|reason| engine_error(400, "parsing_exception", reason))?;
                if matched {
                    hits.push(json!({
                        "_index": index,
                        "_id": id,
                        "_score": 1.0,
                        "_source": source,
                    }));
                }
            }
        }

        let keys = sort_keys(sort).map_err(|reason| engine_error(400, "parsing_exception", reason))?;
        if !keys.is_empty() {
            hits.sort_by(|a, b| compare_hits(&keys, &a["_source"], &b["_source"]));
        }

        Ok(hits)
    }

    /// Every search opens a scroll context, which the engine refuses to
    /// combine with a non-zero `from`.
    fn search(&mut self, name: &str, body: &Value) -> Outcome<EngineResponse> {
        if body["from"].as_u64().is_some_and(|from| from > 0) {
            return Err(engine_error(
                400,
                "action_request_validation_exception",
                "Validation Failed: 1: using [from] is not allowed in a scroll context;",
            ));
        }

        let query = body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));
        let hits = self.matching(name, &query, &body["sort"])?;

        let size = body["size"].as_u64().unwrap_or(10) as usize;
        let total = hits.len();

        let aggs = body.get("aggs").or_else(|| body.get("aggregations"));
        let aggregations = match aggs {
            Some(aggs) => Some(
                aggregate(aggs, &hits)
                    .map_err(|reason| engine_error(400, "parsing_exception", reason))?,
            ),
            None => None,
        };

        let mut remaining = hits;
        let rest = remaining.split_off(size.min(remaining.len()));
        let page = remaining;

        self.next_context += 1;
        let context = ScrollContext {
            context: self.next_context,
            step: 0,
            total,
            size,
            remaining: rest,
        };
        let scroll_id = context.id();
        self.cursors.insert(scroll_id.clone(), context);

        let mut response = json!({
            "_scroll_id": scroll_id,
            "took": 1,
            "timed_out": false,
            "hits": {
                "total": { "value": total, "relation": "eq" },
                "max_score": null,
                "hits": page,
            },
        });
        if let Some(aggregations) = aggregations {
            response["aggregations"] = aggregations;
        }

        Ok(EngineResponse::new(200, response))
    }

    fn scroll(&mut self, scroll_id: &str) -> Outcome<EngineResponse> {
        let Some(mut context) = self.cursors.remove(scroll_id) else {
            return Err(engine_error(
                404,
                "search_context_missing_exception",
                format!("No search context found for id [{}]", scroll_id),
            ));
        };

        let rest = context
            .remaining
            .split_off(context.size.min(context.remaining.len()));
        let page = std::mem::replace(&mut context.remaining, rest);

        context.step += 1;
        let next_id = context.id();
        let total = context.total;
        self.cursors.insert(next_id.clone(), context);

        Ok(EngineResponse::new(
            200,
            json!({
                "_scroll_id": next_id,
                "took": 1,
                "timed_out": false,
                "hits": {
                    "total": { "value": total, "relation": "eq" },
                    "max_score": null,
                    "hits": page,
                },
            }),
        ))
    }

    fn clear_scroll(&mut self, scroll_id: &str) -> EngineResponse {
        if self.cursors.remove(scroll_id).is_some() {
            self.released.push(scroll_id.to_string());
            EngineResponse::new(200, json!({ "succeeded": true, "num_freed": 1 }))
        } else {
            EngineResponse::new(404, json!({ "succeeded": true, "num_freed": 0 }))
        }
    }

    fn count(&self, name: &str, body: &Value) -> Outcome<EngineResponse> {
        let query = body.get("query").cloned().unwrap_or(json!({ "match_all": {} }));
        let hits = self.matching(name, &query, &Value::Null)?;
        Ok(EngineResponse::new(200, json!({ "count": hits.len() })))
    }
}

impl ScrollContext {
    fn id(&self) -> String {
        format!("c{:04}s{:04}", self.context, self.step)
    }
}

/// Deep-merge `partial` into `target`, the way a partial update does.
fn merge(target: &mut Value, partial: &Map<String, Value>) {
    let Some(object) = target.as_object_mut() else {
        *target = Value::Object(partial.clone());
        return;
    };

    for (key, value) in partial {
        match (object.get_mut(key), value) {
            (Some(existing @ Value::Object(_)), Value::Object(nested)) => merge(existing, nested),
            _ => {
                object.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Values at a dotted path, flattening arrays. A `.keyword` suffix addresses
/// the source field.
fn field_values<'a>(source: &'a Value, field: &str) -> Vec<&'a Value> {
    let field = field.strip_suffix(".keyword").unwrap_or(field);
    let mut current = vec![source];

    for segment in field.split('.') {
        current = current
            .into_iter()
            .filter_map(|value| value.get(segment))
            .flat_map(|value| match value {
                Value::Array(items) => items.iter().collect::<Vec<_>>(),
                other => vec![other],
            })
            .filter(|value| !value.is_null())
            .collect();
    }

    current
}

/// The single `{field: params}` entry of a leaf query.
fn single_entry<'a>(clause: &'a Value, name: &str) -> std::result::Result<(&'a str, &'a Value), String> {
    clause
        .as_object()
        .and_then(|entries| entries.iter().next())
        .map(|(field, params)| (field.as_str(), params))
        .ok_or_else(|| format!("[{}] query malformed", name))
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| !token.is_empty())
        .map(str::to_lowercase)
        .collect()
}

fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn matches(query: &Value, source: &Value) -> std::result::Result<bool, String> {
    let Some((kind, clause)) = query.as_object().and_then(|q| q.iter().next()) else {
        return Err("query malformed, expected a single query object".to_string());
    };

    match kind.as_str() {
        "match_all" => Ok(true),
        "match_none" => Ok(false),
        "term" => {
            let (field, params) = single_entry(clause, kind)?;
            let expected = params.get("value").unwrap_or(params);
            Ok(field_values(source, field).contains(&expected))
        }
        "terms" => {
            let (field, params) = single_entry(clause, kind)?;
            let candidates = params
                .as_array()
                .ok_or_else(|| "[terms] query requires an array of values".to_string())?;
            Ok(field_values(source, field)
                .iter()
                .any(|value| candidates.contains(value)))
        }
        "match" => {
            let (field, params) = single_entry(clause, kind)?;
            let text = params.get("query").unwrap_or(params);
            let wanted = tokens(&text_of(text));
            let present: Vec<String> = field_values(source, field)
                .into_iter()
                .flat_map(|value| tokens(&text_of(value)))
                .collect();

            let all = params["operator"]
                .as_str()
                .is_some_and(|op| op.eq_ignore_ascii_case("and"));
            let mut found = wanted.iter().map(|token| present.contains(token));
            Ok(if all { found.all(|hit| hit) } else { found.any(|hit| hit) })
        }
        "range" => {
            let (field, bounds) = single_entry(clause, kind)?;
            Ok(field_values(source, field).into_iter().any(|value| {
                let within = |bound: &str, accept: fn(Ordering) -> bool| {
                    bounds
                        .get(bound)
                        .is_none_or(|limit| compare_values(value, limit).is_some_and(accept))
                };
                within("gt", Ordering::is_gt)
                    && within("gte", Ordering::is_ge)
                    && within("lt", Ordering::is_lt)
                    && within("lte", Ordering::is_le)
            }))
        }
        "exists" => {
            let field = clause["field"]
                .as_str()
                .ok_or_else(|| "[exists] query requires a field".to_string())?;
            Ok(!field_values(source, field).is_empty())
        }
        "bool" => {
            let clauses = |name: &str| -> Vec<Value> {
                match &clause[name] {
                    Value::Array(items) => items.clone(),
                    Value::Null => Vec::new(),
                    single => vec![single.clone()],
                }
            };

            for required in clauses("must").iter().chain(clauses("filter").iter()) {
                if !matches(required, source)? {
                    return Ok(false);
                }
            }
            for excluded in &clauses("must_not") {
                if matches(excluded, source)? {
                    return Ok(false);
                }
            }

            let should = clauses("should");
            if should.is_empty() || !clauses("must").is_empty() || !clauses("filter").is_empty() {
                return Ok(true);
            }
            for optional in &should {
                if matches(optional, source)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        other => Err(format!("unknown query [{}]", other)),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn sort_keys(sort: &Value) -> std::result::Result<Vec<(String, bool)>, String> {
    let entries = match sort {
        Value::Null => return Ok(Vec::new()),
        Value::Array(entries) => entries.clone(),
        single => vec![single.clone()],
    };

    let mut keys = Vec::new();
    for entry in entries {
        let (field, descending) = match &entry {
            Value::String(field) => (field.clone(), false),
            Value::Object(params) => {
                let (field, order) = params
                    .iter()
                    .next()
                    .ok_or_else(|| "empty sort entry".to_string())?;
                let order = order["order"].as_str().or_else(|| order.as_str()).unwrap_or("asc");
                (field.clone(), order.eq_ignore_ascii_case("desc"))
            }
            _ => return Err(format!("malformed sort entry {}", entry)),
        };

        if field != "_score" && field != "_doc" {
            keys.push((field, descending));
        }
    }

    Ok(keys)
}

fn compare_hits(keys: &[(String, bool)], a: &Value, b: &Value) -> Ordering {
    for (field, descending) in keys {
        let left = field_values(a, field).first().copied();
        let right = field_values(b, field).first().copied();

        let ordering = match (left, right) {
            (Some(x), Some(y)) => {
                let ordering = compare_values(x, y).unwrap_or(Ordering::Equal);
                if *descending { ordering.reverse() } else { ordering }
            }
            // missing values sort last in either direction
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        };

        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn aggregate(aggs: &Value, hits: &[Value]) -> std::result::Result<Value, String> {
    let definitions = aggs
        .as_object()
        .ok_or_else(|| "aggregations must be an object".to_string())?;
    let mut results = Map::new();

    for (name, definition) in definitions {
        let (kind, params) = definition
            .as_object()
            .and_then(|d| d.iter().next())
            .ok_or_else(|| format!("aggregation [{}] is empty", name))?;
        let field = params["field"]
            .as_str()
            .ok_or_else(|| format!("aggregation [{}] requires a field", name))?;

        let values: Vec<&Value> = hits
            .iter()
            .flat_map(|hit| field_values(&hit["_source"], field))
            .collect();
        let numbers: Vec<f64> = values.iter().filter_map(|v| v.as_f64()).collect();

        let result = match kind.as_str() {
            "terms" => {
                let size = params["size"].as_u64().unwrap_or(10) as usize;
                let mut counts: Vec<(Value, u64)> = Vec::new();
                for value in &values {
                    match counts.iter_mut().find(|(key, _)| key == *value) {
                        Some((_, count)) => *count += 1,
                        None => counts.push(((*value).clone(), 1)),
                    }
                }
                counts.sort_by(|(ka, ca), (kb, cb)| {
                    cb.cmp(ca)
                        .then_with(|| compare_values(ka, kb).unwrap_or(Ordering::Equal))
                });

                let other: u64 = counts.iter().skip(size).map(|(_, count)| count).sum();
                let buckets: Vec<Value> = counts
                    .into_iter()
                    .take(size)
                    .map(|(key, count)| json!({ "key": key, "doc_count": count }))
                    .collect();

                json!({
                    "doc_count_error_upper_bound": 0,
                    "sum_other_doc_count": other,
                    "buckets": buckets,
                })
            }
            "avg" => {
                let avg = (!numbers.is_empty())
                    .then(|| numbers.iter().sum::<f64>() / numbers.len() as f64);
                json!({ "value": avg })
            }
            "sum" => json!({ "value": numbers.iter().sum::<f64>() }),
            "min" => json!({ "value": numbers.iter().copied().reduce(f64::min) }),
            "max" => json!({ "value": numbers.iter().copied().reduce(f64::max) }),
            "value_count" => json!({ "value": values.len() }),
            "cardinality" => {
                let mut distinct: Vec<&Value> = Vec::new();
                for value in &values {
                    if !distinct.contains(value) {
                        distinct.push(*value);
                    }
                }
                json!({ "value": distinct.len() })
            }
            other => return Err(format!("unknown aggregation type [{}]", other)),
        };

        results.insert(name.clone(), result);
    }

    Ok(Value::Object(results))
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn engine_with(docs: &[Value]) -> MemoryTransport {
        let engine = MemoryTransport::new();
        engine
            .send(&EngineRequest::CreateIndex {
                index: "people".into(),
                body: json!({ "mappings": { "properties": { "name": { "type": "text" } } } }),
            })
            .await
            .unwrap();
        for doc in docs {
            engine
                .send(&EngineRequest::IndexDocument {
                    index: "people".into(),
                    body: doc.clone(),
                })
                .await
                .unwrap();
        }
        engine
    }

    fn people() -> Vec<Value> {
        vec![
            json!({ "name": "John Smith", "age": 25, "city": "Paris" }),
            json!({ "name": "Jane Doe", "age": 30, "city": "Lyon" }),
            json!({ "name": "Bob Stone", "age": 35, "city": "Paris" }),
        ]
    }

    async fn search(engine: &MemoryTransport, body: Value) -> EngineResponse {
        engine
            .send(&EngineRequest::Search {
                index: "people".into(),
                body,
                scroll: "1m".into(),
            })
            .await
            .unwrap()
    }

    fn names(response: &EngineResponse) -> Vec<String> {
        response.body["hits"]["hits"]
            .as_array()
            .unwrap()
            .iter()
            .map(|hit| hit["_source"]["name"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_query_evaluation() {
        let engine = engine_with(&people()).await;

        let response = search(&engine, json!({ "query": { "term": { "city.keyword": "Paris" } } })).await;
        assert_eq!(names(&response), vec!["John Smith", "Bob Stone"]);

        let response = search(&engine, json!({ "query": { "match": { "name": "jane" } } })).await;
        assert_eq!(names(&response), vec!["Jane Doe"]);

        let response = search(
            &engine,
            json!({ "query": { "range": { "age": { "gt": 25, "lte": 35 } } } }),
        )
        .await;
        assert_eq!(names(&response), vec!["Jane Doe", "Bob Stone"]);

        let response = search(
            &engine,
            json!({ "query": { "bool": {
                "must": [{ "terms": { "city": ["Paris", "Lyon"] } }],
                "must_not": [{ "term": { "age": 35 } }]
            } } }),
        )
        .await;
        assert_eq!(names(&response), vec!["John Smith", "Jane Doe"]);
    }

    #[tokio::test]
    async fn test_unknown_query_is_rejected() {
        let engine = engine_with(&people()).await;
        let response = search(&engine, json!({ "query": { "fuzzy": { "name": "jon" } } })).await;

        assert_eq!(response.status, 400);
        assert_eq!(response.error_type(), Some("parsing_exception"));
    }

    #[tokio::test]
    async fn test_sort_and_aggregations() {
        let engine = engine_with(&people()).await;
        let response = search(
            &engine,
            json!({
                "sort": [{ "age": { "order": "desc" } }],
                "aggs": {
                    "by_city": { "terms": { "field": "city.keyword" } },
                    "avg_age": { "avg": { "field": "age" } }
                }
            }),
        )
        .await;

        assert_eq!(names(&response), vec!["Bob Stone", "Jane Doe", "John Smith"]);
        let aggs = &response.body["aggregations"];
        assert_eq!(aggs["avg_age"]["value"], 30.0);
        assert_eq!(aggs["by_city"]["buckets"][0], json!({ "key": "Paris", "doc_count": 2 }));
    }

    #[tokio::test]
    async fn test_scroll_rotates_ids_and_exhausts() {
        let engine = engine_with(&people()).await;
        let first = search(&engine, json!({ "size": 2 })).await;
        let first_id = first.body["_scroll_id"].as_str().unwrap().to_string();

        let next = engine
            .send(&EngineRequest::Scroll {
                scroll_id: first_id.clone(),
                scroll: "1m".into(),
            })
            .await
            .unwrap();
        let next_id = next.body["_scroll_id"].as_str().unwrap().to_string();

        assert_ne!(first_id, next_id);
        assert_eq!(names(&next), vec!["Bob Stone"]);

        let stale = engine
            .send(&EngineRequest::Scroll {
                scroll_id: first_id,
                scroll: "1m".into(),
            })
            .await
            .unwrap();
        assert_eq!(stale.status, 404);
    }

    #[tokio::test]
    async fn test_from_is_refused_in_a_scroll_context() {
        let engine = engine_with(&people()).await;

        let response = search(&engine, json!({ "from": 2, "size": 2 })).await;
        assert_eq!(response.status, 400);
        assert!(response.error_reason().contains("[from] is not allowed in a scroll context"));
        assert_eq!(engine.open_cursors().await, 0);

        let response = search(&engine, json!({ "from": 0, "size": 2 })).await;
        assert_eq!(response.status, 200);
    }

    #[tokio::test]
    async fn test_get_alias_lists_bound_indices() {
        let engine = engine_with(&[]).await;
        engine
            .send(&EngineRequest::PutAlias {
                index: "people".into(),
                alias: "everyone".into(),
            })
            .await
            .unwrap();

        let bound = engine
            .send(&EngineRequest::GetAlias {
                alias: "everyone".into(),
            })
            .await
            .unwrap();
        assert_eq!(bound.status, 200);
        assert_eq!(bound.body, json!({ "people": { "aliases": { "everyone": {} } } }));

        let missing = engine
            .send(&EngineRequest::GetAlias {
                alias: "nobody".into(),
            })
            .await
            .unwrap();
        assert_eq!(missing.status, 404);
    }

    #[tokio::test]
    async fn test_partial_update_merges_nested_objects() {
        let engine = engine_with(&[json!({ "name": "Jane", "address": { "city": "Lyon", "zip": "69001" } })]).await;
        let id = engine.state.lock().await.indices["people"].docs[0].0.clone();

        let response = engine
            .send(&EngineRequest::UpdateDocument {
                index: "people".into(),
                id: id.clone(),
                body: json!({ "doc": { "address": { "city": "Paris" } } }),
            })
            .await
            .unwrap();
        assert_eq!(response.body["result"], "updated");

        let response = engine
            .send(&EngineRequest::GetDocument {
                index: "people".into(),
                id,
            })
            .await
            .unwrap();
        assert_eq!(
            response.body["_source"]["address"],
            json!({ "city": "Paris", "zip": "69001" })
        );
    }

    #[tokio::test]
    async fn test_alias_with_two_indices_refuses_writes() {
        let engine = engine_with(&[]).await;
        engine
            .send(&EngineRequest::CreateIndex {
                index: "people-v2".into(),
                body: json!({}),
            })
            .await
            .unwrap();
        for index in ["people", "people-v2"] {
            engine
                .send(&EngineRequest::PutAlias {
                    index: index.into(),
                    alias: "everyone".into(),
                })
                .await
                .unwrap();
        }

        let response = engine
            .send(&EngineRequest::IndexDocument {
                index: "everyone".into(),
                body: json!({ "name": "Jane" }),
            })
            .await
            .unwrap();
        assert_eq!(response.status, 400);
    }

    #[tokio::test]
    async fn test_unknown_mapping_type_rejected() {
        let engine = MemoryTransport::new();
        let response = engine
            .send(&EngineRequest::CreateIndex {
                index: "people".into(),
                body: json!({ "mappings": { "properties": { "age": { "type": "integr" } } } }),
            })
            .await
            .unwrap();

        assert_eq!(response.error_type(), Some("mapper_parsing_exception"));
    }

    #[tokio::test]
    async fn test_faults_fire_once_on_the_nth_request() {
        let engine = MemoryTransport::new();
        engine.fail_nth(RequestKind::Ping, 2).await;

        assert!(engine.send(&EngineRequest::Ping).await.is_ok());
        assert!(engine.send(&EngineRequest::Ping).await.is_err());
        assert!(engine.send(&EngineRequest::Ping).await.is_ok());
        assert_eq!(engine.count_of(RequestKind::Ping).await, 3);
    }
}
