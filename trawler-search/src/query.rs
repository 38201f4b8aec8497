//! Query, sort and aggregation fragments attached to outgoing requests.
//!
//! These are plain data; the client never interprets them beyond rendering
//! JSON.

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Query types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Query {
    /// Match all documents.
    #[default]
    MatchAll,
    /// Full-text match query.
    Match(MatchQuery),
    /// Term query for exact matches.
    Term(TermQuery),
    /// Terms query for multiple exact matches.
    Terms(TermsQuery),
    /// Range query.
    Range(RangeQuery),
    /// Bool query for combining queries.
    Bool(BoolQuery),
    /// Exists query.
    Exists(ExistsQuery),
    /// Raw JSON query.
    Raw(Value),
}

impl Query {
    /// Match all documents.
    pub fn match_all() -> Self {
        Query::MatchAll
    }

    /// Full-text match on `field`.
    pub fn matches(field: impl Into<String>, query: impl Into<String>) -> Self {
        Query::Match(MatchQuery::new(field, query))
    }

    /// Exact match on `field`.
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Query::Term(TermQuery::new(field, value))
    }

    /// Exact match on any of `values`.
    pub fn terms(field: impl Into<String>, values: Vec<Value>) -> Self {
        Query::Terms(TermsQuery::new(field, values))
    }

    /// Documents where `field` is present.
    pub fn exists(field: impl Into<String>) -> Self {
        Query::Exists(ExistsQuery {
            field: field.into(),
        })
    }

    /// Start a bool query.
    pub fn bool() -> BoolQueryBuilder {
        BoolQueryBuilder::new()
    }

    /// Convert query to JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Query::MatchAll => json!({ "match_all": {} }),
            Query::Match(m) => m.to_json(),
            Query::Term(t) => t.to_json(),
            Query::Terms(t) => t.to_json(),
            Query::Range(r) => r.to_json(),
            Query::Bool(b) => b.to_json(),
            Query::Exists(e) => e.to_json(),
            Query::Raw(v) => v.clone(),
        }
    }
}

impl From<RangeQuery> for Query {
    fn from(range: RangeQuery) -> Self {
        Query::Range(range)
    }
}

/// Match query for full-text search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchQuery {
    /// Field to search.
    pub field: String,
    /// Search query.
    pub query: String,
    /// Operator (and/or).
    pub operator: Option<String>,
}

impl MatchQuery {
    /// Create a new match query.
    pub fn new(field: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            query: query.into(),
            operator: None,
        }
    }

    /// Set the operator.
    pub fn operator(mut self, op: impl Into<String>) -> Self {
        self.operator = Some(op.into());
        self
    }

    fn to_json(&self) -> Value {
        let mut query = json!({ "query": self.query });

        if let Some(op) = &self.operator {
            query["operator"] = json!(op);
        }

        json!({ "match": { &self.field: query } })
    }
}

/// Term query for exact matching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermQuery {
    /// Field name.
    pub field: String,
    /// Exact value to match.
    pub value: Value,
}

impl TermQuery {
    /// Create a new term query.
    pub fn new(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    fn to_json(&self) -> Value {
        json!({ "term": { &self.field: self.value } })
    }
}

/// Terms query for matching multiple values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TermsQuery {
    /// Field name.
    pub field: String,
    /// Values to match.
    pub values: Vec<Value>,
}

impl TermsQuery {
    /// Create a new terms query.
    pub fn new(field: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            field: field.into(),
            values,
        }
    }

    fn to_json(&self) -> Value {
        json!({ "terms": { &self.field: self.values } })
    }
}

/// Range query for numeric/date ranges.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RangeQuery {
    /// Field name.
    pub field: String,
    /// Greater than.
    pub gt: Option<Value>,
    /// Greater than or equal.
    pub gte: Option<Value>,
    /// Less than.
    pub lt: Option<Value>,
    /// Less than or equal.
    pub lte: Option<Value>,
}

impl RangeQuery {
    /// Create a new range query.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            gt: None,
            gte: None,
            lt: None,
            lte: None,
        }
    }

    /// Set greater than.
    pub fn gt(mut self, value: impl Into<Value>) -> Self {
        self.gt = Some(value.into());
        self
    }

    /// Set greater than or equal.
    pub fn gte(mut self, value: impl Into<Value>) -> Self {
        self.gte = Some(value.into());
        self
    }

    /// Set less than.
    pub fn lt(mut self, value: impl Into<Value>) -> Self {
        self.lt = Some(value.into());
        self
    }

    /// Set less than or equal.
    pub fn lte(mut self, value: impl Into<Value>) -> Self {
        self.lte = Some(value.into());
        self
    }

    fn to_json(&self) -> Value {
        let mut range = Map::new();

        if let Some(v) = &self.gt {
            range.insert("gt".to_string(), v.clone());
        }
        if let Some(v) = &self.gte {
            range.insert("gte".to_string(), v.clone());
        }
        if let Some(v) = &self.lt {
            range.insert("lt".to_string(), v.clone());
        }
        if let Some(v) = &self.lte {
            range.insert("lte".to_string(), v.clone());
        }

        json!({ "range": { &self.field: range } })
    }
}

/// Bool query for combining multiple queries.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BoolQuery {
    /// Must match (AND).
    pub must: Vec<Query>,
    /// Should match (OR).
    pub should: Vec<Query>,
    /// Must not match (NOT).
    pub must_not: Vec<Query>,
    /// Filter (non-scoring).
    pub filter: Vec<Query>,
}

impl BoolQuery {
    fn to_json(&self) -> Value {
        let mut bool_query = Map::new();

        for (clause, queries) in [
            ("must", &self.must),
            ("should", &self.should),
            ("must_not", &self.must_not),
            ("filter", &self.filter),
        ] {
            if !queries.is_empty() {
                bool_query.insert(
                    clause.to_string(),
                    Value::Array(queries.iter().map(Query::to_json).collect()),
                );
            }
        }

        json!({ "bool": bool_query })
    }
}

/// Builder for bool queries.
#[derive(Debug, Clone, Default)]
pub struct BoolQueryBuilder {
    query: BoolQuery,
}

impl BoolQueryBuilder {
    /// Create a new bool query builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a must clause.
    pub fn must(mut self, query: Query) -> Self {
        self.query.must.push(query);
        self
    }

    /// Add a should clause.
    pub fn should(mut self, query: Query) -> Self {
        self.query.should.push(query);
        self
    }

    /// Add a must_not clause.
    pub fn must_not(mut self, query: Query) -> Self {
        self.query.must_not.push(query);
        self
    }

    /// Add a filter clause.
    pub fn filter(mut self, query: Query) -> Self {
        self.query.filter.push(query);
        self
    }

    /// Build the query.
    pub fn build(self) -> Query {
        Query::Bool(self.query)
    }
}

/// Exists query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExistsQuery {
    /// Field name.
    pub field: String,
}

impl ExistsQuery {
    fn to_json(&self) -> Value {
        json!({ "exists": { "field": self.field } })
    }
}

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    /// Engine name of the order.
    pub fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct SortField {
    /// Field name, or `_score`.
    pub field: String,
    /// Direction.
    pub order: SortOrder,
}

/// Ordered list of sort keys. Empty means engine relevance order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Sort {
    fields: Vec<SortField>,
}

impl Sort {
    /// No explicit sort.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sort by `field`, after any keys already added.
    pub fn by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.fields.push(SortField {
            field: field.into(),
            order,
        });
        self
    }

    /// Sort by relevance.
    pub fn by_score(self, order: SortOrder) -> Self {
        self.by("_score", order)
    }

    /// Sort keys in priority order.
    pub fn fields(&self) -> &[SortField] {
        &self.fields
    }

    /// True when no key was added.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Render as a `sort` array.
    pub fn to_json(&self) -> Value {
        Value::Array(
            self.fields
                .iter()
                .map(|f| json!({ &f.field: { "order": f.order.as_str() } }))
                .collect(),
        )
    }
}

/// Aggregation types.
#[derive(Debug, Clone, PartialEq)]
pub enum Aggregation {
    /// Terms aggregation.
    Terms {
        /// Field to aggregate on.
        field: String,
        /// Maximum number of buckets.
        size: Option<u64>,
    },
    /// Avg aggregation.
    Avg {
        /// Field to average.
        field: String,
    },
    /// Sum aggregation.
    Sum {
        /// Field to sum.
        field: String,
    },
    /// Min aggregation.
    Min {
        /// Field to find minimum.
        field: String,
    },
    /// Max aggregation.
    Max {
        /// Field to find maximum.
        field: String,
    },
    /// Count of values.
    ValueCount {
        /// Field to count.
        field: String,
    },
    /// Cardinality (unique count) aggregation.
    Cardinality {
        /// Field to count unique values.
        field: String,
    },
}

impl Aggregation {
    /// Create a terms aggregation.
    pub fn terms(field: impl Into<String>) -> Self {
        Aggregation::Terms {
            field: field.into(),
            size: None,
        }
    }

    /// Create a terms aggregation returning at most `size` buckets.
    pub fn terms_with_size(field: impl Into<String>, size: u64) -> Self {
        Aggregation::Terms {
            field: field.into(),
            size: Some(size),
        }
    }

    /// Create an average aggregation.
    pub fn avg(field: impl Into<String>) -> Self {
        Aggregation::Avg {
            field: field.into(),
        }
    }

    /// Create a sum aggregation.
    pub fn sum(field: impl Into<String>) -> Self {
        Aggregation::Sum {
            field: field.into(),
        }
    }

    /// Create a min aggregation.
    pub fn min(field: impl Into<String>) -> Self {
        Aggregation::Min {
            field: field.into(),
        }
    }

    /// Create a max aggregation.
    pub fn max(field: impl Into<String>) -> Self {
        Aggregation::Max {
            field: field.into(),
        }
    }

    /// Convert to JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Aggregation::Terms { field, size } => {
                let mut terms = json!({ "field": field });
                if let Some(s) = size {
                    terms["size"] = json!(s);
                }
                json!({ "terms": terms })
            }
            Aggregation::Avg { field } => json!({ "avg": { "field": field } }),
            Aggregation::Sum { field } => json!({ "sum": { "field": field } }),
            Aggregation::Min { field } => json!({ "min": { "field": field } }),
            Aggregation::Max { field } => json!({ "max": { "field": field } }),
            Aggregation::ValueCount { field } => json!({ "value_count": { "field": field } }),
            Aggregation::Cardinality { field } => json!({ "cardinality": { "field": field } }),
        }
    }
}

/// Named aggregations sent with the first search request.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Aggregations {
    entries: Vec<(String, Aggregation)>,
}

impl Aggregations {
    /// No aggregations.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `aggregation` under `name`.
    pub fn add(mut self, name: impl Into<String>, aggregation: Aggregation) -> Self {
        self.entries.push((name.into(), aggregation));
        self
    }

    /// True when nothing was added.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render as an `aggs` object.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.entries
                .iter()
                .map(|(name, agg)| (name.clone(), agg.to_json()))
                .collect(),
        )
    }
}

/// One aggregation's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    /// Raw aggregation result.
    pub value: Value,
}

impl AggregationResult {
    /// Get a metric value (avg, sum, min, max, value_count).
    pub fn metric_value(&self) -> Option<f64> {
        self.value["value"].as_f64()
    }

    /// Get buckets from bucket aggregation.
    pub fn buckets(&self) -> Option<Vec<Value>> {
        self.value["buckets"].as_array().cloned()
    }
}
