//! Integration tests for common Trawler workflows.
//!
//! These tests verify that the most common use cases work correctly against
//! the in-memory engine.

use serde::{Deserialize, Serialize};
use serde_json::json;
use trawler::prelude::*;
use trawler::{NoopObserver, RangeQuery, RequestKind};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Article {
    title: String,
    author: String,
    views: u64,
    published: bool,
}

impl Document for Article {
    fn schema() -> DocumentSchema {
        DocumentSchema::new()
            .field(FieldDescriptor::text("title").with_keyword())
            .field(FieldDescriptor::keyword("author"))
            .field(FieldDescriptor::long("views"))
            .field(FieldDescriptor::boolean("published"))
    }
}

fn article(title: &str, author: &str, views: u64, published: bool) -> Article {
    Article {
        title: title.to_string(),
        author: author.to_string(),
        views,
        published,
    }
}

async fn articles(transport: &MemoryTransport) -> Repository<Article> {
    let config = SearchConfig::new("http://localhost:9200", "articles-2024").with_alias("articles");
    let session = Session::with_transport(transport.clone(), config).with_observer(NoopObserver);

    Repository::open(session, "articles-2024", Some("articles"))
        .await
        .unwrap()
}

// =============================================================================
// Document lifecycle
// =============================================================================

#[tokio::test]
async fn test_document_lifecycle() {
    let transport = MemoryTransport::new();
    let repo = articles(&transport).await;

    // Create
    let id = repo
        .index_document(&article("Scrolling for fun", "ana", 10, false))
        .await
        .unwrap();

    // Read
    let stored = repo.get_document_by_id(&id).await.unwrap();
    assert_eq!(stored.title, "Scrolling for fun");

    // Partial update
    repo.update_document(&id, &json!({ "published": true, "views": 11 }))
        .await
        .unwrap();
    let stored = repo.get_document_by_id(&id).await.unwrap();
    assert!(stored.published);
    assert_eq!(stored.views, 11);
    assert_eq!(stored.author, "ana");

    // Delete, then the id is gone everywhere
    repo.delete_document(&id).await.unwrap();
    assert!(!repo.document_exists(&id).await.unwrap());
    assert!(repo.delete_document(&id).await.unwrap_err().is_not_found());
}

// =============================================================================
// Search workflows
// =============================================================================

#[tokio::test]
async fn test_filtered_sorted_search_with_stats() {
    let transport = MemoryTransport::new();
    let repo = articles(&transport).await;

    for (title, author, views, published) in [
        ("Alias swaps", "ana", 120, true),
        ("Mapping basics", "ben", 45, true),
        ("Draft: sharding", "ana", 3, false),
        ("Scroll internals", "cleo", 300, true),
        ("Relevance tuning", "ben", 80, true),
    ] {
        repo.index_document(&article(title, author, views, published))
            .await
            .unwrap();
    }

    let request = PageRequest::new(
        Query::bool()
            .filter(Query::term("published", true))
            .must_not(Query::term("author", "cleo"))
            .build(),
    )
    .with_sort(Sort::new().by("views", SortOrder::Desc))
    .with_page_size(2)
    .with_aggregations(
        Aggregations::new()
            .add("authors", Aggregation::terms("author"))
            .add("total_views", Aggregation::sum("views")),
    );

    let results = repo.search(&request).await.unwrap();

    let titles: Vec<&str> = results.documents().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["Alias swaps", "Relevance tuning", "Mapping basics"]);
    assert_eq!(results.total, 3);
    assert_eq!(
        results.aggregation("total_views").unwrap().metric_value(),
        Some(245.0)
    );
    assert_eq!(
        results.aggregation("authors").unwrap().buckets().unwrap()[0]["key"],
        "ben"
    );
    assert_eq!(transport.open_cursors().await, 0);
}

#[tokio::test]
async fn test_count_matches_search() {
    let transport = MemoryTransport::new();
    let repo = articles(&transport).await;

    for views in 0..12u64 {
        repo.index_document(&article(&format!("Post {views}"), "ana", views, views % 2 == 0))
            .await
            .unwrap();
    }

    let query = Query::from(RangeQuery::new("views").gte(4));
    let counted = repo.count(&query).await.unwrap();
    let searched = repo
        .search(&PageRequest::new(query).with_page_size(5))
        .await
        .unwrap();

    assert_eq!(counted, 8);
    assert_eq!(searched.len() as u64, counted);
}

// =============================================================================
// Index administration
// =============================================================================

#[tokio::test]
async fn test_reindex_behind_alias() {
    let transport = MemoryTransport::new();
    let v1 = articles(&transport).await;
    v1.index_document(&article("Old post", "ana", 1, true))
        .await
        .unwrap();

    // bring up a second generation and move the alias over
    let session = v1.session().clone();
    IndexBootstrapper::new(session.clone())
        .ensure(
            &IndexDescriptor::new("articles-2025", None),
            &Article::schema(),
        )
        .await
        .unwrap();

    let aliases = v1.aliases();
    aliases.delete_alias("articles", "articles-2024").await.unwrap();
    aliases.create_alias("articles", "articles-2025").await.unwrap();

    let v2 = Repository::<Article>::open(session, "articles-2025", Some("articles"))
        .await
        .unwrap();
    v2.index_document(&article("New post", "ben", 1, true))
        .await
        .unwrap();

    let visible = v2.search(&PageRequest::default()).await.unwrap();
    let titles: Vec<&str> = visible.documents().map(|a| a.title.as_str()).collect();
    assert_eq!(titles, vec!["New post"]);

    aliases.delete_index("articles-2024").await.unwrap();
    assert!(!aliases.index_exists("articles-2024").await.unwrap());
    assert_eq!(transport.count_of(RequestKind::CreateIndex).await, 2);
}

#[cfg(feature = "config")]
#[test]
fn test_config_from_settings() {
    use trawler::trawler_config::{FileFormat, Settings};

    let settings = Settings::new();
    settings
        .load_str(
            r#"{ "url": "http://a:9200,http://b:9200", "index_name": "articles-2024", "alias_name": "articles", "number_of_replicas": "1" }"#,
            FileFormat::Json,
        )
        .unwrap();

    let config = SearchConfig::from_settings(&settings).unwrap();
    assert_eq!(config.hosts().len(), 2);
    assert_eq!(config.alias(), "articles");
    assert_eq!(config.number_of_replicas, 1);
    assert!(SessionFactory::build(&config).is_ok());
}
