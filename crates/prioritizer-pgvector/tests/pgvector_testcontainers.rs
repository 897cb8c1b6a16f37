//! Integration tests for `PgVectorStore` using testcontainers.
//! These tests automatically start PostgreSQL (with the pgvector
//! extension) in Docker and clean up afterward.
//!
//! Run these tests with:
//! ```bash
//! cargo test -p prioritizer-pgvector --test pgvector_testcontainers
//! ```

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::Arc;
use std::time::Duration;

use prioritizer_core::store::EmbeddingStore;
use prioritizer_pgvector::PgVectorStore;
use prioritizer_testing::MockEmbeddingClient;
use testcontainers::core::{ContainerPort, WaitFor};
use testcontainers::runners::AsyncRunner;
use testcontainers::GenericImage;

fn build_connection_string(host: &str, port: u16) -> String {
    format!("host={host} port={port} user=postgres password=postgres dbname=postgres")
}

/// The official `postgres` testcontainers module image does not carry the
/// pgvector extension, so these tests pull the `pgvector/pgvector` image
/// directly (same image the module-level doc comment tells operators to run
/// locally).
fn pgvector_image() -> GenericImage {
    GenericImage::new("pgvector/pgvector", "pg16")
        .with_exposed_port(ContainerPort::Tcp(5432))
        .with_wait_for(WaitFor::message_on_stderr(
            "database system is ready to accept connections",
        ))
        .with_env_var("POSTGRES_PASSWORD", "postgres")
}

#[tokio::test]
async fn semantic_search_ranks_indexed_tasks_by_similarity() {
    let container = pgvector_image().start().await.unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let connection_string = build_connection_string(&host.to_string(), port);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let embedding_client = Arc::new(MockEmbeddingClient::new());
    let store = PgVectorStore::new(
        &connection_string,
        "task_embedding_index",
        embedding_client.clone(),
    )
    .await
    .expect("failed to create PgVectorStore");

    let tasks = [
        ("task-1", "Ship iOS beta release to TestFlight"),
        ("task-2", "Ship Android beta release to Play Store"),
        ("task-3", "Write quarterly marketing budget report"),
    ];
    for (task_id, task_text) in tasks {
        let embedding = store.embed(task_text).await.unwrap();
        store
            .index_task(task_id, task_text, None, &embedding)
            .await
            .unwrap();
    }

    let query_vec = store.embed("Ship iOS beta release to TestFlight").await.unwrap();
    let hits = store.semantic_search(&query_vec, 5, 0.0).await.unwrap();

    assert!(!hits.is_empty());
    assert_eq!(hits[0].task_id, "task-1");
    assert!(hits[0].similarity >= hits.last().unwrap().similarity);
}

#[tokio::test]
async fn semantic_search_respects_threshold() {
    let container = pgvector_image().start().await.unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let connection_string = build_connection_string(&host.to_string(), port);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let embedding_client = Arc::new(MockEmbeddingClient::new());
    let store = PgVectorStore::new(&connection_string, "task_embedding_index", embedding_client)
        .await
        .unwrap();

    let embedding = store.embed("Draft the referral program landing page").await.unwrap();
    store
        .index_task("task-only", "Draft the referral program landing page", None, &embedding)
        .await
        .unwrap();

    let unrelated_query = store.embed("completely unrelated query text").await.unwrap();
    let hits = store
        .semantic_search(&unrelated_query, 5, 0.999)
        .await
        .unwrap();
    assert!(hits.is_empty());
}

#[tokio::test]
async fn removed_task_no_longer_matches_search() {
    let container = pgvector_image().start().await.unwrap();
    let host = container.get_host().await.unwrap();
    let port = container.get_host_port_ipv4(5432).await.unwrap();
    let connection_string = build_connection_string(&host.to_string(), port);

    tokio::time::sleep(Duration::from_secs(2)).await;

    let embedding_client = Arc::new(MockEmbeddingClient::new());
    let store = PgVectorStore::new(&connection_string, "task_embedding_index", embedding_client)
        .await
        .unwrap();

    let embedding = store.embed("Archive the stale onboarding doc").await.unwrap();
    store
        .index_task("task-archive", "Archive the stale onboarding doc", None, &embedding)
        .await
        .unwrap();
    store.remove_task("task-archive").await.unwrap();

    let hits = store.semantic_search(&embedding, 5, 0.0).await.unwrap();
    assert!(hits.iter().all(|h| h.task_id != "task-archive"));
}
