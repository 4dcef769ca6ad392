//! Search and memory services over an isolated in-memory database.

use chrono::{Duration, Utc};
use logbook_core::{
    EdgeType, LogEvent, LogLevel, MemoryService, RelationshipExtractor, SearchFilters,
    SearchService,
};
use logbook_store::{new_isolated_database, DbConfig, IsolatedDatabase};
use serde_json::{json, Map};

async fn seeded() -> IsolatedDatabase {
    let db = new_isolated_database(&DbConfig::default()).await.unwrap();
    let events = vec![
        LogEvent::new(LogLevel::Error, "Connection timeout while calling billing")
            .with_execution("exec-a", "billing")
            .with_tag("network"),
        LogEvent::new(LogLevel::Info, "Cache warmed in 40ms").with_execution("exec-a", "billing"),
        LogEvent::new(LogLevel::Warning, "Slow response, timeout nearly reached")
            .with_execution("exec-b", "reports")
            .with_tag("network")
            .with_tag("slow"),
        LogEvent::new(LogLevel::Error, "Disk quota exceeded").with_execution("exec-b", "reports"),
    ];
    db.handle().insert_events(&events).await.unwrap();
    db
}

#[tokio::test]
async fn full_text_search_matches_message_words() {
    let db = seeded().await;
    let search = SearchService::new(db.handle().clone());

    let hits = search
        .search("timeout", &SearchFilters::new(), 10)
        .await
        .unwrap();
    assert_eq!(hits.len(), 2);
    assert!(hits.iter().all(|h| h.event.message.to_lowercase().contains("timeout")));
    assert!(hits.iter().all(|h| h.id.starts_with("log_events:")));
    assert!(hits.windows(2).all(|w| w[0].score >= w[1].score));

    db.drop_database().await.unwrap();
}

#[tokio::test]
async fn filters_narrow_results() {
    let db = seeded().await;
    let search = SearchService::new(db.handle().clone());

    let errors = search
        .search("", &SearchFilters::new().level(LogLevel::Error), 10)
        .await
        .unwrap();
    assert_eq!(errors.len(), 2);
    assert!(errors.iter().all(|h| h.event.level == LogLevel::Error));

    let scoped = search
        .search("timeout", &SearchFilters::new().script("reports"), 10)
        .await
        .unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].event.execution_id, "exec-b");

    let tagged = search
        .search("", &SearchFilters::new().tag("network").tag("slow"), 10)
        .await
        .unwrap();
    assert_eq!(tagged.len(), 1);

    let mut raw = Map::new();
    raw.insert("execution_id".into(), json!("exec-a"));
    raw.insert("tags".into(), json!("network"));
    raw.insert("colour".into(), json!("blue"));
    let from_map = search
        .search("", &SearchFilters::from_map(&raw), 10)
        .await
        .unwrap();
    assert_eq!(from_map.len(), 1);
    assert_eq!(from_map[0].event.script_name, "billing");

    let limited = search.search("", &SearchFilters::new(), 3).await.unwrap();
    assert_eq!(limited.len(), 3);

    db.drop_database().await.unwrap();
}

#[tokio::test]
async fn memory_search_ranks_and_counts_access() {
    let db = new_isolated_database(&DbConfig::default()).await.unwrap();
    let memory = MemoryService::new(db.handle().clone());

    memory
        .add("Retry backoff avoids rate limits", "pattern", Map::new())
        .await
        .unwrap();
    memory
        .add("Use retry with jittered backoff", "pattern", Map::new())
        .await
        .unwrap();
    memory
        .add("Retry only idempotent calls", "rule", Map::new())
        .await
        .unwrap();
    memory
        .add("Pin dependency versions", "rule", Map::new())
        .await
        .unwrap();

    let hits = memory.search("retry backoff", None, 5).await.unwrap();
    assert_eq!(hits.len(), 3);
    assert_eq!(hits[0].learning.content, "Retry backoff avoids rate limits");
    assert_eq!(hits[0].score, 1.5);
    assert_eq!(hits[1].score, 1.0);
    assert_eq!(hits[2].score, 0.5);
    assert!(hits.iter().all(|h| h.learning.access_count == 1));

    let rules = memory.search("retry", Some("rule"), 5).await.unwrap();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].learning.access_count, 2);

    let stats = memory.stats(None).await.unwrap();
    assert_eq!(stats.total, 4);
    assert_eq!(stats.by_type.get("pattern"), Some(&2));
    assert_eq!(stats.by_type.get("rule"), Some(&2));
    assert_eq!(stats.most_accessed[0].content, "Retry only idempotent calls");
    assert_eq!(stats.most_accessed[0].access_count, 2);

    let recent = memory.recent(Some("rule"), 10).await.unwrap();
    assert_eq!(recent.len(), 2);
    assert_eq!(recent[0].content, "Pin dependency versions");

    db.drop_database().await.unwrap();
}

#[tokio::test]
async fn memory_search_prefers_older_full_match() {
    let db = new_isolated_database(&DbConfig::default()).await.unwrap();
    let memory = MemoryService::new(db.handle().clone());

    memory
        .add("Stale lock files block the deploy script", "insight", Map::new())
        .await
        .unwrap();
    for i in 0..6 {
        tokio::time::sleep(std::time::Duration::from_millis(2)).await;
        memory
            .add(&format!("Deploy step {i} took longer than usual"), "insight", Map::new())
            .await
            .unwrap();
    }

    let hits = memory.search("stale lock deploy", None, 1).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].learning.content, "Stale lock files block the deploy script");
    assert_eq!(hits[0].score, 1.0);

    db.drop_database().await.unwrap();
}

#[tokio::test]
async fn error_patterns_group_recurring_failures() {
    let db = new_isolated_database(&DbConfig::default()).await.unwrap();
    let handle = db.handle().clone();

    let mut stale = LogEvent::new(LogLevel::Error, "Upload 5 error: bucket missing")
        .with_execution("exec-old", "uploader");
    stale.timestamp = Utc::now() - Duration::days(3);
    let mut first = LogEvent::new(LogLevel::Error, "Upload 17 error: bucket missing")
        .with_execution("exec-c", "uploader");
    first.timestamp = Utc::now() - Duration::minutes(5);
    let fix = LogEvent::new(LogLevel::Info, "Fixed by creating the bucket")
        .with_execution("exec-c", "uploader");
    let second = LogEvent::new(LogLevel::Critical, "Upload 18 error: bucket missing")
        .with_execution("exec-d", "uploader");
    let lone = LogEvent::new(LogLevel::Error, "Certificate expired")
        .with_execution("exec-d", "uploader");
    handle
        .insert_events(&[stale, first.clone(), fix.clone(), second.clone(), lone])
        .await
        .unwrap();

    let relationships = RelationshipExtractor::new(handle.clone());
    let outcome = relationships.extract(&first, &fix, &Map::new()).await;
    assert!(outcome.errors.is_empty());
    let memory = MemoryService::new(handle.clone());
    let learning = memory
        .add("Create the bucket before uploading", "fix", Map::new())
        .await
        .unwrap();
    relationships
        .link_learning(
            &format!("log_events:{}", second.id),
            &learning.id,
            EdgeType::FixedBy,
            0.8,
            Map::new(),
        )
        .await
        .unwrap();

    let search = SearchService::new(handle.clone());
    let patterns = search
        .error_patterns(Some(Duration::hours(1)), 2)
        .await
        .unwrap();
    assert_eq!(patterns.len(), 1);
    let pattern = &patterns[0];
    assert_eq!(pattern.pattern, "Upload N error: bucket missing");
    assert_eq!(pattern.count, 2);
    assert_eq!(
        pattern.sample_messages,
        vec![
            "Upload 18 error: bucket missing".to_string(),
            "Upload 17 error: bucket missing".to_string(),
        ]
    );
    assert_eq!(pattern.resolutions.len(), 2);
    assert!(pattern
        .resolutions
        .iter()
        .any(|r| r.kind == "log_events" && r.description == "Fixed by creating the bucket"));
    assert!(pattern
        .resolutions
        .iter()
        .any(|r| r.kind == "agent_learnings" && r.description == "Create the bucket before uploading"));

    let all_time = search.error_patterns(None, 2).await.unwrap();
    assert_eq!(all_time[0].count, 3);
    assert_eq!(all_time[0].sample_messages.len(), 3);

    let singles = search.error_patterns(None, 1).await.unwrap();
    assert_eq!(singles.len(), 2);
    assert_eq!(singles[1].pattern, "Certificate expired");

    db.drop_database().await.unwrap();
}
