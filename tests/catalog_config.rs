// tests/catalog_config.rs
//
// Catalog resolution via FEEDS_CONFIG_PATH. These mutate process env, so they
// run serially.

use std::fs;

use serial_test::serial;

use newswire_relay::config::catalog::ENV_FEEDS_CONFIG_PATH;
use newswire_relay::config::FeedCatalog;

#[test]
#[serial]
fn env_path_wins() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("feeds.json");
    fs::write(
        &path,
        r#"{
            "feeds": [{ "url": "https://rss.uol.com.br/feed/noticias.xml", "emoji": "🟡" }],
            "sources": [{ "pattern": "uol.com.br", "name": "UOL" }],
            "blocked_keywords": ["BBB"]
        }"#,
    )
    .unwrap();

    std::env::set_var(ENV_FEEDS_CONFIG_PATH, &path);
    let catalog = FeedCatalog::load_default();
    std::env::remove_var(ENV_FEEDS_CONFIG_PATH);

    let catalog = catalog.unwrap();
    let feeds = catalog.feed_sources();
    assert_eq!(feeds.len(), 1);
    assert_eq!(feeds[0].name, "UOL");
    assert_eq!(feeds[0].emoji, "🟡");
    assert_eq!(catalog.blocked_keywords, vec!["BBB".to_string()]);
}

#[test]
#[serial]
fn env_path_to_missing_file_is_an_error() {
    std::env::set_var(ENV_FEEDS_CONFIG_PATH, "/definitely/not/here/feeds.toml");
    let res = FeedCatalog::load_default();
    std::env::remove_var(ENV_FEEDS_CONFIG_PATH);
    assert!(res.is_err());
}

#[test]
#[serial]
fn bundled_catalog_parses() {
    // cargo runs integration tests from the package root
    let catalog = FeedCatalog::load_from(std::path::Path::new("config/feeds.toml")).unwrap();
    let feeds = catalog.feed_sources();
    assert!(!feeds.is_empty());
    assert!(feeds.iter().all(|f| f.url.starts_with("https://")));
    assert!(feeds.iter().any(|f| f.name == "Folha"));
    assert!(!catalog.blocked_keywords.is_empty());
}
