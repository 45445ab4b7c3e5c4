mod support;

use std::collections::HashMap;
use std::sync::Arc;

use lazyfs::cache::CacheStore;
use lazyfs::error::Error;
use lazyfs::gate::FetchGate;
use lazyfs::index::IndexClient;
use lazyfs::listing;
use lazyfs::tree::LazyFolder;
use lazyfs::walk;
use support::{Response, TestServer};

fn fixture() -> (TestServer, Arc<LazyFolder>, IndexClient) {
    let mut routes = HashMap::new();
    routes.insert(
        "GET /".to_string(),
        Response::Html(r#"<a href="a/">a/</a><a href="root.txt">root.txt</a>"#.to_string()),
    );
    routes.insert(
        "GET /a/".to_string(),
        Response::Html(r#"<a href="../">../</a><a href="x.txt">x.txt</a><a href="b/">b/</a>"#.to_string()),
    );
    routes.insert("GET /a/b/".to_string(), Response::Html(String::new()));
    routes.insert("GET /root.txt".to_string(), Response::Bytes(b"root contents".to_vec()));
    routes.insert("GET /a/x.txt".to_string(), Response::Bytes(b"nested contents, a bit longer".to_vec()));

    let server = TestServer::start(routes);
    let root_url = server.url("/");
    let gate = FetchGate::new(8);
    let http = reqwest::Client::new();
    let index = IndexClient::new(http, gate, &root_url).unwrap();
    let root = LazyFolder::new_root(root_url);
    (server, root, index)
}

#[tokio::test]
async fn lists_root_children() {
    let (_server, root, index) = fixture();
    let entries = listing::list(&root, "", &index).await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["a", "root.txt"]);

    let file_entry = entries.iter().find(|e| e.name == "root.txt").unwrap();
    assert_eq!(file_entry.size_approx, Some(13));
}

#[tokio::test]
async fn walks_nested_folders_and_files() {
    let (_server, root, index) = fixture();
    let b = walk::walk_to_folder(&root, "a/b", &index).await.unwrap();
    assert!(b.logical_path() == "a/b");

    let err = walk::walk(&root, "a/x.txt/nope", &index).await.unwrap_err();
    assert!(matches!(err, Error::NotAFolder(_)));

    let err = walk::walk(&root, "does-not-exist", &index).await.unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
}

#[tokio::test]
async fn lists_recursively_in_sorted_order() {
    let (_server, root, index) = fixture();
    let entries = listing::list_recursive(&root, "", &index).await.unwrap();
    let paths: Vec<&str> = entries.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(paths, vec!["a", "a/b", "a/x.txt", "root.txt"]);
}

#[tokio::test]
async fn du_approximate_sums_nested_file_sizes() {
    let (_server, root, index) = fixture();
    let total = listing::du_approximate(&root, "", &index).await.unwrap();
    assert_eq!(total, 13 + 29);
}

#[tokio::test]
async fn repeated_walks_return_the_same_folder_identity() {
    let (_server, root, index) = fixture();
    let first = walk::walk_to_folder(&root, "a", &index).await.unwrap();
    let second = walk::walk_to_folder(&root, "a", &index).await.unwrap();
    assert!(Arc::ptr_eq(&first, &second));
}

/// spec.md §8 S1: root serves `a/`, `b/`, `readme.txt` (len 12); `list ""`
/// must print a listing containing `a/`, `b/`, and `readme.txt 12 bytes`
/// literally — not an abbreviated-unit size.
#[tokio::test]
async fn cli_list_output_matches_s1_acceptance_scenario() {
    let mut routes = HashMap::new();
    routes.insert(
        "GET /".to_string(),
        Response::Html(r#"<a href="a/">a/</a><a href="b/">b/</a><a href="readme.txt">readme.txt</a>"#.to_string()),
    );
    routes.insert("GET /a/".to_string(), Response::Html(String::new()));
    routes.insert("GET /b/".to_string(), Response::Html(String::new()));
    routes.insert("GET /readme.txt".to_string(), Response::Bytes(b"123456789012".to_vec()));

    let server = TestServer::start(routes);
    let root_url = server.url("/");
    let gate = FetchGate::new(8);
    let http = reqwest::Client::new();
    let index = IndexClient::new(http, gate, &root_url).unwrap();
    let root = LazyFolder::new_root(root_url);

    let entries = listing::list(&root, "", &index).await.unwrap();
    let lines: Vec<String> = entries.iter().map(listing::format_entry).collect();

    assert_eq!(lines, vec!["a/", "b/", "readme.txt 12 bytes"]);
}

#[tokio::test]
async fn prefetch_files_materializes_every_descendant() {
    let (_server, root, index) = fixture();
    let dir = tempfile::tempdir().unwrap();
    let cache = CacheStore::new(dir.path(), reqwest::Client::new(), FetchGate::new(8));

    listing::prefetch_files(&root, "", &index, &cache).await.unwrap();

    assert_eq!(tokio::fs::read(dir.path().join("root.txt")).await.unwrap(), b"root contents");
    assert_eq!(
        tokio::fs::read(dir.path().join("a").join("x.txt")).await.unwrap(),
        b"nested contents, a bit longer"
    );
}
