//! `githubapi://` iterator tests against a mocked contents client.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use wof_iterate::contract::{ContentEntry, ContentFile, Contents, MockContentsClient};
use wof_iterate::github::api::GitHubApiIterator;
use wof_iterate::{IterateError, RecordIterator};

const URI: &str = "githubapi://whosonfirst-data/whosonfirst-data-admin-ca?access_token=test-token";

fn file(path: &str, body: &str) -> Contents {
    Contents::File(ContentFile {
        path: path.to_string(),
        encoding: Some("base64".into()),
        content: Some(STANDARD.encode(body)),
    })
}

fn dir(entries: &[(&str, &str)]) -> Contents {
    Contents::Directory(
        entries
            .iter()
            .map(|(path, kind)| ContentEntry {
                path: path.to_string(),
                kind: kind.to_string(),
            })
            .collect(),
    )
}

fn doc(id: u32) -> String {
    format!(r#"{{"id": {id}, "properties": {{"wof:placetype": "locality"}}}}"#)
}

/// A root directory `data` holding five files.
fn five_files() -> MockContentsClient {
    let mut client = MockContentsClient::new();
    client.expect_get_contents().returning(|owner, repo, path, reference| {
        assert_eq!(owner, "whosonfirst-data");
        assert_eq!(repo, "whosonfirst-data-admin-ca");
        assert_eq!(reference, "main");
        Ok(match path {
            "" => dir(&[("data", "dir")]),
            "data" => dir(&[
                ("data/1.geojson", "file"),
                ("data/2.geojson", "file"),
                ("data/3.geojson", "file"),
                ("data/4.geojson", "file"),
                ("data/5.geojson", "file"),
            ]),
            other => {
                let id: u32 = other
                    .trim_start_matches("data/")
                    .trim_end_matches(".geojson")
                    .parse()
                    .unwrap();
                file(other, &doc(id))
            }
        })
    });
    client
}

fn iterator(client: MockContentsClient, concurrent: bool) -> Arc<GitHubApiIterator> {
    Arc::new(
        GitHubApiIterator::from_uri(URI)
            .unwrap()
            .with_client(Arc::new(client))
            .with_rate(1000)
            .with_concurrency(concurrent),
    )
}

fn expected_paths() -> BTreeSet<String> {
    (1..=5).map(|i| format!("data/{i}.geojson")).collect()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_crawl_yields_every_file_once() {
    for _ in 0..5 {
        let it = iterator(five_files(), true);
        let (records, errors) = it.clone().iterate(vec![]).collect_all().await;

        assert!(errors.is_empty(), "{errors:?}");
        assert_eq!(records.len(), 5);
        let paths: BTreeSet<String> = records.iter().map(|r| r.path.clone()).collect();
        assert_eq!(paths, expected_paths());
        assert_eq!(it.seen(), 5);
    }
}

#[tokio::test]
async fn sequential_crawl_follows_listing_order() {
    let it = iterator(five_files(), false);
    let (records, errors) = it.clone().iterate(vec!["data".into()]).collect_all().await;

    assert!(errors.is_empty());
    let order: Vec<_> = records.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(
        order,
        vec!["data/1.geojson", "data/2.geojson", "data/3.geojson", "data/4.geojson", "data/5.geojson"]
    );
    assert!(!it.is_iterating());
}

#[tokio::test]
async fn decoded_content_matches_the_document() {
    let it = iterator(five_files(), false);
    let (mut records, _) = it.iterate(vec!["data/3.geojson".into()]).collect_all().await;
    assert_eq!(records.len(), 1);
    let body = records[0].read_to_vec().unwrap();
    assert_eq!(String::from_utf8(body).unwrap(), doc(3));
}

/// `data` holds two good files, one that 404s and one with corrupt content.
fn partly_broken() -> MockContentsClient {
    let mut client = MockContentsClient::new();
    client.expect_get_contents().returning(|_, _, path, _| match path {
        "data" => Ok(dir(&[
            ("data/1.geojson", "file"),
            ("data/gone.geojson", "file"),
            ("data/bad.geojson", "file"),
            ("data/2.geojson", "file"),
        ])),
        "data/gone.geojson" => Err(IterateError::transport(path, "404 Not Found")),
        "data/bad.geojson" => Ok(Contents::File(ContentFile {
            path: path.to_string(),
            encoding: Some("base64".into()),
            content: Some("not base64!".into()),
        })),
        other => Ok(file(other, "{}")),
    });
    client
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn errors_do_not_stop_sibling_paths() {
    for concurrent in [false, true] {
        let it = iterator(partly_broken(), concurrent);
        let (records, errors) = it.clone().iterate(vec!["data".into()]).collect_all().await;

        assert_eq!(records.len(), 2, "concurrent={concurrent}");
        assert_eq!(errors.len(), 2);
        assert!(errors.iter().any(|e| matches!(e, IterateError::Transport { .. })));
        assert!(errors.iter().any(|e| matches!(e, IterateError::Decode { .. })));
        // the corrupt file was still seen
        assert_eq!(it.seen(), 3);
    }
}

#[tokio::test]
async fn filters_apply_to_api_records() {
    let mut client = MockContentsClient::new();
    client.expect_get_contents().returning(|_, _, path, _| match path {
        "data" => Ok(dir(&[("data/region.geojson", "file"), ("data/locality.geojson", "file")])),
        "data/region.geojson" => Ok(file(path, r#"{"properties": {"wof:placetype": "region"}}"#)),
        other => Ok(file(other, r#"{"properties": {"wof:placetype": "locality"}}"#)),
    });
    let it = Arc::new(
        GitHubApiIterator::from_uri(&format!("{URI}&exclude=properties.wof:placetype=locality"))
            .unwrap()
            .with_client(Arc::new(client))
            .with_rate(1000),
    );

    let (records, errors) = it.iterate(vec!["data".into()]).collect_all().await;
    assert!(errors.is_empty());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].path, "data/region.geojson");
    assert_eq!(records[0].content.position(), 0);
}

/// A `data` directory of fifty files, counting every request.
fn fifty_files(calls: Arc<AtomicUsize>) -> MockContentsClient {
    let mut client = MockContentsClient::new();
    client.expect_get_contents().returning(move |_, _, path, _| {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(match path {
            "data" => Contents::Directory(
                (0..50)
                    .map(|i| ContentEntry {
                        path: format!("data/{i}.geojson"),
                        kind: "file".into(),
                    })
                    .collect(),
            ),
            other => file(other, "{}"),
        })
    });
    client
}

#[tokio::test]
async fn no_requests_after_the_consumer_stops() {
    let calls = Arc::new(AtomicUsize::new(0));
    let it = iterator(fifty_files(calls.clone()), false);

    let mut stream = it.iterate(vec!["data".into()]);
    let first = stream.next().await.unwrap().unwrap();
    first.close();
    stream.close().await;

    // listing, two buffered files and the one parked on a full channel
    let after_close = calls.load(Ordering::SeqCst);
    assert!(after_close <= 4, "{after_close} requests");
    tokio::task::yield_now().await;
    assert_eq!(calls.load(Ordering::SeqCst), after_close);
}

#[tokio::test(start_paused = true)]
async fn queued_concurrent_requests_are_dropped_after_the_consumer_stops() {
    let calls = Arc::new(AtomicUsize::new(0));
    // default rate, so sub-crawls queue up behind the rate gate
    let it = Arc::new(
        GitHubApiIterator::from_uri(&format!("{URI}&concurrent=true"))
            .unwrap()
            .with_client(Arc::new(fifty_files(calls.clone()))),
    );
    assert_eq!(it.options().requests_per_second, 10);

    let mut stream = it.clone().iterate(vec!["data".into()]);
    let first = stream.next().await.unwrap().unwrap();
    first.close();
    stream.close().await;

    let after_close = calls.load(Ordering::SeqCst);
    assert!(after_close <= 4, "{after_close} requests");
    tokio::time::sleep(std::time::Duration::from_secs(10)).await;
    assert_eq!(calls.load(Ordering::SeqCst), after_close);
    assert!(!it.is_iterating());
}

/// Requires `GITHUB_TOKEN`; skipped otherwise.
#[tokio::test]
async fn live_contents_api() {
    let _ = dotenvy::dotenv();
    let Some(token) = std::env::var("GITHUB_TOKEN").ok().filter(|t| !t.trim().is_empty()) else {
        eprintln!("GITHUB_TOKEN not set, skipping live GitHub test");
        return;
    };

    let uri = format!("githubapi://whosonfirst-data/whosonfirst-data-admin-ad?access_token={token}&branch=master");
    let it = Arc::new(GitHubApiIterator::from_uri(&uri).unwrap());
    let (mut records, errors) = it.clone().iterate(vec!["README.md".into()]).collect_all().await;

    assert!(errors.is_empty(), "{errors:?}");
    assert_eq!(records.len(), 1);
    assert_eq!(it.seen(), 1);
    assert!(!records[0].read_to_vec().unwrap().is_empty());
}
