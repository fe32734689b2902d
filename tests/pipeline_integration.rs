//! End-to-end tests for the export pipeline against a mock content API.

mod support;

use std::path::Path;
use std::sync::Arc;

use esa_export::api::{ApiError, SearchQuery};
use esa_export::images::{AssetHosts, ImageTransformEngine};
use esa_export::pipeline::{ExportOptions, Exporter, RunOutcome};
use serde_json::json;
use support::{TEAM, client, dimensions, png, post, post_path, posts_path, search_page};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn exporter(server: &MockServer, output_root: &Path, options: ExportOptions) -> Exporter {
    Exporter::new(
        Arc::new(client(&server.uri())),
        ExportOptions {
            output_root: output_root.to_path_buf(),
            asset_hosts: AssetHosts::new(["127.0.0.1"]),
            ..options
        },
    )
}

async fn mount_search_page(server: &MockServer, page: u32, body: serde_json::Value) {
    Mock::given(method("GET"))
        .and(path(posts_path()))
        .and(query_param("page", page.to_string().as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_detail(server: &MockServer, body: serde_json::Value) {
    let id = body["number"].as_u64().unwrap();
    Mock::given(method("GET"))
        .and(path(post_path(id)))
        .respond_with(ResponseTemplate::new(200).set_body_json(body))
        .mount(server)
        .await;
}

async fn mount_bytes(server: &MockServer, at: &str, bytes: Vec<u8>) {
    Mock::given(method("GET"))
        .and(path(at))
        .respond_with(ResponseTemplate::new(200).set_body_bytes(bytes))
        .mount(server)
        .await;
}

fn query() -> SearchQuery {
    SearchQuery::new(TEAM).unwrap().with_page_size(20)
}

#[tokio::test]
async fn test_forty_five_results_take_three_pages() {
    let server = MockServer::start().await;
    mount_search_page(&server, 1, search_page(1..=20, Some(2), 45)).await;
    mount_search_page(&server, 2, search_page(21..=40, Some(3), 45)).await;
    mount_search_page(&server, 3, search_page(41..=45, None, 45)).await;
    let output = TempDir::new().unwrap();

    let report = exporter(
        &server,
        output.path(),
        ExportOptions {
            dry_run: true,
            ..ExportOptions::default()
        },
    )
    .run(&query())
    .await
    .unwrap();

    assert_eq!(report.outcome, RunOutcome::Completed);
    assert_eq!(report.pages_requested, 3);
    assert_eq!(report.total_matched, 45);
    assert_eq!(report.planned.len(), 45);
    let ids: Vec<u64> = report.planned.iter().map(|p| p.id).collect();
    assert_eq!(ids, (1..=45).collect::<Vec<_>>());
}

#[tokio::test]
async fn test_limit_twenty_five_requests_two_pages() {
    let server = MockServer::start().await;
    mount_search_page(&server, 1, search_page(1..=20, Some(2), 45)).await;
    mount_search_page(&server, 2, search_page(21..=40, Some(3), 45)).await;
    Mock::given(method("GET"))
        .and(path(posts_path()))
        .and(query_param("page", "3"))
        .respond_with(ResponseTemplate::new(200).set_body_json(search_page(41..=45, None, 45)))
        .expect(0)
        .mount(&server)
        .await;
    let output = TempDir::new().unwrap();

    let report = exporter(
        &server,
        output.path(),
        ExportOptions {
            dry_run: true,
            limit: Some(25),
            ..ExportOptions::default()
        },
    )
    .run(&query())
    .await
    .unwrap();

    assert_eq!(report.outcome, RunOutcome::LimitReached);
    assert_eq!(report.pages_requested, 2);
    assert_eq!(report.planned.len(), 25);
}

#[tokio::test]
async fn test_dry_run_writes_nothing_and_skips_details() {
    let server = MockServer::start().await;
    mount_search_page(&server, 1, search_page(1..=3, None, 3)).await;
    Mock::given(method("GET"))
        .and(path(post_path(1)))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let output = TempDir::new().unwrap();
    let root = output.path().join("out");

    let report = exporter(
        &server,
        &root,
        ExportOptions {
            dry_run: true,
            ..ExportOptions::default()
        },
    )
    .run(&query())
    .await
    .unwrap();

    assert_eq!(report.planned[0].target_path, root.join("dev").join("1_post 1.md"));
    assert_eq!(report.saved(), 0);
    assert!(!root.exists());
}

#[tokio::test]
async fn test_export_resizes_relinks_and_tolerates_one_failed_image() {
    let server = MockServer::start().await;
    let base = server.uri();
    let body = format!(
        "# Shots\n\
         <img width=\"400\" alt=\"wide\" src=\"{base}/uploads/wide.png\">\n\
         ![small]({base}/uploads/small.png)\n\
         <img src=\"{base}/uploads/gone.png\">\n"
    );
    mount_search_page(
        &server,
        1,
        json!({"posts": [post(7, "Screens", "dev/ui", "")], "next_page": null, "total_count": 1}),
    )
    .await;
    mount_detail(&server, post(7, "Screens", "dev/ui", &body)).await;
    mount_bytes(&server, "/uploads/wide.png", png(800, 600)).await;
    mount_bytes(&server, "/uploads/small.png", png(10, 10)).await;
    Mock::given(method("GET"))
        .and(path("/uploads/gone.png"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    let output = TempDir::new().unwrap();

    let report = exporter(&server, output.path(), ExportOptions::default())
        .run(&query())
        .await
        .unwrap();

    assert_eq!(report.saved(), 1);
    assert!(!report.is_partial());
    assert_eq!(report.images_saved, 2);
    assert_eq!(report.image_failures, 1);

    let dir = output.path().join("dev").join("ui");
    let document = std::fs::read_to_string(dir.join("7_Screens.md")).unwrap();
    assert!(document.starts_with("---\nnumber: 7\ntitle: Screens\n"));
    assert!(document.contains("<img width=\"400\" alt=\"wide\" src=\"wide.png\">"));
    assert!(document.contains("![small](small.png)"));
    assert!(document.contains(&format!("<img src=\"{base}/uploads/gone.png\">")));

    assert_eq!(dimensions(&std::fs::read(dir.join("wide.png")).unwrap()), (400, 300));
    assert_eq!(dimensions(&std::fs::read(dir.join("small.png")).unwrap()), (10, 10));
    assert!(!dir.join("gone.png").exists());
}

#[tokio::test]
async fn test_undecodable_image_with_width_is_kept_unresized() {
    let server = MockServer::start().await;
    let base = server.uri();
    let original = b"GIF-ish bytes that no decoder accepts".to_vec();
    mount_bytes(&server, "/uploads/broken.png", original.clone()).await;
    let target = TempDir::new().unwrap();
    let engine = ImageTransformEngine::new(Arc::new(client(&base)))
        .with_asset_hosts(AssetHosts::new(["127.0.0.1"]));
    let markup = format!("<img width=\"400\" src=\"{base}/uploads/broken.png\">");

    let outcome = engine.process(&markup, target.path(), false).await;

    assert!(outcome.failures.is_empty());
    assert_eq!(outcome.saved.len(), 1);
    assert!(!outcome.saved[0].resized);
    assert_eq!(outcome.markup, "<img width=\"400\" src=\"broken.png\">");
    assert_eq!(std::fs::read(target.path().join("broken.png")).unwrap(), original);
}

#[tokio::test]
async fn test_export_keeps_original_bytes_when_resize_fails() {
    let server = MockServer::start().await;
    let base = server.uri();
    let original = b"not really a png".to_vec();
    let body = format!("<img width=\"400\" src=\"{base}/uploads/broken.png\">\n");
    mount_search_page(
        &server,
        1,
        json!({"posts": [post(8, "Broken", "dev", "")], "next_page": null, "total_count": 1}),
    )
    .await;
    mount_detail(&server, post(8, "Broken", "dev", &body)).await;
    mount_bytes(&server, "/uploads/broken.png", original.clone()).await;
    let output = TempDir::new().unwrap();

    let report = exporter(&server, output.path(), ExportOptions::default())
        .run(&query())
        .await
        .unwrap();

    assert_eq!(report.saved(), 1);
    assert_eq!(report.images_saved, 1);
    assert_eq!(report.image_failures, 0);
    let dir = output.path().join("dev");
    assert_eq!(std::fs::read(dir.join("broken.png")).unwrap(), original);
    let document = std::fs::read_to_string(dir.join("8_Broken.md")).unwrap();
    assert!(document.contains("<img width=\"400\" src=\"broken.png\">"));
}

#[tokio::test]
async fn test_images_subdir_and_nested_category() {
    let server = MockServer::start().await;
    let base = server.uri();
    let body = format!("![diagram]({base}/files/arch%20v2.png)");
    mount_search_page(
        &server,
        1,
        json!({"posts": [post(3, "Arch: v2", "設計/2024/", "")], "next_page": null, "total_count": 1}),
    )
    .await;
    mount_detail(&server, post(3, "Arch: v2", "設計/2024/", &body)).await;
    mount_bytes(&server, "/files/arch%20v2.png", png(4, 4)).await;
    let output = TempDir::new().unwrap();

    let report = exporter(
        &server,
        output.path(),
        ExportOptions {
            use_images_subdir: true,
            ..ExportOptions::default()
        },
    )
    .run(&query())
    .await
    .unwrap();

    let dir = output.path().join("設計").join("2024");
    assert_eq!(report.saved_paths, vec![dir.join("3_Arch- v2.md")]);
    assert!(dir.join("images").join("arch v2.png").is_file());
    let document = std::fs::read_to_string(dir.join("3_Arch- v2.md")).unwrap();
    assert!(document.ends_with("![diagram](images/arch%20v2.png)"));
}

#[tokio::test]
async fn test_rerun_produces_byte_identical_files() {
    let server = MockServer::start().await;
    let base = server.uri();
    let body = format!("<img width=\"50\" src=\"{base}/img/a.png\">\n\ntext");
    mount_search_page(
        &server,
        1,
        json!({"posts": [post(1, "Same", "", "")], "next_page": null, "total_count": 1}),
    )
    .await;
    mount_detail(&server, post(1, "Same", "", &body)).await;
    mount_bytes(&server, "/img/a.png", png(100, 80)).await;
    let output = TempDir::new().unwrap();

    let first = exporter(&server, output.path(), ExportOptions::default())
        .run(&query())
        .await
        .unwrap();
    let document_path = output.path().join("1_Same.md");
    let image_path = output.path().join("a.png");
    let document = std::fs::read(&document_path).unwrap();
    let image = std::fs::read(&image_path).unwrap();

    let second = exporter(&server, output.path(), ExportOptions::default())
        .run(&query())
        .await
        .unwrap();

    assert_eq!(first.saved_paths, second.saved_paths);
    assert_eq!(std::fs::read(&document_path).unwrap(), document);
    assert_eq!(std::fs::read(&image_path).unwrap(), image);
    assert_eq!(dimensions(&image), (50, 40));
    let entries = std::fs::read_dir(output.path()).unwrap().count();
    assert_eq!(entries, 2, "no temp files left behind");
}

#[tokio::test]
async fn test_missing_post_is_skipped_and_run_is_partial() {
    let server = MockServer::start().await;
    mount_search_page(&server, 1, search_page(1..=2, None, 2)).await;
    mount_detail(&server, post(2, "post 2", "dev", "kept")).await;
    let output = TempDir::new().unwrap();

    let report = exporter(&server, output.path(), ExportOptions::default())
        .run(&query())
        .await
        .unwrap();

    assert_eq!(report.saved(), 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].id, 1);
    assert!(report.skipped[0].reason.contains("404"));
    assert!(report.is_partial());
}

#[tokio::test]
async fn test_auth_failure_on_detail_aborts_run() {
    let server = MockServer::start().await;
    mount_search_page(&server, 1, search_page(1..=2, None, 2)).await;
    Mock::given(method("GET"))
        .and(path(post_path(1)))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(post_path(2)))
        .respond_with(ResponseTemplate::new(200).set_body_json(post(2, "never", "", "x")))
        .expect(0)
        .mount(&server)
        .await;
    let output = TempDir::new().unwrap();

    let error = exporter(&server, output.path(), ExportOptions::default())
        .run(&query())
        .await
        .unwrap_err();

    assert!(matches!(error.api_error(), ApiError::Auth { .. }));
}
