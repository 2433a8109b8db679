use std::sync::Arc;

use httptest::matchers::{all_of, contains, matches, request, url_decoded};
use httptest::responders::{json_encoded, status_code};
use httptest::{Expectation, Server};
use parking_lot::Mutex;
use serde_json::json;

use metrics_dashboard_client::{AppConfig, DashboardApp, ImportJob, ImportPhase};

const SAMPLE_CSV: &str = "date,campaign,impressions,clicks,cost_micros\n\
                          2024-03-01,Spring Sale,1000,50,2500000\n\
                          2024-03-02,Spring Sale,1200,70,1000000\n";

fn test_app(server: &Server) -> DashboardApp {
    let mut config = AppConfig::with_api_base(server.url("/").to_string());
    config.import_poll_interval_ms = 25;
    config.autocomplete_debounce_ms = 5;
    DashboardApp::new(config).expect("client construction")
}

#[tokio::test]
async fn csv_import_full_cycle() {
    let server = Server::run();

    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/api/import-start")
        ))
        .respond_with(json_encoded(json!({"job_id": "job-42"}))),
    );
    server.expect(
        Expectation::matching(all_of!(
            request::method("GET"),
            request::path("/api/import-progress"),
            request::query(url_decoded(contains(("job_id", "job-42"))))
        ))
        .times(0..)
        .respond_with(httptest::cycle![
            json_encoded(json!({"stage": "importing", "pct": 35.0})),
            json_encoded(json!({"stage": "finalizing"})),
        ]),
    );
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/api/import"),
            request::query(url_decoded(contains(("job_id", "job-42")))),
            request::body(matches("date,campaign,impressions"))
        ))
        .respond_with(json_encoded(json!({"ok": true, "message": "Imported 2 rows."}))),
    );
    server.expect(
        Expectation::matching(all_of!(
            request::method("GET"),
            request::path("/api/date-range")
        ))
        .respond_with(json_encoded(json!({"min": "2024-03-01", "max": "2024-03-02"}))),
    );
    server.expect(
        Expectation::matching(all_of!(request::method("GET"), request::path("/api/data")))
            .respond_with(json_encoded(json!({
                "rows": [{"date": "2024-03-01", "clicks": 50}],
                "total": 2,
                "page": 1,
                "page_size": 50,
                "totals": {"clicks": 120}
            }))),
    );

    let app = test_app(&server);
    let events: Arc<Mutex<Vec<ImportJob>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = events.clone();
    app.import
        .set_observer(Arc::new(move |job| sink.lock().push(job)));

    let job = app
        .import_file("metrics.csv", SAMPLE_CSV.as_bytes().to_vec())
        .await
        .expect("import runs to completion");

    assert_eq!(job.phase, ImportPhase::Done);
    assert_eq!(job.job_id.as_deref(), Some("job-42"));
    assert_eq!(job.notice.as_deref(), Some("Imported 2 rows."));
    assert_eq!(job.upload_pct, Some(100));
    assert_eq!(job.server_pct, Some(100));

    let seen = events.lock();
    assert!(seen.iter().any(|event| event.phase == ImportPhase::Uploading));
    assert_eq!(seen.last().map(|event| event.phase), Some(ImportPhase::Done));

    // A finished import reloads both the bounds and the visible page.
    assert_eq!(app.session.bounds().max, Some("2024-03-02".parse().unwrap()));
    assert_eq!(app.query.snapshot().pagination.total, 2);
}

#[tokio::test]
async fn rejected_upload_surfaces_server_error() {
    let server = Server::run();

    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/api/import-start")
        ))
        .respond_with(json_encoded(json!({"job_id": "job-9"}))),
    );
    server.expect(
        Expectation::matching(all_of!(
            request::method("GET"),
            request::path("/api/import-progress")
        ))
        .times(0..)
        .respond_with(json_encoded(json!({"stage": "importing", "pct": 5.0}))),
    );
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/api/import")
        ))
        .respond_with(
            status_code(422)
                .append_header("content-type", "application/json")
                .body(r#"{"error":"CSV is missing required column: date"}"#),
        ),
    );

    let app = test_app(&server);
    let job = app
        .import_file("broken.csv", b"campaign\noops\n".to_vec())
        .await
        .expect("failed import still reports a job");

    assert_eq!(job.phase, ImportPhase::Error);
    assert_eq!(
        job.notice.as_deref(),
        Some("CSV is missing required column: date")
    );
}

#[tokio::test]
async fn missing_job_id_aborts_before_upload() {
    let server = Server::run();
    server.expect(
        Expectation::matching(all_of!(
            request::method("POST"),
            request::path("/api/import-start")
        ))
        .respond_with(json_encoded(json!({"ok": true}))),
    );

    let app = test_app(&server);
    let job = app
        .import_file("metrics.csv", b"date\n2024-03-01\n".to_vec())
        .await
        .expect("aborted import still reports a job");

    assert_eq!(job.phase, ImportPhase::Error);
    assert_eq!(
        job.notice.as_deref(),
        Some("Import could not be started: no job id issued")
    );
    assert!(!app.import.is_busy());
}
