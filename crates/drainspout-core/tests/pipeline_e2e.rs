//! End-to-end pipeline scenarios.
//!
//! Drives deliveries through the fully wired pipeline — ingress, parser,
//! fan-out, aggregator, writer — against a tempfile SQLite database, and
//! observes the outcomes through metric snapshots and direct row queries.

use std::sync::Arc;
use std::time::Duration;

use drainspout_core::config::Config;
use drainspout_core::geo::NullGeo;
use drainspout_core::ingress::{Admission, Delivery, LOGPLEX_CONTENT_TYPE};
use drainspout_core::metrics::MetricsHub;
use drainspout_core::pipeline::Pipeline;
use drainspout_core::writer;

// =============================================================================
// Helpers
// =============================================================================

fn test_config(db_path: &str) -> Config {
    Config {
        database_path: db_path.to_string(),
        batch_size: 100,
        flush_interval: Duration::from_millis(100),
        snapshot_interval: Duration::from_secs(3600),
        // The scenarios hammer the ingress from one address; keep the
        // per-client limiter out of the way.
        rate_limit_capacity: 100_000.0,
        ..Config::default()
    }
}

fn spawn_pipeline(db_path: &str) -> Pipeline {
    writer::init_tables(db_path).unwrap();
    Pipeline::spawn(&test_config(db_path), Arc::new(NullGeo))
}

fn temp_db() -> (tempfile::TempDir, String) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("logs.db").to_string_lossy().into_owned();
    (dir, path)
}

fn delivery(frame_id: &str, line: &str) -> Delivery {
    Delivery {
        method: "POST".to_string(),
        content_type: LOGPLEX_CONTENT_TYPE.to_string(),
        user_agent: "Logplex/v72".to_string(),
        msg_count: Some("1".to_string()),
        frame_id: frame_id.to_string(),
        remote_addr: "10.1.2.3".to_string(),
        body: line.as_bytes().to_vec(),
    }
}

fn login_line(status: u16) -> String {
    format!(
        "2025-07-09T13:37:42.123456+00:00 heroku[router]: at=info method=GET \
         path=\"/login\" host=myapp.herokuapp.com request_id=123abc-456def \
         fwd=\"197.248.10.42\" dyno=web.1 connect=1ms service=23ms status={status} \
         bytes=1345 protocol=https"
    )
}

/// Poll the hub until the condition holds or two seconds pass.
async fn wait_for(hub: &MetricsHub, check: impl Fn(&drainspout_core::metrics::Metrics) -> bool) {
    for _ in 0..200 {
        if check(&hub.snapshot()) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within two seconds");
}

// =============================================================================
// Scenarios
// =============================================================================

#[tokio::test]
async fn happy_path_post_reaches_aggregator() {
    let (_dir, db_path) = temp_db();
    let pipeline = spawn_pipeline(&db_path);
    let ingress = pipeline.ingress();

    let admission = ingress.admit(delivery("frame-1", &login_line(200))).await;
    assert_eq!(admission, Admission::Accepted);

    let hub = pipeline.hub();
    wait_for(&hub, |m| m.total_requests == 1).await;

    let m = hub.snapshot();
    assert_eq!(m.status_2xx, 1);
    assert_eq!(m.top_endpoints["/login"], 1);
    assert_eq!(m.get_requests, 1);
    assert_eq!(m.shard_performance["web.1"].request_count, 1);

    drop(ingress);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn duplicate_frame_reaches_aggregator_once() {
    let (_dir, db_path) = temp_db();
    let pipeline = spawn_pipeline(&db_path);
    let ingress = pipeline.ingress();

    assert_eq!(
        ingress.admit(delivery("frame-1", &login_line(200))).await,
        Admission::Accepted
    );
    assert_eq!(
        ingress.admit(delivery("frame-1", &login_line(200))).await,
        Admission::Duplicate
    );

    let hub = pipeline.hub();
    wait_for(&hub, |m| m.total_requests == 1).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(hub.snapshot().total_requests, 1);

    drop(ingress);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn wrong_content_type_causes_no_queue_activity() {
    let (_dir, db_path) = temp_db();
    let pipeline = spawn_pipeline(&db_path);
    let ingress = pipeline.ingress();

    let mut bad = delivery("frame-1", &login_line(200));
    bad.content_type = "application/json".to_string();
    assert_eq!(ingress.admit(bad).await, Admission::Rejected);

    tokio::time::sleep(Duration::from_millis(50)).await;
    let m = pipeline.hub().snapshot();
    assert_eq!(m.total_requests, 0);
    assert_eq!(ingress.ring_stats().occupied, 0);

    drop(ingress);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn mixed_statuses_roll_up_into_rates() {
    let (_dir, db_path) = temp_db();
    let pipeline = spawn_pipeline(&db_path);
    let ingress = pipeline.ingress();

    for (i, status) in [200u16, 201, 404, 500].iter().enumerate() {
        let admission = ingress
            .admit(delivery(&format!("frame-{i}"), &login_line(*status)))
            .await;
        assert_eq!(admission, Admission::Accepted);
    }

    let hub = pipeline.hub();
    wait_for(&hub, |m| m.total_requests == 4).await;

    let m = hub.snapshot();
    assert_eq!(m.status_2xx, 2);
    assert_eq!(m.status_4xx, 1);
    assert_eq!(m.status_5xx, 1);
    assert!((m.success_rate - 50.0).abs() < f64::EPSILON);
    assert!((m.error_rate - 50.0).abs() < f64::EPSILON);

    drop(ingress);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn percentiles_settle_over_the_recent_window() {
    let (_dir, db_path) = temp_db();
    let pipeline = spawn_pipeline(&db_path);
    let ingress = pipeline.ingress();

    // Three passes over 1ms..=100ms leave a 300-sample window, which
    // triggers the automatic percentile recompute.
    let mut frame = 0;
    for _ in 0..3 {
        for ms in 1..=100u64 {
            frame += 1;
            let line = format!(
                "2025-07-09T13:37:42+00:00 heroku[router]: at=info method=GET \
                 path=\"/x\" service={ms}ms status=200"
            );
            ingress
                .admit(delivery(&format!("frame-{frame}"), &line))
                .await;
        }
    }

    let hub = pipeline.hub();
    wait_for(&hub, |m| m.total_requests == 300).await;

    let m = hub.snapshot();
    assert_eq!(m.p50_response_time, Duration::from_millis(51));
    assert_eq!(m.p95_response_time, Duration::from_millis(96));
    assert_eq!(m.p99_response_time, Duration::from_millis(100));

    drop(ingress);
    pipeline.shutdown().await;
}

#[tokio::test]
async fn batched_write_archives_every_record() {
    let (_dir, db_path) = temp_db();
    let pipeline = spawn_pipeline(&db_path);
    let ingress = pipeline.ingress();

    for i in 0..250 {
        let admission = ingress
            .admit(delivery(&format!("frame-{i}"), &login_line(200)))
            .await;
        assert_eq!(admission, Admission::Accepted);
    }
    assert_eq!(pipeline.persist_dropped(), 0);

    // Draining the pipeline commits the final partial batch.
    drop(ingress);
    pipeline.shutdown().await;

    let conn = rusqlite::Connection::open(&db_path).unwrap();
    let count: i64 = conn
        .query_row("SELECT COUNT(*) FROM raw_logs", [], |row| row.get(0))
        .unwrap();
    assert_eq!(count, 250);

    let mut stmt = conn.prepare("SELECT id FROM raw_logs ORDER BY rowid").unwrap();
    let ids: Vec<i64> = stmt
        .query_map([], |row| row.get(0))
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn channel_health_reports_dedupe_occupancy() {
    let (_dir, db_path) = temp_db();
    let pipeline = spawn_pipeline(&db_path);
    let ingress = pipeline.ingress();

    for i in 0..3 {
        ingress
            .admit(delivery(&format!("frame-{i}"), &login_line(200)))
            .await;
    }

    let hub = pipeline.hub();
    wait_for(&hub, |m| m.total_requests == 3).await;
    assert_eq!(hub.snapshot().channel_health.dedupe_window_occupancy, 3);
    assert_eq!(hub.snapshot().channel_health.persist_dropped, 0);

    drop(ingress);
    pipeline.shutdown().await;
}
