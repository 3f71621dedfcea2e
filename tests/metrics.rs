mod support;

use std::collections::HashSet;

use metrics_util::debugging::DebuggingRecorder;
use serde_json::Value;
use support::Harness;

#[tokio::test]
async fn engine_paths_emit_expected_metric_keys() {
    let recorder = DebuggingRecorder::new();
    let snapshotter = recorder.snapshotter();
    recorder
        .install()
        .expect("debug metrics recorder should install in this test process");

    let harness = Harness::new();
    harness.engine.compile().await.expect("views compile");
    harness
        .engine
        .get_view("OtherView", Value::Null)
        .await
        .expect("render");
    harness.engine.invalidate();
    harness
        .engine
        .get_view("NoSuchView", Value::Null)
        .await
        .expect_err("unknown view");

    let names: HashSet<String> = snapshotter
        .snapshot()
        .into_vec()
        .into_iter()
        .map(|(composite_key, _, _, _)| composite_key.key().name().to_string())
        .collect();

    for expected in [
        "vista_compile_total",
        "vista_compile_ms",
        "vista_render_total",
        "vista_pending_requests",
        "vista_worker_reload_total",
    ] {
        assert!(names.contains(expected), "missing metric {expected}: {names:?}");
    }
}
