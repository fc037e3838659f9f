//! Integration tests for runtime mode transitions over a simulated bench.
#![allow(clippy::unwrap_used)]

mod common;

use benchwarden_control::{DeploymentMode, StateKind};
use common::FakeBench;

#[tokio::test]
async fn development_round_trip_returns_to_stopped() {
    let bench = FakeBench::new();
    let lifecycle = bench.lifecycle();

    lifecycle.start_development().await.unwrap();
    let status = lifecycle.status();
    assert_eq!(status.state, StateKind::RunningDevelopment);
    let pid = status.pid.unwrap();

    lifecycle.stop_development().await.unwrap();
    let status = lifecycle.status();
    assert_eq!(status.state, StateKind::Stopped);
    assert!(status.pid.is_none());
    assert_eq!(bench.runner.terminated(), [pid]);

    let err = lifecycle.stop_development().await.unwrap_err();
    assert_eq!(err.kind(), "not_running");
}

#[tokio::test]
async fn starting_twice_is_rejected() {
    let bench = FakeBench::new();
    let lifecycle = bench.lifecycle();

    lifecycle.start_development().await.unwrap();
    let err = lifecycle.start_production().await.unwrap_err();
    assert_eq!(err.kind(), "already_running");
    assert!(err.to_string().contains("development"));
    assert_eq!(lifecycle.status().state, StateKind::RunningDevelopment);
}

#[tokio::test]
async fn production_start_regenerates_and_runs_supervisor() {
    let bench = FakeBench::new();
    let lifecycle = bench.lifecycle();
    let production = bench.production_config();

    lifecycle.start_production().await.unwrap();
    assert_eq!(lifecycle.status().state, StateKind::RunningProduction);

    let merged = std::fs::read_to_string(&production.merged_supervisor_conf).unwrap();
    assert!(merged.starts_with("[supervisord]\nnodaemon=true\n"));
    assert!(merged.contains("[program:frappe-bench-web]"));

    let link = std::fs::read_link(&production.nginx_site_conf).unwrap();
    assert_eq!(link, bench.workspace.generated_nginx_conf());

    let main = std::fs::read_to_string(&production.nginx_main_conf).unwrap();
    assert!(main.contains("log_format main"));

    let supervisor = bench.runner.lines_starting_with("supervisord");
    assert_eq!(
        supervisor,
        [format!(
            "supervisord -c {}",
            production.merged_supervisor_conf.display()
        )]
    );

    let setup: Vec<_> = bench
        .bench_calls()
        .into_iter()
        .filter(|c| c.starts_with("setup"))
        .collect();
    assert_eq!(setup, ["setup nginx --yes", "setup supervisor --skip-redis --yes"]);
}

#[tokio::test]
async fn production_restart_regenerates_again() {
    let bench = FakeBench::new();
    let lifecycle = bench.lifecycle();

    lifecycle.start(DeploymentMode::Production).await.unwrap();
    lifecycle.restart().await.unwrap();

    assert_eq!(lifecycle.status().state, StateKind::RunningProduction);
    assert_eq!(bench.runner.lines_starting_with("supervisord").len(), 2);
    assert_eq!(bench.runner.terminated().len(), 1);
    assert!(bench.production_config().nginx_site_conf.is_symlink());
}

#[tokio::test]
async fn delegation_stops_running_mode_and_locks_transitions() {
    let bench = FakeBench::new();
    let lifecycle = bench.lifecycle();

    lifecycle.start_development().await.unwrap();
    let dev_pid = lifecycle.status().pid.unwrap();

    let handle = lifecycle
        .delegate_to_external_shell(DeploymentMode::Production)
        .await
        .unwrap();
    assert!(handle.id().is_some());
    assert_eq!(bench.runner.terminated(), [dev_pid]);
    assert_eq!(lifecycle.status().state, StateKind::Unmanaged);

    let script = bench
        .runner
        .calls()
        .into_iter()
        .find(|c| c.program() == "bash")
        .unwrap();
    assert_eq!(script.env_value("DEPLOYMENT"), Some("production"));
    assert_eq!(
        script.env_value("BENCH_DIR"),
        Some(bench.workspace.root().to_str().unwrap())
    );

    assert_eq!(
        lifecycle.start_development().await.unwrap_err().kind(),
        "already_unmanaged"
    );
    assert_eq!(
        lifecycle.stop_production().await.unwrap_err().kind(),
        "already_unmanaged"
    );
    assert_eq!(lifecycle.restart().await.unwrap_err().kind(), "unmanaged");
    assert_eq!(
        lifecycle
            .delegate_to_external_shell(DeploymentMode::Development)
            .await
            .unwrap_err()
            .kind(),
        "already_unmanaged"
    );
}

#[tokio::test]
async fn shutdown_stops_whatever_runs() {
    let bench = FakeBench::new();
    let lifecycle = bench.lifecycle();

    lifecycle.shutdown().await.unwrap();
    lifecycle.start_development().await.unwrap();
    lifecycle.shutdown().await.unwrap();
    assert_eq!(lifecycle.status().state, StateKind::Stopped);
}

#[tokio::test]
async fn subscribers_see_every_transition() {
    let bench = FakeBench::new();
    let lifecycle = bench.lifecycle();
    let mut rx = lifecycle.subscribe();

    lifecycle.start_development().await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().state, StateKind::RunningDevelopment);

    lifecycle.stop_development().await.unwrap();
    rx.changed().await.unwrap();
    assert_eq!(rx.borrow_and_update().state, StateKind::Stopped);
}
