//! Control surface against a file-backed operation log

use std::sync::Arc;
use tempfile::TempDir;
use tokio_test::assert_ok;

use fabcell::config::{OperationLogBackend, StageConfig};
use fabcell::{
    build_operation_log, BroadcastPublisher, ControlSurface, FabCellConfig, OperationLog,
    Orchestrator, OrchestratorOptions, OrchestratorState, StartRunResponse,
};

fn short_cell_config(dir: &TempDir) -> FabCellConfig {
    let mut config = FabCellConfig::default();
    config.operation_log.backend = OperationLogBackend::Jsonl;
    config.operation_log.path = dir
        .path()
        .join("operations.jsonl")
        .to_string_lossy()
        .into_owned();
    config.stages = vec![
        StageConfig {
            name: "transport".to_string(),
            duration_ms: 200,
        },
        StageConfig {
            name: "print".to_string(),
            duration_ms: 500,
        },
    ];
    config
}

async fn control_for(config: &FabCellConfig) -> ControlSurface {
    let log = build_operation_log(&config.operation_log).await.unwrap();
    let orchestrator = Orchestrator::new(
        config.stage_table().unwrap(),
        log,
        Arc::new(BroadcastPublisher::default()),
        OrchestratorOptions::from(&config.orchestrator),
    );
    ControlSurface::new(orchestrator)
}

#[tokio::test(start_paused = true)]
async fn status_survives_a_new_process() {
    let dir = TempDir::new().unwrap();
    let config = short_cell_config(&dir);

    let control = control_for(&config).await;
    let response = control.start_run().await;
    let StartRunResponse::Accepted { run_id } = response else {
        panic!("run was not accepted: {response:?}");
    };
    let status = control.orchestrator().wait_until_idle().await;
    assert_eq!(status.state, OrchestratorState::Completed);
    assert_eq!(status.run_id.as_deref(), Some(run_id.as_str()));

    // A fresh surface over the same file sees the previous run
    let reopened = control_for(&config).await;
    let latest = assert_ok!(reopened.latest_status().await).unwrap();
    assert_eq!(latest.description, "print");
    assert_eq!(reopened.run_status().state, OrchestratorState::Idle);
}

#[tokio::test(start_paused = true)]
async fn record_ids_continue_across_reopen() {
    let dir = TempDir::new().unwrap();
    let config = short_cell_config(&dir);

    let first = control_for(&config).await;
    assert!(first.start_run().await.is_accepted());
    first.orchestrator().wait_until_idle().await;

    let second = control_for(&config).await;
    assert!(second.start_run().await.is_accepted());
    second.orchestrator().wait_until_idle().await;

    let log = build_operation_log(&config.operation_log).await.unwrap();
    let records = log.recent(10).await.unwrap();
    let ids: Vec<u64> = records.iter().map(|r| r.id.0).collect();
    assert_eq!(ids, vec![1, 2, 3, 4]);
    assert!(records.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
}

#[tokio::test(start_paused = true)]
async fn rejected_start_is_reported_not_raised() {
    let dir = TempDir::new().unwrap();
    let control = control_for(&short_cell_config(&dir)).await;

    assert!(control.start_run().await.is_accepted());
    match control.start_run().await {
        StartRunResponse::Rejected { reason } => assert!(reason.contains("already in progress")),
        other => panic!("expected rejection, got {other:?}"),
    }

    assert_ok!(control.cancel_run().await);
    assert_eq!(
        control.orchestrator().wait_until_idle().await.state,
        OrchestratorState::Cancelled
    );
}
