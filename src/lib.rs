// fabcell - hybrid manufacturing cell controller
// This exposes the orchestrator and its collaborators for testing and integration

pub mod config;
pub mod control;
pub mod events;
pub mod observability;
pub mod oplog;
pub mod orchestrator;
pub mod shutdown;
pub mod stages;
pub mod telemetry;

// Re-export key types for easy access
pub use self::config::{config, init_config, FabCellConfig};
pub use control::{ControlSurface, StartRunResponse};
pub use events::{BroadcastPublisher, Event, EventPublisher, PublishError, Subscription};
pub use observability::{OperationTimer, OrchestratorMetrics, OrchestratorStats};
pub use oplog::{
    build_operation_log, InMemoryOperationLog, JsonlOperationLog, OperationLog,
    OperationLogError, OperationRecord, RecordId,
};
pub use orchestrator::{
    AdmissionError, CancelError, Orchestrator, OrchestratorOptions, OrchestratorState,
    RunAccepted, RunStatus,
};
pub use shutdown::ShutdownCoordinator;
pub use stages::{ConfigurationError, StageDescriptor, StageTable};
pub use telemetry::{create_run_span, generate_run_id, init_telemetry, shutdown_telemetry};
