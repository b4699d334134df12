pub mod config;
pub mod errors;
pub mod models;
pub mod traits;

pub use config::{AppConfig, CodecConfig, MasterConfig, WindowPolicy, WorkerConfig};
pub use errors::SimnetError;
pub use models::{
    ResultBatch, Sample, SimulationTask, TaskBatch, TaskOutcome, Trajectory, TransportKind,
    WorkerAddress, WorkerLifecycle,
};
pub use traits::{ModelFactory, ResultSink, SimulationModel};

/// 统一的Result类型
pub type SimnetResult<T> = std::result::Result<T, SimnetError>;
