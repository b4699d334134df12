//! # 数据模型
//!
//! 定义分布式模拟调度系统的核心数据结构：模拟任务与轨迹、任务批次、
//! Worker地址与生命周期状态。
//!
//! 所有模型都实现了序列化和反序列化，支持网络传输；时间字段统一采用
//! 纳秒（`u64`）或模型时间（`f64`），状态字段使用枚举类型避免无效状态。

mod batch;
mod task;
mod worker;

pub use batch::{ResultBatch, TaskBatch};
pub use task::{Sample, SimulationTask, TaskOutcome, Trajectory};
pub use worker::{TransportKind, WorkerAddress, WorkerLifecycle};
