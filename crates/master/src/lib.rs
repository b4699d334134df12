//! Master端调度核心
//!
//! 维护Worker池的健康记录与自适应任务窗口，把任务积压按批次派发到
//! Worker，并通过超时恢复协议处理慢节点与失联节点。

pub mod backlog;
pub mod health;
pub mod link;
pub mod scheduler;

pub use backlog::Backlog;
pub use health::WorkerHealth;
pub use link::{TcpWorkerConnector, WorkerConnector, WorkerLink};
pub use scheduler::MasterScheduler;
