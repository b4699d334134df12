//! # Worker端
//!
//! 运行在每台slave机器上的任务执行服务：接收任务批次，在有界并发池
//! 上执行，把聚合结果沿同一通道返回。除任务路径外还服务三类控制请求：
//! 存活探测应答、模型注册、会话终止。

pub mod executor;
pub mod registry;
pub mod service;

pub use executor::BatchExecutor;
pub use registry::{ModelRegistry, PopulationModelFactory};
pub use service::WorkerServer;
