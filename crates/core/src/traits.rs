use std::sync::Arc;

use crate::models::{ResultBatch, SimulationTask, Trajectory};
use crate::SimnetResult;

/// 模拟模型接口
///
/// 模型是纯函数：给定任务描述符（含随机种子）产生一条轨迹，
/// 不发起任何网络活动。实现必须可以在多个任务间并发共享。
pub trait SimulationModel: Send + Sync {
    /// 模型名称
    fn name(&self) -> &str;

    /// 执行单个模拟任务
    fn run(&self, task: &SimulationTask) -> SimnetResult<Trajectory>;
}

/// 模型工厂接口
///
/// 把INIT消息携带的不透明模型制品转换为可执行的模型实例。
/// 制品内容对调度核心完全不透明，其校验与解释由具体工厂负责。
pub trait ModelFactory: Send + Sync {
    fn build(&self, name: &str, artifact: &[u8]) -> SimnetResult<Arc<dyn SimulationModel>>;
}

/// 结果接收器接口
///
/// 每个`submit`调用注册一个接收器，调度器在每个结果批次完成时调用一次。
/// 不同Worker的结果批次之间没有顺序保证。
pub trait ResultSink: Send + Sync {
    fn deliver(&self, results: ResultBatch);
}

impl ResultSink for tokio::sync::mpsc::UnboundedSender<ResultBatch> {
    fn deliver(&self, results: ResultBatch) {
        // 接收端关闭时结果被丢弃，调用方已不再关心
        let _ = self.send(results);
    }
}

impl<F> ResultSink for F
where
    F: Fn(ResultBatch) + Send + Sync,
{
    fn deliver(&self, results: ResultBatch) {
        self(results)
    }
}
