use thiserror::Error;

/// 模拟调度系统错误类型定义
#[derive(Debug, Error)]
pub enum SimnetError {
    #[error("网络IO错误: {0}")]
    Io(#[from] std::io::Error),

    #[error("编解码错误: {0}")]
    Codec(String),

    #[error("压缩/解压错误: {0}")]
    Compression(String),

    #[error("协议错误: {0}")]
    Protocol(String),

    #[error("批次发送超时: worker={worker}")]
    BatchTimeout { worker: String },

    #[error("存活探测失败: worker={worker}")]
    ProbeFailed { worker: String },

    #[error("Worker未找到: {0}")]
    WorkerNotFound(String),

    #[error("模型未注册: {0}")]
    ModelNotFound(String),

    #[error("模型安装失败: {0}")]
    ModelInstall(String),

    #[error("Worker池已耗尽，仍有 {pending} 个任务未完成")]
    PoolExhausted { pending: usize },

    #[error("调度器已关闭")]
    SchedulerClosed,

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SimnetError {
    /// 判断错误是否应触发超时恢复流程（探测存活而非直接移除）
    pub fn is_recoverable_transport(&self) -> bool {
        matches!(self, SimnetError::Io(_) | SimnetError::BatchTimeout { .. })
    }
}
