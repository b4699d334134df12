//! Master到Worker的通信链路
//!
//! `WorkerLink`抽象单条Worker连接上的请求-响应交互，`WorkerConnector`
//! 负责建立链路。调度器只依赖这两个接口，生产路径用TCP实现，
//! 测试用内存伪实现替换。

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use simnet_core::config::CodecConfig;
use simnet_core::models::{ResultBatch, TaskBatch, WorkerAddress};
use simnet_core::{SimnetError, SimnetResult};
use simnet_network::benchmark::{BenchmarkUnit, MASTER_RECV_LABELS};
use simnet_network::frame::WireChannel;
use simnet_network::pipeline::CodecPipeline;
use simnet_network::protocol::{MasterFrame, WorkerFrame};

/// 单条Worker连接上的命令接口
///
/// 每条链路同一时刻只承载一个在途批次，方法串行调用。
#[async_trait]
pub trait WorkerLink: Send {
    /// 安装模型上下文
    async fn init(&mut self, model: &str, artifact: &[u8]) -> SimnetResult<()>;

    /// 发送任务批次并等待对应的结果批次
    async fn send_batch(&mut self, batch: &TaskBatch) -> SimnetResult<ResultBatch>;

    /// 存活探测
    async fn ping(&mut self) -> SimnetResult<()>;

    /// 终止会话并释放对端缓存的模型
    async fn close(&mut self, model: &str) -> SimnetResult<()>;
}

/// 链路工厂接口
#[async_trait]
pub trait WorkerConnector: Send + Sync {
    async fn connect(&self, address: &WorkerAddress) -> SimnetResult<Box<dyn WorkerLink>>;
}

/// 生产路径的TCP链路工厂
pub struct TcpWorkerConnector {
    codec: CodecConfig,
    benchmark: Option<Arc<BenchmarkUnit>>,
}

impl TcpWorkerConnector {
    pub fn new(codec: CodecConfig) -> Self {
        Self {
            codec,
            benchmark: None,
        }
    }

    /// 启用Master端接收路径的阶段计时记录
    pub fn with_benchmark_dir(mut self, dir: Option<&str>) -> SimnetResult<Self> {
        self.benchmark = match dir {
            Some(dir) => Some(Arc::new(BenchmarkUnit::new(
                dir,
                "masterbenchmark",
                &MASTER_RECV_LABELS,
            )?)),
            None => None,
        };
        Ok(self)
    }
}

#[async_trait]
impl WorkerConnector for TcpWorkerConnector {
    async fn connect(&self, address: &WorkerAddress) -> SimnetResult<Box<dyn WorkerLink>> {
        let channel = WireChannel::connect(address).await?;
        Ok(Box::new(TcpWorkerLink {
            channel,
            pipeline: CodecPipeline::from_config(&self.codec),
            benchmark: self.benchmark.clone(),
        }))
    }
}

/// 基于长度前缀帧通道的TCP链路
pub struct TcpWorkerLink {
    channel: WireChannel<tokio::net::TcpStream>,
    pipeline: CodecPipeline,
    benchmark: Option<Arc<BenchmarkUnit>>,
}

impl TcpWorkerLink {
    async fn exchange(&mut self, frame: &MasterFrame) -> SimnetResult<WorkerFrame> {
        self.channel.write_block(&frame.encode()?).await?;
        WorkerFrame::decode(&self.channel.read_block().await?)
    }
}

#[async_trait]
impl WorkerLink for TcpWorkerLink {
    async fn init(&mut self, model: &str, artifact: &[u8]) -> SimnetResult<()> {
        let frame = MasterFrame::Init {
            model: model.to_string(),
            artifact: artifact.to_vec(),
        };
        match self.exchange(&frame).await? {
            WorkerFrame::InitOk => Ok(()),
            other => Err(SimnetError::Protocol(format!(
                "INIT收到意外响应: {other:?}"
            ))),
        }
    }

    async fn send_batch(&mut self, batch: &TaskBatch) -> SimnetResult<ResultBatch> {
        let (encoded, _) = self.pipeline.encode_tasks(batch)?;
        let started = Instant::now();
        let response = self.exchange(&MasterFrame::Task(encoded)).await?;
        let round_trip_ns = started.elapsed().as_nanos() as f64;
        match response {
            WorkerFrame::Result(payload) => {
                let (results, stats) = self.pipeline.decode_results(&payload)?;
                if let Some(benchmark) = &self.benchmark {
                    if let Err(e) = benchmark.record(&[
                        stats.compression_ns as f64,
                        stats.codec_ns as f64,
                        batch.len() as f64,
                        round_trip_ns,
                    ]) {
                        warn!("阶段计时记录失败: {}", e);
                    }
                }
                Ok(results)
            }
            other => Err(SimnetError::Protocol(format!(
                "TASK收到意外响应: {other:?}"
            ))),
        }
    }

    async fn ping(&mut self) -> SimnetResult<()> {
        match self.exchange(&MasterFrame::Ping).await? {
            WorkerFrame::Pong => Ok(()),
            other => Err(SimnetError::Protocol(format!(
                "PING收到意外响应: {other:?}"
            ))),
        }
    }

    async fn close(&mut self, model: &str) -> SimnetResult<()> {
        let frame = MasterFrame::Close {
            model: model.to_string(),
        };
        match self.exchange(&frame).await? {
            WorkerFrame::CloseOk => {
                let _ = self.channel.shutdown().await;
                Ok(())
            }
            other => Err(SimnetError::Protocol(format!(
                "CLOSE收到意外响应: {other:?}"
            ))),
        }
    }
}
