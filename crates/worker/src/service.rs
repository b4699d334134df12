//! Worker服务
//!
//! 监听TCP端口，为每条Master连接维护一个命令循环：按帧读取指令，
//! 分派到模型注册表与批次执行器，并回写响应帧。连接之间相互隔离，
//! 单条连接出错只终止该连接。

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

use simnet_core::config::{CodecConfig, WorkerConfig};
use simnet_core::models::{ResultBatch, TaskBatch, TaskOutcome};
use simnet_core::traits::ModelFactory;
use simnet_core::{SimnetError, SimnetResult};
use simnet_network::benchmark::{BenchmarkUnit, WORKER_SEND_LABELS};
use simnet_network::frame::WireChannel;
use simnet_network::pipeline::CodecPipeline;
use simnet_network::protocol::{MasterFrame, WorkerFrame};

use crate::executor::BatchExecutor;
use crate::registry::ModelRegistry;

/// Worker服务构建器
pub struct WorkerServerBuilder {
    listen_port: u16,
    pool_size: usize,
    codec: CodecConfig,
    factory: Arc<dyn ModelFactory>,
    benchmark_dir: Option<String>,
}

impl WorkerServerBuilder {
    pub fn new(factory: Arc<dyn ModelFactory>) -> Self {
        Self {
            listen_port: 0,
            pool_size: 4,
            codec: CodecConfig::default(),
            factory,
            benchmark_dir: None,
        }
    }

    /// 设置监听端口，0表示由系统分配
    pub fn listen_port(mut self, port: u16) -> Self {
        self.listen_port = port;
        self
    }

    /// 设置本地并发执行池大小
    pub fn pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// 设置编解码管线配置
    pub fn codec(mut self, codec: CodecConfig) -> Self {
        self.codec = codec;
        self
    }

    /// 设置阶段计时CSV输出目录
    pub fn benchmark_dir(mut self, dir: Option<String>) -> Self {
        self.benchmark_dir = dir;
        self
    }

    pub fn build(self) -> SimnetResult<WorkerServer> {
        let benchmark = match &self.benchmark_dir {
            Some(dir) => Some(Arc::new(BenchmarkUnit::new(
                dir,
                "workerbenchmark",
                &WORKER_SEND_LABELS,
            )?)),
            None => None,
        };
        let (shutdown_tx, _) = broadcast::channel(1);
        Ok(WorkerServer {
            listen_port: self.listen_port,
            shared: Arc::new(SessionShared {
                registry: ModelRegistry::new(self.factory),
                executor: BatchExecutor::new(self.pool_size),
                pipeline: CodecPipeline::from_config(&self.codec),
                benchmark,
            }),
            shutdown_tx,
        })
    }
}

/// 所有Master连接共享的会话状态
struct SessionShared {
    registry: ModelRegistry,
    executor: BatchExecutor,
    pipeline: CodecPipeline,
    benchmark: Option<Arc<BenchmarkUnit>>,
}

/// 面向Master的模拟执行服务
pub struct WorkerServer {
    listen_port: u16,
    shared: Arc<SessionShared>,
    shutdown_tx: broadcast::Sender<()>,
}

impl WorkerServer {
    pub fn builder(factory: Arc<dyn ModelFactory>) -> WorkerServerBuilder {
        WorkerServerBuilder::new(factory)
    }

    /// 按配置构建服务
    pub fn from_config(config: &WorkerConfig, factory: Arc<dyn ModelFactory>) -> SimnetResult<Self> {
        WorkerServerBuilder::new(factory)
            .listen_port(config.listen_port)
            .pool_size(config.pool_size)
            .codec(config.codec.clone())
            .benchmark_dir(config.benchmark_dir.clone())
            .build()
    }

    /// 绑定监听端口并启动接受循环，返回实际绑定地址
    pub async fn start(&self) -> SimnetResult<SocketAddr> {
        let listener = TcpListener::bind(("0.0.0.0", self.listen_port)).await?;
        let local_addr = listener.local_addr()?;
        info!("Worker服务已启动，监听 {}", local_addr);

        let shared = Arc::clone(&self.shared);
        let shutdown_tx = self.shutdown_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!("接受Master连接: {}", peer);
                                let shared = Arc::clone(&shared);
                                let shutdown_rx = shutdown_tx.subscribe();
                                tokio::spawn(async move {
                                    handle_session(shared, stream, peer, shutdown_rx).await;
                                });
                            }
                            Err(e) => {
                                error!("接受连接失败: {}", e);
                            }
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Worker服务停止接受新连接");
                        break;
                    }
                }
            }
        });
        Ok(local_addr)
    }

    /// 通知所有会话与接受循环退出
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// 单条Master连接的命令循环
async fn handle_session(
    shared: Arc<SessionShared>,
    stream: TcpStream,
    peer: SocketAddr,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    if let Err(e) = stream.set_nodelay(true) {
        warn!("连接 {} 设置TCP_NODELAY失败: {}", peer, e);
    }
    let mut channel = WireChannel::new(stream);
    loop {
        let block = tokio::select! {
            block = channel.read_block() => block,
            _ = shutdown_rx.recv() => {
                debug!("会话 {} 因服务停止而退出", peer);
                return;
            }
        };
        let block = match block {
            Ok(block) => block,
            // 对端断开或字节流损坏，终止会话
            Err(e) => {
                debug!("会话 {} 读取结束: {}", peer, e);
                return;
            }
        };
        match MasterFrame::decode(&block) {
            Ok(MasterFrame::Ping) => {
                if respond(&mut channel, &WorkerFrame::Pong, peer).await.is_err() {
                    return;
                }
            }
            Ok(MasterFrame::Init { model, artifact }) => {
                match shared.registry.install(&model, &artifact) {
                    Ok(()) => {
                        if respond(&mut channel, &WorkerFrame::InitOk, peer).await.is_err() {
                            return;
                        }
                    }
                    Err(e) => {
                        error!("会话 {} 安装模型 {} 失败: {}", peer, model, e);
                        return;
                    }
                }
            }
            Ok(MasterFrame::Task(payload)) => {
                if handle_task(&shared, &mut channel, &payload, peer).await.is_err() {
                    return;
                }
            }
            Ok(MasterFrame::Close { model }) => {
                if let Err(e) = shared.registry.remove(&model) {
                    warn!("会话 {} 释放模型 {} 失败: {}", peer, model, e);
                }
                let _ = respond(&mut channel, &WorkerFrame::CloseOk, peer).await;
                let _ = channel.shutdown().await;
                debug!("会话 {} 正常关闭", peer);
                return;
            }
            Err(e) => {
                error!("会话 {} 收到非法帧: {}", peer, e);
                return;
            }
        }
    }
}

async fn respond(
    channel: &mut WireChannel<TcpStream>,
    frame: &WorkerFrame,
    peer: SocketAddr,
) -> SimnetResult<()> {
    let block = frame.encode()?;
    channel.write_block(&block).await.map_err(|e| {
        warn!("会话 {} 写入响应失败: {}", peer, e);
        e
    })
}

/// 解码任务批次、执行并回写结果帧
async fn handle_task(
    shared: &SessionShared,
    channel: &mut WireChannel<TcpStream>,
    payload: &[u8],
    peer: SocketAddr,
) -> SimnetResult<()> {
    let (batch, _) = shared.pipeline.decode_tasks(payload).map_err(|e| {
        error!("会话 {} 任务批次解码失败: {}", peer, e);
        e
    })?;
    debug!("会话 {} 收到批次 {}，共 {} 个任务", peer, batch.id, batch.len());

    // 批次内所有任务共享同一模型
    let model_name = match batch.tasks.first() {
        Some(task) => task.model.clone(),
        None => {
            return Err(SimnetError::Protocol("任务批次为空".to_string()));
        }
    };
    let results = match shared.registry.get(&model_name) {
        Ok(model) => shared.executor.execute(model, batch).await,
        // 模型未注册属于任务级失败，仍按每任务一个结果回复
        Err(e) => {
            warn!("会话 {} 批次引用未注册模型 {}", peer, model_name);
            let outcomes = batch_fault_outcomes(&batch, &e);
            ResultBatch::new(batch.id, outcomes)
        }
    };

    let trajectories = results.len() as f64;
    let (encoded, stats) = shared.pipeline.encode_results(&results)?;
    let frame = WorkerFrame::Result(encoded).encode()?;
    let send_started = Instant::now();
    channel.write_block(&frame).await?;
    let send_ns = send_started.elapsed().as_nanos() as f64;

    if let Some(benchmark) = &shared.benchmark {
        if let Err(e) = benchmark.record(&[
            stats.codec_ns as f64,
            trajectories,
            stats.encoded_len as f64,
            stats.compression_ns as f64,
            stats.transport_len as f64,
            send_ns,
        ]) {
            warn!("阶段计时记录失败: {}", e);
        }
    }
    Ok(())
}

fn batch_fault_outcomes(batch: &TaskBatch, error: &SimnetError) -> Vec<TaskOutcome> {
    batch
        .tasks
        .iter()
        .map(|task| TaskOutcome::Faulted {
            task_id: task.id,
            reason: error.to_string(),
        })
        .collect()
}
