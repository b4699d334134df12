use std::sync::Arc;

use anyhow::{Context, Result};
use rand::Rng;
use simnet_core::config::AppConfig;
use simnet_core::models::{SimulationTask, WorkerAddress};
use simnet_master::{MasterScheduler, TcpWorkerConnector};
use simnet_worker::{PopulationModelFactory, WorkerServer};
use tokio::sync::{broadcast, mpsc};
use tracing::{error, info, warn};

/// 内置演示模型的制品（SIR种群模型）
const DEMO_ARTIFACT: &[u8] =
    br#"{"initial": [95.0, 5.0, 0.0], "infection_rate": 0.005, "recovery_rate": 0.05}"#;

/// 演示模拟的时间区间与采样数
const DEMO_DEADLINE: f64 = 100.0;
const DEMO_SAMPLINGS: u32 = 100;

/// 应用运行模式
#[derive(Debug, Clone)]
pub enum AppMode {
    /// 运行Master调度端，派发`replicas`次模拟后退出
    Master { replicas: u32 },
    /// 运行Worker执行端
    Worker,
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
}

impl Application {
    pub fn new(config: AppConfig, mode: AppMode) -> Self {
        Self { config, mode }
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);
        match self.mode {
            AppMode::Master { replicas } => self.run_master(replicas, shutdown_rx).await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
        }
    }

    /// Master模式：注册Worker池，提交模拟任务并等待全部完成
    async fn run_master(
        &self,
        replicas: u32,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> Result<()> {
        let master = &self.config.master;
        let artifact = match &master.model_artifact {
            Some(path) => {
                std::fs::read(path).with_context(|| format!("读取模型制品失败: {path}"))?
            }
            None => DEMO_ARTIFACT.to_vec(),
        };

        let connector = TcpWorkerConnector::new(master.codec.clone())
            .with_benchmark_dir(master.benchmark_dir.as_deref())
            .context("创建阶段计时记录器失败")?;
        let scheduler =
            MasterScheduler::new(master.clone(), artifact, Arc::new(connector));

        let mut registered = 0usize;
        for addr in &master.workers {
            let Some(address) = WorkerAddress::parse(addr) else {
                warn!("跳过无效的Worker地址: {addr}");
                continue;
            };
            match scheduler.register_worker(address.clone()).await {
                Ok(()) => {
                    registered += 1;
                }
                Err(e) => {
                    warn!("注册Worker {} 失败: {}", address, e);
                }
            }
        }
        if registered == 0 {
            return Err(anyhow::anyhow!("没有可用的Worker，检查 master.workers 配置"));
        }
        info!("Worker池就绪，共 {} 个节点", registered);

        let tasks: Vec<SimulationTask> = {
            let mut rng = rand::rng();
            (0..replicas)
                .map(|_| SimulationTask {
                    id: 0, // 由调度器重新编号
                    model: master.model_name.clone(),
                    seed: rng.random(),
                    start_time: 0.0,
                    deadline: DEMO_DEADLINE,
                    samplings: DEMO_SAMPLINGS,
                    submission: 0,
                })
                .collect()
        };

        let (tx, mut rx) = mpsc::unbounded_channel();
        scheduler
            .submit(tasks, Arc::new(tx))
            .await
            .context("提交模拟任务失败")?;
        info!("已提交 {} 次模拟，模型 {}", replicas, master.model_name);

        tokio::select! {
            result = scheduler.join() => {
                match result {
                    Ok(()) => {
                        let mut trajectories = 0usize;
                        while let Ok(batch) = rx.try_recv() {
                            trajectories += batch.len();
                        }
                        info!("模拟完成，共收到 {} 条轨迹", trajectories);
                    }
                    Err(e) => {
                        error!("模拟未能完成: {e}");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("模拟被中断");
            }
        }

        scheduler.close().await.ok();
        Ok(())
    }

    /// Worker模式：启动模拟执行服务并等待关闭信号
    async fn run_worker(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let host = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        let server = WorkerServer::from_config(&self.config.worker, Arc::new(PopulationModelFactory))
            .context("创建Worker服务失败")?;
        let addr = server.start().await.context("启动Worker服务失败")?;
        info!("Worker {} 就绪，监听 {}，执行池大小 {}",
            host, addr, self.config.worker.pool_size);

        let _ = shutdown_rx.recv().await;
        server.shutdown();
        info!("Worker {} 已停止", host);
        Ok(())
    }
}
