//! Master与Worker经真实TCP协作完成模拟的端到端测试

use std::sync::Arc;

use tokio::sync::mpsc;

use simnet_core::config::{
    CodecConfig, CodecKind, CompressionKind, MasterConfig, WindowPolicy, WorkerConfig,
};
use simnet_core::models::{SimulationTask, WorkerAddress};
use simnet_master::{MasterScheduler, TcpWorkerConnector};
use simnet_worker::{PopulationModelFactory, WorkerServer};

const ARTIFACT: &[u8] =
    br#"{"initial": [95.0, 5.0, 0.0], "infection_rate": 0.005, "recovery_rate": 0.05}"#;

fn tasks(n: usize, samplings: u32) -> Vec<SimulationTask> {
    (0..n)
        .map(|i| SimulationTask {
            id: 0,
            model: "population".to_string(),
            seed: 1000 + i as u64,
            start_time: 0.0,
            deadline: 30.0,
            samplings,
            submission: 0,
        })
        .collect()
}

async fn start_worker(codec: CodecConfig) -> (WorkerServer, WorkerAddress) {
    let config = WorkerConfig {
        listen_port: 0,
        pool_size: 2,
        codec,
        benchmark_dir: None,
    };
    let server = WorkerServer::from_config(&config, Arc::new(PopulationModelFactory)).unwrap();
    let addr = server.start().await.unwrap();
    (server, WorkerAddress::tcp("127.0.0.1", addr.port()))
}

async fn run_simulation(codec: CodecConfig, replicas: usize, workers: usize) {
    let mut servers = Vec::new();
    let mut addrs = Vec::new();
    for _ in 0..workers {
        let (server, addr) = start_worker(codec.clone()).await;
        servers.push(server);
        addrs.push(addr);
    }

    let config = MasterConfig {
        codec: codec.clone(),
        window: WindowPolicy::default(),
        batch_deadline_cap_ms: 10_000,
        probe_timeout_ms: 2_000,
        ..MasterConfig::default()
    };
    let connector = TcpWorkerConnector::new(codec);
    let scheduler = MasterScheduler::new(config, ARTIFACT.to_vec(), Arc::new(connector));
    for addr in addrs {
        scheduler.register_worker(addr).await.unwrap();
    }

    let (tx, mut rx) = mpsc::unbounded_channel();
    let samplings = 10u32;
    scheduler
        .submit(tasks(replicas, samplings), Arc::new(tx))
        .await
        .unwrap();
    scheduler.join().await.unwrap();
    scheduler.close().await.unwrap();

    let mut delivered = Vec::new();
    while let Ok(batch) = rx.try_recv() {
        for outcome in batch.outcomes {
            match outcome {
                simnet_core::models::TaskOutcome::Completed { task_id, trajectory } => {
                    assert!(trajectory.successful);
                    assert_eq!(trajectory.samples.len(), samplings as usize + 1);
                    delivered.push(task_id);
                }
                simnet_core::models::TaskOutcome::Faulted { task_id, reason } => {
                    panic!("任务 {task_id} 执行失败: {reason}");
                }
            }
        }
    }
    delivered.sort_unstable();
    assert_eq!(delivered, (0..replicas as u64).collect::<Vec<u64>>());

    for server in servers {
        server.shutdown();
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bincode_gzip_round_trip() {
    run_simulation(CodecConfig::default(), 12, 2).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_compact_codec_without_compression() {
    let codec = CodecConfig {
        codec: CodecKind::Compact,
        compression: CompressionKind::None,
    };
    run_simulation(codec, 8, 1).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn test_worker_shutdown_mid_run_exhausts_pool() {
    let codec = CodecConfig::default();
    let (server, addr) = start_worker(codec.clone()).await;

    let config = MasterConfig {
        codec: codec.clone(),
        batch_deadline_cap_ms: 500,
        probe_timeout_ms: 300,
        ..MasterConfig::default()
    };
    let connector = TcpWorkerConnector::new(codec);
    let scheduler = MasterScheduler::new(config, ARTIFACT.to_vec(), Arc::new(connector));
    scheduler.register_worker(addr).await.unwrap();

    // Worker下线后派发失败，探测也无法重连
    server.shutdown();
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    let (tx, _rx) = mpsc::unbounded_channel();
    scheduler
        .submit(tasks(4, 5), Arc::new(tx))
        .await
        .unwrap();
    // 池耗尽时join以错误返回而不是悬挂
    let result = scheduler.join().await;
    assert!(result.is_err());
    scheduler.close().await.unwrap();
}
