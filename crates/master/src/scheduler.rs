//! 自适应批次调度器
//!
//! 调度器是一个单事件循环：命令通道接收外部操作（注册、提交、
//! 汇合、关闭），事件通道接收派发任务与探测任务的完成通知。所有
//! 健康记录、积压队列与接收器登记只在这条循环上修改，派发与探测
//! 的网络交互在独立任务中进行。
//!
//! 语义要点：
//! - 每个Worker同一时刻最多一个在途批次，批次大小为当前窗口与
//!   积压长度的较小值；
//! - 批次超时或连接错误触发存活探测，探测成功窗口减半恢复，
//!   失败则移除Worker；编解码层错误直接移除，不做探测；
//! - 失败批次的任务回插积压队头，结果交付为至少一次语义；
//! - `join`在积压与在途清空时返回，在Worker池耗尽且仍有积压时
//!   以错误返回，绝不悬挂。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use simnet_core::config::MasterConfig;
use simnet_core::models::{
    ResultBatch, SimulationTask, TaskBatch, TaskOutcome, WorkerAddress, WorkerLifecycle,
};
use simnet_core::traits::ResultSink;
use simnet_core::{SimnetError, SimnetResult};

use crate::backlog::Backlog;
use crate::health::WorkerHealth;
use crate::link::{WorkerConnector, WorkerLink};

enum Command {
    Register {
        address: WorkerAddress,
        reply: oneshot::Sender<SimnetResult<()>>,
    },
    Deregister {
        address: WorkerAddress,
        reply: oneshot::Sender<SimnetResult<()>>,
    },
    Submit {
        tasks: Vec<SimulationTask>,
        sink: Arc<dyn ResultSink>,
        reply: oneshot::Sender<u64>,
    },
    Join {
        reply: oneshot::Sender<SimnetResult<()>>,
    },
    Close {
        reply: oneshot::Sender<()>,
    },
}

enum Event {
    SendFinished {
        address: WorkerAddress,
        batch: TaskBatch,
        elapsed: Duration,
        outcome: SimnetResult<ResultBatch>,
        link: Box<dyn WorkerLink>,
    },
    ProbeFinished {
        address: WorkerAddress,
        verdict: SimnetResult<Box<dyn WorkerLink>>,
    },
}

struct WorkerState {
    health: WorkerHealth,
    /// 空闲时持有链路；批次在途或探测期间为None
    link: Option<Box<dyn WorkerLink>>,
}

struct SinkEntry {
    sink: Arc<dyn ResultSink>,
    remaining: usize,
}

/// Master调度器句柄，可克隆共享
#[derive(Clone)]
pub struct MasterScheduler {
    cmd_tx: mpsc::UnboundedSender<Command>,
}

impl MasterScheduler {
    /// 创建调度器并启动调度循环
    pub fn new(
        config: MasterConfig,
        artifact: Vec<u8>,
        connector: Arc<dyn WorkerConnector>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let core = SchedulerCore {
            config,
            artifact: Arc::from(artifact),
            connector,
            workers: HashMap::new(),
            backlog: Backlog::new(),
            in_flight: 0,
            sinks: HashMap::new(),
            next_submission: 0,
            next_task_id: 0,
            join_waiters: Vec::new(),
            event_tx,
        };
        tokio::spawn(core.run(cmd_rx, event_rx));
        Self { cmd_tx }
    }

    /// 注册Worker：建立连接、安装模型后纳入调度池
    pub async fn register_worker(&self, address: WorkerAddress) -> SimnetResult<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Register { address, reply })
            .map_err(|_| SimnetError::SchedulerClosed)?;
        rx.await.map_err(|_| SimnetError::SchedulerClosed)?
    }

    /// 注销Worker：已派发批次正常完成，排队任务转给其他Worker
    pub async fn deregister_worker(&self, address: WorkerAddress) -> SimnetResult<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Deregister { address, reply })
            .map_err(|_| SimnetError::SchedulerClosed)?;
        rx.await.map_err(|_| SimnetError::SchedulerClosed)?
    }

    /// 提交一组任务并登记其结果接收器，返回提交编号
    pub async fn submit(
        &self,
        tasks: Vec<SimulationTask>,
        sink: Arc<dyn ResultSink>,
    ) -> SimnetResult<u64> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Submit { tasks, sink, reply })
            .map_err(|_| SimnetError::SchedulerClosed)?;
        rx.await.map_err(|_| SimnetError::SchedulerClosed)
    }

    /// 等待所有已提交任务完成
    pub async fn join(&self) -> SimnetResult<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Join { reply })
            .map_err(|_| SimnetError::SchedulerClosed)?;
        rx.await.map_err(|_| SimnetError::SchedulerClosed)?
    }

    /// 关闭调度器：终止所有Worker会话并停止调度循环
    pub async fn close(&self) -> SimnetResult<()> {
        let (reply, rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Close { reply })
            .map_err(|_| SimnetError::SchedulerClosed)?;
        rx.await.map_err(|_| SimnetError::SchedulerClosed)
    }
}

struct SchedulerCore {
    config: MasterConfig,
    artifact: Arc<[u8]>,
    connector: Arc<dyn WorkerConnector>,
    workers: HashMap<WorkerAddress, WorkerState>,
    backlog: Backlog,
    /// 在途批次包含的任务总数
    in_flight: usize,
    sinks: HashMap<u64, SinkEntry>,
    next_submission: u64,
    next_task_id: u64,
    join_waiters: Vec<oneshot::Sender<SimnetResult<()>>>,
    event_tx: mpsc::UnboundedSender<Event>,
}

impl SchedulerCore {
    async fn run(
        mut self,
        mut cmd_rx: mpsc::UnboundedReceiver<Command>,
        mut event_rx: mpsc::UnboundedReceiver<Event>,
    ) {
        loop {
            tokio::select! {
                cmd = cmd_rx.recv() => {
                    match cmd {
                        Some(Command::Close { reply }) => {
                            self.shutdown().await;
                            let _ = reply.send(());
                            return;
                        }
                        Some(cmd) => self.handle_command(cmd).await,
                        // 所有句柄已丢弃
                        None => {
                            self.shutdown().await;
                            return;
                        }
                    }
                }
                Some(event) = event_rx.recv() => {
                    self.handle_event(event);
                }
            }
            self.dispatch();
            self.settle_joins();
        }
    }

    async fn handle_command(&mut self, cmd: Command) {
        match cmd {
            Command::Register { address, reply } => {
                let _ = reply.send(self.register(address).await);
            }
            Command::Deregister { address, reply } => {
                let _ = reply.send(self.deregister(&address));
            }
            Command::Submit { tasks, sink, reply } => {
                let _ = reply.send(self.accept_submission(tasks, sink));
            }
            Command::Join { reply } => {
                self.join_waiters.push(reply);
            }
            Command::Close { .. } => unreachable!("Close在调度循环中单独处理"),
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::SendFinished {
                address,
                batch,
                elapsed,
                outcome,
                link,
            } => self.finish_send(address, batch, elapsed, outcome, link),
            Event::ProbeFinished { address, verdict } => self.finish_probe(address, verdict),
        }
    }

    async fn register(&mut self, address: WorkerAddress) -> SimnetResult<()> {
        if let Some(state) = self.workers.get(&address) {
            if !state.health.lifecycle().is_removed() {
                return Err(SimnetError::Configuration(format!(
                    "Worker {address} 已注册"
                )));
            }
        }
        let probe_timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let mut link = timeout(probe_timeout, self.connector.connect(&address))
            .await
            .map_err(|_| SimnetError::ProbeFailed {
                worker: address.to_string(),
            })??;
        timeout(
            probe_timeout,
            link.init(&self.config.model_name, &self.artifact),
        )
        .await
        .map_err(|_| SimnetError::ProbeFailed {
            worker: address.to_string(),
        })??;

        let health = WorkerHealth::new(
            address.clone(),
            self.config.window.clone(),
            Duration::from_millis(self.config.batch_deadline_cap_ms),
            Duration::from_millis(self.config.max_window_time_ms),
        );
        info!("Worker {} 注册完成，初始窗口 {}", address, health.window());
        self.workers.insert(
            address,
            WorkerState {
                health,
                link: Some(link),
            },
        );
        Ok(())
    }

    fn deregister(&mut self, address: &WorkerAddress) -> SimnetResult<()> {
        let state = self
            .workers
            .get_mut(address)
            .filter(|s| !s.health.lifecycle().is_removed())
            .ok_or_else(|| SimnetError::WorkerNotFound(address.to_string()))?;
        state.health.mark_removed();
        info!("Worker {} 已注销", address);
        // 空闲链路立即关闭；在途批次完成后在事件处理中关闭
        if let Some(link) = state.link.take() {
            self.spawn_close(link);
        }
        Ok(())
    }

    fn accept_submission(&mut self, tasks: Vec<SimulationTask>, sink: Arc<dyn ResultSink>) -> u64 {
        let submission = self.next_submission;
        self.next_submission += 1;
        let mut stamped = tasks;
        for task in &mut stamped {
            task.submission = submission;
            task.id = self.next_task_id;
            self.next_task_id += 1;
        }
        debug!("接受提交 {}，共 {} 个任务", submission, stamped.len());
        if !stamped.is_empty() {
            self.sinks.insert(
                submission,
                SinkEntry {
                    sink,
                    remaining: stamped.len(),
                },
            );
            self.backlog.enqueue(stamped);
        }
        submission
    }

    /// 把积压任务派发给所有空闲的ACTIVE Worker
    fn dispatch(&mut self) {
        let idle: Vec<WorkerAddress> = self
            .workers
            .iter()
            .filter(|(_, s)| s.health.lifecycle().is_active() && s.link.is_some())
            .map(|(addr, _)| addr.clone())
            .collect();

        for address in idle {
            if self.backlog.is_empty() {
                break;
            }
            let state = match self.workers.get_mut(&address) {
                Some(state) => state,
                None => continue,
            };
            // 派发前校验窗口可承受性，超出则减半后重试
            while !state.health.can_complete_window() && state.health.window() > 1 {
                state.health.halve();
            }
            let tasks = self.backlog.take(state.health.window() as usize);
            let batch = TaskBatch::new(tasks);
            let deadline = state.health.batch_deadline();
            let link = match state.link.take() {
                Some(link) => link,
                None => continue,
            };
            self.in_flight += batch.len();
            debug!(
                "派发批次 {} 到 {}：{} 个任务，截止 {:?}",
                batch.id,
                address,
                batch.len(),
                deadline
            );
            let event_tx = self.event_tx.clone();
            tokio::spawn(async move {
                let started = Instant::now();
                let mut link = link;
                let outcome = match timeout(deadline, link.send_batch(&batch)).await {
                    Ok(result) => result,
                    Err(_) => Err(SimnetError::BatchTimeout {
                        worker: address.to_string(),
                    }),
                };
                let _ = event_tx.send(Event::SendFinished {
                    address,
                    batch,
                    elapsed: started.elapsed(),
                    outcome,
                    link,
                });
            });
        }
    }

    fn finish_send(
        &mut self,
        address: WorkerAddress,
        batch: TaskBatch,
        elapsed: Duration,
        outcome: SimnetResult<ResultBatch>,
        link: Box<dyn WorkerLink>,
    ) {
        self.in_flight -= batch.len();
        let outcome = outcome.and_then(|results| {
            if results.matches(&batch) {
                Ok(results)
            } else {
                Err(SimnetError::Protocol(format!(
                    "批次 {} 的结果与任务不对应",
                    batch.id
                )))
            }
        });
        match outcome {
            Ok(results) => {
                let lifecycle = match self.workers.get_mut(&address) {
                    Some(state) => {
                        state.health.record_sample(batch.len() as u32, elapsed);
                        state.health.lifecycle()
                    }
                    None => WorkerLifecycle::Removed,
                };
                self.deliver(&batch, results);
                if lifecycle.is_removed() {
                    // 注销后的最后一个批次，完成交付后关闭链路
                    self.spawn_close(link);
                } else if let Some(state) = self.workers.get_mut(&address) {
                    state.link = Some(link);
                }
            }
            Err(e) if e.is_recoverable_transport() => {
                warn!("Worker {} 批次 {} 失败: {}，进入存活探测", address, batch.id, e);
                self.backlog.requeue_front(batch.tasks);
                // 失败链路直接丢弃，探测建立新连接
                drop(link);
                if let Some(state) = self.workers.get_mut(&address) {
                    if state.health.lifecycle().is_removed() {
                        return;
                    }
                    state.health.mark_probing();
                    self.spawn_probe(address);
                }
            }
            Err(e) => {
                // 编解码或协议层错误不可恢复，直接移除
                error!("Worker {} 批次 {} 发生不可恢复错误: {}", address, batch.id, e);
                self.backlog.requeue_front(batch.tasks);
                drop(link);
                if let Some(state) = self.workers.get_mut(&address) {
                    state.health.mark_removed();
                }
            }
        }
    }

    fn finish_probe(&mut self, address: WorkerAddress, verdict: SimnetResult<Box<dyn WorkerLink>>) {
        let state = match self.workers.get_mut(&address) {
            Some(state) => state,
            None => return,
        };
        if state.health.lifecycle() != WorkerLifecycle::Probing {
            // 探测期间被注销
            if let Ok(link) = verdict {
                self.spawn_close(link);
            }
            return;
        }
        match verdict {
            Ok(link) => {
                state.health.mark_recovered();
                state.link = Some(link);
                info!(
                    "Worker {} 探测成功，窗口减半至 {}",
                    address,
                    state.health.window()
                );
            }
            Err(e) => {
                state.health.mark_removed();
                warn!("Worker {} 探测失败，移出调度池: {}", address, e);
            }
        }
    }

    /// 存活探测：新建连接、重装模型、PING往返，每步受固定短超时约束
    fn spawn_probe(&self, address: WorkerAddress) {
        let connector = Arc::clone(&self.connector);
        let model = self.config.model_name.clone();
        let artifact = Arc::clone(&self.artifact);
        let probe_timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let event_tx = self.event_tx.clone();
        let worker = address.to_string();
        tokio::spawn(async move {
            let verdict = async {
                let mut link = timeout(probe_timeout, connector.connect(&address))
                    .await
                    .map_err(|_| SimnetError::ProbeFailed {
                        worker: worker.clone(),
                    })??;
                timeout(probe_timeout, link.init(&model, &artifact))
                    .await
                    .map_err(|_| SimnetError::ProbeFailed {
                        worker: worker.clone(),
                    })??;
                timeout(probe_timeout, link.ping())
                    .await
                    .map_err(|_| SimnetError::ProbeFailed {
                        worker: worker.clone(),
                    })??;
                Ok(link)
            }
            .await;
            let _ = event_tx.send(Event::ProbeFinished { address, verdict });
        });
    }

    fn spawn_close(&self, mut link: Box<dyn WorkerLink>) {
        let model = self.config.model_name.clone();
        tokio::spawn(async move {
            if let Err(e) = link.close(&model).await {
                debug!("关闭Worker会话失败: {}", e);
            }
        });
    }

    /// 按提交编号拆分结果批次并交付到各自的接收器
    ///
    /// 完成的结果交付并扣减提交余量；失败标记对应的任务回插积压
    /// 队头等待重试，不向接收器交付。
    fn deliver(&mut self, batch: &TaskBatch, results: ResultBatch) {
        let task_index: HashMap<u64, &SimulationTask> =
            batch.tasks.iter().map(|t| (t.id, t)).collect();
        let mut by_submission: HashMap<u64, Vec<TaskOutcome>> = HashMap::new();
        let mut retries: Vec<SimulationTask> = Vec::new();

        for outcome in results.outcomes {
            let task = match task_index.get(&outcome.task_id()) {
                Some(task) => *task,
                None => continue,
            };
            match outcome {
                TaskOutcome::Completed { .. } => {
                    by_submission
                        .entry(task.submission)
                        .or_default()
                        .push(outcome);
                }
                TaskOutcome::Faulted { task_id, reason } => {
                    debug!("任务 {} 执行失败，回插积压重试: {}", task_id, reason);
                    retries.push(task.clone());
                }
            }
        }
        // 保持批内原有顺序
        retries.sort_by_key(|t| {
            batch
                .tasks
                .iter()
                .position(|b| b.id == t.id)
                .unwrap_or(usize::MAX)
        });
        self.backlog.requeue_front(retries);

        for (submission, outcomes) in by_submission {
            let delivered = outcomes.len();
            if let Some(entry) = self.sinks.get_mut(&submission) {
                entry.sink.deliver(ResultBatch::new(results.batch_id, outcomes));
                entry.remaining = entry.remaining.saturating_sub(delivered);
                if entry.remaining == 0 {
                    self.sinks.remove(&submission);
                    debug!("提交 {} 全部完成", submission);
                }
            }
        }
    }

    fn has_usable_worker(&self) -> bool {
        self.workers
            .values()
            .any(|s| !s.health.lifecycle().is_removed())
    }

    /// 检查汇合条件：积压与在途清空则成功返回；池耗尽且仍有
    /// 未完成任务则以错误返回
    fn settle_joins(&mut self) {
        if self.join_waiters.is_empty() {
            return;
        }
        if self.backlog.is_empty() && self.in_flight == 0 {
            for waiter in self.join_waiters.drain(..) {
                let _ = waiter.send(Ok(()));
            }
        } else if self.in_flight == 0 && !self.has_usable_worker() {
            let pending = self.backlog.len();
            error!("Worker池已耗尽，{} 个任务无法完成", pending);
            for waiter in self.join_waiters.drain(..) {
                let _ = waiter.send(Err(SimnetError::PoolExhausted { pending }));
            }
        }
    }

    async fn shutdown(&mut self) {
        info!("调度器关闭，终止 {} 个Worker会话", self.workers.len());
        let links: Vec<Box<dyn WorkerLink>> = self
            .workers
            .values_mut()
            .filter_map(|state| {
                state.health.mark_removed();
                state.link.take()
            })
            .collect();
        for link in links {
            self.spawn_close(link);
        }
        for waiter in self.join_waiters.drain(..) {
            let _ = waiter.send(Err(SimnetError::SchedulerClosed));
        }
    }
}
