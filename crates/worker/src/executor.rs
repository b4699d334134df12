//! 批次执行器
//!
//! 在固定大小的任务池内并发执行一个批次的所有模拟任务。单个任务
//! 失败只产生失败标记，绝不中断批次内其他任务；每个任务恰好产生
//! 一个结果。

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use simnet_core::models::{ResultBatch, TaskBatch, TaskOutcome};
use simnet_core::traits::SimulationModel;

/// 有界并发的批次执行器
pub struct BatchExecutor {
    semaphore: Arc<Semaphore>,
    pool_size: usize,
}

impl BatchExecutor {
    pub fn new(pool_size: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(pool_size.max(1))),
            pool_size: pool_size.max(1),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// 执行整个批次，返回与任务一一对应的结果批次
    ///
    /// 模拟核心是纯CPU计算，放在阻塞线程池中执行；同时在途的
    /// 任务数不超过池大小。
    pub async fn execute(
        &self,
        model: Arc<dyn SimulationModel>,
        batch: TaskBatch,
    ) -> ResultBatch {
        let batch_id = batch.id;
        debug!("开始执行批次 {}，共 {} 个任务", batch_id, batch.len());

        let mut join_set = JoinSet::new();
        for (index, task) in batch.tasks.into_iter().enumerate() {
            let semaphore = Arc::clone(&self.semaphore);
            let model = Arc::clone(&model);
            join_set.spawn(async move {
                // 信号量在执行器存续期间不会被关闭
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return (
                            index,
                            TaskOutcome::Faulted {
                                task_id: task.id,
                                reason: "执行器已关闭".to_string(),
                            },
                        );
                    }
                };
                let task_id = task.id;
                let handle =
                    tokio::task::spawn_blocking(move || match model.run(&task) {
                        Ok(trajectory) => TaskOutcome::Completed {
                            task_id,
                            trajectory,
                        },
                        Err(e) => TaskOutcome::Faulted {
                            task_id,
                            reason: e.to_string(),
                        },
                    });
                let outcome = match handle.await {
                    Ok(outcome) => outcome,
                    // 模型panic不影响批次内其他任务
                    Err(e) => TaskOutcome::Faulted {
                        task_id,
                        reason: format!("任务执行崩溃: {e}"),
                    },
                };
                (index, outcome)
            });
        }

        let mut indexed = Vec::with_capacity(join_set.len());
        while let Some(joined) = join_set.join_next().await {
            if let Ok(entry) = joined {
                indexed.push(entry);
            }
        }
        indexed.sort_by_key(|(index, _)| *index);
        let outcomes: Vec<TaskOutcome> =
            indexed.into_iter().map(|(_, outcome)| outcome).collect();

        let faulted = outcomes.iter().filter(|o| !o.is_completed()).count();
        if faulted > 0 {
            warn!("批次 {} 中 {} 个任务执行失败", batch_id, faulted);
        }
        ResultBatch::new(batch_id, outcomes)
    }
}
