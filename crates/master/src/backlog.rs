//! 任务积压队列
//!
//! 新提交的任务追加到队尾；失败或超时批次的任务回插到队头，
//! 保证重试优先于新任务且保持原有顺序。

use std::collections::VecDeque;

use simnet_core::models::SimulationTask;

/// FIFO任务积压，只由调度循环访问
#[derive(Debug, Default)]
pub struct Backlog {
    queue: VecDeque<SimulationTask>,
}

impl Backlog {
    pub fn new() -> Self {
        Self::default()
    }

    /// 追加新提交的任务到队尾
    pub fn enqueue(&mut self, tasks: Vec<SimulationTask>) {
        self.queue.extend(tasks);
    }

    /// 把重试任务按原顺序回插到队头
    pub fn requeue_front(&mut self, tasks: Vec<SimulationTask>) {
        for task in tasks.into_iter().rev() {
            self.queue.push_front(task);
        }
    }

    /// 取出最多`n`个任务组成下一个批次
    pub fn take(&mut self, n: usize) -> Vec<SimulationTask> {
        let n = n.min(self.queue.len());
        self.queue.drain(..n).collect()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
