use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::task::{SimulationTask, TaskOutcome};

/// 发往单个Worker的任务批次，创建后不可变
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskBatch {
    pub id: Uuid,
    pub tasks: Vec<SimulationTask>,
}

impl TaskBatch {
    pub fn new(tasks: Vec<SimulationTask>) -> Self {
        Self {
            id: Uuid::new_v4(),
            tasks,
        }
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

/// Worker返回的结果批次，与对应TaskBatch共享同一批次编号
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultBatch {
    pub batch_id: Uuid,
    pub outcomes: Vec<TaskOutcome>,
}

impl ResultBatch {
    pub fn new(batch_id: Uuid, outcomes: Vec<TaskOutcome>) -> Self {
        Self { batch_id, outcomes }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// 校验结果批次与任务批次的对应关系：每个任务恰好对应一个结果
    pub fn matches(&self, batch: &TaskBatch) -> bool {
        if self.batch_id != batch.id || self.outcomes.len() != batch.tasks.len() {
            return false;
        }
        let mut expected: Vec<u64> = batch.tasks.iter().map(|t| t.id).collect();
        let mut actual: Vec<u64> = self.outcomes.iter().map(|o| o.task_id()).collect();
        expected.sort_unstable();
        actual.sort_unstable();
        expected == actual
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::Trajectory;

    fn task(id: u64) -> SimulationTask {
        SimulationTask {
            id,
            model: "seir".to_string(),
            seed: id * 31,
            start_time: 0.0,
            deadline: 100.0,
            samplings: 10,
            submission: 0,
        }
    }

    fn completed(task_id: u64) -> TaskOutcome {
        TaskOutcome::Completed {
            task_id,
            trajectory: Trajectory {
                start: 0.0,
                end: 100.0,
                successful: true,
                generation_time_ns: 1,
                samples: vec![],
            },
        }
    }

    #[test]
    fn test_result_batch_matches() {
        let batch = TaskBatch::new(vec![task(1), task(2), task(3)]);
        // 结果顺序与提交顺序无关
        let results = ResultBatch::new(batch.id, vec![completed(3), completed(1), completed(2)]);
        assert!(results.matches(&batch));
    }

    #[test]
    fn test_result_batch_mismatch() {
        let batch = TaskBatch::new(vec![task(1), task(2)]);
        let missing = ResultBatch::new(batch.id, vec![completed(1)]);
        assert!(!missing.matches(&batch));

        let wrong_id = ResultBatch::new(Uuid::new_v4(), vec![completed(1), completed(2)]);
        assert!(!wrong_id.matches(&batch));

        let wrong_task = ResultBatch::new(batch.id, vec![completed(1), completed(9)]);
        assert!(!wrong_task.matches(&batch));
    }
}
