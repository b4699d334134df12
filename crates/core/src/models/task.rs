use serde::{Deserialize, Serialize};

/// 模拟任务描述符
///
/// 任务是无状态、可重放的工作单元：给定相同的描述符与随机种子，
/// 执行结果完全确定，因此超时后可以安全地重新派发到其它Worker。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationTask {
    /// 全局唯一的任务编号
    pub id: u64,
    /// 关联的模型名称（需已通过INIT安装到Worker）
    pub model: String,
    /// 随机数种子
    pub seed: u64,
    /// 模拟起始时间
    pub start_time: f64,
    /// 模拟截止时间
    pub deadline: f64,
    /// 轨迹采样点数
    pub samplings: u32,
    /// 提交批次编号，调度器用它把结果路由回对应的结果接收器
    pub submission: u64,
}

/// 轨迹上的单个采样点
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: f64,
    pub values: Vec<f64>,
}

/// 一次模拟运行产生的轨迹
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trajectory {
    pub start: f64,
    pub end: f64,
    pub successful: bool,
    /// 生成该轨迹所消耗的时间（纳秒）
    pub generation_time_ns: u64,
    pub samples: Vec<Sample>,
}

impl Trajectory {
    pub fn size(&self) -> usize {
        self.samples.len()
    }
}

/// 单个任务的执行结果
///
/// Worker对批次内的每个任务恰好产生一个结果；单个任务失败不会中断
/// 同批次的其它任务，而是以`Faulted`标记返回，由调度器重新入队。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TaskOutcome {
    Completed {
        task_id: u64,
        trajectory: Trajectory,
    },
    Faulted {
        task_id: u64,
        reason: String,
    },
}

impl TaskOutcome {
    pub fn task_id(&self) -> u64 {
        match self {
            TaskOutcome::Completed { task_id, .. } => *task_id,
            TaskOutcome::Faulted { task_id, .. } => *task_id,
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, TaskOutcome::Completed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_task_id() {
        let ok = TaskOutcome::Completed {
            task_id: 7,
            trajectory: Trajectory {
                start: 0.0,
                end: 1.0,
                successful: true,
                generation_time_ns: 42,
                samples: vec![],
            },
        };
        let bad = TaskOutcome::Faulted {
            task_id: 9,
            reason: "overflow".to_string(),
        };
        assert_eq!(ok.task_id(), 7);
        assert!(ok.is_completed());
        assert_eq!(bad.task_id(), 9);
        assert!(!bad.is_completed());
    }
}
