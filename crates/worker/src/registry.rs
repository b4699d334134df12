//! 模型注册表
//!
//! INIT消息携带的模型制品由`ModelFactory`转换为可执行模型并按名称
//! 缓存。注册是幂等的：同名模型重复安装直接复用已有实例。制品的
//! 内容与校验完全由工厂负责，调度核心不做任何解释。

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use rand::{Rng, SeedableRng};
use serde::Deserialize;
use tracing::{debug, info};

use simnet_core::models::{Sample, SimulationTask, Trajectory};
use simnet_core::traits::{ModelFactory, SimulationModel};
use simnet_core::{SimnetError, SimnetResult};

/// 按名称缓存已安装模型的注册表
pub struct ModelRegistry {
    factory: Arc<dyn ModelFactory>,
    models: RwLock<HashMap<String, Arc<dyn SimulationModel>>>,
}

impl ModelRegistry {
    pub fn new(factory: Arc<dyn ModelFactory>) -> Self {
        Self {
            factory,
            models: RwLock::new(HashMap::new()),
        }
    }

    /// 安装模型，幂等：同名模型只构建一次
    pub fn install(&self, name: &str, artifact: &[u8]) -> SimnetResult<()> {
        {
            let models = self
                .models
                .read()
                .map_err(|_| SimnetError::Internal("模型注册表锁中毒".to_string()))?;
            if models.contains_key(name) {
                debug!("模型 {} 已安装，跳过", name);
                return Ok(());
            }
        }
        let model = self.factory.build(name, artifact)?;
        let mut models = self
            .models
            .write()
            .map_err(|_| SimnetError::Internal("模型注册表锁中毒".to_string()))?;
        models.entry(name.to_string()).or_insert(model);
        info!("模型 {} 安装完成", name);
        Ok(())
    }

    pub fn get(&self, name: &str) -> SimnetResult<Arc<dyn SimulationModel>> {
        let models = self
            .models
            .read()
            .map_err(|_| SimnetError::Internal("模型注册表锁中毒".to_string()))?;
        models
            .get(name)
            .cloned()
            .ok_or_else(|| SimnetError::ModelNotFound(name.to_string()))
    }

    /// 会话终止时释放缓存的模型
    pub fn remove(&self, name: &str) -> SimnetResult<()> {
        let mut models = self
            .models
            .write()
            .map_err(|_| SimnetError::Internal("模型注册表锁中毒".to_string()))?;
        if models.remove(name).is_some() {
            info!("模型 {} 已释放", name);
        }
        Ok(())
    }
}

/// 种群模型的制品格式（JSON）
#[derive(Debug, Clone, Deserialize)]
struct PopulationSpec {
    /// 各物种初始数量：易感、感染、恢复
    initial: Vec<f64>,
    /// 感染速率
    infection_rate: f64,
    /// 恢复速率
    recovery_rate: f64,
}

/// 内置的随机种群模型工厂
///
/// 把JSON形式的制品解析为一个连续时间马尔可夫链模型（SIR形），
/// 用于测试与演示部署。
pub struct PopulationModelFactory;

impl ModelFactory for PopulationModelFactory {
    fn build(&self, name: &str, artifact: &[u8]) -> SimnetResult<Arc<dyn SimulationModel>> {
        let spec: PopulationSpec = serde_json::from_slice(artifact)
            .map_err(|e| SimnetError::ModelInstall(format!("模型制品解析失败: {e}")))?;
        if spec.initial.len() != 3 {
            return Err(SimnetError::ModelInstall(format!(
                "种群模型需要3个初始物种数量，实际 {}",
                spec.initial.len()
            )));
        }
        if spec.infection_rate <= 0.0 || spec.recovery_rate <= 0.0 {
            return Err(SimnetError::ModelInstall("速率必须为正".to_string()));
        }
        Ok(Arc::new(PopulationModel {
            name: name.to_string(),
            spec,
        }))
    }
}

/// Gillespie随机模拟的SIR种群模型
struct PopulationModel {
    name: String,
    spec: PopulationSpec,
}

impl SimulationModel for PopulationModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, task: &SimulationTask) -> SimnetResult<Trajectory> {
        if task.deadline <= task.start_time {
            return Err(SimnetError::TaskExecution(format!(
                "非法时间区间: [{}, {}]",
                task.start_time, task.deadline
            )));
        }
        let started = std::time::Instant::now();
        let mut rng = rand::rngs::StdRng::seed_from_u64(task.seed);

        let mut s = self.spec.initial[0];
        let mut i = self.spec.initial[1];
        let mut r = self.spec.initial[2];
        let mut now = task.start_time;

        let samplings = task.samplings.max(1);
        let step = (task.deadline - task.start_time) / samplings as f64;
        let mut next_sample = task.start_time;
        let mut samples = Vec::with_capacity(samplings as usize + 1);

        loop {
            // 先补齐所有落在当前时刻之前的采样点
            while next_sample <= now && samples.len() <= samplings as usize {
                samples.push(Sample {
                    time: next_sample,
                    values: vec![s, i, r],
                });
                next_sample += step;
            }
            if samples.len() > samplings as usize {
                break;
            }

            let infection = self.spec.infection_rate * s * i;
            let recovery = self.spec.recovery_rate * i;
            let total = infection + recovery;
            if total <= 0.0 {
                // 吸收态：用当前状态填满剩余采样点
                while samples.len() <= samplings as usize {
                    samples.push(Sample {
                        time: next_sample,
                        values: vec![s, i, r],
                    });
                    next_sample += step;
                }
                break;
            }

            let u: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
            now += -u.ln() / total;
            if rng.random::<f64>() * total < infection {
                s -= 1.0;
                i += 1.0;
            } else {
                i -= 1.0;
                r += 1.0;
            }
        }

        Ok(Trajectory {
            start: task.start_time,
            end: task.deadline,
            successful: true,
            generation_time_ns: started.elapsed().as_nanos() as u64,
            samples,
        })
    }
}
