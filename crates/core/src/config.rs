use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::errors::SimnetError;
use crate::SimnetResult;

/// 应用配置根结构
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub master: MasterConfig,
    pub worker: WorkerConfig,
}

/// 批次编码策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// 基于serde的通用反射式编码
    #[default]
    Bincode,
    /// 针对任务/轨迹形状手写的紧凑二进制编码
    Compact,
}

/// 字节流压缩策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionKind {
    #[default]
    Gzip,
    None,
}

/// 编解码管线配置，Master与Worker两端必须一致
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CodecConfig {
    pub codec: CodecKind,
    pub compression: CompressionKind,
}

/// 自适应任务窗口策略
///
/// 窗口增长是可配置策略而非硬编码行为：低于慢启动阈值时翻倍，
/// 达到阈值后线性加一，可选上限`max_window`限制增长。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowPolicy {
    /// 新注册Worker的初始窗口
    pub initial_window: u32,
    /// 慢启动阈值，窗口达到该值后由翻倍转为线性增长
    pub slow_start_threshold: u32,
    /// 窗口增长上限，None表示不设上限
    pub max_window: Option<u32>,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        Self {
            initial_window: 1,       // 从单任务窗口开始慢启动
            slow_start_threshold: 256,
            max_window: None,        // 默认不限制增长
        }
    }
}

/// Master端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MasterConfig {
    /// 静态Worker地址列表（"host:port"），由外部发现机制填充
    pub workers: Vec<String>,
    /// 注册时安装到各Worker的模型名称
    pub model_name: String,
    /// 模型制品文件路径，内容对调度核心不透明
    pub model_artifact: Option<String>,
    /// 窗口策略
    pub window: WindowPolicy,
    /// 单批次截止时间上限（毫秒），RTT推导的截止时间不会超过该值
    pub batch_deadline_cap_ms: u64,
    /// 存活探测的固定短超时（毫秒），与任务截止时间无关
    pub probe_timeout_ms: u64,
    /// 单个Worker完成一个窗口的可承受时间上限（毫秒），
    /// 超出则在派发前将窗口减半
    pub max_window_time_ms: u64,
    /// 编解码管线
    pub codec: CodecConfig,
    /// 阶段计时CSV输出目录，None表示不记录
    pub benchmark_dir: Option<String>,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            workers: Vec::new(),
            model_name: "population".to_string(),
            model_artifact: None,
            window: WindowPolicy::default(),
            batch_deadline_cap_ms: 30_000, // 30秒批次截止上限
            probe_timeout_ms: 5_000,       // 5秒存活探测
            max_window_time_ms: 3_600_000, // 1小时可承受上限
            codec: CodecConfig::default(),
            benchmark_dir: None,
        }
    }
}

/// Worker端配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// 任务流量监听端口
    pub listen_port: u16,
    /// 本地并发执行池大小，独立于Master端并发度
    pub pool_size: usize,
    /// 编解码管线
    pub codec: CodecConfig,
    /// 阶段计时CSV输出目录，None表示不记录
    pub benchmark_dir: Option<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            listen_port: 7001,
            pool_size: 4,
            codec: CodecConfig::default(),
            benchmark_dir: None,
        }
    }
}

impl AppConfig {
    /// 从TOML文件和环境变量加载配置
    ///
    /// 环境变量使用`SIMNET__`前缀和双下划线分隔，如
    /// `SIMNET__WORKER__LISTEN_PORT=7002`覆盖`worker.listen_port`。
    pub fn load(config_path: Option<&str>) -> SimnetResult<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = config_path {
            if Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            } else {
                return Err(SimnetError::Configuration(format!(
                    "配置文件不存在: {path}"
                )));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("SIMNET")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder
            .build()
            .map_err(|e| SimnetError::Configuration(format!("配置加载失败: {e}")))?
            .try_deserialize()
            .map_err(|e| SimnetError::Configuration(format!("配置解析失败: {e}")))?;

        config.validate()?;
        Ok(config)
    }

    /// 校验配置的有效性
    pub fn validate(&self) -> SimnetResult<()> {
        if self.master.window.initial_window == 0 {
            return Err(SimnetError::Configuration(
                "master.window.initial_window 必须大于0".to_string(),
            ));
        }
        if let Some(max) = self.master.window.max_window {
            if max < self.master.window.initial_window {
                return Err(SimnetError::Configuration(
                    "master.window.max_window 不能小于初始窗口".to_string(),
                ));
            }
        }
        if self.master.probe_timeout_ms == 0 {
            return Err(SimnetError::Configuration(
                "master.probe_timeout_ms 必须大于0".to_string(),
            ));
        }
        if self.master.batch_deadline_cap_ms == 0 {
            return Err(SimnetError::Configuration(
                "master.batch_deadline_cap_ms 必须大于0".to_string(),
            ));
        }
        if self.worker.pool_size == 0 {
            return Err(SimnetError::Configuration(
                "worker.pool_size 必须大于0".to_string(),
            ));
        }
        for addr in &self.master.workers {
            if crate::models::WorkerAddress::parse(addr).is_none() {
                return Err(SimnetError::Configuration(format!(
                    "无效的Worker地址: {addr}"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config_is_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.master.window.initial_window, 1);
        assert_eq!(config.master.window.slow_start_threshold, 256);
        assert_eq!(config.master.probe_timeout_ms, 5_000);
        assert_eq!(config.worker.listen_port, 7001);
    }

    #[test]
    fn test_load_from_toml() {
        let mut file = tempfile::NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[master]
workers = ["127.0.0.1:7001", "127.0.0.1:7002"]
batch_deadline_cap_ms = 10000

[master.window]
initial_window = 4
max_window = 64

[master.codec]
codec = "compact"
compression = "none"

[worker]
listen_port = 7005
pool_size = 8
"#
        )
        .unwrap();

        let config = AppConfig::load(Some(file.path().to_str().unwrap())).unwrap();
        assert_eq!(config.master.workers.len(), 2);
        assert_eq!(config.master.window.initial_window, 4);
        assert_eq!(config.master.window.max_window, Some(64));
        assert_eq!(config.master.codec.codec, CodecKind::Compact);
        assert_eq!(config.master.codec.compression, CompressionKind::None);
        assert_eq!(config.worker.listen_port, 7005);
        assert_eq!(config.worker.pool_size, 8);
        // 未覆盖的字段保持默认值
        assert_eq!(config.master.probe_timeout_ms, 5_000);
    }

    #[test]
    fn test_invalid_worker_address_rejected() {
        let config = AppConfig {
            master: MasterConfig {
                workers: vec!["not-an-address".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_initial_window_rejected() {
        let mut config = AppConfig::default();
        config.master.window.initial_window = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_missing_config_file() {
        assert!(AppConfig::load(Some("/nonexistent/simnet.toml")).is_err());
    }
}
