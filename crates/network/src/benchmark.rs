//! 阶段计时记录器
//!
//! 把编码、压缩、线上传输三个阶段的耗时与各阶段载荷大小追加到CSV
//! 文件，供离线分析批次大小与各阶段开销的关系。

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use simnet_core::{SimnetError, SimnetResult};
use tracing::debug;

/// Worker端发送路径的列：编码耗时、轨迹数、编码字节数、压缩耗时、
/// 压缩字节数、发送耗时
pub const WORKER_SEND_LABELS: [&str; 6] = [
    "sertime",
    "trajectories",
    "serbytes",
    "comprtime",
    "comprbytes",
    "sendtime",
];

/// Master端接收路径的列：解压耗时、解码耗时、任务数、收发往返耗时
pub const MASTER_RECV_LABELS: [&str; 4] = ["decomprtime", "desertime", "tasks", "roundtriptime"];

/// 单个CSV计量文件
pub struct BenchmarkUnit {
    path: PathBuf,
    file: Mutex<File>,
}

impl BenchmarkUnit {
    /// 在`dir`下创建（或追加）名为`{name}.csv`的计量文件并写入表头
    pub fn new(dir: impl AsRef<Path>, name: &str, labels: &[&str]) -> SimnetResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.csv"));
        let fresh = !path.exists();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if fresh {
            writeln!(file, "timestamp,{}", labels.join(","))?;
        }
        debug!("阶段计时文件: {}", path.display());
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 追加一行计量数据，列顺序须与创建时的标签一致
    pub fn record(&self, values: &[f64]) -> SimnetResult<()> {
        let timestamp = chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.6fZ");
        let row: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        let mut file = self
            .file
            .lock()
            .map_err(|_| SimnetError::Internal("计量文件锁中毒".to_string()))?;
        writeln!(file, "{timestamp},{}", row.join(","))?;
        Ok(())
    }
}
