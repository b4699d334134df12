use std::fmt;

use serde::{Deserialize, Serialize};

/// Worker节点的传输类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum TransportKind {
    #[serde(rename = "TCP")]
    #[default]
    Tcp,
}

/// Worker节点地址，作为健康记录的键，相等性为结构相等
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkerAddress {
    pub host: String,
    pub port: u16,
    pub transport: TransportKind,
}

impl WorkerAddress {
    /// 创建新的TCP Worker地址
    pub fn tcp(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            transport: TransportKind::Tcp,
        }
    }

    /// 解析 "host:port" 形式的地址字符串
    pub fn parse(s: &str) -> Option<Self> {
        let (host, port) = s.rsplit_once(':')?;
        if host.is_empty() {
            return None;
        }
        let port = port.parse().ok()?;
        Some(Self::tcp(host, port))
    }
}

impl fmt::Display for WorkerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Worker生命周期状态
///
/// ACTIVE为正常调度目标；批次超时或连接错误后进入PROBING等待存活探测；
/// 探测失败则进入终态REMOVED，此后调度器不再选择该Worker。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerLifecycle {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "PROBING")]
    Probing,
    #[serde(rename = "REMOVED")]
    Removed,
}

impl WorkerLifecycle {
    pub fn is_active(&self) -> bool {
        matches!(self, WorkerLifecycle::Active)
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, WorkerLifecycle::Removed)
    }
}
