//! Worker健康记录
//!
//! 每个Worker一条记录：生命周期状态、自适应任务窗口与RTT估计。
//! RTT采用指数加权移动平均（与TCP的RTT估计同形）。满窗批次成功后
//! 窗口在慢启动阈值以下翻倍、以上线性加一；批次过慢、探测恢复或
//! 窗口不可承受时减半。所有字段只在调度循环这一条路径上修改。

use std::time::Duration;

use simnet_core::config::WindowPolicy;
use simnet_core::models::{WorkerAddress, WorkerLifecycle};

/// RTT均值的平滑系数
const ALPHA: f64 = 0.125;
/// RTT偏差的平滑系数
const BETA: f64 = 0.250;

/// 单个Worker的调度健康记录
#[derive(Debug, Clone)]
pub struct WorkerHealth {
    address: WorkerAddress,
    lifecycle: WorkerLifecycle,
    policy: WindowPolicy,
    window: u32,
    /// 单任务往返时间的平滑均值（秒）
    est_rtt: f64,
    /// 单任务往返时间的平滑偏差（秒）
    dev_rtt: f64,
    has_sample: bool,
    /// RTT推导的批次截止时间上限
    deadline_cap: Duration,
    /// 完成一个窗口的可承受时间上限
    max_window_time: Duration,
}

impl WorkerHealth {
    pub fn new(
        address: WorkerAddress,
        policy: WindowPolicy,
        deadline_cap: Duration,
        max_window_time: Duration,
    ) -> Self {
        let window = policy.initial_window.max(1);
        Self {
            address,
            lifecycle: WorkerLifecycle::Active,
            policy,
            window,
            est_rtt: 0.0,
            dev_rtt: 0.0,
            has_sample: false,
            deadline_cap,
            max_window_time,
        }
    }

    pub fn address(&self) -> &WorkerAddress {
        &self.address
    }

    pub fn lifecycle(&self) -> WorkerLifecycle {
        self.lifecycle
    }

    pub fn window(&self) -> u32 {
        self.window
    }

    /// 记录一次成功批次的往返样本并调整窗口
    ///
    /// 样本是批内单任务的平均往返时间。首个样本直接初始化均值，
    /// 偏差取样本的两倍以保守起步。窗口调整先于估计值更新：
    /// 批次耗时达到当前窗口的预期耗时则减半，否则只有批次规模
    /// 不小于当前窗口时才增长——队尾的小批次不放大窗口。
    pub fn record_sample(&mut self, tasks: u32, elapsed: Duration) {
        if self.has_sample && elapsed >= self.window_time() {
            self.halve();
        } else if tasks >= self.window {
            self.grow();
        }
        let sample = elapsed.as_secs_f64() / tasks.max(1) as f64;
        if self.has_sample {
            self.dev_rtt = (1.0 - BETA) * self.dev_rtt + BETA * (sample - self.est_rtt).abs();
            self.est_rtt = (1.0 - ALPHA) * self.est_rtt + ALPHA * sample;
        } else {
            self.est_rtt = sample;
            self.dev_rtt = 2.0 * sample;
            self.has_sample = true;
        }
    }

    fn grow(&mut self) {
        let next = if self.window < self.policy.slow_start_threshold {
            self.window.saturating_mul(2)
        } else {
            self.window.saturating_add(1)
        };
        self.window = match self.policy.max_window {
            Some(cap) => next.min(cap),
            None => next,
        };
    }

    /// 窗口减半，下限为1
    pub fn halve(&mut self) {
        self.window = (self.window / 2).max(1);
    }

    /// 当前窗口的批次截止时间：w·estRTT + 4·w·devRTT
    ///
    /// 无样本时（以及推导值超过上限时）取配置的截止上限，
    /// 保证截止时间永远有限。
    pub fn batch_deadline(&self) -> Duration {
        if !self.has_sample {
            return self.deadline_cap;
        }
        let w = self.window as f64;
        let secs = w * self.est_rtt + 4.0 * w * self.dev_rtt;
        Duration::from_secs_f64(secs).min(self.deadline_cap)
    }

    /// 完成当前窗口的预期耗时：w·estRTT + w·devRTT
    pub fn window_time(&self) -> Duration {
        let w = self.window as f64;
        Duration::from_secs_f64(w * self.est_rtt + w * self.dev_rtt)
    }

    /// 判断当前窗口是否在可承受时间内完成
    pub fn can_complete_window(&self) -> bool {
        !self.has_sample || self.window_time() < self.max_window_time
    }

    pub fn mark_probing(&mut self) {
        self.lifecycle = WorkerLifecycle::Probing;
    }

    /// 探测成功：窗口减半后恢复调度
    pub fn mark_recovered(&mut self) {
        self.halve();
        self.lifecycle = WorkerLifecycle::Active;
    }

    /// 进入终态，此后不再被调度
    pub fn mark_removed(&mut self) {
        self.lifecycle = WorkerLifecycle::Removed;
    }
}
