//! 批次编解码策略
//!
//! 两种可互换策略：`BincodeCodec`走serde的通用反射式编码，对任意批次
//! 形状都正确；`CompactCodec`针对任务/轨迹的固定数值形状手写二进制布局
//! （大端序），以牺牲通用性换取热路径上的吞吐量。策略由配置选择，
//! 两者对任何合法批次都保证逐位往返一致。

use simnet_core::config::CodecKind;
use simnet_core::models::{ResultBatch, Sample, SimulationTask, TaskBatch, TaskOutcome, Trajectory};
use simnet_core::{SimnetError, SimnetResult};
use uuid::Uuid;

/// 批次编解码接口
pub trait BatchCodec: Send + Sync {
    fn name(&self) -> &'static str;

    fn encode_tasks(&self, batch: &TaskBatch) -> SimnetResult<Vec<u8>>;
    fn decode_tasks(&self, bytes: &[u8]) -> SimnetResult<TaskBatch>;

    fn encode_results(&self, batch: &ResultBatch) -> SimnetResult<Vec<u8>>;
    fn decode_results(&self, bytes: &[u8]) -> SimnetResult<ResultBatch>;
}

/// 根据配置选择编码策略
pub fn for_kind(kind: CodecKind) -> Box<dyn BatchCodec> {
    match kind {
        CodecKind::Bincode => Box::new(BincodeCodec),
        CodecKind::Compact => Box::new(CompactCodec),
    }
}

/// 基于serde/bincode的通用编码策略
pub struct BincodeCodec;

impl BatchCodec for BincodeCodec {
    fn name(&self) -> &'static str {
        "bincode"
    }

    fn encode_tasks(&self, batch: &TaskBatch) -> SimnetResult<Vec<u8>> {
        bincode::serialize(batch).map_err(|e| SimnetError::Codec(format!("任务批次编码失败: {e}")))
    }

    fn decode_tasks(&self, bytes: &[u8]) -> SimnetResult<TaskBatch> {
        bincode::deserialize(bytes).map_err(|e| SimnetError::Codec(format!("任务批次解码失败: {e}")))
    }

    fn encode_results(&self, batch: &ResultBatch) -> SimnetResult<Vec<u8>> {
        bincode::serialize(batch).map_err(|e| SimnetError::Codec(format!("结果批次编码失败: {e}")))
    }

    fn decode_results(&self, bytes: &[u8]) -> SimnetResult<ResultBatch> {
        bincode::deserialize(bytes).map_err(|e| SimnetError::Codec(format!("结果批次解码失败: {e}")))
    }
}

/// 手写紧凑二进制编码策略
///
/// 所有多字节数值采用大端序；批次头为16字节批次编号加4字节条目数。
pub struct CompactCodec;

impl BatchCodec for CompactCodec {
    fn name(&self) -> &'static str {
        "compact"
    }

    fn encode_tasks(&self, batch: &TaskBatch) -> SimnetResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(24 + batch.tasks.len() * 64);
        buf.extend_from_slice(batch.id.as_bytes());
        write_u32(&mut buf, batch.tasks.len() as u32)?;
        for task in &batch.tasks {
            buf.extend_from_slice(&task.id.to_be_bytes());
            buf.extend_from_slice(&task.seed.to_be_bytes());
            buf.extend_from_slice(&task.start_time.to_be_bytes());
            buf.extend_from_slice(&task.deadline.to_be_bytes());
            buf.extend_from_slice(&task.samplings.to_be_bytes());
            buf.extend_from_slice(&task.submission.to_be_bytes());
            write_str(&mut buf, &task.model)?;
        }
        Ok(buf)
    }

    fn decode_tasks(&self, bytes: &[u8]) -> SimnetResult<TaskBatch> {
        let mut r = ByteReader::new(bytes);
        let id = r.read_uuid()?;
        let count = r.read_u32()?;
        let mut tasks = Vec::with_capacity(count as usize);
        for _ in 0..count {
            tasks.push(SimulationTask {
                id: r.read_u64()?,
                seed: r.read_u64()?,
                start_time: r.read_f64()?,
                deadline: r.read_f64()?,
                samplings: r.read_u32()?,
                submission: r.read_u64()?,
                model: r.read_str()?,
            });
        }
        r.finish()?;
        Ok(TaskBatch { id, tasks })
    }

    fn encode_results(&self, batch: &ResultBatch) -> SimnetResult<Vec<u8>> {
        let mut buf = Vec::with_capacity(24 + batch.outcomes.len() * 128);
        buf.extend_from_slice(batch.batch_id.as_bytes());
        write_u32(&mut buf, batch.outcomes.len() as u32)?;
        for outcome in &batch.outcomes {
            match outcome {
                TaskOutcome::Completed { task_id, trajectory } => {
                    buf.push(0);
                    buf.extend_from_slice(&task_id.to_be_bytes());
                    buf.extend_from_slice(&trajectory.start.to_be_bytes());
                    buf.extend_from_slice(&trajectory.end.to_be_bytes());
                    buf.push(trajectory.successful as u8);
                    buf.extend_from_slice(&trajectory.generation_time_ns.to_be_bytes());
                    write_u32(&mut buf, trajectory.samples.len() as u32)?;
                    for sample in &trajectory.samples {
                        buf.extend_from_slice(&sample.time.to_be_bytes());
                        write_u32(&mut buf, sample.values.len() as u32)?;
                        for v in &sample.values {
                            buf.extend_from_slice(&v.to_be_bytes());
                        }
                    }
                }
                TaskOutcome::Faulted { task_id, reason } => {
                    buf.push(1);
                    buf.extend_from_slice(&task_id.to_be_bytes());
                    write_str(&mut buf, reason)?;
                }
            }
        }
        Ok(buf)
    }

    fn decode_results(&self, bytes: &[u8]) -> SimnetResult<ResultBatch> {
        let mut r = ByteReader::new(bytes);
        let batch_id = r.read_uuid()?;
        let count = r.read_u32()?;
        let mut outcomes = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let tag = r.read_u8()?;
            let task_id = r.read_u64()?;
            match tag {
                0 => {
                    let start = r.read_f64()?;
                    let end = r.read_f64()?;
                    let successful = r.read_u8()? != 0;
                    let generation_time_ns = r.read_u64()?;
                    let sample_count = r.read_u32()?;
                    let mut samples = Vec::with_capacity(sample_count as usize);
                    for _ in 0..sample_count {
                        let time = r.read_f64()?;
                        let len = r.read_u32()?;
                        let mut values = Vec::with_capacity(len as usize);
                        for _ in 0..len {
                            values.push(r.read_f64()?);
                        }
                        samples.push(Sample { time, values });
                    }
                    outcomes.push(TaskOutcome::Completed {
                        task_id,
                        trajectory: Trajectory {
                            start,
                            end,
                            successful,
                            generation_time_ns,
                            samples,
                        },
                    });
                }
                1 => {
                    let reason = r.read_str()?;
                    outcomes.push(TaskOutcome::Faulted { task_id, reason });
                }
                other => {
                    return Err(SimnetError::Codec(format!("未知的结果标记: {other}")));
                }
            }
        }
        r.finish()?;
        Ok(ResultBatch { batch_id, outcomes })
    }
}

fn write_u32(buf: &mut Vec<u8>, value: u32) -> SimnetResult<()> {
    buf.extend_from_slice(&value.to_be_bytes());
    Ok(())
}

fn write_str(buf: &mut Vec<u8>, s: &str) -> SimnetResult<()> {
    let bytes = s.as_bytes();
    if bytes.len() > u16::MAX as usize {
        return Err(SimnetError::Codec(format!(
            "字符串过长无法编码: {} 字节",
            bytes.len()
        )));
    }
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
    Ok(())
}

/// 带边界检查的字节读取游标
struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn take(&mut self, n: usize) -> SimnetResult<&'a [u8]> {
        if self.pos + n > self.bytes.len() {
            return Err(SimnetError::Codec(format!(
                "字节流提前结束: 需要 {n} 字节, 剩余 {}",
                self.bytes.len() - self.pos
            )));
        }
        let slice = &self.bytes[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn read_u8(&mut self) -> SimnetResult<u8> {
        Ok(self.take(1)?[0])
    }

    fn read_u32(&mut self) -> SimnetResult<u32> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn read_u64(&mut self) -> SimnetResult<u64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(u64::from_be_bytes(arr))
    }

    fn read_f64(&mut self) -> SimnetResult<f64> {
        let b = self.take(8)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(f64::from_be_bytes(arr))
    }

    fn read_uuid(&mut self) -> SimnetResult<Uuid> {
        let b = self.take(16)?;
        let mut arr = [0u8; 16];
        arr.copy_from_slice(b);
        Ok(Uuid::from_bytes(arr))
    }

    fn read_str(&mut self) -> SimnetResult<String> {
        let len = {
            let b = self.take(2)?;
            u16::from_be_bytes([b[0], b[1]]) as usize
        };
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| SimnetError::Codec(format!("非法UTF-8字符串: {e}")))
    }

    /// 解码结束后不允许有尾随字节
    fn finish(&self) -> SimnetResult<()> {
        if self.pos != self.bytes.len() {
            return Err(SimnetError::Codec(format!(
                "解码后存在 {} 个尾随字节",
                self.bytes.len() - self.pos
            )));
        }
        Ok(())
    }
}
