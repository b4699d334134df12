//! 编解码管线
//!
//! 把编码策略与压缩策略组合成发送/接收路径，并在每次操作时记录
//! 各阶段耗时与各阶段边界的载荷大小。窗口大小决策对哪个阶段主导
//! 开销十分敏感，因此这组计时数据是必需的观测属性。

use std::time::Instant;

use simnet_core::config::CodecConfig;
use simnet_core::models::{ResultBatch, TaskBatch};
use simnet_core::SimnetResult;

use crate::codec::{self, BatchCodec};
use crate::compression::{self, Compression};

/// 单次编解码操作的阶段统计
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageStats {
    /// 编码或解码阶段耗时（纳秒）
    pub codec_ns: u64,
    /// 压缩或解压阶段耗时（纳秒）
    pub compression_ns: u64,
    /// 编码阶段边界的载荷大小（压缩前/解压后）
    pub encoded_len: usize,
    /// 线上传输的载荷大小（压缩后）
    pub transport_len: usize,
}

/// 编码与压缩组成的管线：编码 → 压缩 → [网络] → 解压 → 解码
pub struct CodecPipeline {
    codec: Box<dyn BatchCodec>,
    compression: Box<dyn Compression>,
}

impl CodecPipeline {
    pub fn from_config(config: &CodecConfig) -> Self {
        Self {
            codec: codec::for_kind(config.codec),
            compression: compression::for_kind(config.compression),
        }
    }

    pub fn codec_name(&self) -> &'static str {
        self.codec.name()
    }

    pub fn compression_name(&self) -> &'static str {
        self.compression.name()
    }

    pub fn encode_tasks(&self, batch: &TaskBatch) -> SimnetResult<(Vec<u8>, StageStats)> {
        let started = Instant::now();
        let encoded = self.codec.encode_tasks(batch)?;
        let codec_ns = started.elapsed().as_nanos() as u64;

        let started = Instant::now();
        let compressed = self.compression.compress(&encoded)?;
        let compression_ns = started.elapsed().as_nanos() as u64;

        let stats = StageStats {
            codec_ns,
            compression_ns,
            encoded_len: encoded.len(),
            transport_len: compressed.len(),
        };
        Ok((compressed, stats))
    }

    pub fn decode_tasks(&self, bytes: &[u8]) -> SimnetResult<(TaskBatch, StageStats)> {
        let started = Instant::now();
        let decompressed = self.compression.decompress(bytes)?;
        let compression_ns = started.elapsed().as_nanos() as u64;

        let started = Instant::now();
        let batch = self.codec.decode_tasks(&decompressed)?;
        let codec_ns = started.elapsed().as_nanos() as u64;

        let stats = StageStats {
            codec_ns,
            compression_ns,
            encoded_len: decompressed.len(),
            transport_len: bytes.len(),
        };
        Ok((batch, stats))
    }

    pub fn encode_results(&self, batch: &ResultBatch) -> SimnetResult<(Vec<u8>, StageStats)> {
        let started = Instant::now();
        let encoded = self.codec.encode_results(batch)?;
        let codec_ns = started.elapsed().as_nanos() as u64;

        let started = Instant::now();
        let compressed = self.compression.compress(&encoded)?;
        let compression_ns = started.elapsed().as_nanos() as u64;

        let stats = StageStats {
            codec_ns,
            compression_ns,
            encoded_len: encoded.len(),
            transport_len: compressed.len(),
        };
        Ok((compressed, stats))
    }

    pub fn decode_results(&self, bytes: &[u8]) -> SimnetResult<(ResultBatch, StageStats)> {
        let started = Instant::now();
        let decompressed = self.compression.decompress(bytes)?;
        let compression_ns = started.elapsed().as_nanos() as u64;

        let started = Instant::now();
        let batch = self.codec.decode_results(&decompressed)?;
        let codec_ns = started.elapsed().as_nanos() as u64;

        let stats = StageStats {
            codec_ns,
            compression_ns,
            encoded_len: decompressed.len(),
            transport_len: bytes.len(),
        };
        Ok((batch, stats))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use simnet_core::config::{CodecKind, CompressionKind};
    use simnet_core::models::{Sample, SimulationTask, TaskOutcome, Trajectory};

    fn pipeline(codec: CodecKind, compression: CompressionKind) -> CodecPipeline {
        CodecPipeline::from_config(&CodecConfig { codec, compression })
    }

    fn task_batch(n: u64) -> TaskBatch {
        TaskBatch::new(
            (0..n)
                .map(|i| SimulationTask {
                    id: i,
                    model: "population".to_string(),
                    seed: i * 7,
                    start_time: 0.0,
                    deadline: 50.0,
                    samplings: 20,
                    submission: 1,
                })
                .collect(),
        )
    }

    #[test]
    fn test_pipeline_round_trip_all_strategies() {
        let batch = task_batch(16);
        for codec in [CodecKind::Bincode, CodecKind::Compact] {
            for compression in [CompressionKind::Gzip, CompressionKind::None] {
                let p = pipeline(codec, compression);
                let (bytes, stats) = p.encode_tasks(&batch).unwrap();
                assert_eq!(stats.transport_len, bytes.len());
                let (decoded, decode_stats) = p.decode_tasks(&bytes).unwrap();
                assert_eq!(decoded, batch);
                assert_eq!(decode_stats.encoded_len, stats.encoded_len);
            }
        }
    }

    #[test]
    fn test_result_pipeline_round_trip() {
        let p = pipeline(CodecKind::Compact, CompressionKind::Gzip);
        let tasks = task_batch(2);
        let results = ResultBatch::new(
            tasks.id,
            vec![
                TaskOutcome::Completed {
                    task_id: 0,
                    trajectory: Trajectory {
                        start: 0.0,
                        end: 50.0,
                        successful: true,
                        generation_time_ns: 10,
                        samples: vec![Sample {
                            time: 0.0,
                            values: vec![1.0, 2.0],
                        }],
                    },
                },
                TaskOutcome::Faulted {
                    task_id: 1,
                    reason: "fault".to_string(),
                },
            ],
        );
        let (bytes, _) = p.encode_results(&results).unwrap();
        let (decoded, _) = p.decode_results(&bytes).unwrap();
        assert_eq!(decoded, results);
    }

    #[test]
    fn test_gzip_shrinks_repetitive_batches() {
        let batch = task_batch(256);
        let gz = pipeline(CodecKind::Compact, CompressionKind::Gzip);
        let (bytes, stats) = gz.encode_tasks(&batch).unwrap();
        assert!(stats.transport_len < stats.encoded_len);
        assert_eq!(bytes.len(), stats.transport_len);
    }

    #[test]
    fn test_decode_fault_is_error_not_panic() {
        let p = pipeline(CodecKind::Compact, CompressionKind::None);
        assert!(p.decode_results(&[1, 2, 3]).is_err());
    }
}
