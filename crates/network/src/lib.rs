//! # 网络层
//!
//! 提供Master与Worker之间的全部线上设施：可互换的批次编解码策略、
//! 字节流压缩、两者组成的编解码管线、长度前缀帧通道、协议帧，以及
//! 阶段计时记录器。
//!
//! 管线各阶段严格组合：编码 → 压缩 → [网络] → 解压 → 解码，
//! 两个阶段可独立替换。

pub mod benchmark;
pub mod codec;
pub mod compression;
pub mod frame;
pub mod pipeline;
pub mod protocol;

pub use benchmark::BenchmarkUnit;
pub use codec::{BatchCodec, BincodeCodec, CompactCodec};
pub use compression::{Compression, GzipCompression, NoCompression};
pub use frame::WireChannel;
pub use pipeline::{CodecPipeline, StageStats};
pub use protocol::{MasterFrame, WorkerFrame};
