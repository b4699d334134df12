//! 字节流压缩策略
//!
//! 压缩与编码正交：压缩器处理编码后的字节，不感知批次结构。

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;

use simnet_core::config::CompressionKind;
use simnet_core::{SimnetError, SimnetResult};

/// 压缩接口
pub trait Compression: Send + Sync {
    fn name(&self) -> &'static str;
    fn compress(&self, bytes: &[u8]) -> SimnetResult<Vec<u8>>;
    fn decompress(&self, bytes: &[u8]) -> SimnetResult<Vec<u8>>;
}

/// 根据配置选择压缩策略
pub fn for_kind(kind: CompressionKind) -> Box<dyn Compression> {
    match kind {
        CompressionKind::Gzip => Box::new(GzipCompression),
        CompressionKind::None => Box::new(NoCompression),
    }
}

/// gzip压缩
pub struct GzipCompression;

impl Compression for GzipCompression {
    fn name(&self) -> &'static str {
        "gzip"
    }

    fn compress(&self, bytes: &[u8]) -> SimnetResult<Vec<u8>> {
        let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder
            .write_all(bytes)
            .map_err(|e| SimnetError::Compression(format!("gzip压缩失败: {e}")))?;
        encoder
            .finish()
            .map_err(|e| SimnetError::Compression(format!("gzip压缩失败: {e}")))
    }

    fn decompress(&self, bytes: &[u8]) -> SimnetResult<Vec<u8>> {
        let mut decoder = GzDecoder::new(bytes);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|e| SimnetError::Compression(format!("gzip解压失败: {e}")))?;
        Ok(out)
    }
}

/// 直通，不做压缩
pub struct NoCompression;

impl Compression for NoCompression {
    fn name(&self) -> &'static str {
        "none"
    }

    fn compress(&self, bytes: &[u8]) -> SimnetResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }

    fn decompress(&self, bytes: &[u8]) -> SimnetResult<Vec<u8>> {
        Ok(bytes.to_vec())
    }
}
