//! 长度前缀帧通道
//!
//! 在一条持久连接上收发字节块：每块带4字节大端长度前缀，
//! 一块即一条应用层消息。通道对底层流保持泛型，生产路径使用
//! `TcpStream`，测试使用`tokio::io::duplex`。

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;

use simnet_core::models::WorkerAddress;
use simnet_core::{SimnetError, SimnetResult};

/// 单块载荷的大小上限，防止坏长度前缀导致的内存放大
pub const MAX_BLOCK_LEN: usize = 256 * 1024 * 1024;

/// 长度前缀帧通道
pub struct WireChannel<S> {
    stream: S,
}

impl WireChannel<TcpStream> {
    /// 连接到指定Worker地址
    pub async fn connect(addr: &WorkerAddress) -> SimnetResult<Self> {
        let stream = TcpStream::connect((addr.host.as_str(), addr.port)).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> WireChannel<S> {
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// 发送一个字节块
    pub async fn write_block(&mut self, block: &[u8]) -> SimnetResult<()> {
        if block.len() > MAX_BLOCK_LEN {
            return Err(SimnetError::Protocol(format!(
                "发送块超过大小上限: {} 字节",
                block.len()
            )));
        }
        self.stream.write_u32(block.len() as u32).await?;
        self.stream.write_all(block).await?;
        self.stream.flush().await?;
        Ok(())
    }

    /// 读取一个完整的字节块
    pub async fn read_block(&mut self) -> SimnetResult<Vec<u8>> {
        let len = self.stream.read_u32().await? as usize;
        if len > MAX_BLOCK_LEN {
            return Err(SimnetError::Protocol(format!(
                "接收块超过大小上限: {len} 字节"
            )));
        }
        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await?;
        Ok(buf)
    }

    /// 关闭写方向，使对端读到EOF
    pub async fn shutdown(&mut self) -> SimnetResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_block_round_trip() {
        let (a, b) = tokio::io::duplex(4096);
        let mut sender = WireChannel::new(a);
        let mut receiver = WireChannel::new(b);

        sender.write_block(b"hello").await.unwrap();
        sender.write_block(&[]).await.unwrap();
        sender.write_block(&[0xab; 1000]).await.unwrap();

        assert_eq!(receiver.read_block().await.unwrap(), b"hello");
        assert_eq!(receiver.read_block().await.unwrap(), Vec::<u8>::new());
        assert_eq!(receiver.read_block().await.unwrap(), vec![0xab; 1000]);
    }

    #[tokio::test]
    async fn test_oversized_length_prefix_rejected() {
        let (a, b) = tokio::io::duplex(64);
        let mut raw = a;
        // 手工写入一个超过上限的长度前缀
        tokio::io::AsyncWriteExt::write_u32(&mut raw, u32::MAX)
            .await
            .unwrap();
        let mut receiver = WireChannel::new(b);
        assert!(receiver.read_block().await.is_err());
    }

    #[tokio::test]
    async fn test_eof_is_error() {
        let (a, b) = tokio::io::duplex(64);
        drop(a);
        let mut receiver = WireChannel::new(b);
        assert!(receiver.read_block().await.is_err());
    }
}
