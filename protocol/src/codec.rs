//! 帧编解码
//!
//! 房间内的流量没有长度前缀，也没有分隔符：
//! ```text
//! ┌───────────────────────────────────────────────┬──────────────┐
//! │   一次 read 收到的字节（最多 FRAME_SIZE）     │  0x00 填充   │
//! └───────────────────────────────────────────────┴──────────────┘
//! ```
//! 一次 read 就是一条逻辑消息；超长部分留给下一次 read，
//! 不做跨帧重组。填充在转发前去掉。

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{ProtocolError, Result};
use crate::FRAME_SIZE;

/// 去掉帧尾的 0x00 填充，返回逻辑内容（截止到第一个 0x00）
pub fn trim_padding(frame: &[u8]) -> &[u8] {
    match frame.iter().position(|&b| b == 0) {
        Some(end) => &frame[..end],
        None => frame,
    }
}

/// 帧读取器
pub struct FrameReader<R> {
    reader: R,
    buffer: Vec<u8>,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    /// 创建新的帧读取器
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buffer: vec![0u8; FRAME_SIZE],
        }
    }

    /// 读取一帧（最多 FRAME_SIZE 字节），返回去掉填充后的内容
    pub async fn read_frame(&mut self) -> Result<Vec<u8>> {
        self.read_frame_limited(FRAME_SIZE).await
    }

    /// 读取一帧，本次最多读取 `limit` 字节
    ///
    /// 对端关闭（read 返回 0）时返回 `ProtocolError::ConnectionClosed`。
    pub async fn read_frame_limited(&mut self, limit: usize) -> Result<Vec<u8>> {
        let limit = limit.min(self.buffer.len());
        // 每帧之前清零，保证上一帧的残留不会混进来
        self.buffer[..limit].fill(0);

        let n = self
            .reader
            .read(&mut self.buffer[..limit])
            .await
            .map_err(ProtocolError::from_read)?;
        if n == 0 {
            return Err(ProtocolError::ConnectionClosed);
        }

        Ok(trim_padding(&self.buffer[..n]).to_vec())
    }

    /// 接收一帧（read_frame 的别名）
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        self.read_frame().await
    }
}

/// 帧写入器
pub struct FrameWriter<W> {
    writer: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    /// 创建新的帧写入器
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    /// 写入一帧：只写逻辑内容，填充不上线
    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<()> {
        self.writer.write_all(trim_padding(payload)).await?;
        self.writer.flush().await?;
        Ok(())
    }

    /// 发送文本（write_frame 的别名）
    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.write_frame(text.as_bytes()).await
    }

    /// 关闭写端
    pub async fn shutdown(&mut self) -> Result<()> {
        self.writer.shutdown().await?;
        Ok(())
    }
}
