//! 连接封装
//!
//! 把传输层和帧编解码封装在一起。

use tokio::io::{AsyncRead, AsyncWrite};

use crate::codec::{FrameReader, FrameWriter};
use crate::error::Result;
use crate::transport::Transport;

/// 连接封装
///
/// # Type Parameters
/// * `R` - 读取端类型
/// * `W` - 写入端类型
pub struct Connection<R, W> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> Connection<R, W> {
    /// 从传输层创建连接
    pub fn new<T: Transport<Reader = R, Writer = W>>(transport: T) -> Self {
        let (reader, writer) = transport.split();
        Self::from_parts(reader, writer)
    }

    /// 从读写端直接创建连接
    pub fn from_parts(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// 分离为读取端和写入端
    ///
    /// 用于需要并发读写的场景
    pub fn split(self) -> (FrameReader<R>, FrameWriter<W>) {
        (self.reader, self.writer)
    }

    /// 接收一帧
    pub async fn recv(&mut self) -> Result<Vec<u8>> {
        self.reader.read_frame().await
    }

    /// 接收一帧，最多 `limit` 字节
    pub async fn recv_limited(&mut self, limit: usize) -> Result<Vec<u8>> {
        self.reader.read_frame_limited(limit).await
    }

    /// 发送文本
    pub async fn send(&mut self, text: &str) -> Result<()> {
        self.writer.send(text).await
    }

    /// 关闭写端
    pub async fn close(&mut self) -> Result<()> {
        self.writer.shutdown().await
    }
}
