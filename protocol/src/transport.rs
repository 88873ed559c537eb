//! 传输层抽象
//!
//! 房间引擎只依赖 `Transport` / `TransportListener` 两个 trait，
//! 具体的 TCP accept/listen 由这里提供。

use std::net::SocketAddr;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{ProtocolError, Result};
use crate::CONNECT_TIMEOUT;

/// 传输层配置
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// 连接超时时间
    pub connect_timeout: Duration,
    /// 是否禁用 Nagle 算法（TCP nodelay）
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: CONNECT_TIMEOUT,
            nodelay: true, // 聊天应用建议开启，减少延迟
        }
    }
}

/// 传输层抽象 trait
///
/// 定义了客户端连接和读写分离的基本操作。
pub trait Transport: Send + Sync + Sized {
    /// 读取端类型
    type Reader: AsyncRead + Unpin + Send + 'static;
    /// 写入端类型
    type Writer: AsyncWrite + Unpin + Send + 'static;

    /// 建立连接（客户端使用）
    ///
    /// # Arguments
    /// * `addr` - 服务器地址，格式为 "host:port"
    /// * `config` - 传输配置
    fn connect(
        addr: &str,
        config: &TransportConfig,
    ) -> impl std::future::Future<Output = Result<Self>> + Send;

    /// 对端地址（仅用于日志）
    fn peer_addr(&self) -> Option<SocketAddr>;

    /// 分离读写端
    fn split(self) -> (Self::Reader, Self::Writer);
}

/// 传输层监听器抽象 trait（服务端使用）
pub trait TransportListener: Send + Sync + Sized {
    /// 对应的传输类型
    type Transport: Transport + 'static;

    /// 绑定地址并开始监听，失败返回 `ProtocolError::Bind`
    fn bind(addr: &str) -> impl std::future::Future<Output = Result<Self>> + Send;

    /// 接受新连接
    fn accept(&self) -> impl std::future::Future<Output = Result<Self::Transport>> + Send;

    /// 本地绑定地址
    fn local_addr(&self) -> Result<SocketAddr>;
}

// ============================================================================
// TCP 实现
// ============================================================================

/// TCP 传输实现
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
}

impl Transport for TcpTransport {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    async fn connect(addr: &str, config: &TransportConfig) -> Result<Self> {
        // 带超时的连接
        let stream = timeout(config.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| ProtocolError::ConnectionTimeout)?
            .map_err(ProtocolError::Io)?;

        stream.set_nodelay(config.nodelay)?;

        Ok(Self { stream })
    }

    fn peer_addr(&self) -> Option<SocketAddr> {
        self.stream.peer_addr().ok()
    }

    fn split(self) -> (Self::Reader, Self::Writer) {
        self.stream.into_split()
    }
}

impl TcpTransport {
    /// 从已有的 TcpStream 创建（服务端 accept 后使用）
    pub fn from_stream(stream: TcpStream) -> Result<Self> {
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }
}

/// TCP 监听器实现
pub struct TcpListener {
    listener: tokio::net::TcpListener,
}

impl TransportListener for TcpListener {
    type Transport = TcpTransport;

    async fn bind(addr: &str) -> Result<Self> {
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|source| ProtocolError::Bind {
                addr: addr.to_string(),
                source,
            })?;
        debug!("Bound listener on {}", addr);
        Ok(Self { listener })
    }

    async fn accept(&self) -> Result<TcpTransport> {
        let (stream, _addr) = self.listener.accept().await.map_err(ProtocolError::Io)?;
        TcpTransport::from_stream(stream)
    }

    fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}
