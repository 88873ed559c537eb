//! 错误类型定义

use thiserror::Error;

/// 协议错误类型
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 监听端口绑定失败
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// 连接超时
    #[error("Connection timeout")]
    ConnectionTimeout,

    /// 连接已关闭（EOF 或被对端重置）
    #[error("Connection closed")]
    ConnectionClosed,
}

impl ProtocolError {
    /// 读取失败时归类：对端关闭的情况统一为 ConnectionClosed
    pub(crate) fn from_read(err: std::io::Error) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => {
                ProtocolError::ConnectionClosed
            }
            _ => ProtocolError::Io(err),
        }
    }
}

/// 协议操作结果类型
pub type Result<T> = std::result::Result<T, ProtocolError>;
