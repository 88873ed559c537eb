//! 服务端错误类型

use protocol::ProtocolError;
use thiserror::Error;

/// 服务端错误类型
///
/// 所有错误都在最小的作用域（会话、房间、监听器）内处理并记录日志，
/// 不会向上传播到 Host。
#[derive(Error, Debug)]
pub enum ServerError {
    /// 传输层错误（包括端口绑定失败）
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// 读取用户名失败，未创建会话
    #[error("Handshake failed: {0}")]
    Handshake(#[source] ProtocolError),

    /// 规定时间内未收到用户名
    #[error("Handshake timeout")]
    HandshakeTimeout,

    /// 房间已关闭，拒绝加入
    #[error("Room {port} is closed")]
    RoomClosed { port: u16 },

    /// 房间端口已用尽
    #[error("Room ports exhausted")]
    PortsExhausted,
}

pub type Result<T> = std::result::Result<T, ServerError>;
