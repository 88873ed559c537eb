//! 多房间聊天中继共享协议库
//!
//! 包含:
//! - 消息类型定义 (ChatLine) 与公告格式
//! - 传输层抽象 (Transport / TransportListener)
//! - 定长帧读写 (FrameReader / FrameWriter)
//! - 连接封装 (Connection)

mod message;
mod constants;
mod transport;
mod codec;
mod connection;
mod error;

pub use message::{announcement, frame_text, is_quit, parse_announcement, ChatLine};
pub use constants::*;
pub use transport::{Transport, TransportListener, TransportConfig, TcpTransport, TcpListener};
pub use codec::{trim_padding, FrameReader, FrameWriter};
pub use connection::Connection;
pub use error::{ProtocolError, Result};
