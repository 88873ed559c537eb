//! 协议常量定义

use std::time::Duration;

/// Host 控制端口（请求新房间）
pub const DEFAULT_CONTROL_PORT: u16 = 3941;

/// 第一个房间端口，之后每个房间加 1，进程内不复用
pub const FIRST_ROOM_PORT: u16 = 8888;

/// 房间内单次读取的帧大小
pub const FRAME_SIZE: usize = 2048;

/// 首帧（用户名）最大读取字节数
pub const NAME_FRAME_SIZE: usize = 1024;

/// 退出指令
pub const QUIT_SENTINEL: &[u8] = b"/quit";

/// 房间创建公告前缀
pub const ANNOUNCEMENT_PREFIX: &str = "Waiting Room on ";

/// 加入超时（秒）- 连接后必须在此时间内发送用户名
pub const JOIN_TIMEOUT_SECS: u64 = 30;

/// 连接超时（秒）
pub const CONNECT_TIMEOUT_SECS: u64 = 10;

/// 加入超时 Duration
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(JOIN_TIMEOUT_SECS);

/// 连接超时 Duration
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(CONNECT_TIMEOUT_SECS);
