//! 消息类型定义

use std::fmt;

use crate::codec::trim_padding;
use crate::{ANNOUNCEMENT_PREFIX, QUIT_SENTINEL};

/// 房间内广播的一行文本
///
/// 渲染规则：
/// - 聊天消息以发送者名字为前缀：`alice> hello`
/// - 系统消息不带前缀：`alice has joined the chat` / `alice has left chat`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatLine {
    /// 聊天消息
    Chat { from: String, body: String },
    /// 用户加入
    Joined { name: String },
    /// 用户离开
    Left { name: String },
}

impl ChatLine {
    /// 由一帧原始字节构造聊天消息，非 UTF-8 字节按 lossy 处理
    pub fn chat(from: &str, frame: &[u8]) -> Self {
        ChatLine::Chat {
            from: from.to_string(),
            body: frame_text(frame),
        }
    }

    /// 是否为系统消息
    pub fn is_system(&self) -> bool {
        !matches!(self, ChatLine::Chat { .. })
    }
}

impl fmt::Display for ChatLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatLine::Chat { from, body } => write!(f, "{}> {}", from, body),
            ChatLine::Joined { name } => write!(f, "{} has joined the chat", name),
            ChatLine::Left { name } => write!(f, "{} has left chat", name),
        }
    }
}

/// 帧内容转文本（去掉填充）
pub fn frame_text(frame: &[u8]) -> String {
    String::from_utf8_lossy(trim_padding(frame)).into_owned()
}

/// 判断一帧是否为退出指令
///
/// 先去掉 0x00 填充，再去掉行尾的 `\r` / `\n`，剩余内容必须与 `/quit` 完全相同。
pub fn is_quit(frame: &[u8]) -> bool {
    let mut content = trim_padding(frame);
    while let [rest @ .., b'\r' | b'\n'] = content {
        content = rest;
    }
    content == QUIT_SENTINEL
}

/// 构造房间创建公告：`Waiting Room on <addr>\n`
pub fn announcement(addr: impl fmt::Display) -> String {
    format!("{}{}\n", ANNOUNCEMENT_PREFIX, addr)
}

/// 解析房间创建公告，返回房间地址
pub fn parse_announcement(line: &str) -> Option<&str> {
    let addr = line.strip_prefix(ANNOUNCEMENT_PREFIX)?.trim_end();
    if addr.is_empty() {
        None
    } else {
        Some(addr)
    }
}
