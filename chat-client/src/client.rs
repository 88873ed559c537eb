//! 终端聊天客户端
//!
//! - `request_room`：连接 Host 控制端口，读取房间公告
//! - `chat`：连接房间端口，发送名字后转发 stdin 与房间消息

use chrono::{Local, NaiveTime};
use protocol::{
    frame_text, parse_announcement, Connection, ProtocolError, TcpTransport, Transport,
    TransportConfig, NAME_FRAME_SIZE, QUIT_SENTINEL,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

/// 校验用户名：非空，且能在一帧内发送完
pub fn validate_name(name: &str) -> Result<(), String> {
    if name.trim().is_empty() {
        return Err("name must not be empty".to_string());
    }
    if name.len() > NAME_FRAME_SIZE {
        return Err(format!("name must be at most {} bytes", NAME_FRAME_SIZE));
    }
    if name.bytes().any(|b| b == 0) {
        return Err("name must not contain NUL bytes".to_string());
    }
    Ok(())
}

/// 给收到的消息加上本地时间戳
pub fn format_line(text: &str, at: NaiveTime) -> String {
    format!("[{}] {}", at.format("%H:%M:%S"), text.trim_end())
}

/// 请求 Host 创建房间，返回公告中的房间地址
pub async fn request_room(control_addr: &str, config: &TransportConfig) -> anyhow::Result<String> {
    let transport = TcpTransport::connect(control_addr, config).await?;
    let mut conn = Connection::new(transport);

    // 公告以换行结束，Host 写完即关闭连接
    let mut reply = String::new();
    loop {
        match conn.recv().await {
            Ok(frame) => {
                reply.push_str(&frame_text(&frame));
                if reply.contains('\n') {
                    break;
                }
            }
            Err(ProtocolError::ConnectionClosed) => break,
            Err(e) => return Err(e.into()),
        }
    }

    match parse_announcement(&reply) {
        Some(addr) => {
            info!("Room opened on {}", addr);
            Ok(addr.to_string())
        }
        None => anyhow::bail!("host did not open a room (reply: {:?})", reply),
    }
}

/// 加入房间并开始聊天，直到 stdin 结束、输入 `/quit` 或房间断开
pub async fn chat(room_addr: &str, name: &str, config: &TransportConfig) -> anyhow::Result<()> {
    validate_name(name).map_err(anyhow::Error::msg)?;

    let transport = TcpTransport::connect(room_addr, config).await?;
    info!("Connected to {}", room_addr);
    let (mut reader, mut writer) = Connection::new(transport).split();

    // 第一帧即名字
    writer.send(name).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let quit = String::from_utf8_lossy(QUIT_SENTINEL).into_owned();

    loop {
        tokio::select! {
            result = reader.recv() => {
                match result {
                    Ok(frame) => println!("{}", format_line(&frame_text(&frame), Local::now().time())),
                    Err(ProtocolError::ConnectionClosed) => {
                        info!("Room closed the connection");
                        break;
                    }
                    Err(e) => {
                        warn!("Receive error: {}", e);
                        break;
                    }
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) if line.trim_end() == quit => {
                        writer.send(&quit).await?;
                        break;
                    }
                    Some(line) => {
                        debug!("Sending {} bytes", line.len() + 1);
                        writer.send(&format!("{}\n", line)).await?;
                    }
                    None => {
                        // stdin 结束视为退出
                        writer.send(&quit).await?;
                        break;
                    }
                }
            }
        }
    }

    let _ = writer.shutdown().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use protocol::{announcement, TcpListener, TransportListener};

    #[test]
    fn test_validate_name() {
        assert!(validate_name("alice").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name("   ").is_err());
        assert!(validate_name(&"a".repeat(NAME_FRAME_SIZE + 1)).is_err());
        assert!(validate_name("al\0ice").is_err());
    }

    #[test]
    fn test_format_line() {
        let at = NaiveTime::from_hms_opt(9, 5, 7).unwrap();
        assert_eq!(format_line("alice> hi\n", at), "[09:05:07] alice> hi");
        assert_eq!(format_line("bob has left chat", at), "[09:05:07] bob has left chat");
    }

    #[tokio::test]
    async fn test_request_room_reads_announcement() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let host = tokio::spawn(async move {
            let mut conn = Connection::new(listener.accept().await.unwrap());
            conn.send(&announcement("127.0.0.1:8888")).await.unwrap();
            conn.close().await.unwrap();
        });

        let room = request_room(&addr, &TransportConfig::default()).await.unwrap();
        assert_eq!(room, "127.0.0.1:8888");
        host.await.unwrap();
    }

    #[tokio::test]
    async fn test_request_room_without_announcement() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let host = tokio::spawn(async move {
            // 房间绑定失败时 Host 直接关闭控制连接
            drop(listener.accept().await.unwrap());
        });

        assert!(request_room(&addr, &TransportConfig::default()).await.is_err());
        host.await.unwrap();
    }
}
