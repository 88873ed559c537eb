//! 聊天室终端客户端
//!
//! 用法:
//! - `chat-client host [control_addr]`：请求 Host 创建新房间
//! - `chat-client join <room_addr> <name>`：加入房间聊天

mod client;

use anyhow::{bail, Result};
use protocol::{announcement, TransportConfig, DEFAULT_CONTROL_PORT};
use tracing_subscriber::EnvFilter;

fn usage() -> String {
    "usage: chat-client host [control_addr] | chat-client join <room_addr> <name>".to_string()
}

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志（默认只输出警告，避免干扰聊天内容）
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("chat_client=warn".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let config = TransportConfig::default();

    match args.iter().map(String::as_str).collect::<Vec<_>>().as_slice() {
        ["host"] => {
            let addr = format!("127.0.0.1:{}", DEFAULT_CONTROL_PORT);
            let room = client::request_room(&addr, &config).await?;
            print!("{}", announcement(&room));
        }
        ["host", addr] => {
            let room = client::request_room(addr, &config).await?;
            print!("{}", announcement(&room));
        }
        ["join", room_addr, name] => {
            client::chat(room_addr, name, &config).await?;
        }
        _ => bail!(usage()),
    }

    Ok(())
}
