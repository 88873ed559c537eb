//! 多房间聊天中继服务端
//!
//! 控制端口上每来一个连接就分配一个新房间端口；
//! 客户端连上房间端口、发送名字后即可在房间内广播文本。

mod config;
mod error;
mod host;
mod registry;
mod room;
mod session;

use anyhow::Result;
use config::ServerConfig;
use host::Host;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("chat_server=debug".parse()?)
                .add_directive("protocol=debug".parse()?),
        )
        .init();

    let config = ServerConfig::from_args(std::env::args().skip(1))?
        .with_env(|key| std::env::var(key).ok())?;

    info!(
        "Start Room Server! control={} first_room_port={}",
        config.control_addr, config.first_room_port
    );

    let host = Host::new(config);
    host.run().await?;

    Ok(())
}
