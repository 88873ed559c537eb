//! Host：控制端口上的房间分配
//!
//! 每个控制连接即一次"创建房间"请求：分配下一个端口，
//! 启动房间，回写 `Waiting Room on <addr>\n` 后关闭控制连接。

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use protocol::{announcement, Connection, TcpListener, Transport, TransportListener};
use tokio::sync::{watch, RwLock};
use tracing::{error, info, warn};

use crate::config::ServerConfig;
use crate::error::{Result, ServerError};
use crate::room::Room;

/// 关闭时等待房间退出的最长时间
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// 房间端口分配器
///
/// 单调递增，进程内不复用已释放的端口。
pub struct PortAllocator {
    next: AtomicU32,
}

impl PortAllocator {
    pub fn new(first: u16) -> Self {
        Self {
            next: AtomicU32::new(u32::from(first)),
        }
    }

    /// 分配下一个端口，超过 u16 范围时返回 `PortsExhausted`
    pub fn next_port(&self) -> Result<u16> {
        let port = self.next.fetch_add(1, Ordering::SeqCst);
        u16::try_from(port).map_err(|_| ServerError::PortsExhausted)
    }
}

/// 存活房间表
type Rooms = Arc<RwLock<HashMap<u16, Room>>>;

/// 房间分配服务
pub struct Host {
    config: Arc<ServerConfig>,
    ports: PortAllocator,
    rooms: Rooms,
    /// 关闭信号：置位后新启动的房间立即关闭
    closing: Arc<watch::Sender<bool>>,
}

impl Host {
    pub fn new(config: ServerConfig) -> Self {
        let (closing, _) = watch::channel(false);
        Self {
            ports: PortAllocator::new(config.first_room_port),
            config: Arc::new(config),
            rooms: Arc::new(RwLock::new(HashMap::new())),
            closing: Arc::new(closing),
        }
    }

    /// 绑定控制端口并运行，直到收到 Ctrl+C
    ///
    /// 控制端口绑定失败是唯一会让进程退出的错误。
    pub async fn run(&self) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.config.control_addr).await?;
        info!("Waiting for host user on {}", listener.local_addr()?);

        self.run_until(listener, async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!("Failed to install Ctrl+C handler: {}", e);
                std::future::pending::<()>().await;
            }
        })
        .await
    }

    /// 在给定监听器上运行控制循环，直到 `shutdown` 完成
    pub async fn run_until<L, F>(&self, listener: L, shutdown: F) -> anyhow::Result<()>
    where
        L: TransportListener,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Received shutdown signal, closing all rooms...");
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok(control) => self.open_room(control),
                        Err(e) => error!("Failed to accept control connection: {}", e),
                    }
                }
            }
        }

        self.shutdown().await;
        Ok(())
    }

    /// 当前存活房间的端口（升序）
    pub async fn room_ports(&self) -> Vec<u16> {
        let mut ports: Vec<u16> = self.rooms.read().await.keys().copied().collect();
        ports.sort_unstable();
        ports
    }

    fn open_room<T: Transport + 'static>(&self, control: T) {
        let port = match self.ports.next_port() {
            Ok(port) => port,
            Err(e) => {
                error!("Cannot open room for {:?}: {}", control.peer_addr(), e);
                return;
            }
        };

        let config = Arc::clone(&self.config);
        let rooms = Arc::clone(&self.rooms);
        let closing = Arc::clone(&self.closing);
        tokio::spawn(async move {
            if let Err(e) = run_room(port, control, config, rooms, closing).await {
                error!(port, "Failed to start room: {}", e);
            }
        });
    }

    /// 关闭所有房间，最多等待 SHUTDOWN_GRACE
    async fn shutdown(&self) {
        info!("Closing rooms on ports {:?}", self.room_ports().await);
        let rooms: Vec<Room> = {
            let rooms = self.rooms.read().await;
            self.closing.send_replace(true);
            rooms.values().cloned().collect()
        };
        for room in rooms.iter().filter(|room| !room.is_shut_down()) {
            room.shutdown().await;
        }

        let start = Instant::now();
        loop {
            let remaining = self.rooms.read().await.len();
            if remaining == 0 {
                break;
            }
            if start.elapsed() > SHUTDOWN_GRACE {
                warn!("Shutdown timeout, {} rooms still active", remaining);
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        info!("Host shutdown complete");
    }
}

/// 启动一个房间并服务到它关闭
///
/// 绑定失败时直接返回错误，控制连接随之关闭，不重试其它端口。
async fn run_room<T: Transport>(
    port: u16,
    control: T,
    config: Arc<ServerConfig>,
    rooms: Rooms,
    closing: Arc<watch::Sender<bool>>,
) -> Result<()> {
    let listener = TcpListener::bind(&format!("{}:{}", config.room_host, port)).await?;
    let local_addr = listener.local_addr()?;

    let room = Room::start(port);
    {
        let mut rooms = rooms.write().await;
        rooms.insert(port, room.clone());
        if *closing.borrow() {
            room.shutdown().await;
        }
    }
    info!(port, "Start Room {}", local_addr);

    if let Err(e) = announce(control, local_addr).await {
        warn!(port, "Failed to announce room: {}", e);
    }

    room.serve(listener, config.join_timeout, config.room_idle_timeout)
        .await;

    rooms.write().await.remove(&port);
    info!(port, "Room closed");
    Ok(())
}

/// 在控制连接上回写房间地址，然后关闭
async fn announce<T: Transport>(control: T, addr: SocketAddr) -> protocol::Result<()> {
    let mut conn = Connection::new(control);
    conn.send(&announcement(addr)).await?;
    conn.close().await
}
