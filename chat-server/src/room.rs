//! 房间与广播
//!
//! 每个房间一个汇聚队列，由唯一的广播任务消费：
//! 广播顺序就是房间内"谁在什么时候说了什么"的唯一依据。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::{ChatLine, Connection, Transport, TransportListener};
use tokio::sync::{mpsc, oneshot, watch, RwLock};
use tokio::time::{interval_at, Instant, Interval};
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::registry::{Registry, SessionId};
use crate::session::{wait_for_signal, ClientSession};

/// 汇聚队列中的命令
enum RoomCommand {
    /// 广播一行消息
    Broadcast(ChatLine),
    /// 注册会话，结果通过 ack 返回
    Register {
        session: Arc<ClientSession>,
        ack: oneshot::Sender<Result<()>>,
    },
}

struct RoomInner {
    port: u16,
    sessions: Arc<RwLock<Registry>>,
    fan_in: mpsc::UnboundedSender<RoomCommand>,
    next_session_id: AtomicU64,
    shutdown: Arc<watch::Sender<bool>>,
}

/// 房间句柄，可廉价克隆
#[derive(Clone)]
pub struct Room {
    inner: Arc<RoomInner>,
}

impl Room {
    /// 创建房间并启动广播任务
    pub fn start(port: u16) -> Self {
        let (fan_in, fan_in_rx) = mpsc::unbounded_channel();
        let sessions = Arc::new(RwLock::new(Registry::new()));
        let (shutdown, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown);

        tokio::spawn(broadcast_loop(
            port,
            Arc::clone(&sessions),
            Arc::clone(&shutdown),
            fan_in_rx,
        ));

        Self {
            inner: Arc::new(RoomInner {
                port,
                sessions,
                fan_in,
                next_session_id: AtomicU64::new(1),
                shutdown,
            }),
        }
    }

    pub fn port(&self) -> u16 {
        self.inner.port
    }

    /// 发布消息到汇聚队列，不阻塞
    pub fn publish(&self, line: ChatLine) -> bool {
        match self.inner.fan_in.send(RoomCommand::Broadcast(line)) {
            Ok(()) => true,
            Err(_) => {
                debug!(port = self.inner.port, "Broadcast loop gone, message dropped");
                false
            }
        }
    }

    pub(crate) fn next_session_id(&self) -> SessionId {
        SessionId(self.inner.next_session_id.fetch_add(1, Ordering::Relaxed))
    }

    /// 经汇聚队列注册会话，等待广播任务确认
    pub(crate) async fn register(&self, session: Arc<ClientSession>) -> Result<()> {
        let closed = ServerError::RoomClosed {
            port: self.inner.port,
        };
        let (ack, ack_rx) = oneshot::channel();
        if self
            .inner
            .fan_in
            .send(RoomCommand::Register { session, ack })
            .is_err()
        {
            return Err(closed);
        }
        ack_rx.await.unwrap_or(Err(closed))
    }

    /// 从注册表移除会话
    pub(crate) async fn unregister(&self, id: SessionId) -> bool {
        self.inner.sessions.write().await.remove(id).is_some()
    }

    #[allow(dead_code)]
    pub async fn contains(&self, id: SessionId) -> bool {
        self.inner.sessions.read().await.contains(id)
    }

    pub async fn member_count(&self) -> usize {
        self.inner.sessions.read().await.len()
    }

    /// 当前成员名字（按加入顺序）
    #[allow(dead_code)]
    pub async fn member_names(&self) -> Vec<String> {
        self.inner.sessions.read().await.names()
    }

    pub fn is_shut_down(&self) -> bool {
        *self.inner.shutdown.borrow()
    }

    /// 关闭房间：停止 accept 循环（释放端口），关闭所有会话，之后的加入请求被拒绝
    ///
    /// 可重复调用。
    pub async fn shutdown(&self) {
        let first = !self.inner.shutdown.send_replace(true);

        // 先置标志再清空，保证清空之后的注册都能看到标志
        let sessions = self.inner.sessions.write().await.drain();
        let count = sessions.len();
        for session in sessions {
            session.close().await;
        }

        if first {
            info!(port = self.inner.port, sessions = count, "Room shut down");
        }
    }

    /// 房间 accept 循环
    ///
    /// 每个新连接启动一个加入任务；accept 失败只记日志。
    /// 房间关闭或空闲超时后返回，监听器随之释放。
    pub async fn serve<L: TransportListener>(
        &self,
        listener: L,
        join_timeout: Duration,
        idle_timeout: Option<Duration>,
    ) {
        let port = self.inner.port;
        let mut shutdown = self.inner.shutdown.subscribe();
        let mut idle_check = idle_timeout.map(|period| interval_at(Instant::now() + period, period));
        let mut seen_empty = false;

        info!(port, "Waiting for clients");

        loop {
            tokio::select! {
                _ = wait_for_signal(&mut shutdown) => break,
                _ = next_idle_check(&mut idle_check) => {
                    let empty = self.inner.sessions.read().await.is_empty();
                    if empty && seen_empty {
                        info!(port, "Room idle, shutting down");
                        break;
                    }
                    seen_empty = empty;
                }
                result = listener.accept() => {
                    match result {
                        Ok(transport) => self.spawn_join(transport, join_timeout),
                        Err(e) => warn!(port, "Failed to accept client: {}", e),
                    }
                }
            }
        }

        self.shutdown().await;
    }

    fn spawn_join<T: Transport + 'static>(&self, transport: T, join_timeout: Duration) {
        let room = self.clone();
        let peer = transport.peer_addr();

        tokio::spawn(async move {
            match ClientSession::join(Connection::new(transport), &room, join_timeout).await {
                Ok(joined) => {
                    debug!(port = room.port(), ?peer, session = %joined.session().id(), "Session started");
                    joined.run().await
                }
                Err(e) => debug!(port = room.port(), ?peer, "Client handshake abandoned: {}", e),
            }
        });
    }
}

async fn next_idle_check(idle_check: &mut Option<Interval>) {
    match idle_check {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// 广播任务：房间汇聚队列的唯一消费者
///
/// 每条消息在出队时对注册表做快照，然后逐个放入各会话的投递队列。
/// 所有 `Room` 句柄释放后汇聚队列关闭，任务结束。
async fn broadcast_loop(
    port: u16,
    sessions: Arc<RwLock<Registry>>,
    shutdown: Arc<watch::Sender<bool>>,
    mut fan_in: mpsc::UnboundedReceiver<RoomCommand>,
) {
    while let Some(command) = fan_in.recv().await {
        match command {
            RoomCommand::Broadcast(line) => {
                let text = line.to_string();
                let targets = sessions.read().await.snapshot();
                debug!(
                    port,
                    recipients = targets.len(),
                    system = line.is_system(),
                    "Broadcast: {}",
                    text
                );

                for session in targets {
                    if !session.deliver(text.clone()) {
                        debug!(port, session = %session.id(), "Delivery queue closed");
                    }
                }
            }
            RoomCommand::Register { session, ack } => {
                let mut registry = sessions.write().await;
                let result = if *shutdown.borrow() {
                    Err(ServerError::RoomClosed { port })
                } else {
                    if !registry.insert(Arc::clone(&session)) {
                        warn!(port, session = %session.id(), "Session registered twice");
                    }
                    Ok(())
                };
                drop(registry);
                let _ = ack.send(result);
            }
        }
    }

    debug!(port, "Broadcast loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Inbox;
    use protocol::{TcpListener, TcpTransport, TransportConfig};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::time::timeout;

    async fn next_line(inbox: &mut Inbox) -> String {
        timeout(Duration::from_secs(5), inbox.recv())
            .await
            .expect("delivery timed out")
            .expect("delivery queue closed")
    }

    async fn attach(room: &Room, name: &str) -> (Arc<ClientSession>, Inbox) {
        ClientSession::attach(room, name.to_string()).await.unwrap()
    }

    fn chat(from: &str, body: &str) -> ChatLine {
        ChatLine::chat(from, body.as_bytes())
    }

    #[tokio::test]
    async fn test_broadcast_preserves_publish_order() {
        let room = Room::start(9100);
        let (_a, mut a_inbox) = attach(&room, "a").await;
        let (_b, mut b_inbox) = attach(&room, "b").await;

        let expected: Vec<String> = (0..50).map(|i| format!("a> m{}", i)).collect();
        for i in 0..50 {
            room.publish(chat("a", &format!("m{}", i)));
        }

        for inbox in [&mut a_inbox, &mut b_inbox] {
            let mut received = Vec::new();
            for _ in 0..50 {
                received.push(next_line(inbox).await);
            }
            assert_eq!(received, expected);
        }
    }

    #[tokio::test]
    async fn test_concurrent_publishers_see_same_order() {
        let room = Room::start(9100);
        let (_a, mut a_inbox) = attach(&room, "a").await;
        let (_b, mut b_inbox) = attach(&room, "b").await;

        let mut publishers = Vec::new();
        for p in 0..4 {
            let room = room.clone();
            publishers.push(tokio::spawn(async move {
                for i in 0..25 {
                    room.publish(chat(&format!("p{}", p), &i.to_string()));
                    tokio::task::yield_now().await;
                }
            }));
        }
        for publisher in publishers {
            publisher.await.unwrap();
        }

        let mut seen_a = Vec::new();
        let mut seen_b = Vec::new();
        for _ in 0..100 {
            seen_a.push(next_line(&mut a_inbox).await);
            seen_b.push(next_line(&mut b_inbox).await);
        }
        assert_eq!(seen_a, seen_b);
    }

    #[tokio::test]
    async fn test_rooms_are_isolated() {
        let room_a = Room::start(9101);
        let room_b = Room::start(9102);
        let (_a, mut a_inbox) = attach(&room_a, "alice").await;
        let (_b, mut b_inbox) = attach(&room_b, "bob").await;

        room_a.publish(chat("alice", "only for room a"));
        room_b.publish(chat("bob", "only for room b"));

        assert_eq!(next_line(&mut a_inbox).await, "alice> only for room a");
        assert_eq!(next_line(&mut b_inbox).await, "bob> only for room b");
        assert!(a_inbox.try_recv().is_err());
        assert!(b_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_joiner_misses_earlier_messages() {
        let room = Room::start(9100);
        let (_alice, mut alice_inbox) = attach(&room, "alice").await;

        room.publish(chat("alice", "hello"));
        // 注册在 "hello" 之后排队，不会收到它
        let (_bob, mut bob_inbox) = attach(&room, "bob").await;

        room.publish(chat("alice", "hi bob"));

        assert_eq!(next_line(&mut alice_inbox).await, "alice> hello");
        assert_eq!(next_line(&mut alice_inbox).await, "alice> hi bob");
        assert_eq!(next_line(&mut bob_inbox).await, "alice> hi bob");
        assert!(bob_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_session_receives_nothing_more() {
        let room = Room::start(9100);
        let (_alice, mut alice_inbox) = attach(&room, "alice").await;
        let (bob, mut bob_inbox) = attach(&room, "bob").await;

        bob.close().await;
        assert!(!room.contains(bob.id()).await);

        room.publish(chat("alice", "bye bob"));
        assert_eq!(next_line(&mut alice_inbox).await, "alice> bye bob");
        assert!(bob_inbox.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_members_in_join_order() {
        let room = Room::start(9100);
        for name in ["carol", "alice", "bob"] {
            attach(&room, name).await;
        }
        assert_eq!(room.member_names().await, vec!["carol", "alice", "bob"]);
    }

    #[tokio::test]
    async fn test_shutdown_closes_sessions_and_rejects_joins() {
        let room = Room::start(9100);
        let (alice, _alice_inbox) = attach(&room, "alice").await;

        room.shutdown().await;
        room.shutdown().await;

        assert!(room.is_shut_down());
        assert!(alice.is_closed());
        assert_eq!(room.member_count().await, 0);

        let result = ClientSession::attach(&room, "late".to_string()).await;
        assert!(matches!(result, Err(ServerError::RoomClosed { port: 9100 })));
    }

    #[tokio::test]
    async fn test_serve_relays_between_clients() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let room = Room::start(listener.local_addr().unwrap().port());
        let serving = tokio::spawn({
            let room = room.clone();
            async move { room.serve(listener, Duration::from_secs(5), None).await }
        });

        let config = TransportConfig::default();
        let (mut alice_rx, mut alice_tx) = TcpTransport::connect(&addr, &config).await.unwrap().split();
        alice_tx.write_all(b"alice").await.unwrap();
        read_exact_text(&mut alice_rx, "alice has joined the chat").await;

        let (mut bob_rx, mut bob_tx) = TcpTransport::connect(&addr, &config).await.unwrap().split();
        bob_tx.write_all(b"bob").await.unwrap();
        read_exact_text(&mut bob_rx, "bob has joined the chat").await;
        read_exact_text(&mut alice_rx, "bob has joined the chat").await;

        alice_tx.write_all(b"hi bob").await.unwrap();
        read_exact_text(&mut bob_rx, "alice> hi bob").await;
        read_exact_text(&mut alice_rx, "alice> hi bob").await;

        drop(bob_tx);
        read_exact_text(&mut alice_rx, "bob has left chat").await;

        room.shutdown().await;
        timeout(Duration::from_secs(5), serving).await.unwrap().unwrap();

        // 监听器已释放
        assert!(TcpListener::bind(&addr).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_room_shuts_itself_down() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let room = Room::start(listener.local_addr().unwrap().port());

        timeout(
            Duration::from_secs(120),
            room.serve(listener, Duration::from_secs(5), Some(Duration::from_secs(10))),
        )
        .await
        .expect("idle room should stop serving");
        assert!(room.is_shut_down());
    }

    async fn read_exact_text<R: AsyncReadExt + Unpin>(reader: &mut R, expected: &str) {
        let mut buf = vec![0u8; expected.len()];
        timeout(Duration::from_secs(5), reader.read_exact(&mut buf))
            .await
            .expect("read timed out")
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), expected);
    }
}
