//! 客户端会话
//!
//! 每个会话两个任务：
//! - 读循环：连接 → 房间汇聚队列
//! - 写循环：投递队列 → 连接
//!
//! 两个任务共享同一个终止信号，都退出后会话才算销毁。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use protocol::{
    frame_text, is_quit, ChatLine, Connection, FrameReader, FrameWriter, ProtocolError,
    NAME_FRAME_SIZE,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::error::{Result, ServerError};
use crate::registry::SessionId;
use crate::room::Room;

/// 会话投递队列的接收端
pub type Inbox = mpsc::UnboundedReceiver<String>;

/// 等待信号变为 true；发送端被丢弃也视为触发
pub(crate) async fn wait_for_signal(rx: &mut watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        if rx.changed().await.is_err() {
            return;
        }
    }
}

/// 房间内一个已命名的客户端
pub struct ClientSession {
    id: SessionId,
    name: String,
    room: Room,
    /// 投递队列发送端（由广播任务写入）
    delivery: mpsc::UnboundedSender<String>,
    /// 终止信号
    terminate: watch::Sender<bool>,
    closed: AtomicBool,
}

impl ClientSession {
    /// 创建会话并注册到房间
    ///
    /// 注册请求与广播消息走同一个汇聚队列，所以注册之前发布的消息不会投递给该会话。
    pub async fn attach(room: &Room, name: String) -> Result<(Arc<Self>, Inbox)> {
        let (delivery, inbox) = mpsc::unbounded_channel();
        let (terminate, _) = watch::channel(false);

        let session = Arc::new(Self {
            id: room.next_session_id(),
            name,
            room: room.clone(),
            delivery,
            terminate,
            closed: AtomicBool::new(false),
        });
        room.register(Arc::clone(&session)).await?;

        Ok((session, inbox))
    }

    /// 完成握手：读取一帧作为用户名，注册会话并广播加入消息
    ///
    /// 读取失败或超时时关闭连接，不创建会话，也不广播。
    pub async fn join<R, W>(
        conn: Connection<R, W>,
        room: &Room,
        join_timeout: Duration,
    ) -> Result<Joined<R, W>>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut conn = conn;

        let name = match timeout(join_timeout, conn.recv_limited(NAME_FRAME_SIZE)).await {
            Ok(Ok(frame)) => frame_text(&frame),
            Ok(Err(e)) => {
                let _ = conn.close().await;
                return Err(ServerError::Handshake(e));
            }
            Err(_) => {
                let _ = conn.close().await;
                return Err(ServerError::HandshakeTimeout);
            }
        };
        let (reader, mut writer) = conn.split();

        let (session, inbox) = match Self::attach(room, name).await {
            Ok(attached) => attached,
            Err(e) => {
                let _ = writer.shutdown().await;
                return Err(e);
            }
        };

        let members = room.member_count().await;
        info!(
            port = room.port(),
            session = %session.id,
            name = %session.name,
            members,
            "Client joined"
        );
        room.publish(ChatLine::Joined {
            name: session.name.clone(),
        });

        Ok(Joined {
            session,
            reader,
            writer,
            inbox,
        })
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// 放入投递队列；会话已关闭或队列已关闭时返回 false
    pub fn deliver(&self, line: String) -> bool {
        if self.is_closed() {
            return false;
        }
        self.delivery.send(line).is_ok()
    }

    /// 关闭会话：发出终止信号并从房间注册表移除
    ///
    /// 可重复调用，只有第一次生效并返回 true。
    pub async fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.terminate.send_replace(true);
        self.room.unregister(self.id).await;

        info!(
            port = self.room.port(),
            session = %self.id,
            name = %self.name,
            "Session closed"
        );
        true
    }
}

/// 已完成握手、尚未启动读写循环的会话
pub struct Joined<R, W> {
    session: Arc<ClientSession>,
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
    inbox: Inbox,
}

impl<R, W> Joined<R, W>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    pub fn session(&self) -> &Arc<ClientSession> {
        &self.session
    }

    /// 运行读写循环，两者都结束后返回
    pub async fn run(self) {
        let Joined {
            session,
            reader,
            writer,
            inbox,
        } = self;

        let write_task = tokio::spawn(write_loop(Arc::clone(&session), writer, inbox));
        read_loop(Arc::clone(&session), reader).await;

        if let Err(e) = write_task.await {
            warn!(session = %session.id, "Writer task failed: {}", e);
        }
        debug!(session = %session.id, name = %session.name, "Session destroyed");
    }
}

/// 读循环：每帧加上名字前缀后发布到房间；退出、读错误或外部关闭时结束
async fn read_loop<R: AsyncRead + Unpin>(session: Arc<ClientSession>, mut reader: FrameReader<R>) {
    let mut terminated = session.terminate.subscribe();

    loop {
        tokio::select! {
            _ = wait_for_signal(&mut terminated) => {
                debug!(session = %session.id, "Reader stopped by close");
                break;
            }
            result = reader.read_frame() => {
                match result {
                    Ok(frame) => {
                        if is_quit(&frame) {
                            info!(session = %session.id, name = %session.name, "Client quit");
                            break;
                        }
                        let line = ChatLine::chat(&session.name, &frame);
                        debug!(session = %session.id, "Received: {}", line);
                        session.room.publish(line);
                    }
                    Err(ProtocolError::ConnectionClosed) => {
                        info!(session = %session.id, name = %session.name, "Client disconnected");
                        break;
                    }
                    Err(e) => {
                        warn!(session = %session.id, "Error receiving from {}: {}", session.name, e);
                        break;
                    }
                }
            }
        }
    }

    session.close().await;
    session.room.publish(ChatLine::Left {
        name: session.name.clone(),
    });
}

/// 写循环：等待投递队列或终止信号，谁先就绪处理谁
async fn write_loop<W: AsyncWrite + Unpin>(
    session: Arc<ClientSession>,
    mut writer: FrameWriter<W>,
    mut inbox: Inbox,
) {
    let mut terminated = session.terminate.subscribe();

    loop {
        tokio::select! {
            _ = wait_for_signal(&mut terminated) => break,
            line = inbox.recv() => {
                let Some(line) = line else { break };
                // 对端不读时写入会一直挂起，终止信号必须能打断它
                tokio::select! {
                    _ = wait_for_signal(&mut terminated) => break,
                    result = writer.send(&line) => {
                        if let Err(e) = result {
                            debug!(session = %session.id, "Failed to send to {}: {}", session.name, e);
                            session.close().await;
                            break;
                        }
                    }
                }
            }
        }
    }

    let _ = writer.shutdown().await;
}
