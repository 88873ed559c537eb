//! 房间成员注册表
//!
//! 以 `SessionId` 为键；ID 在房间内单调递增，因此 BTreeMap 的遍历顺序即加入顺序。

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::session::ClientSession;

/// 会话 ID，加入房间时分配
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// 房间成员注册表
///
/// 本身不做同步，由 `Room` 放在 `RwLock` 里使用。
#[derive(Default)]
pub struct Registry {
    sessions: BTreeMap<SessionId, Arc<ClientSession>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 注册会话；同一 ID 不允许重复注册
    pub fn insert(&mut self, session: Arc<ClientSession>) -> bool {
        let id = session.id();
        if self.sessions.contains_key(&id) {
            return false;
        }
        self.sessions.insert(id, session);
        true
    }

    /// 移除会话
    pub fn remove(&mut self, id: SessionId) -> Option<Arc<ClientSession>> {
        self.sessions.remove(&id)
    }

    pub fn contains(&self, id: SessionId) -> bool {
        self.sessions.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// 当前成员快照（按加入顺序）
    pub fn snapshot(&self) -> Vec<Arc<ClientSession>> {
        self.sessions.values().cloned().collect()
    }

    /// 当前成员名字（按加入顺序）
    pub fn names(&self) -> Vec<String> {
        self.sessions
            .values()
            .map(|session| session.name().to_string())
            .collect()
    }

    /// 取出全部成员，注册表清空
    pub fn drain(&mut self) -> Vec<Arc<ClientSession>> {
        std::mem::take(&mut self.sessions).into_values().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::Room;

    #[tokio::test]
    async fn test_registry_ordering_and_removal() {
        let room = Room::start(9200);
        let (first, _first_inbox) = ClientSession::attach(&room, "first".to_string())
            .await
            .unwrap();
        let (second, _second_inbox) = ClientSession::attach(&room, "second".to_string())
            .await
            .unwrap();
        assert!(first.id() < second.id());

        let mut registry = Registry::new();
        assert!(registry.insert(Arc::clone(&second)));
        assert!(registry.insert(Arc::clone(&first)));
        assert!(!registry.insert(Arc::clone(&first)));

        // 按 ID 即加入顺序遍历，与插入顺序无关
        assert_eq!(registry.names(), vec!["first", "second"]);

        assert!(registry.remove(first.id()).is_some());
        assert!(registry.remove(first.id()).is_none());
        assert!(!registry.contains(first.id()));
        assert_eq!(registry.len(), 1);

        let drained = registry.drain();
        assert_eq!(drained.len(), 1);
        assert_eq!(drained[0].id(), second.id());
        assert!(registry.is_empty());
    }
}
