//! 连接登记表
//!
//! 记录每个用户当前的实时连接，并由连接数推导在线/离线转换。
//! 内部使用按键分片加锁的 `DashMap`：同一用户的连接集合互斥修改，
//! 不同用户之间互不阻塞。登记表不持有任何消息内容。

use std::collections::hash_map::RandomState;
use std::collections::{HashMap, HashSet};
use std::hash::BuildHasher;
use std::sync::{Mutex, MutexGuard};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use domain::{ConnectionId, UserId};

#[derive(Debug)]
struct UserConnections {
    display_name: String,
    connections: HashSet<ConnectionId>,
}

/// 在线状态登记表
///
/// 不变量：表中不存在连接集合为空的条目，因此“条目存在”等价于“在线”。
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    users: DashMap<UserId, UserConnections>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记一条连接。仅当此前连接数为 0 时返回 `true`（用户刚上线）。
    ///
    /// 重复登记同一连接是无操作，返回 `false`。显示名称以最近一次登记为准。
    pub fn add_connection(
        &self,
        user_id: UserId,
        connection_id: ConnectionId,
        display_name: &str,
    ) -> bool {
        match self.users.entry(user_id) {
            Entry::Occupied(mut entry) => {
                let slot = entry.get_mut();
                slot.display_name = display_name.to_owned();
                if !slot.connections.insert(connection_id) {
                    tracing::debug!(%user_id, %connection_id, "connection already registered");
                }
                false
            }
            Entry::Vacant(entry) => {
                entry.insert(UserConnections {
                    display_name: display_name.to_owned(),
                    connections: HashSet::from([connection_id]),
                });
                true
            }
        }
    }

    /// 注销一条连接。仅当剩余连接数变为 0 时返回 `true`（用户刚离线）。
    ///
    /// 未登记的用户或连接是无操作，返回 `false`：断开事件可能重复或乱序到达。
    pub fn remove_connection(&self, user_id: UserId, connection_id: ConnectionId) -> bool {
        match self.users.entry(user_id) {
            Entry::Occupied(mut entry) => {
                if !entry.get_mut().connections.remove(&connection_id) {
                    return false;
                }
                if entry.get().connections.is_empty() {
                    entry.remove();
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(_) => false,
        }
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.users.contains_key(&user_id)
    }

    /// 当前在线用户及其显示名称
    pub fn snapshot(&self) -> HashMap<UserId, String> {
        self.users
            .iter()
            .map(|entry| (*entry.key(), entry.value().display_name.clone()))
            .collect()
    }

    pub fn display_name(&self, user_id: UserId) -> Option<String> {
        self.users
            .get(&user_id)
            .map(|entry| entry.display_name.clone())
    }

    pub fn connections_of(&self, user_id: UserId) -> Vec<ConnectionId> {
        self.users
            .get(&user_id)
            .map(|entry| entry.connections.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn connection_count(&self, user_id: UserId) -> usize {
        self.users
            .get(&user_id)
            .map(|entry| entry.connections.len())
            .unwrap_or(0)
    }

    pub fn online_count(&self) -> usize {
        self.users.len()
    }

    pub fn online_user_ids(&self) -> Vec<UserId> {
        self.users.iter().map(|entry| *entry.key()).collect()
    }
}

const PRESENCE_STRIPES: usize = 64;

/// 在线状态转换的按用户串行化
///
/// 登记表只保证转换本身是原子的；转换结果的广播发生在条目锁释放之后。
/// 持有同一用户的闸门完成“转换 + 广播”，其他用户观察到的上线/离线事件顺序
/// 才与登记表中的转换顺序一致。按用户哈希分条加锁，闸门内不得再获取其他闸门。
#[derive(Debug)]
pub struct PresenceGate {
    stripes: Vec<Mutex<()>>,
    hasher: RandomState,
}

impl Default for PresenceGate {
    fn default() -> Self {
        Self {
            stripes: (0..PRESENCE_STRIPES).map(|_| Mutex::new(())).collect(),
            hasher: RandomState::new(),
        }
    }
}

impl PresenceGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock(&self, user_id: UserId) -> MutexGuard<'_, ()> {
        let index = (self.hasher.hash_one(user_id) % self.stripes.len() as u64) as usize;
        self.stripes[index]
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::from(Uuid::new_v4())
    }

    #[test]
    fn first_connection_brings_user_online() {
        let registry = ConnectionRegistry::new();
        let alice = user();

        assert!(!registry.is_online(alice));
        assert!(registry.add_connection(alice, ConnectionId::generate(), "alice"));
        assert!(registry.is_online(alice));
        assert_eq!(registry.connection_count(alice), 1);
    }

    #[test]
    fn additional_connections_do_not_report_transitions() {
        let registry = ConnectionRegistry::new();
        let alice = user();
        let (c1, c2, c3) = (
            ConnectionId::generate(),
            ConnectionId::generate(),
            ConnectionId::generate(),
        );

        assert!(registry.add_connection(alice, c1, "alice"));
        assert!(!registry.add_connection(alice, c2, "alice"));
        assert!(!registry.add_connection(alice, c3, "alice"));

        assert!(!registry.remove_connection(alice, c2));
        assert!(!registry.remove_connection(alice, c1));
        assert!(registry.is_online(alice));
        assert!(registry.remove_connection(alice, c3));
        assert!(!registry.is_online(alice));
    }

    #[test]
    fn duplicate_and_unknown_removals_are_noops() {
        let registry = ConnectionRegistry::new();
        let alice = user();
        let conn = ConnectionId::generate();

        assert!(!registry.remove_connection(alice, conn));

        registry.add_connection(alice, conn, "alice");
        assert!(!registry.remove_connection(alice, ConnectionId::generate()));
        assert!(registry.remove_connection(alice, conn));
        assert!(!registry.remove_connection(alice, conn));
    }

    #[test]
    fn duplicate_registration_is_noop() {
        let registry = ConnectionRegistry::new();
        let alice = user();
        let conn = ConnectionId::generate();

        assert!(registry.add_connection(alice, conn, "alice"));
        assert!(!registry.add_connection(alice, conn, "alice"));
        assert_eq!(registry.connection_count(alice), 1);
        assert!(registry.remove_connection(alice, conn));
    }

    #[test]
    fn snapshot_lists_only_online_users() {
        let registry = ConnectionRegistry::new();
        let (alice, bob) = (user(), user());
        let bob_conn = ConnectionId::generate();

        registry.add_connection(alice, ConnectionId::generate(), "alice");
        registry.add_connection(bob, bob_conn, "bob");
        registry.remove_connection(bob, bob_conn);

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot.get(&alice).map(String::as_str), Some("alice"));
        assert_eq!(registry.online_count(), 1);
        assert!(registry.display_name(bob).is_none());
    }
}
