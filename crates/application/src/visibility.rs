//! 基于角色的可见性计算
//!
//! 两个用户共享至少一个角色时才能互发消息。角色目录的查询可能很昂贵
//! （按角色枚举全部用户），因此这里按用户缓存计算结果，TTL 为 0 时不缓存。

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use domain::{RepositoryError, RoleDirectory, UserId};
use tokio::time::Instant;

struct CachedVisibility {
    users: Arc<HashSet<UserId>>,
    loaded_at: Instant,
}

pub struct VisibilityResolver {
    directory: Arc<dyn RoleDirectory>,
    ttl: Duration,
    cache: DashMap<UserId, CachedVisibility>,
}

impl VisibilityResolver {
    pub fn new(directory: Arc<dyn RoleDirectory>, ttl: Duration) -> Self {
        Self {
            directory,
            ttl,
            cache: DashMap::new(),
        }
    }

    /// 与该用户共享任一角色的全部用户（可能包含用户自身）
    pub async fn visible_users(
        &self,
        user_id: UserId,
    ) -> Result<Arc<HashSet<UserId>>, RepositoryError> {
        if let Some(users) = self.cached(user_id) {
            return Ok(users);
        }

        let roles = self.directory.roles_of(user_id).await?;
        let users = if roles.is_empty() {
            HashSet::new()
        } else {
            self.directory.users_sharing_any_role(roles).await?
        };
        let users = Arc::new(users);

        if !self.ttl.is_zero() {
            self.cache.insert(
                user_id,
                CachedVisibility {
                    users: users.clone(),
                    loaded_at: Instant::now(),
                },
            );
        }

        tracing::debug!(%user_id, visible = users.len(), "visibility set loaded");
        Ok(users)
    }

    /// 返回第一个发送者无法触达的接收者
    pub async fn first_unreachable(
        &self,
        sender_id: UserId,
        recipients: impl IntoIterator<Item = UserId>,
    ) -> Result<Option<UserId>, RepositoryError> {
        let visible = self.visible_users(sender_id).await?;
        Ok(recipients
            .into_iter()
            .find(|recipient| *recipient != sender_id && !visible.contains(recipient)))
    }

    pub fn invalidate(&self, user_id: UserId) {
        self.cache.remove(&user_id);
    }

    pub fn invalidate_all(&self) {
        self.cache.clear();
    }

    fn cached(&self, user_id: UserId) -> Option<Arc<HashSet<UserId>>> {
        if self.ttl.is_zero() {
            return None;
        }
        self.cache
            .get(&user_id)
            .filter(|entry| entry.loaded_at.elapsed() < self.ttl)
            .map(|entry| entry.users.clone())
    }
}
