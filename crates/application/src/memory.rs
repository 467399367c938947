//! 内存实现的外部协作者（用于测试与未配置数据库的单机运行）

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use domain::{
    Emoji, HistoryQuery, Message, MessageId, MessageRepository, MessageText, NewMessage,
    Reaction, RepositoryResult, RoleDirectory, RoleName, Timestamp, UserId,
};
use tokio::sync::RwLock;

#[derive(Default)]
struct MessageTable {
    last_id: i64,
    rows: BTreeMap<MessageId, Message>,
}

/// 内存消息存储，单把写锁保证每次变更都是原子的
#[derive(Default)]
pub struct MemoryMessageRepository {
    table: RwLock<MessageTable>,
}

impl MemoryMessageRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.table.read().await.rows.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl MessageRepository for MemoryMessageRepository {
    async fn create_message(&self, message: NewMessage) -> RepositoryResult<Message> {
        let mut table = self.table.write().await;
        table.last_id += 1;
        let id = MessageId::new(table.last_id);
        let stored = message.into_message(id);
        table.rows.insert(id, stored.clone());
        Ok(stored)
    }

    async fn find_by_id(&self, id: MessageId) -> RepositoryResult<Option<Message>> {
        Ok(self.table.read().await.rows.get(&id).cloned())
    }

    async fn update_text(
        &self,
        id: MessageId,
        sender_id: UserId,
        text: MessageText,
        edited_at: Timestamp,
    ) -> RepositoryResult<bool> {
        let mut table = self.table.write().await;
        match table.rows.get_mut(&id) {
            Some(message) if message.is_sender(sender_id) => {
                message.text = text;
                message.edited_at = Some(edited_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn delete_message(&self, id: MessageId, sender_id: UserId) -> RepositoryResult<bool> {
        let mut table = self.table.write().await;
        let owned = table
            .rows
            .get(&id)
            .is_some_and(|message| message.is_sender(sender_id));
        if owned {
            table.rows.remove(&id);
        }
        Ok(owned)
    }

    async fn add_reaction(&self, id: MessageId, reaction: Reaction) -> RepositoryResult<bool> {
        let mut table = self.table.write().await;
        let Some(message) = table.rows.get_mut(&id) else {
            return Ok(false);
        };
        if message.has_reaction(reaction.user_id, &reaction.emoji) {
            return Ok(false);
        }
        message.reactions.push(reaction);
        Ok(true)
    }

    async fn remove_reaction(
        &self,
        id: MessageId,
        user_id: UserId,
        emoji: Emoji,
    ) -> RepositoryResult<bool> {
        let mut table = self.table.write().await;
        let Some(message) = table.rows.get_mut(&id) else {
            return Ok(false);
        };
        let before = message.reactions.len();
        message.reactions.retain(|r| !r.matches(user_id, &emoji));
        Ok(message.reactions.len() < before)
    }

    async fn history(
        &self,
        user_id: UserId,
        query: HistoryQuery,
    ) -> RepositoryResult<Vec<Message>> {
        let table = self.table.read().await;
        let mut page: Vec<Message> = table
            .rows
            .values()
            .rev()
            .filter(|message| query.before.map_or(true, |before| message.id < before))
            .filter(|message| message.is_visible_to(user_id))
            .take(query.limit as usize)
            .cloned()
            .collect();
        page.reverse();
        Ok(page)
    }
}

/// 静态角色目录
#[derive(Default)]
pub struct StaticRoleDirectory {
    roles: RwLock<HashMap<UserId, HashSet<RoleName>>>,
}

impl StaticRoleDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn assign(&self, user_id: UserId, role: RoleName) {
        self.roles
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(role);
    }

    pub async fn revoke(&self, user_id: UserId, role: &RoleName) {
        if let Some(roles) = self.roles.write().await.get_mut(&user_id) {
            roles.remove(role);
        }
    }
}

#[async_trait]
impl RoleDirectory for StaticRoleDirectory {
    async fn roles_of(&self, user_id: UserId) -> RepositoryResult<HashSet<RoleName>> {
        Ok(self
            .roles
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn users_sharing_any_role(
        &self,
        roles: HashSet<RoleName>,
    ) -> RepositoryResult<HashSet<UserId>> {
        Ok(self
            .roles
            .read()
            .await
            .iter()
            .filter(|(_, assigned)| !assigned.is_disjoint(&roles))
            .map(|(user_id, _)| *user_id)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::RecipientSet;
    use time::OffsetDateTime;
    use uuid::Uuid;

    fn user() -> UserId {
        UserId::from(Uuid::new_v4())
    }

    fn new_message(sender: UserId, recipients: Vec<UserId>, text: &str) -> NewMessage {
        NewMessage::new(
            sender,
            "sender",
            MessageText::parse(text).expect("text"),
            None,
            RecipientSet::parse(recipients).expect("recipients"),
            OffsetDateTime::now_utc(),
        )
        .expect("message")
    }

    #[tokio::test]
    async fn assigns_monotonic_ids() {
        let repo = MemoryMessageRepository::new();
        let (alice, bob) = (user(), user());

        let first = repo
            .create_message(new_message(alice, vec![bob], "one"))
            .await
            .expect("first");
        let second = repo
            .create_message(new_message(alice, vec![bob], "two"))
            .await
            .expect("second");

        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn history_pages_backwards_and_returns_ascending() {
        let repo = MemoryMessageRepository::new();
        let (alice, bob, carol) = (user(), user(), user());

        for i in 0..5 {
            repo.create_message(new_message(alice, vec![bob], &format!("m{i}")))
                .await
                .expect("create");
        }
        repo.create_message(new_message(carol, vec![alice], "unrelated to bob"))
            .await
            .expect("create");

        let latest = repo
            .history(bob, HistoryQuery::latest(3))
            .await
            .expect("history");
        let texts: Vec<&str> = latest.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);

        let older = repo
            .history(
                bob,
                HistoryQuery {
                    before: Some(latest[0].id),
                    limit: 10,
                },
            )
            .await
            .expect("older");
        let texts: Vec<&str> = older.iter().map(|m| m.text.as_str()).collect();
        assert_eq!(texts, vec!["m0", "m1"]);
    }

    #[tokio::test]
    async fn role_directory_matches_any_shared_role() {
        let directory = StaticRoleDirectory::new();
        let (alice, bob, carol) = (user(), user(), user());
        directory.assign(alice, RoleName::new("staff")).await;
        directory.assign(bob, RoleName::new("staff")).await;
        directory.assign(carol, RoleName::new("guest")).await;

        let roles = directory.roles_of(alice).await.expect("roles");
        let peers = directory
            .users_sharing_any_role(roles)
            .await
            .expect("peers");

        assert!(peers.contains(&alice));
        assert!(peers.contains(&bob));
        assert!(!peers.contains(&carol));
    }
}
