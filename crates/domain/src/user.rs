use serde::{Deserialize, Serialize};

use crate::value_objects::UserId;

/// 已认证会话中的用户身份。
///
/// 发送者 ID 与显示名称只能来自这里，不能取自命令载荷。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionUser {
    pub user_id: UserId,
    pub display_name: String,
}

impl SessionUser {
    pub fn new(user_id: UserId, display_name: impl Into<String>) -> Self {
        Self {
            user_id,
            display_name: display_name.into(),
        }
    }
}

/// 在线用户快照条目
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OnlineUser {
    pub user_id: UserId,
    pub display_name: String,
}

/// 可以互发消息的联系人
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub user_id: UserId,
    pub online: bool,
    /// 仅在线时可知
    pub display_name: Option<String>,
}
