//! 领域模型错误定义
//!
//! `DomainError` 描述校验失败与授权失败，这两类在协议层都表现为“什么也没发生”；
//! `RepositoryError` 描述存储层失败，会中止命令且不进行任何广播。

use thiserror::Error;

use crate::value_objects::UserId;

/// 领域模型错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 参数校验失败
    #[error("invalid argument {field}: {reason}")]
    InvalidArgument { field: String, reason: String },

    /// 接收者为空（禁止无限制广播）
    #[error("message must have at least one recipient")]
    EmptyRecipients,

    /// 接收者与发送者没有共同角色
    #[error("recipient {0} is not reachable by the sender")]
    RecipientNotReachable(UserId),

    #[error("message not found")]
    MessageNotFound,

    /// 只有发送者可以修改或删除自己的消息
    #[error("only the sender may modify this message")]
    NotMessageSender,

    #[error("reaction already exists")]
    ReactionAlreadyExists,

    #[error("reaction not found")]
    ReactionNotFound,
}

impl DomainError {
    /// 创建参数校验错误
    pub fn invalid_argument(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

/// 存储层错误
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RepositoryError {
    #[error("record not found")]
    NotFound,
    #[error("record conflict")]
    Conflict,
    #[error("storage failure: {message}")]
    Storage { message: String },
}

impl RepositoryError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }
}

/// 领域模型结果类型
pub type DomainResult<T> = Result<T, DomainError>;
