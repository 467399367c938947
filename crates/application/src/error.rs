use domain::{DomainError, RepositoryError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApplicationError {
    /// 校验或授权失败：协议层不可见，调用方只会观察到“没有事件”
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    /// 持久化失败：命令在广播之前中止
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("infrastructure error: {message}")]
    Infrastructure { message: String },
}

impl ApplicationError {
    /// 创建基础设施错误
    pub fn infrastructure(message: impl Into<String>) -> Self {
        ApplicationError::Infrastructure {
            message: message.into(),
        }
    }

    /// 是否属于静默拒绝（校验/授权类），而不是存储或基础设施故障
    pub fn is_rejection(&self) -> bool {
        matches!(self, ApplicationError::Domain(_))
    }
}

pub type ApplicationResult<T> = Result<T, ApplicationError>;
