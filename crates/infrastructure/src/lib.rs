//! 基础设施层实现。
//!
//! 提供基于 PostgreSQL 的消息存储与角色目录，实现领域层定义的协作者接口。

pub mod builder;
pub mod migrations;
pub mod repository;

pub use builder::{Infrastructure, InfrastructureConfig, InfrastructureError};
pub use migrations::MIGRATOR;
pub use repository::{create_pg_pool, PgMessageRepository, PgRoleDirectory, PgStorage};
