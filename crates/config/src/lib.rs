//! 统一配置中心
//!
//! 提供应用的全局配置管理，包括：
//! - 服务监听地址
//! - 数据库连接（URL 为空时使用内存存储）
//! - JWT认证
//! - 聊天参数（历史分页、可见性缓存）
//!
//! 加载顺序：内置默认值，然后是可选的 YAML 文件，最后是 `CHAT_` 前缀的环境变量，
//! 嵌套字段用 `__` 分隔（例如 `CHAT_SERVER__PORT=9000`）。

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_ENV: &str = "CHAT_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "config/chat.yaml";
const ENV_PREFIX: &str = "CHAT_";

/// 全局应用配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 服务配置
    pub server: ServerConfig,
    /// 数据库配置
    pub database: DatabaseConfig,
    /// JWT认证配置
    pub jwt: JwtConfig,
    pub chat: ChatConfig,
}

/// 服务器配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// 数据库配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// 为空时不连接数据库，消息只保存在进程内
    pub url: String,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_connections: 5,
        }
    }
}

/// JWT配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtConfig {
    pub secret: String,
    pub expiration_hours: i64,
}

impl Default for JwtConfig {
    fn default() -> Self {
        Self {
            secret: String::new(),
            expiration_hours: 24,
        }
    }
}

/// 聊天参数
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// 历史查询未指定条数时的分页大小
    pub history_page_limit: u32,
    /// 单次历史查询的上限
    pub history_max_limit: u32,
    /// 角色可见性缓存时长（秒），0 表示每次都查询角色目录
    pub visibility_cache_ttl_secs: u64,
    /// 每条连接可积压的出站事件数，写满后丢弃新事件
    pub connection_buffer: usize,
    /// 内存存储模式下的角色分配（用户 ID -> 角色名）。
    /// 配置了数据库时角色来自 `user_roles` 表，这里的值被忽略。
    pub roles: BTreeMap<Uuid, Vec<String>>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            history_page_limit: 50,
            history_max_limit: 200,
            visibility_cache_ttl_secs: 30,
            connection_buffer: 256,
            roles: BTreeMap::new(),
        }
    }
}

impl ChatConfig {
    pub fn visibility_cache_ttl(&self) -> Duration {
        Duration::from_secs(self.visibility_cache_ttl_secs)
    }
}

impl AppConfig {
    /// 按 `CHAT_CONFIG` 指定的路径（默认 `config/chat.yaml`）加载配置，文件不存在时跳过
    pub fn load() -> Result<Self, ConfigError> {
        let path =
            std::env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from(path)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let config: AppConfig = Self::figment(path).extract()?;
        Ok(config)
    }

    pub fn figment(path: impl AsRef<Path>) -> Figment {
        Figment::from(Serialized::defaults(AppConfig::default()))
            .merge(Yaml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// 未配置数据库时使用内存存储
    pub fn uses_in_memory_store(&self) -> bool {
        self.database.url.trim().is_empty()
    }

    /// 验证配置有效性
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidServerConfig(
                "port must be greater than 0".to_string(),
            ));
        }

        // JWT 密钥至少 256 位
        if self.jwt.secret.len() < 32 {
            return Err(ConfigError::InvalidJwtSecret(
                "JWT secret must be at least 32 characters long".to_string(),
            ));
        }
        if self.jwt.secret.contains("dev-secret")
            || self.jwt.secret.contains("not-for-production")
            || self.jwt.secret.contains("please-change")
        {
            return Err(ConfigError::InvalidJwtSecret(
                "Cannot use development JWT secret in production".to_string(),
            ));
        }
        if self.jwt.expiration_hours <= 0 {
            return Err(ConfigError::InvalidJwtSecret(
                "token expiration must be positive".to_string(),
            ));
        }

        if !self.uses_in_memory_store() {
            if !self.database.url.starts_with("postgres://")
                && !self.database.url.starts_with("postgresql://")
            {
                return Err(ConfigError::InvalidDatabaseUrl(
                    "expected a postgres:// URL".to_string(),
                ));
            }
            if self.database.max_connections == 0 {
                return Err(ConfigError::InvalidDatabaseConfig(
                    "Max connections must be greater than 0".to_string(),
                ));
            }
        }

        if self.chat.history_max_limit == 0 {
            return Err(ConfigError::InvalidChatConfig(
                "history_max_limit must be greater than 0".to_string(),
            ));
        }
        if self.chat.history_page_limit == 0
            || self.chat.history_page_limit > self.chat.history_max_limit
        {
            return Err(ConfigError::InvalidChatConfig(
                "history_page_limit must be within 1..=history_max_limit".to_string(),
            ));
        }

        if self.chat.connection_buffer == 0 {
            return Err(ConfigError::InvalidChatConfig(
                "connection_buffer must be greater than 0".to_string(),
            ));
        }
        if let Some((user_id, _)) = self
            .chat
            .roles
            .iter()
            .find(|(_, roles)| roles.iter().any(|role| role.trim().is_empty()))
        {
            return Err(ConfigError::InvalidChatConfig(format!(
                "empty role name assigned to {user_id}"
            )));
        }

        Ok(())
    }
}

/// 配置错误类型
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] figment::Error),
    #[error("Invalid database URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("Invalid JWT secret: {0}")]
    InvalidJwtSecret(String),
    #[error("Invalid database configuration: {0}")]
    InvalidDatabaseConfig(String),
    #[error("Invalid server configuration: {0}")]
    InvalidServerConfig(String),
    #[error("Invalid chat configuration: {0}")]
    InvalidChatConfig(String),
}
