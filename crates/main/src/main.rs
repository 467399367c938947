//! 主应用程序入口
//!
//! 加载配置，组装存储与协调器，启动 Axum Web API 服务。

use std::sync::Arc;

use anyhow::Context;
use application::{ChatSettings, MemoryMessageRepository, StaticRoleDirectory};
use config::AppConfig;
use domain::{MessageRepository, RoleDirectory, RoleName, UserId};
use infrastructure::{Infrastructure, InfrastructureConfig};
use tracing_subscriber::EnvFilter;
use web_api::{router, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = AppConfig::load().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;

    let (message_repository, role_directory) = build_storage(&config).await?;

    let state = AppState::assemble(
        message_repository,
        role_directory,
        chat_settings(&config),
        config.jwt.clone(),
    );

    // 启动 Web 服务器
    let app = router(state);
    let address = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    tracing::info!("聊天服务启动在 http://{}", address);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("聊天服务已停止");
    Ok(())
}

fn chat_settings(config: &AppConfig) -> ChatSettings {
    ChatSettings {
        history_page_limit: config.chat.history_page_limit,
        history_max_limit: config.chat.history_max_limit,
        visibility_cache_ttl: config.chat.visibility_cache_ttl(),
        connection_buffer: config.chat.connection_buffer,
    }
}

async fn build_storage(
    config: &AppConfig,
) -> anyhow::Result<(Arc<dyn MessageRepository>, Arc<dyn RoleDirectory>)> {
    if config.uses_in_memory_store() {
        let directory = StaticRoleDirectory::new();
        for (user_id, roles) in &config.chat.roles {
            for role in roles {
                directory
                    .assign(UserId::from(*user_id), RoleName::new(role.trim()))
                    .await;
            }
        }
        tracing::warn!(
            seeded_users = config.chat.roles.len(),
            "未配置数据库，消息仅保存在进程内存中，角色取自 chat.roles"
        );
        return Ok((
            Arc::new(MemoryMessageRepository::new()),
            Arc::new(directory),
        ));
    }

    if !config.chat.roles.is_empty() {
        tracing::warn!("已配置数据库，忽略 chat.roles，角色以 user_roles 表为准");
    }

    tracing::info!(
        "连接数据库: {}",
        config.database.url.split('@').next_back().unwrap_or("unknown")
    );
    let infrastructure = Infrastructure::connect(InfrastructureConfig {
        database_url: config.database.url.clone(),
        max_connections: config.database.max_connections,
    })
    .await
    .context("failed to initialise database")?;

    Ok((
        infrastructure.message_repository(),
        infrastructure.role_directory(),
    ))
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("收到停止信号，正在关闭连接");
}
