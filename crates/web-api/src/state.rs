use std::sync::Arc;

use application::{
    ChatCoordinator, ChatCoordinatorDependencies, ChatSettings, ConnectionHub,
    ConnectionRegistry, SystemClock,
};
use config::JwtConfig;
use domain::{MessageRepository, RoleDirectory};

use crate::JwtService;

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<ChatCoordinator>,
    pub hub: Arc<ConnectionHub>,
    pub jwt_service: Arc<JwtService>,
}

impl AppState {
    pub fn new(
        coordinator: Arc<ChatCoordinator>,
        hub: Arc<ConnectionHub>,
        jwt_service: Arc<JwtService>,
    ) -> Self {
        Self {
            coordinator,
            hub,
            jwt_service,
        }
    }

    /// 用给定的外部协作者组装协调器与连接通道
    pub fn assemble(
        message_repository: Arc<dyn MessageRepository>,
        role_directory: Arc<dyn RoleDirectory>,
        settings: ChatSettings,
        jwt: JwtConfig,
    ) -> Self {
        let hub = Arc::new(ConnectionHub::with_buffer(settings.connection_buffer));
        let coordinator = Arc::new(ChatCoordinator::new(ChatCoordinatorDependencies {
            message_repository,
            role_directory,
            registry: Arc::new(ConnectionRegistry::new()),
            sink: hub.clone(),
            clock: Arc::new(SystemClock),
            settings,
        }));

        Self::new(coordinator, hub, Arc::new(JwtService::new(jwt)))
    }
}
