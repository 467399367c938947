mod chat_coordinator;

pub use chat_coordinator::{
    ChatCoordinator, ChatCoordinatorDependencies, ChatSettings, SendMessageRequest,
};
