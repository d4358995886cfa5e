pub mod auth_service;
pub mod conversation_router;
pub mod message_service;
pub mod typing;

pub use auth_service::{
    AuthGateway, AuthGatewayDependencies, AuthSession, AuthTokens, LoginRequest, RegisterRequest,
};
pub use conversation_router::{ConversationRouter, ResolvedRooms, RoomMembership};
pub use message_service::{MessageCoordinator, MessageCoordinatorDependencies};
pub use typing::TypingNotifier;
