// Infrastructure layer (shared components)
pub mod auth;
pub mod config;
pub mod error;
pub mod stores;

// Realtime core
pub mod presence;
pub mod relay;
pub mod rooms;
pub mod router;
pub mod session;

// Application layer
pub mod server;
pub mod websocket;

// Supporting modules
pub mod tasks;
