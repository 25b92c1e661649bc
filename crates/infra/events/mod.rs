pub mod channel_bridge;
pub mod webhook_sink;
