//! WINGS manager bot core library: configuration, authorization, the manager invoker,
//! output relay, the guided create dialogue, command dispatch and the Telegram channel.

pub mod auth;
pub mod channels;
pub mod commands;
pub mod config;
pub mod dialogue;
pub mod exec;
pub mod init;
pub mod relay;
pub mod routing;
pub mod server;
