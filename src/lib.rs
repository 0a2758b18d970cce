//! sshm: a registry of SSH host profiles with connection resolution, pooled
//! OpenSSH sessions and a recursive transfer engine, driven from a CLI or a
//! ratatui interface.

pub mod app;
pub mod app_event;
pub mod cli;
pub mod config;
pub mod error;
pub mod explorer;
pub mod filter;
pub mod models;
pub mod registry;
pub mod resolver;
pub mod session;
pub mod ssh_config;
pub mod ssh_service;
pub mod transfer;
pub mod ui;
