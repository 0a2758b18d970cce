//! Dual-pane file explorer: local and remote listings plus transfer hand-off

mod local;
mod remote;
mod state;
mod transfer;
pub mod types;

pub use remote::remote_parent;
pub use types::{ExplorerState, FileItem, PanelSide};
