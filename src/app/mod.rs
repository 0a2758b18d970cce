mod explorer_keys;
mod host;
pub mod keymap;
mod search;
pub(crate) mod state;
mod types;

pub use types::{ActivePanel, App, FilteredHost, FolderView, InputMode};
