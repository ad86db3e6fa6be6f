// Library surface shared by the binary and the integration tests.
pub mod app_dirs;
pub mod autosave;
pub mod cache;
pub mod config;
pub mod debounce;
pub mod error;
pub mod history;
pub mod model;
pub mod progress;
pub mod rtf;
pub mod runtime;
pub mod save_status;
pub mod session;
pub mod store;
pub mod tracker;
pub mod util;
pub mod validation;

pub use error::{Error, Result};
