pub mod client;
pub mod loader;

pub use client::BackendClient;
pub use loader::{load_all, load_history};
