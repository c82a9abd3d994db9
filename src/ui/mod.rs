//! Control UI: form layouts and the HTTP API that drives them

pub mod handlers;
pub mod layout;
pub mod server;

pub use layout::{FormView, LayoutHandler, ReceiverLayout, SenderLayout, UiMode};
pub use server::{AppState, SharedLayout, WebServer};
