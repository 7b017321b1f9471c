pub mod auth;
pub mod client;
pub mod layout;
pub mod publish;

pub use auth::{SheetsAuth, ServiceAccountKey};
pub use client::SheetsClient;
pub use publish::{SheetsPublisher, SheetsReport};
