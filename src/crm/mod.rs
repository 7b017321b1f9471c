pub mod auth;
pub mod client;

pub use auth::CrmAuth;
pub use client::CrmClient;
