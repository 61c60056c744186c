mod error;
pub use error::ApiError;

mod handler;
pub use handler::ApiHandler;

mod adapter;
pub use adapter::DaemonApiAdapter;

#[cfg(feature = "http")]
mod auth;

#[cfg(feature = "http")]
mod http;

#[cfg(feature = "http")]
pub use auth::BasicAuth;

#[cfg(feature = "http")]
pub use http::HttpApi;

#[cfg(feature = "http")]
pub use axum;
