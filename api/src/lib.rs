pub mod api;
pub mod response;

pub use api::{create_app, AppConfig};
