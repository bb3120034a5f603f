pub mod api_key;

pub use api_key::{ApiKeyAuth, API_KEY_HEADER};
