pub mod api;
pub mod classification;
pub mod context;
pub mod environment;
pub mod error;
pub mod logging;
pub mod model;
pub mod normalizer;
pub mod registry;
pub mod util;

pub const TARGET_REGISTRY: &str = "registry";
pub const TARGET_NORMALIZER: &str = "normalizer";
pub const TARGET_MODEL: &str = "model";
pub const TARGET_CLASSIFICATION: &str = "classification";
pub const TARGET_WEB_REQUEST: &str = "web_request";

pub use error::{CoreError, ErrorKind};
