pub mod constants;
pub mod engine;
pub mod env_state;
pub mod history;
pub mod image_source;
pub mod localize_errors;
pub mod localizer;
pub mod normalize;
pub mod params;
pub mod pose;
pub mod registry;
pub mod server;

pub use engine::{LocalizeEngine, RawEstimate};
pub use localize_errors::LocalizeError;
pub use localizer::Localizer;
pub use normalize::LocalizationResult;
pub use params::ServerParams;
pub use registry::Registry;
