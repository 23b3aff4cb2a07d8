pub mod loader;
pub mod schema;

pub use loader::{LoadedModel, ModelFileError, ModelFormat, load_model, load_model_dir};
