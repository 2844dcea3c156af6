pub mod emit;
pub mod error;
pub mod events;
pub mod languages;
pub mod logging;
pub mod settings;

#[cfg(test)]
mod bindings_test;

// Re-export the error surface for convenience
pub use error::{ErrorKind, TranslateError, TranslateResult};
