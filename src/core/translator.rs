//! Translation orchestration: debounce, dispatch, cancel.

pub mod request;
pub mod service;

pub use request::SubmitRequest;
pub use service::TranslationService;
