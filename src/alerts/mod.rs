pub mod emitter;
pub mod service;

pub use service::AlertService;
