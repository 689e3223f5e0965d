//! Backend service: persistence plus send orchestration against remote agents.

pub mod error;
pub mod exchange;
mod mapping;
pub mod service;

pub use error::{ServiceError, ServiceResult};
pub use exchange::{ExchangeAccumulator, ExchangeStep, resolve_title};
pub use service::AgentService;
