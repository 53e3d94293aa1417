pub mod adapters;
pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

pub use crate::adapters::MemoryCache;
pub use crate::config::PortalConfig;
pub use crate::core::{gateway::PortalGateway, proxy::BinaryProxy};
pub use crate::domain::model::{DocumentOutcome, HeiRecord, PdfPayload, ProgramRecord};
pub use crate::domain::ports::CacheStore;
pub use crate::utils::error::{PortalError, Result};
