pub mod gateway;
pub mod normalize;
pub mod proxy;

pub use crate::domain::model::{DocumentOutcome, HeiRecord, PdfPayload, ProgramRecord};
pub use crate::domain::ports::CacheStore;
pub use crate::utils::error::Result;
