#![forbid(unsafe_code)]

mod authz;
mod config;
mod context;
mod engine;
mod error;
mod ops;
pub mod telemetry;

pub use config::{ConfigError, EngineConfig};
pub use context::{ANONYMOUS_ACTOR, Principal, RequestContext, now_ms};
pub use engine::Engine;
pub use error::{DeniedCheck, EngineError};
pub use ops::{
    EntryFilter, InviteRequest, QueryTarget, SavedQueryInput, SessionRequest, SessionRowStream,
};
