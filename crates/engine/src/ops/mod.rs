#![forbid(unsafe_code)]

mod audit;
mod entries;
mod forms;
mod members;
mod saved_queries;
mod sessions;
mod spaces;

pub use entries::EntryFilter;
pub use members::InviteRequest;
pub use saved_queries::SavedQueryInput;
pub use sessions::{QueryTarget, SessionRequest, SessionRowStream};

use crate::engine::{Op, Recording, run};
use crate::{Engine, EngineError, RequestContext};

fn fresh_id(prefix: &str) -> String {
    format!("{prefix}-{}", uuid::Uuid::new_v4().simple())
}
