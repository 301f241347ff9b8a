#![forbid(unsafe_code)]

mod compile;
mod exec;
mod parse;

pub use compile::{QuerySource, ReadScope};
pub use exec::{BoundVariables, bind_variables};
pub use parse::{ParsedQuery, RelationRef, parse_query};
pub(in crate::store) use compile::resolve_sources;
