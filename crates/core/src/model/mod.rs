#![forbid(unsafe_code)]

mod enums;
mod ids;
mod policy;
mod reserved;
mod tags;

pub use enums::*;
pub use ids::*;
pub use policy::*;
pub use reserved::*;
pub use tags::*;

#[cfg(test)]
mod tests;
