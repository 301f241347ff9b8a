#![forbid(unsafe_code)]

mod audit;
mod entries;
mod fields;
mod forms;
mod members;
mod queries;
mod sessions;
mod space;

pub use audit::*;
pub use entries::*;
pub use fields::*;
pub use forms::*;
pub use members::*;
pub use queries::*;
pub use sessions::*;
pub use space::*;
