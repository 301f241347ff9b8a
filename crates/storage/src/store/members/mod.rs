#![forbid(unsafe_code)]

mod invite;
mod keys;
mod records;
mod roster;
