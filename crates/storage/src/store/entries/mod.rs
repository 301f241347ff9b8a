#![forbid(unsafe_code)]

mod append;
mod read;
mod scan;
mod write;

pub(in crate::store) use append::{
    HEAD_COLUMNS, HEAD_FROM, HeadExpectation, HeadRow, RevisionDraft, append_revision_tx,
    head_from_row, load_head_tx,
};
pub(in crate::store) use read::{entry_from_head, load_revision};
pub use scan::EntryScan;
