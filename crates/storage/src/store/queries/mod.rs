#![forbid(unsafe_code)]

mod saved;
mod views;

pub(in crate::store) use views::{refresh_views_for_form_tx, views_reading_form_tx};
