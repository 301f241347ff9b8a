#![forbid(unsafe_code)]

mod codec;
mod coerce;
mod define;
mod read;
mod validate;

#[cfg(test)]
mod tests;

pub use coerce::coerce_value;
pub(in crate::store) use codec::{
    decode_principals, encode_definition, encode_principals, load_all_forms, load_form,
    require_form,
};
pub(in crate::store) use define::install_system_forms_tx;
pub(in crate::store) use validate::{
    RowLookup, decode_fields, decode_historical_fields, encode_fields, validate_fields,
};
