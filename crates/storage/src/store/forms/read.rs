#![forbid(unsafe_code)]

use super::super::*;
use super::codec::{load_all_forms, require_form};
use super::validate::validate_fields;
use serde_json::{Map, Value};

impl SpaceStore {
    pub fn get_form(&self, name: &str) -> Result<Form, StoreError> {
        self.read(|conn| require_form(conn, name))
    }

    /// User-defined Forms ordered by key. The system SQL Form is left out.
    pub fn list_forms(&self) -> Result<Vec<Form>, StoreError> {
        self.read(|conn| load_all_forms(conn, false))
    }

    /// Dry-run validation of raw field values. Never writes.
    pub fn validate_entry(
        &self,
        form: &str,
        raw: &Map<String, Value>,
    ) -> Result<ValidatedFields, StoreError> {
        self.read(|conn| {
            let form = require_form(conn, form)?;
            validate_fields(&form.definition, raw, conn)
        })
    }
}
