#![forbid(unsafe_code)]

use serde_json::Value;
use std::collections::BTreeMap;
use tb_core::{ExtraAttributesPolicy, FieldType, PrincipalRef};

#[derive(Clone, Debug, PartialEq)]
pub struct FieldDef {
    pub name: String,
    pub field_type: FieldType,
    pub required: bool,
    /// Target Form of a `row_reference` field.
    pub target_form: Option<String>,
}

impl FieldDef {
    pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            name: name.into(),
            field_type,
            required: false,
            target_form: None,
        }
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn targeting(mut self, form: impl Into<String>) -> Self {
        self.target_form = Some(form.into());
        self
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FormDefinition {
    pub name: String,
    pub fields: Vec<FieldDef>,
    pub extra_attributes: ExtraAttributesPolicy,
    pub read_principals: Option<Vec<PrincipalRef>>,
    pub write_principals: Option<Vec<PrincipalRef>>,
    /// Values filled in when a field is absent. Also applied to live entries
    /// when a redefinition adds the field.
    pub defaults: BTreeMap<String, Value>,
}

impl FormDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
            extra_attributes: ExtraAttributesPolicy::Deny,
            read_principals: None,
            write_principals: None,
            defaults: BTreeMap::new(),
        }
    }

    pub fn with_field(mut self, field: FieldDef) -> Self {
        self.fields.push(field);
        self
    }

    pub fn with_extra_attributes(mut self, policy: ExtraAttributesPolicy) -> Self {
        self.extra_attributes = policy;
        self
    }

    pub fn with_default(mut self, field: impl Into<String>, value: Value) -> Self {
        self.defaults.insert(field.into(), value);
        self
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        let wanted = name.to_lowercase();
        self.fields
            .iter()
            .find(|field| field.name.to_lowercase() == wanted)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Form {
    pub key: String,
    pub definition: FormDefinition,
    pub version: i64,
    pub system: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl Form {
    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn read_principals(&self) -> Option<&[PrincipalRef]> {
        self.definition.read_principals.as_deref()
    }

    pub fn write_principals(&self) -> Option<&[PrincipalRef]> {
        self.definition.write_principals.as_deref()
    }
}
