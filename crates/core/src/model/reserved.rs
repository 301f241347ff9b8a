#![forbid(unsafe_code)]

/// System Form holding saved queries.
pub const SQL_FORM_NAME: &str = "SQL";
pub const USER_FORM_NAME: &str = "User";
pub const USER_GROUP_FORM_NAME: &str = "UserGroup";

pub const PSEUDO_TABLES: &[&str] = &["entries", "links", "assets"];

pub const RESERVED_FORM_NAMES: &[&str] = &[
    SQL_FORM_NAME,
    USER_FORM_NAME,
    USER_GROUP_FORM_NAME,
    "entries",
    "links",
    "assets",
];

pub const RESERVED_METADATA_FIELDS: &[&str] = &[
    "id",
    "entry_id",
    "form",
    "space_id",
    "title",
    "tags",
    "links",
    "assets",
    "created_at",
    "updated_at",
    "deleted",
    "deleted_at",
    "revision_id",
    "parent_revision_id",
    "author",
    "updated_by",
    "checksum",
    "extra_attributes",
];

pub fn is_reserved_form_name(name: &str) -> bool {
    let name = name.trim();
    RESERVED_FORM_NAMES
        .iter()
        .any(|reserved| reserved.eq_ignore_ascii_case(name))
}

pub fn is_pseudo_table(name: &str) -> bool {
    let name = name.trim();
    PSEUDO_TABLES
        .iter()
        .any(|table| table.eq_ignore_ascii_case(name))
}

pub fn is_reserved_field_name(name: &str) -> bool {
    let name = name.trim().to_lowercase();
    RESERVED_METADATA_FIELDS.iter().any(|reserved| *reserved == name)
}
