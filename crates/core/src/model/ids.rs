#![forbid(unsafe_code)]

const MAX_SPACE_ID_LEN: usize = 128;
const MAX_ENTRY_ID_LEN: usize = 128;
const MAX_FORM_NAME_LEN: usize = 64;
const MAX_FIELD_NAME_LEN: usize = 128;
const MAX_USER_ID_LEN: usize = 256;

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SpaceId(String);

impl SpaceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        validate_slug(&value, MAX_SPACE_ID_LEN)?;
        Ok(Self(value))
    }
}

impl std::fmt::Display for SpaceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryId(String);

impl EntryId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        validate_slug(&value, MAX_ENTRY_ID_LEN)?;
        Ok(Self(value))
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct UserId(String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, IdError> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(IdError::Empty);
        }
        if trimmed.len() > MAX_USER_ID_LEN {
            return Err(IdError::TooLong);
        }
        if let Some((index, ch)) = trimmed.char_indices().find(|(_, c)| c.is_control()) {
            return Err(IdError::InvalidChar { ch, index });
        }
        Ok(Self(trimmed.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IdError {
    Empty,
    TooLong,
    InvalidFirstChar,
    InvalidChar { ch: char, index: usize },
}

impl IdError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "id must not be empty",
            Self::TooLong => "id is too long",
            Self::InvalidFirstChar => "id must start with an ascii letter or digit",
            Self::InvalidChar { .. } => "id contains an unsupported character",
        }
    }
}

fn validate_slug(value: &str, max_len: usize) -> Result<(), IdError> {
    let Some(first) = value.chars().next() else {
        return Err(IdError::Empty);
    };
    if value.len() > max_len {
        return Err(IdError::TooLong);
    }
    if !first.is_ascii_alphanumeric() {
        return Err(IdError::InvalidFirstChar);
    }
    for (index, ch) in value.char_indices().skip(1) {
        if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
            continue;
        }
        return Err(IdError::InvalidChar { ch, index });
    }
    Ok(())
}

/// Form names compare case-insensitively; `key()` is the folded identity.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FormName {
    display: String,
    key: String,
}

impl FormName {
    pub fn as_str(&self) -> &str {
        &self.display
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, FormNameError> {
        let value = value.into();
        let trimmed = value.trim();
        let Some(first) = trimmed.chars().next() else {
            return Err(FormNameError::Empty);
        };
        if trimmed.len() > MAX_FORM_NAME_LEN {
            return Err(FormNameError::TooLong);
        }
        if !first.is_ascii_alphabetic() {
            return Err(FormNameError::InvalidFirstChar);
        }
        if trimmed
            .chars()
            .any(|c| !(c.is_ascii_alphanumeric() || c == '_' || c == '-'))
        {
            return Err(FormNameError::InvalidChar);
        }
        Ok(Self {
            display: trimmed.to_string(),
            key: form_key(trimmed),
        })
    }
}

pub fn form_key(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FormNameError {
    Empty,
    TooLong,
    InvalidFirstChar,
    InvalidChar,
}

impl FormNameError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "form name must not be empty",
            Self::TooLong => "form name is too long",
            Self::InvalidFirstChar => "form name must start with an ascii letter",
            Self::InvalidChar => "form name may only contain ascii letters, digits, '_' and '-'",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldName(String);

impl FieldName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn key(&self) -> String {
        self.0.to_lowercase()
    }

    pub fn try_new(value: impl Into<String>) -> Result<Self, FieldNameError> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(FieldNameError::Empty);
        }
        if value.trim() != value {
            return Err(FieldNameError::SurroundingWhitespace);
        }
        if value.chars().count() > MAX_FIELD_NAME_LEN {
            return Err(FieldNameError::TooLong);
        }
        if value.chars().any(|c| c.is_control()) {
            return Err(FieldNameError::ContainsControl);
        }
        if value.chars().any(|c| matches!(c, '"' | '\'' | '\\')) {
            return Err(FieldNameError::ContainsQuote);
        }
        Ok(Self(value))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum FieldNameError {
    Empty,
    SurroundingWhitespace,
    TooLong,
    ContainsControl,
    ContainsQuote,
}

impl FieldNameError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::Empty => "field name must not be empty",
            Self::SurroundingWhitespace => "field name must not start or end with whitespace",
            Self::TooLong => "field name is too long",
            Self::ContainsControl => "field name contains control characters",
            Self::ContainsQuote => "field name must not contain quotes or backslashes",
        }
    }
}
