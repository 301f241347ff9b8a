#![forbid(unsafe_code)]

use std::collections::BTreeSet;

const MAX_TAG_LEN: usize = 64;

pub fn normalize_tags(tags: &[String]) -> Result<Vec<String>, TagError> {
    let mut out = BTreeSet::new();
    for tag in tags {
        let trimmed = tag.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.chars().any(|c| c.is_control()) {
            return Err(TagError::ContainsControl);
        }
        if trimmed.chars().count() > MAX_TAG_LEN {
            return Err(TagError::TooLong);
        }
        out.insert(trimmed.to_lowercase());
    }
    Ok(out.into_iter().collect())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TagError {
    ContainsControl,
    TooLong,
}

impl TagError {
    pub fn message(&self) -> &'static str {
        match self {
            Self::ContainsControl => "tag contains control characters",
            Self::TooLong => "tag is too long",
        }
    }
}
