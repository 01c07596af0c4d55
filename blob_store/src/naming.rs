//! Storage name allocation for uploaded files.
//!
//! A storage name keeps the original file's stem and extension and inserts a
//! `{epoch_millis}-{random}` disambiguator between them:
//! `report.pdf` becomes `report-1718000000000-482113907.pdf`. No existence
//! check is made here; see [`crate::BlobStorage::allocate_unique`] for the
//! retrying variant.

use std::{fmt, ops::RangeInclusive};

use rand::Rng;

const DISAMBIGUATOR_RANGE: RangeInclusive<u32> = 0..=1_000_000_000;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamingError {
    #[error("file name is empty")]
    Empty,
    #[error("invalid file name: {0:?}")]
    Degenerate(String),
}

/// An original file name split into stem and extension.
///
/// `ext` includes the leading dot and is empty when the name has none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitName {
    pub base: String,
    pub ext: String,
}

impl SplitName {
    pub fn parse(original_name: &str) -> Result<Self, NamingError> {
        if original_name.trim().is_empty() {
            return Err(NamingError::Empty);
        }
        // Clients occasionally send full paths; only the last component is ours.
        let name = original_name
            .rsplit(['/', '\\'])
            .next()
            .unwrap_or_default()
            .trim();
        if name.is_empty() || name.chars().all(|c| c == '.') {
            return Err(NamingError::Degenerate(original_name.to_string()));
        }

        match name.rfind('.') {
            Some(idx) if idx > 0 && idx < name.len() - 1 => Ok(Self {
                base: name[..idx].to_string(),
                ext: name[idx..].to_string(),
            }),
            _ => {
                let base = name.trim_end_matches('.');
                if base.is_empty() {
                    return Err(NamingError::Degenerate(original_name.to_string()));
                }
                Ok(Self {
                    base: base.to_string(),
                    ext: String::new(),
                })
            }
        }
    }

    /// Uppercase extension token without the dot, e.g. `PDF`.
    pub fn type_token(&self) -> String {
        self.ext.trim_start_matches('.').to_uppercase()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StorageName(String);

impl StorageName {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for StorageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for StorageName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Derives a storage name from `original_name`.
pub fn allocate<R: Rng + ?Sized>(
    original_name: &str,
    now_millis: u64,
    rng: &mut R,
) -> Result<StorageName, NamingError> {
    let split = SplitName::parse(original_name)?;
    let disambiguator = format!("{}-{}", now_millis, rng.random_range(DISAMBIGUATOR_RANGE));
    Ok(StorageName(format!(
        "{}-{}{}",
        sanitize(&split.base),
        disambiguator,
        sanitize(&split.ext)
    )))
}

/// True when `name` is a single path segment made only of characters the
/// allocator can emit. Anything else was never written by this store.
/// Leading dots are allowed since `.env` allocates to `.env-{millis}-{rand}`.
pub fn is_safe_storage_name(name: &str) -> bool {
    !name.is_empty() && !name.chars().all(|c| c == '.') && name.chars().all(is_allowed_char)
}

fn is_allowed_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_')
}

fn sanitize(part: &str) -> String {
    part.chars()
        .map(|c| if is_allowed_char(c) { c } else { '_' })
        .collect()
}
