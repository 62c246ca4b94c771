use std::fmt;

/// Identifies a cached document by its requested size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CacheKey(u32);

impl CacheKey {
    pub fn new(size: u32) -> Self {
        Self(size)
    }

    pub fn size(self) -> u32 {
        self.0
    }

    pub(super) fn file_name(self) -> String {
        self.0.to_string()
    }

    /// Maps an entry file name back to its key. Only the canonical decimal
    /// form is accepted, so `0500` or `tmp_...` never count as entries.
    pub(super) fn from_file_name(name: &str) -> Option<Self> {
        if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        let value: u32 = name.parse().ok()?;
        (value.to_string() == name).then_some(Self(value))
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
