//! Cache key construction.

use std::fmt;

/// Entity kinds with cached values. Each owns one key namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CacheNamespace {
    /// User profiles by user id.
    Profile,
    /// Specialization lists by case id.
    Specializations,
    /// Lawyer records by lawyer id.
    Lawyer,
}

impl CacheNamespace {
    /// Namespace prefix.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Profile => "profile",
            Self::Specializations => "specializations",
            Self::Lawyer => "lawyer",
        }
    }
}

impl fmt::Display for CacheNamespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Key builders.
pub struct CacheKey;

impl CacheKey {
    /// Prefix of tag index keys. Not a [`CacheNamespace`].
    pub const TAG_INDEX_PREFIX: &'static str = "tags";

    /// `<namespace>:<id>`.
    pub fn entity(namespace: CacheNamespace, id: impl fmt::Display) -> String {
        format!("{namespace}:{id}")
    }

    /// Key of a cached profile.
    pub fn profile(user_id: impl fmt::Display) -> String {
        Self::entity(CacheNamespace::Profile, user_id)
    }

    /// Key of a cached specialization list.
    pub fn specializations(case_id: impl fmt::Display) -> String {
        Self::entity(CacheNamespace::Specializations, case_id)
    }

    /// Tag grouping everything derived from one lawyer.
    pub fn lawyer_tag(lawyer_id: impl fmt::Display) -> String {
        Self::entity(CacheNamespace::Lawyer, lawyer_id)
    }

    /// Index key for `tag`.
    pub fn tag_index(tag: &str) -> String {
        format!("{}:{tag}", Self::TAG_INDEX_PREFIX)
    }
}
