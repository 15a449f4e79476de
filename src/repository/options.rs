use serde::{Deserialize, Serialize};

/// Default access-rights payload: a caller either sees everything or only
/// what the repository's policy hook allows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessPolicy {
    pub full_access: bool,
}

/// Which include groups a read attaches, whether an access policy applies,
/// and whether an empty result is an error.
///
/// Unset include flags fall back to the per-operation default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryQueryOptions<P = AccessPolicy> {
    pub load_owned: Option<bool>,
    pub load_common: Option<bool>,
    pub load_detailed: Option<bool>,
    pub required: bool,
    pub access_policy: Option<P>,
}

impl<P> Default for RepositoryQueryOptions<P> {
    fn default() -> Self {
        Self {
            load_owned: None,
            load_common: None,
            load_detailed: None,
            required: false,
            access_policy: None,
        }
    }
}

impl<P> RepositoryQueryOptions<P> {
    fn with_flags(owned: bool, common: bool, detailed: bool) -> Self {
        Self {
            load_owned: Some(owned),
            load_common: Some(common),
            load_detailed: Some(detailed),
            ..Self::default()
        }
    }

    /// No includes.
    pub fn bare() -> Self {
        Self::with_flags(false, false, false)
    }

    /// Owned properties only.
    pub fn default_view() -> Self {
        Self::with_flags(true, false, false)
    }

    pub fn list_view() -> Self {
        Self::with_flags(true, true, false)
    }

    pub fn detailed_view() -> Self {
        Self::with_flags(true, true, true)
    }

    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    pub fn with_access_policy(mut self, policy: P) -> Self {
        self.access_policy = Some(policy);
        self
    }

    pub(crate) fn resolve(&self, defaults: IncludeFlags) -> IncludeFlags {
        IncludeFlags {
            owned: self.load_owned.unwrap_or(defaults.owned),
            common: self.load_common.unwrap_or(defaults.common),
            detailed: self.load_detailed.unwrap_or(defaults.detailed),
        }
    }
}

impl RepositoryQueryOptions<AccessPolicy> {
    pub fn with_full_access(self) -> Self {
        self.with_access_policy(AccessPolicy { full_access: true })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct IncludeFlags {
    pub owned: bool,
    pub common: bool,
    pub detailed: bool,
}

impl IncludeFlags {
    pub const BARE: IncludeFlags = IncludeFlags {
        owned: false,
        common: false,
        detailed: false,
    };

    pub const LIST: IncludeFlags = IncludeFlags {
        owned: true,
        common: true,
        detailed: false,
    };

    pub const DETAILED: IncludeFlags = IncludeFlags {
        owned: true,
        common: true,
        detailed: true,
    };
}
