use std::{collections::HashSet, fmt, sync::Arc};

use super::AdmissionSettings;

/// Decides whether a client identifier is exempt from per-client limiting.
///
/// Implemented for any `Fn(&str) -> bool + Send + Sync`, so a closure is enough:
///
/// ```rust
/// use std::sync::Arc;
/// use admission_control::admission::{AdmissionSettings, WhitelistChecker};
///
/// let internal: Arc<dyn WhitelistChecker> = Arc::new(|id: &str| id.starts_with("10."));
/// let settings = AdmissionSettings::builder()
///     .whitelist_checker(internal)
///     .build();
/// ```
pub trait WhitelistChecker: Send + Sync {
    fn is_whitelisted(&self, client_id: &str) -> bool;
}

impl<F> WhitelistChecker for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_whitelisted(&self, client_id: &str) -> bool {
        self(client_id)
    }
}

/// Static identifiers plus an optional checker.
///
/// A configured checker is authoritative: the static set is not consulted at all.
#[derive(Clone, Default)]
pub struct Whitelist {
    ids: HashSet<String>,
    checker: Option<Arc<dyn WhitelistChecker>>,
}

impl Whitelist {
    pub fn new(ids: HashSet<String>, checker: Option<Arc<dyn WhitelistChecker>>) -> Self {
        Self { ids, checker }
    }

    pub fn from_settings(settings: &AdmissionSettings) -> Self {
        Self::new(
            settings.whitelist.clone(),
            settings.whitelist_checker.clone(),
        )
    }

    pub fn is_whitelisted(&self, client_id: &str) -> bool {
        match &self.checker {
            Some(checker) => checker.is_whitelisted(client_id),
            None => self.ids.contains(client_id),
        }
    }
}

impl fmt::Debug for Whitelist {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Whitelist")
            .field("ids", &self.ids)
            .field("custom_checker", &self.checker.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(list: &[&str]) -> HashSet<String> {
        list.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn empty_whitelist_exempts_nobody() {
        let whitelist = Whitelist::default();
        assert!(!whitelist.is_whitelisted("127.0.0.1"));
        assert!(!whitelist.is_whitelisted(""));
    }

    #[test]
    fn static_ids_match_exactly() {
        let whitelist = Whitelist::new(ids(&["10.0.0.1"]), None);

        assert!(whitelist.is_whitelisted("10.0.0.1"));
        assert!(!whitelist.is_whitelisted("10.0.0.10"));
        assert!(!whitelist.is_whitelisted("10.0.0"));
    }

    #[test]
    fn checker_replaces_static_ids() {
        let checker: Arc<dyn WhitelistChecker> = Arc::new(|id: &str| id.ends_with(".internal"));
        let whitelist = Whitelist::new(ids(&["10.0.0.1"]), Some(checker));

        assert!(whitelist.is_whitelisted("db.internal"));
        assert!(!whitelist.is_whitelisted("10.0.0.1"));
    }

    #[test]
    fn built_from_settings() {
        let settings = AdmissionSettings::builder()
            .whitelist(ids(&["a", "b"]))
            .build();
        let whitelist = Whitelist::from_settings(&settings);

        assert!(whitelist.is_whitelisted("a"));
        assert!(whitelist.is_whitelisted("b"));
        assert!(!whitelist.is_whitelisted("c"));
    }
}
