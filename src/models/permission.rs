//! Permission codes held by a user.

use std::collections::HashSet;

/// Set of opaque permission codes such as `movies:read`.
///
/// Membership is exact: no prefixes, no wildcards.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Permissions(HashSet<String>);

impl Permissions {
    pub fn includes(&self, code: &str) -> bool {
        self.0.contains(code)
    }
}

impl<S: Into<String>> FromIterator<S> for Permissions {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

impl Extend<String> for Permissions {
    fn extend<I: IntoIterator<Item = String>>(&mut self, iter: I) {
        self.0.extend(iter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exact_membership() {
        let perms: Permissions = ["movies:read"].into_iter().collect();
        assert!(perms.includes("movies:read"));
        assert!(!perms.includes("movies"));
        assert!(!perms.includes("movies:*"));
        assert!(!perms.includes("movies:read:all"));
    }
}
