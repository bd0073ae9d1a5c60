//! Tag-based object filtering (spec §6 `config` options, §9 Open Question
//! (c)): the source only partially specifies how `--only-tag`/
//! `--include-tag`/`--exclude-tag` interact with object discovery, so we
//! decide here: filtering happens once, at `add()` time, and a filtered
//! object is treated as if it never existed — it cannot be discovered, named
//! in a requirement pattern, or realized.

use cdist_core::error::{CdistError, Result};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Default)]
pub struct TagFilter {
    allowlist: BTreeSet<String>,
    exclude: BTreeSet<String>,
}

impl TagFilter {
    /// `only` and `include` are mutually exclusive (validated by the CLI
    /// layer per spec §6, but re-checked here since this type is also
    /// constructible directly); both are folded into one allowlist since
    /// at most one is ever non-empty.
    pub fn new(only: Vec<String>, include: Vec<String>, exclude: Vec<String>) -> Result<TagFilter> {
        if !only.is_empty() && !include.is_empty() {
            return Err(CdistError::ConflictingTags(
                "--only-tag and --include-tag are mutually exclusive".to_string(),
            ));
        }
        let exclude: BTreeSet<String> = exclude.into_iter().collect();
        let allowlist: BTreeSet<String> = only.into_iter().chain(include).collect();
        if allowlist.intersection(&exclude).next().is_some() {
            return Err(CdistError::ConflictingTags(
                "--only-tag/--include-tag must be disjoint from --exclude-tag".to_string(),
            ));
        }
        Ok(TagFilter { allowlist, exclude })
    }

    pub fn allows(&self, tags: &[String]) -> bool {
        if tags.iter().any(|t| self.exclude.contains(t)) {
            return false;
        }
        if self.allowlist.is_empty() {
            return true;
        }
        tags.iter().any(|t| self.allowlist.contains(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_and_include_together_is_rejected() {
        let err = TagFilter::new(vec!["a".into()], vec!["b".into()], vec![]).unwrap_err();
        assert!(matches!(err, CdistError::ConflictingTags(_)));
    }

    #[test]
    fn exclude_overlapping_only_is_rejected() {
        let err = TagFilter::new(vec!["a".into()], vec![], vec!["a".into()]).unwrap_err();
        assert!(matches!(err, CdistError::ConflictingTags(_)));
    }

    #[test]
    fn no_filters_allows_everything() {
        let f = TagFilter::default();
        assert!(f.allows(&[]));
        assert!(f.allows(&["prod".to_string()]));
    }

    #[test]
    fn only_tag_requires_a_match() {
        let f = TagFilter::new(vec!["prod".to_string()], vec![], vec![]).unwrap();
        assert!(f.allows(&["prod".to_string()]));
        assert!(!f.allows(&["dev".to_string()]));
        assert!(!f.allows(&[]));
    }

    #[test]
    fn exclude_tag_always_wins() {
        let f = TagFilter::new(vec![], vec![], vec!["danger".to_string()]).unwrap();
        assert!(!f.allows(&["danger".to_string()]));
        assert!(f.allows(&["safe".to_string()]));
    }
}
