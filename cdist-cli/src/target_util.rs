//! Target construction for the CLI layer. `Target::new` parses its argument
//! as a URL, which rejects the bare `__local__` sentinel (spec §6 `explore`
//! edge case) outright; this builds that one case by hand since every
//! `Target` field is public.

use cdist_core::error::Result;
use cdist_core::{Target, TargetUrlParts, LOCAL_TARGET_SENTINEL};

pub fn make_target(url: &str) -> Result<Target> {
    if url == LOCAL_TARGET_SENTINEL {
        Ok(Target {
            url: url.to_string(),
            parts: TargetUrlParts::default(),
            transports: Vec::new(),
            object_marker: format!(".cdist-{}", uuid::Uuid::new_v4().simple()),
            explorer: std::collections::BTreeMap::new(),
            messages: Vec::new(),
        })
    } else {
        Target::new(url)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn local_sentinel_bypasses_url_parsing() {
        let target = make_target(LOCAL_TARGET_SENTINEL).unwrap();
        assert_eq!(target.url, LOCAL_TARGET_SENTINEL);
        assert!(target.transports.is_empty());
    }

    #[test]
    fn real_urls_still_parse_normally() {
        let target = make_target("ssh://example.com/").unwrap();
        assert_eq!(target.transports, vec!["ssh".to_string()]);
    }
}
