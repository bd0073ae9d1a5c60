/// Session id format: `YYYY-MM-DD-HH:MM:SS-<fqdn>-<pid>` (spec §6 Filesystem
/// layout). The core never calls `SystemTime::now()` lazily inside a
/// deterministic code path; callers supply `now` explicitly so the format can
/// be exercised in tests without real wall-clock dependence.
pub fn format_session_id(now: &str, fqdn: &str, pid: u32) -> String {
    format!("{now}-{fqdn}-{pid}")
}

/// Default remote session directory: `/var/cache/cdist/<session-id>`.
pub fn default_remote_session_dir(session_id: &str) -> std::path::PathBuf {
    std::path::PathBuf::from("/var/cache/cdist").join(session_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_session_id() {
        assert_eq!(
            format_session_id("2026-07-26-12:00:00", "host.example.com", 1234),
            "2026-07-26-12:00:00-host.example.com-1234"
        );
    }

    #[test]
    fn default_remote_dir_is_under_var_cache_cdist() {
        assert_eq!(
            default_remote_session_dir("abc"),
            std::path::PathBuf::from("/var/cache/cdist/abc")
        );
    }
}
