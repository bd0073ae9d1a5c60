//! Construction of the `__target_*` environment view every explorer,
//! manifest, and gencode script runs with (spec §3, §4). Grounded in
//! `examples/original_source/cdist/execution.py`'s `TargetContext`, which
//! builds `environ['__target_' + key] = value` for every non-empty target
//! attribute.

use std::collections::BTreeMap;

use cdist_core::Target;

/// The base environment every command run against `target` is started with,
/// regardless of executor. Callers add target-specific additions
/// (`__object_name`, `__type`, ...) on top of this.
pub fn target_environ(target: &Target) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("__target_url".to_string(), target.url.clone());

    if !target.parts.host.is_empty() {
        env.insert("__target_host".to_string(), target.parts.host.clone());
    }
    if !target.parts.user.is_empty() {
        env.insert("__target_user".to_string(), target.parts.user.clone());
    }
    if let Some(port) = target.parts.port {
        env.insert("__target_port".to_string(), port.to_string());
    }
    if !target.parts.path.is_empty() {
        env.insert("__target_path".to_string(), target.parts.path.clone());
    }

    env
}

/// The per-object additions layered on top of `target_environ` while running
/// an object's explorers, manifest, or gencode scripts (spec §4.2, §4.5).
pub fn object_environ(object_name: &str, object_id: Option<&str>, type_name: &str) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert("__object".to_string(), object_name.to_string());
    env.insert("__object_name".to_string(), object_name.to_string());
    env.insert("__object_id".to_string(), object_id.unwrap_or_default().to_string());
    env.insert("__type".to_string(), type_name.to_string());
    env
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_environ_carries_url_and_host() {
        let target = Target::new("ssh://root@example.com:2222/etc").unwrap();
        let env = target_environ(&target);
        assert_eq!(env.get("__target_url").unwrap(), "ssh://root@example.com:2222/etc");
        assert_eq!(env.get("__target_host").unwrap(), "example.com");
        assert_eq!(env.get("__target_port").unwrap(), "2222");
    }

    #[test]
    fn object_environ_carries_name_and_id() {
        let env = object_environ("__file/etc/hosts", Some("etc/hosts"), "__file");
        assert_eq!(env.get("__object_id").unwrap(), "etc/hosts");
        assert_eq!(env.get("__type").unwrap(), "__file");
    }
}
