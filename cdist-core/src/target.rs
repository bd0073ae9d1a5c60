use base64::Engine;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{CdistError, Result};

/// The parsed components of a target URL (spec §3 Target).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetUrlParts {
    pub scheme: String,
    pub user: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: String,
    pub fragment: String,
}

/// One host to be configured (spec §3 Target).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Target {
    pub url: String,
    pub parts: TargetUrlParts,
    pub transports: Vec<String>,
    pub object_marker: String,
    pub explorer: std::collections::BTreeMap<String, String>,
    pub messages: Vec<String>,
}

impl Target {
    /// Parses a target URL and derives the transport stack (`scheme` split on
    /// `+`, default `["ssh"]`) and a per-run object-marker. `user` defaults to
    /// `root` when unspecified, matching the original's `pr.username or
    /// 'root'`.
    pub fn new(url: &str) -> Result<Target> {
        let parsed = Url::parse(url)
            .map_err(|e| CdistError::InvalidTargetUrl(url.to_string(), e.to_string()))?;

        let scheme = parsed.scheme().to_string();
        let host = parsed.host_str().unwrap_or_default().to_string();
        let parts = TargetUrlParts {
            scheme: scheme.clone(),
            user: {
                let u = parsed.username();
                if u.is_empty() { "root".to_string() } else { u.to_string() }
            },
            host,
            port: parsed.port(),
            path: parsed.path().to_string(),
            query: parsed.query().unwrap_or_default().to_string(),
            fragment: parsed.fragment().unwrap_or_default().to_string(),
        };

        let transports = if scheme.is_empty() {
            vec!["ssh".to_string()]
        } else {
            scheme.split('+').map(str::to_string).collect()
        };

        Ok(Target {
            url: url.to_string(),
            parts,
            transports,
            object_marker: format!(".cdist-{}", uuid::Uuid::new_v4().simple()),
            explorer: std::collections::BTreeMap::new(),
            messages: Vec::new(),
        })
    }

    /// A stable identifier usable as a path component: URL-safe base64 of the
    /// URL, or `anonymous` if there is no URL (spec §3, Supplemental
    /// Features' "anonymous fallback").
    pub fn identifier(&self) -> String {
        if self.url.is_empty() {
            "anonymous".to_string()
        } else {
            base64::engine::general_purpose::URL_SAFE.encode(self.url.as_bytes())
        }
    }

    /// `transport/<scheme-1>/<scheme-2>/.../exec`, the path component a
    /// multi-scheme URL like `ssh+sudo+chroot://` stacks onto (spec §6
    /// Transport scripts).
    pub fn remote_exec_path(&self) -> std::path::PathBuf {
        let mut p = std::path::PathBuf::from("transport");
        for t in &self.transports {
            p.push(t);
        }
        p.push("exec");
        p
    }

    pub fn remote_copy_path(&self) -> std::path::PathBuf {
        let mut p = std::path::PathBuf::from("transport");
        for t in &self.transports {
            p.push(t);
        }
        p.push("copy");
        p
    }

    pub fn to_dir(&self, dir: &std::path::Path) -> Result<()> {
        std::fs::create_dir_all(dir).map_err(|e| CdistError::io(dir, e))?;
        let path = dir.join("target.json");
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, contents).map_err(|e| CdistError::io(&path, e))?;
        Ok(())
    }

    pub fn from_dir(dir: &std::path::Path) -> Result<Target> {
        let path = dir.join("target.json");
        let contents = std::fs::read_to_string(&path).map_err(|e| CdistError::io(&path, e))?;
        Ok(serde_json::from_str(&contents)?)
    }
}

/// The sentinel target name `explore` bypasses `remote-exec` for (spec §6).
pub const LOCAL_TARGET_SENTINEL: &str = "__local__";
