//! Per-invocation message-exchange scope (spec §4.6): every type-manifest and
//! gencode run gets a pair of temp files through which it can read the
//! messages emitted so far and append new ones of its own.

use std::collections::BTreeMap;
use std::io::Write as _;
use std::path::PathBuf;

use cdist_core::error::{CdistError, Result};
use tempfile::TempPath;

pub struct MessagesScope {
    in_path: TempPath,
    out_path: TempPath,
    object_name: String,
}

impl MessagesScope {
    /// Opens a scope for `object_name`, seeding `messages_in` with the
    /// newline-joined `current_messages`.
    pub fn open(object_name: &str, current_messages: &[String]) -> Result<MessagesScope> {
        let mut in_file = tempfile::NamedTempFile::new().map_err(|e| CdistError::io("messages_in", e))?;
        in_file
            .write_all(current_messages.join("\n").as_bytes())
            .map_err(|e| CdistError::io("messages_in", e))?;
        let in_path = in_file.into_temp_path();

        let out_file = tempfile::NamedTempFile::new().map_err(|e| CdistError::io("messages_out", e))?;
        let out_path = out_file.into_temp_path();

        Ok(MessagesScope {
            in_path,
            out_path,
            object_name: object_name.to_string(),
        })
    }

    /// The `__messages_in`/`__messages_out` env additions for the child
    /// process this scope wraps.
    pub fn env(&self) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("__messages_in".to_string(), path_to_string(&self.in_path));
        env.insert("__messages_out".to_string(), path_to_string(&self.out_path));
        env
    }

    /// Closes the scope: reads every nonempty line the child wrote to
    /// `messages_out`, prefixed with the object name, and unlinks both temp
    /// files (via `TempPath`'s drop, once `self` goes out of scope here).
    pub fn close(self) -> Result<Vec<String>> {
        let contents = match std::fs::read_to_string(&self.out_path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(CdistError::io(self.out_path.to_path_buf(), e)),
        };
        Ok(contents
            .lines()
            .filter(|line| !line.is_empty())
            .map(|line| format!("{}: {}", self.object_name, line))
            .collect())
    }
}

fn path_to_string(path: &std::path::Path) -> String {
    let p: PathBuf = path.to_path_buf();
    p.display().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_reads_nonempty_lines_prefixed_with_object_name() {
        let scope = MessagesScope::open("__file/etc/hosts", &["hello".to_string()]).unwrap();
        let env = scope.env();
        let out_path = env.get("__messages_out").unwrap();
        std::fs::write(out_path, "line one\n\nline two\n").unwrap();

        let messages = scope.close().unwrap();
        assert_eq!(
            messages,
            vec![
                "__file/etc/hosts: line one".to_string(),
                "__file/etc/hosts: line two".to_string(),
            ]
        );
    }

    #[test]
    fn in_file_is_seeded_with_current_messages() {
        let scope = MessagesScope::open("__a/b", &["first".to_string(), "second".to_string()]).unwrap();
        let env = scope.env();
        let contents = std::fs::read_to_string(env.get("__messages_in").unwrap()).unwrap();
        assert_eq!(contents, "first\nsecond");
    }
}
