//! Data model for cdist-ng: Target, Type, Object, and the Session/Paths
//! layout (spec §3). This crate has no process-execution or scheduling logic
//! of its own; it is the shared vocabulary `cdist-exec`, `cdist-depstore`,
//! `cdist-runtime`, and `cdist-manager` build on.

pub mod error;
pub mod object;
pub mod paths;
pub mod session_id;
pub mod target;
pub mod typ;

pub use error::{CdistError, Result};
pub use object::{normalize_object_id, Object, ObjectName, ObjectState, ParamValue};
pub use paths::{LocalPaths, RemotePaths, TargetPaths};
pub use target::{Target, TargetUrlParts, LOCAL_TARGET_SENTINEL};
pub use typ::{ParamSchema, Type, TypeCache};
