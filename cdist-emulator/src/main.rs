//! The type emulator (spec §6 "Emulator interface"), grounded in
//! `examples/original_source/cdist/cli/commands/internal/emulator.py`'s
//! `EmulatorCommand`/`main`. A manifest script invokes this binary once per
//! object it declares; this process builds the object's parameter schema
//! dynamically from the type's on-disk definition, normalizes and records
//! the object, records dependency edges, and exits.
//!
//! Real cdist installs one copy of the emulator per type name under
//! `session/bin/<type-name>`, dispatching on `argv[0]`'s basename; invoking
//! the binary by its own name (`cdist-emulator <type-name> [args...]`) is
//! also accepted, which is how tests and direct invocations use it.

use std::collections::{BTreeMap, BTreeSet};
use std::io::{IsTerminal, Read};
use std::path::{Path, PathBuf};

use cdist_core::error::{CdistError, Result};
use cdist_core::object::{normalize_object_id, ParamValue};
use cdist_core::typ::{ParamSchema, Type};
use cdist_core::{Object, ObjectName, Target, TargetPaths};
use cdist_depstore::DependencyStore;
use clap::{Arg, ArgAction, Command};

fn get_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| CdistError::MissingRequiredEnvironmentVariable(name.to_string()))
}

/// The environment the emulator needs from its parent manifest invocation
/// (spec §6). Kept as a struct, rather than read inline in `main`, so tests
/// can drive `run` against fixture paths without touching process env vars.
struct EmulatorEnv {
    local_session_dir: PathBuf,
    #[allow(dead_code)]
    remote_session_dir: String,
    local_target_dir: PathBuf,
    manifest: String,
    parent_object: Option<String>,
}

impl EmulatorEnv {
    fn from_process_env() -> Result<EmulatorEnv> {
        Ok(EmulatorEnv {
            local_session_dir: PathBuf::from(get_env("__cdist_local_session")?),
            remote_session_dir: get_env("__cdist_remote_session")?,
            local_target_dir: PathBuf::from(get_env("__cdist_local_target")?),
            manifest: get_env("__cdist_manifest")?,
            parent_object: std::env::var("__object_name").ok(),
        })
    }
}

/// Splits `argv` into the type name and the remaining type-specific
/// arguments. If the program was invoked under a name other than this
/// binary's own (the `session/bin/<type>` shim convention), that basename
/// is the type name and every remaining word is a type argument; otherwise
/// the type name is the first positional argument (`cdist-emulator
/// <type-name> ...`).
fn resolve_type_name_and_args(argv: &[String]) -> (String, Vec<String>) {
    let exe_name = argv
        .first()
        .and_then(|a| Path::new(a).file_name())
        .and_then(|n| n.to_str())
        .unwrap_or_default();

    if !exe_name.is_empty() && exe_name != "cdist-emulator" {
        (exe_name.to_string(), argv[1..].to_vec())
    } else {
        let type_name = argv.get(1).cloned().unwrap_or_default();
        let rest = argv.get(2..).map(<[String]>::to_vec).unwrap_or_default();
        (type_name, rest)
    }
}

/// Builds the dynamic argument schema for one type (spec §6: "parses flags
/// against the type's parameter schema"), plus the fixed dependency/tag
/// options every type emulation accepts.
fn build_command(type_name: &str, schema: &ParamSchema, singleton: bool) -> Command {
    let mut cmd = Command::new(type_name.to_string()).no_binary_name(true);

    cmd = cmd
        .arg(
            Arg::new("if-tag")
                .long("if-tag")
                .action(ArgAction::Append)
                .value_delimiter(','),
        )
        .arg(
            Arg::new("not-if-tag")
                .long("not-if-tag")
                .action(ArgAction::Append)
                .value_delimiter(','),
        )
        .arg(
            Arg::new("require")
                .long("require")
                .action(ArgAction::Append)
                .value_delimiter(' ')
                .env("__cdist_require"),
        )
        .arg(
            Arg::new("after")
                .long("after")
                .action(ArgAction::Append)
                .value_delimiter(' ')
                .env("__cdist_after"),
        )
        .arg(
            Arg::new("before")
                .long("before")
                .action(ArgAction::Append)
                .value_delimiter(' ')
                .env("__cdist_before"),
        );

    for name in &schema.required {
        let mut arg = Arg::new(name.clone()).long(name.clone());
        arg = match schema.default.get(name) {
            Some(default) => arg.default_value(default.as_str()),
            None => arg.required(true),
        };
        cmd = cmd.arg(arg);
    }
    for name in &schema.required_multiple {
        let mut arg = Arg::new(name.clone()).long(name.clone()).action(ArgAction::Append);
        arg = match schema.default.get(name) {
            Some(default) => arg.default_value(default.as_str()),
            None => arg.required(true),
        };
        cmd = cmd.arg(arg);
    }
    for name in &schema.optional {
        let mut arg = Arg::new(name.clone()).long(name.clone());
        if let Some(default) = schema.default.get(name) {
            arg = arg.default_value(default.as_str());
        }
        cmd = cmd.arg(arg);
    }
    for name in &schema.optional_multiple {
        let mut arg = Arg::new(name.clone()).long(name.clone()).action(ArgAction::Append);
        if let Some(default) = schema.default.get(name) {
            arg = arg.default_value(default.as_str());
        }
        cmd = cmd.arg(arg);
    }
    for name in &schema.boolean {
        cmd = cmd.arg(Arg::new(name.clone()).long(name.clone()).action(ArgAction::SetTrue));
    }

    if !singleton {
        cmd = cmd.arg(Arg::new("object_id").required(true));
    }

    cmd
}

fn space_delimited(matches: &clap::ArgMatches, id: &str) -> Vec<String> {
    matches
        .get_many::<String>(id)
        .map(|it| it.cloned().filter(|s| !s.is_empty()).collect())
        .unwrap_or_default()
}

fn extract_parameters(matches: &clap::ArgMatches, schema: &ParamSchema) -> BTreeMap<String, ParamValue> {
    let mut parameter = BTreeMap::new();
    for name in &schema.required {
        if let Some(v) = matches.get_one::<String>(name) {
            parameter.insert(name.clone(), ParamValue::Scalar(v.clone()));
        }
    }
    for name in &schema.required_multiple {
        let values: Vec<String> = matches.get_many::<String>(name).map(|it| it.cloned().collect()).unwrap_or_default();
        parameter.insert(name.clone(), ParamValue::List(values));
    }
    for name in &schema.optional {
        if let Some(v) = matches.get_one::<String>(name) {
            parameter.insert(name.clone(), ParamValue::Scalar(v.clone()));
        }
    }
    for name in &schema.optional_multiple {
        let values: Vec<String> = matches.get_many::<String>(name).map(|it| it.cloned().collect()).unwrap_or_default();
        if !values.is_empty() {
            parameter.insert(name.clone(), ParamValue::List(values));
        }
    }
    for name in &schema.boolean {
        parameter.insert(name.clone(), ParamValue::Bool(matches.get_flag(name)));
    }
    parameter
}

/// Core emulation logic: parse `type_args` against `type_name`'s schema,
/// create-or-reuse the object, record its dependency edges, and persist it.
/// Grounded in `EmulatorCommand.run` from the original.
fn run(type_name: &str, type_args: &[String], env: &EmulatorEnv) -> Result<()> {
    if type_name.is_empty() {
        return Err(CdistError::Other("no type name given".to_string()));
    }

    let local_paths = cdist_core::LocalPaths::new(env.local_session_dir.clone());
    let typ = Type::from_dir(&local_paths.conf_type().join(type_name), type_name)?;

    let command = build_command(type_name, &typ.schema, typ.singleton);
    let matches = command
        .try_get_matches_from(type_args)
        .map_err(|e| CdistError::Other(e.to_string()))?;

    let if_tag: BTreeSet<String> = matches.get_many::<String>("if-tag").map(|it| it.cloned().collect()).unwrap_or_default();
    let not_if_tag: BTreeSet<String> =
        matches.get_many::<String>("not-if-tag").map(|it| it.cloned().collect()).unwrap_or_default();
    if !if_tag.is_disjoint(&not_if_tag) {
        return Err(CdistError::ConflictingTags(format!(
            "'if-tag' and 'not-if-tag' share values: {:?}",
            if_tag.intersection(&not_if_tag).collect::<Vec<_>>()
        )));
    }

    let object_id = if typ.singleton {
        None
    } else {
        let raw = matches.get_one::<String>("object_id").map(String::as_str).unwrap_or_default();
        Some(normalize_object_id(raw)?)
    };
    let object_name = ObjectName::new(type_name, object_id);
    let canonical = object_name.canonical();

    let target = Target::from_dir(&env.local_target_dir)?;
    let target_paths = TargetPaths::new(env.local_target_dir.clone());
    let object_dir = target_paths.object_dir(&canonical, &target.object_marker);

    let parameter = extract_parameters(&matches, &typ.schema);

    let mut object = if object_dir.join("object.json").is_file() {
        let existing = Object::from_dir(&object_dir)?;
        if existing.parameter != parameter {
            return Err(CdistError::ConflictingObject {
                object: canonical.clone(),
                first_manifest: existing.source.first().cloned().unwrap_or_default(),
                second_manifest: env.manifest.clone(),
            });
        }
        existing
    } else {
        Object::new(object_name, parameter)
    };
    object.tags = if_tag.into_iter().collect();
    object.source.push(env.manifest.clone());

    if !std::io::stdin().is_terminal() {
        let mut buf = Vec::new();
        std::io::stdin()
            .read_to_end(&mut buf)
            .map_err(|e| CdistError::io(&object_dir, e))?;
        if !buf.is_empty() {
            let stdin_path = object_dir.join("stdin");
            std::fs::create_dir_all(&object_dir).map_err(|e| CdistError::io(&object_dir, e))?;
            std::fs::write(&stdin_path, &buf).map_err(|e| CdistError::io(&stdin_path, e))?;
        }
    }

    let dep_store = DependencyStore::new(target_paths.dependency())?;
    for pattern in space_delimited(&matches, "require") {
        dep_store.require(&canonical, &pattern)?;
    }
    for pattern in space_delimited(&matches, "after") {
        dep_store.after(&canonical, &pattern)?;
    }
    for pattern in space_delimited(&matches, "before") {
        dep_store.before(&canonical, &pattern)?;
    }
    if let Some(parent) = &env.parent_object {
        dep_store.auto(parent, &canonical)?;
    }

    object.to_dir(&object_dir)?;
    Ok(())
}

extern "C" fn handle_sigint(_signum: libc::c_int) {
    std::process::exit(2);
}

fn install_sigint_handler() {
    unsafe {
        libc::signal(libc::SIGINT, handle_sigint as libc::sighandler_t);
    }
}

fn main() {
    env_logger::init();
    install_sigint_handler();

    let argv: Vec<String> = std::env::args().collect();
    let (type_name, type_args) = resolve_type_name_and_args(&argv);

    let result = EmulatorEnv::from_process_env().and_then(|env| run(&type_name, &type_args, &env));
    match result {
        Ok(()) => std::process::exit(0),
        Err(e) => {
            log::error!("{e}");
            std::process::exit(e.exit_code());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_target(dir: &Path) -> Target {
        let target = Target::new("ssh://example.com/").unwrap();
        target.to_dir(dir).unwrap();
        target
    }

    fn fixture_env(session_dir: &Path, target_dir: &Path, manifest: &str) -> EmulatorEnv {
        EmulatorEnv {
            local_session_dir: session_dir.to_path_buf(),
            remote_session_dir: "/var/cache/cdist/sess".to_string(),
            local_target_dir: target_dir.to_path_buf(),
            manifest: manifest.to_string(),
            parent_object: None,
        }
    }

    #[test]
    fn dispatch_uses_argv0_basename_when_not_self() {
        let argv = vec!["/session/bin/__file".to_string(), "/etc/hosts".to_string(), "--state".to_string(), "present".to_string()];
        let (type_name, rest) = resolve_type_name_and_args(&argv);
        assert_eq!(type_name, "__file");
        assert_eq!(rest, vec!["/etc/hosts", "--state", "present"]);
    }

    #[test]
    fn dispatch_uses_explicit_first_arg_when_invoked_as_self() {
        let argv = vec!["cdist-emulator".to_string(), "__file".to_string(), "/etc/hosts".to_string()];
        let (type_name, rest) = resolve_type_name_and_args(&argv);
        assert_eq!(type_name, "__file");
        assert_eq!(rest, vec!["/etc/hosts"]);
    }

    #[test]
    fn singleton_type_rejects_object_id_positional() {
        let schema = ParamSchema::default();
        let cmd = build_command("__hostname", &schema, true);
        let err = cmd.try_get_matches_from(vec!["unexpected"]).unwrap_err();
        assert!(err.to_string().contains("unexpected") || !err.to_string().is_empty());
    }

    #[test]
    fn creates_a_new_object_with_scalar_and_boolean_parameters() {
        let session = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        cdist_testutil::make_type(&session.path().join("conf/type"), "__file", false, &[]);
        cdist_testutil::make_file(&session.path().join("conf/type/__file/parameter/optional"), b"state\n", 0o644);
        cdist_testutil::make_file(&session.path().join("conf/type/__file/parameter/boolean"), b"force\n", 0o644);

        write_target(target_dir.path());
        let env = fixture_env(session.path(), target_dir.path(), "/session/manifest");

        run("__file", &["etc/hosts".to_string(), "--state".to_string(), "present".to_string(), "--force".to_string()], &env).unwrap();

        let target = Target::from_dir(target_dir.path()).unwrap();
        let object_dir = TargetPaths::new(target_dir.path().to_path_buf()).object_dir("__file/etc/hosts", &target.object_marker);
        let object = Object::from_dir(&object_dir).unwrap();
        assert_eq!(object.parameter.get("state"), Some(&ParamValue::Scalar("present".to_string())));
        assert_eq!(object.parameter.get("force"), Some(&ParamValue::Bool(true)));
        assert_eq!(object.source, vec!["/session/manifest".to_string()]);
    }

    #[test]
    fn redefinition_with_different_parameters_is_a_conflict() {
        let session = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        cdist_testutil::make_type(&session.path().join("conf/type"), "__file", false, &[]);
        cdist_testutil::make_file(&session.path().join("conf/type/__file/parameter/optional"), b"state\n", 0o644);

        write_target(target_dir.path());
        let env = fixture_env(session.path(), target_dir.path(), "/session/manifest");

        run("__file", &["etc/hosts".to_string(), "--state".to_string(), "present".to_string()], &env).unwrap();
        let err = run("__file", &["etc/hosts".to_string(), "--state".to_string(), "absent".to_string()], &env).unwrap_err();
        assert!(matches!(err, CdistError::ConflictingObject { .. }));
    }

    #[test]
    fn redefinition_with_same_parameters_reuses_the_object() {
        let session = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        cdist_testutil::make_type(&session.path().join("conf/type"), "__file", false, &[]);
        cdist_testutil::make_file(&session.path().join("conf/type/__file/parameter/optional"), b"state\n", 0o644);

        write_target(target_dir.path());
        let env = fixture_env(session.path(), target_dir.path(), "/session/manifest-one");

        run("__file", &["etc/hosts".to_string(), "--state".to_string(), "present".to_string()], &env).unwrap();
        let env2 = fixture_env(session.path(), target_dir.path(), "/session/manifest-two");
        run("__file", &["etc/hosts".to_string(), "--state".to_string(), "present".to_string()], &env2).unwrap();

        let target = Target::from_dir(target_dir.path()).unwrap();
        let object_dir = TargetPaths::new(target_dir.path().to_path_buf()).object_dir("__file/etc/hosts", &target.object_marker);
        let object = Object::from_dir(&object_dir).unwrap();
        assert_eq!(object.source, vec!["/session/manifest-one".to_string(), "/session/manifest-two".to_string()]);
    }

    #[test]
    fn conflicting_if_tag_and_not_if_tag_is_rejected() {
        let session = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        cdist_testutil::make_type(&session.path().join("conf/type"), "__hostname", true, &[]);
        write_target(target_dir.path());
        let env = fixture_env(session.path(), target_dir.path(), "/session/manifest");

        let err = run(
            "__hostname",
            &["--if-tag".to_string(), "a".to_string(), "--not-if-tag".to_string(), "a".to_string()],
            &env,
        )
        .unwrap_err();
        assert!(matches!(err, CdistError::ConflictingTags(_)));
    }

    #[test]
    fn require_after_before_are_recorded_in_the_dependency_store() {
        let session = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        cdist_testutil::make_type(&session.path().join("conf/type"), "__hostname", true, &[]);
        write_target(target_dir.path());
        let env = fixture_env(session.path(), target_dir.path(), "/session/manifest");

        run(
            "__hostname",
            &["--require".to_string(), "__a/x __a/y".to_string(), "--before".to_string(), "__b/z".to_string()],
            &env,
        )
        .unwrap();

        let dep_store = DependencyStore::new(target_dir.path().join("dependency")).unwrap();
        let record = dep_store.load("__hostname").unwrap();
        assert_eq!(record.require, vec!["__a/x".to_string(), "__a/y".to_string()]);

        let successor = dep_store.load("__b/z").unwrap();
        assert_eq!(successor.after, vec!["__hostname".to_string()]);
    }

    #[test]
    fn object_id_is_normalized_before_use() {
        let session = tempfile::tempdir().unwrap();
        let target_dir = tempfile::tempdir().unwrap();
        cdist_testutil::make_type(&session.path().join("conf/type"), "__file", false, &[]);
        write_target(target_dir.path());
        let env = fixture_env(session.path(), target_dir.path(), "/session/manifest");

        run("__file", &["/etc/hosts/".to_string()], &env).unwrap();

        let target = Target::from_dir(target_dir.path()).unwrap();
        let object_dir = TargetPaths::new(target_dir.path().to_path_buf()).object_dir("__file/etc/hosts", &target.object_marker);
        assert!(object_dir.join("object.json").is_file());
    }
}
