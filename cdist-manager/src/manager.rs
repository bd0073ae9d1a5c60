//! The Object Manager scheduler (spec §4.4): dynamic discovery, per-object
//! dependency resolution with auto-propagation, and the prepare/apply
//! event-gated realize loop. Grounded line-for-line in
//! `examples/original_source/cdist/manager.py`'s `ObjectManager`.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::sync::Arc;

use async_latch::AsyncLatch;
use cdist_core::error::{CdistError, Result};
use cdist_core::Object;
use cdist_runtime::Runtime;
use tokio::sync::{watch, Mutex};

use crate::tag_filter::TagFilter;

struct ManagerState {
    objects: BTreeMap<String, Object>,
    pending: BTreeSet<String>,
    realized: BTreeSet<String>,
    events: BTreeMap<String, (AsyncLatch, AsyncLatch)>,
    dependencies: BTreeMap<String, BTreeSet<String>>,
    unresolved: BTreeMap<String, BTreeSet<String>>,
    queue: VecDeque<String>,
    outstanding: usize,
    /// Objects currently parked waiting on a prepare/apply event that has
    /// not yet fired (spec §4.5 cycle detection). When every pending object
    /// is blocked and the queue is empty, nothing can ever make progress.
    blocked: BTreeSet<String>,
}

impl ManagerState {
    fn new() -> ManagerState {
        ManagerState {
            objects: BTreeMap::new(),
            pending: BTreeSet::new(),
            realized: BTreeSet::new(),
            events: BTreeMap::new(),
            dependencies: BTreeMap::new(),
            unresolved: BTreeMap::new(),
            queue: VecDeque::new(),
            outstanding: 0,
            blocked: BTreeSet::new(),
        }
    }

    /// Spec §4.5: a cycle exists once every remaining pending object is
    /// blocked on an event that will never fire and no fresh work is queued.
    /// Also requires `outstanding == pending.len()`: an object counted by
    /// `add()` but not yet past `realize`'s `pending.insert` is neither
    /// queued nor pending nor blocked, and without this gate it would be
    /// invisible to the check, producing a spurious deadlock on a graph that
    /// is simply mid-dequeue.
    fn quiescent_deadlock(&self) -> Option<String> {
        if !self.pending.is_empty()
            && self.queue.is_empty()
            && self.blocked.len() == self.pending.len()
            && self.outstanding == self.pending.len()
        {
            let participants: Vec<String> = self
                .blocked
                .iter()
                .map(|name| {
                    let unresolved = self
                        .unresolved
                        .get(name)
                        .map(|s| s.iter().cloned().collect::<Vec<_>>().join(", "))
                        .unwrap_or_default();
                    format!("{name} (waiting on: {unresolved})")
                })
                .collect();
            Some(participants.join("; "))
        } else {
            None
        }
    }
}

/// Drives one target's objects from on-disk discovery through full
/// realization. Owns no executor state of its own — every actual operation
/// (running an explorer, a manifest, gencode, ...) is delegated to `runtime`.
pub struct ObjectManager {
    runtime: Arc<Runtime>,
    tag_filter: TagFilter,
    state: Mutex<ManagerState>,
    outstanding_tx: watch::Sender<usize>,
    first_error: Mutex<Option<Arc<CdistError>>>,
}

impl ObjectManager {
    pub fn new(runtime: Arc<Runtime>, tag_filter: TagFilter) -> Arc<ObjectManager> {
        let (outstanding_tx, _rx) = watch::channel(0);
        Arc::new(ObjectManager {
            runtime,
            tag_filter,
            state: Mutex::new(ManagerState::new()),
            outstanding_tx,
            first_error: Mutex::new(None),
        })
    }

    /// Drives discovery and realization of every object reachable from the
    /// current on-disk tree to completion (spec §4.4 "Main loop").
    pub async fn process(self: &Arc<Self>) -> Result<()> {
        self.collect_new_objects().await?;

        let consumer = {
            let this = self.clone();
            tokio::spawn(async move { this.realize_objects_loop().await })
        };

        let result = self.join().await;
        consumer.abort();
        result
    }

    /// Walks the on-disk object tree for this target and registers any
    /// object not already known (spec §4.4 "Discovery"). An object directory
    /// is valid once it contains a subdirectory named after the run's object
    /// marker holding an `object.json`.
    pub async fn collect_new_objects(self: &Arc<Self>) -> Result<()> {
        let object_root = self.runtime.target_paths().object();
        let object_marker = self.runtime.object_marker().await;
        let pattern = object_root.join("**").join("object.json");
        let pattern = pattern.to_string_lossy().into_owned();

        let entries = glob::glob(&pattern)
            .map_err(|e| CdistError::Other(format!("invalid discovery glob: {e}")))?;

        for entry in entries {
            let object_json = entry.map_err(|e| CdistError::Other(format!("glob error: {e}")))?;
            let marker_dir = match object_json.parent() {
                Some(p) => p,
                None => continue,
            };
            if marker_dir.file_name().and_then(|n| n.to_str()) != Some(object_marker.as_str()) {
                continue;
            }
            let name_dir = match marker_dir.parent() {
                Some(p) => p,
                None => continue,
            };
            let relative = match name_dir.strip_prefix(&object_root) {
                Ok(r) => r,
                Err(_) => continue,
            };
            let canonical: String = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/");
            if canonical.is_empty() {
                continue;
            }

            let already_known = self.state.lock().await.objects.contains_key(&canonical);
            if already_known {
                continue;
            }

            let object = Object::from_dir(marker_dir)?;
            self.add(object).await;
        }
        Ok(())
    }

    /// Registers a newly discovered object, unless tag filtering treats it
    /// as non-existent (spec §9 Open Question (c)).
    async fn add(self: &Arc<Self>, object: Object) {
        if !self.tag_filter.allows(&object.tags) {
            log::debug!("add: {} filtered out by tags {:?}", object.name, object.tags);
            return;
        }
        let name = object.name.canonical();
        log::info!("add: {}", name);

        let mut state = self.state.lock().await;
        state.objects.insert(name.clone(), object);
        state
            .events
            .insert(name.clone(), (AsyncLatch::new(), AsyncLatch::new()));
        state.queue.push_back(name);
        state.outstanding += 1;
        let outstanding = state.outstanding;
        drop(state);
        let _ = self.outstanding_tx.send(outstanding);
    }

    /// Recomputes `name`'s resolved/unresolved dependency sets and fires its
    /// prepare/apply events as appropriate (spec §4.4 "Dependency resolution
    /// per object"). Called once on entry to prepare and once on entry to
    /// apply, matching the original: the set of objects may have grown
    /// between the two (a type manifest can create new auto-children).
    async fn resolve_dependencies(self: &Arc<Self>, name: &str) -> Result<()> {
        let record = self.runtime.dep_store().load(name)?;

        if !record.auto.is_empty() {
            let auto_children = self.find_requirements_by_name(&record.auto).await?;
            let after_requirements = self.find_requirements_by_name(&record.after).await?;
            for auto_child in &auto_children {
                let auto_child_record = self.runtime.dep_store().load(auto_child)?;
                let mut to_add = BTreeSet::new();
                for requirement in &after_requirements {
                    let requirement_record = self.runtime.dep_store().load(requirement)?;
                    let already_after = auto_child_record.after.iter().any(|a| a == requirement);
                    let would_back_edge = requirement_record
                        .after
                        .iter()
                        .chain(requirement_record.auto.iter())
                        .any(|a| a == auto_child);
                    if !already_after && !would_back_edge {
                        to_add.insert(requirement.clone());
                    }
                }
                if !to_add.is_empty() {
                    log::debug!("auto-propagating {:?} onto {}", to_add, auto_child);
                    self.runtime.dep_store().extend_after(auto_child, &to_add)?;
                }
            }
        }

        // Reload: `auto` propagation above may have extended this object's
        // own `after` list if it is itself an auto-child discovered earlier
        // in the same pass.
        let record = self.runtime.dep_store().load(name)?;
        let mut patterns = record.require.clone();
        patterns.extend(record.after.clone());
        patterns.extend(record.auto.clone());
        let dependencies: BTreeSet<String> = self.find_requirements_by_name(&patterns).await?.into_iter().collect();

        let mut state = self.state.lock().await;
        let unresolved: BTreeSet<String> = dependencies.difference(&state.realized).cloned().collect();

        let (prepare_latch, apply_latch) = state
            .events
            .get(name)
            .cloned()
            .expect("resolve_dependencies called before add()");

        if unresolved.is_empty() {
            prepare_latch.trigger();
            apply_latch.trigger();
        } else if record.require.is_empty() {
            prepare_latch.trigger();
        }

        state.dependencies.insert(name.to_string(), dependencies);
        state.unresolved.insert(name.to_string(), unresolved);
        Ok(())
    }

    /// Expands each shell-glob `pattern` against every known object name,
    /// matching `fnmatch.filter` in the original (spec §4.4 step 3). A
    /// pattern matching nothing is fatal.
    async fn find_requirements_by_name(self: &Arc<Self>, patterns: &[String]) -> Result<Vec<String>> {
        let object_names: Vec<String> = self.state.lock().await.objects.keys().cloned().collect();
        let mut found = Vec::new();
        for pattern in patterns {
            let compiled = glob::Pattern::new(pattern)
                .map_err(|e| CdistError::Other(format!("invalid requirement pattern '{pattern}': {e}")))?;
            let mut any = false;
            for name in &object_names {
                if compiled.matches(name) {
                    any = true;
                    found.push(name.clone());
                }
            }
            if !any {
                return Err(CdistError::RequirementNotFound(pattern.clone()));
            }
        }
        Ok(found)
    }

    /// Removes `name` from every other object's unresolved set, firing
    /// events for any that become empty, and marks `name` realized (spec
    /// §4.4 "finish").
    async fn finish(self: &Arc<Self>, name: &str) {
        let mut state = self.state.lock().await;

        let mut newly_ready = Vec::new();
        for (object_name, deps) in state.unresolved.iter_mut() {
            if deps.remove(name) && deps.is_empty() {
                newly_ready.push(object_name.clone());
            }
        }
        for ready in &newly_ready {
            if let Some((prepare, apply)) = state.events.get(ready) {
                prepare.trigger();
                apply.trigger();
            }
        }

        state.pending.remove(name);
        state.realized.insert(name.to_string());
        state.outstanding = state.outstanding.saturating_sub(1);
        let outstanding = state.outstanding;
        drop(state);
        let _ = self.outstanding_tx.send(outstanding);
    }

    /// Adds `name` to the blocked set while it awaits a latch that has not
    /// fired yet, so the join loop's quiescence check (spec §4.5) can see
    /// it. A no-op when the latch has already fired, since such an object is
    /// never a deadlock participant.
    async fn mark_blocked_if_unset(self: &Arc<Self>, name: &str, latch: &AsyncLatch) {
        if !latch.poll_triggered() {
            self.state.lock().await.blocked.insert(name.to_string());
        }
    }

    async fn mark_unblocked(self: &Arc<Self>, name: &str) {
        self.state.lock().await.blocked.remove(name);
    }

    /// Prepares then applies one object (spec §4.4 "Realization").
    async fn realize(self: Arc<Self>, name: String) -> Result<()> {
        log::info!("realize: {}", name);
        self.state.lock().await.pending.insert(name.clone());

        // --- prepare ---
        self.resolve_dependencies(&name).await?;
        let prepare_latch = self.state.lock().await.events.get(&name).unwrap().0.clone();
        self.mark_blocked_if_unset(&name, &prepare_latch).await;
        prepare_latch.triggered().await;
        self.mark_unblocked(&name).await;
        log::info!("prepare: {}", name);

        let mut object = self.state.lock().await.objects.get(&name).unwrap().clone();
        self.runtime.run_type_explorers(&mut object).await?;
        self.runtime.run_type_manifest(&mut object).await?;
        self.state.lock().await.objects.insert(name.clone(), object);
        self.collect_new_objects().await?;

        // --- apply ---
        self.resolve_dependencies(&name).await?;
        let apply_latch = self.state.lock().await.events.get(&name).unwrap().1.clone();
        self.mark_blocked_if_unset(&name, &apply_latch).await;
        apply_latch.triggered().await;
        self.mark_unblocked(&name).await;
        log::info!("apply: {}", name);

        let mut object = self.state.lock().await.objects.get(&name).unwrap().clone();
        object.code_local = self.runtime.run_gencode_local(&object).await?;
        object.code_remote = self.runtime.run_gencode_remote(&object).await?;
        self.runtime.sync_object(&object).await?;
        if !object.code_local.trim().is_empty() {
            log::info!("apply code-local: {}", name);
            self.runtime.run_code_local(&object).await?;
        }
        if !object.code_remote.trim().is_empty() {
            log::info!("apply code-remote: {}", name);
            self.runtime.transfer_code_remote(&object).await?;
            self.runtime.run_code_remote(&object).await?;
        }
        self.state.lock().await.objects.insert(name.clone(), object);

        self.finish(&name).await;
        Ok(())
    }

    /// Consumer coroutine: dequeues newly discovered objects and spawns an
    /// independent realize task per object, so realize tasks run
    /// concurrently, gated by their own events (spec §4.4 "Main loop").
    async fn realize_objects_loop(self: Arc<Self>) {
        loop {
            let name = {
                let mut rx = self.outstanding_tx.subscribe();
                loop {
                    let mut state = self.state.lock().await;
                    if let Some(name) = state.queue.pop_front() {
                        break name;
                    }
                    drop(state);
                    if rx.changed().await.is_err() {
                        return;
                    }
                }
            };

            let this = self.clone();
            tokio::spawn(async move {
                if let Err(e) = this.clone().realize(name).await {
                    log::error!("realize failed: {e}");
                    let mut first_error = this.first_error.lock().await;
                    if first_error.is_none() {
                        *first_error = Some(Arc::new(e));
                    }
                    drop(first_error);
                    let outstanding = this.state.lock().await.outstanding;
                    let _ = this.outstanding_tx.send(outstanding);
                }
            });
        }
    }

    /// Waits until either every enqueued object has been realized, a realize
    /// task has recorded the first fatal error, or the object set has gone
    /// quiescent with every pending object blocked (spec §4.5: a cycle,
    /// detected by observing no progress is possible rather than by
    /// recursion or exception bubbling). Polled on a short tick rather than
    /// purely event-driven, since "no task made progress" is an absence of
    /// an event, not an event itself.
    async fn join(&self) -> Result<()> {
        let mut rx = self.outstanding_tx.subscribe();
        loop {
            if let Some(err) = self.first_error.lock().await.as_ref() {
                return Err(CdistError::Other(err.to_string()));
            }
            let (outstanding, queue_empty, deadlock) = {
                let state = self.state.lock().await;
                (state.outstanding, state.queue.is_empty(), state.quiescent_deadlock())
            };
            if outstanding == 0 && queue_empty {
                return Ok(());
            }
            if let Some(participants) = deadlock {
                return Err(CdistError::CircularReference(participants));
            }
            tokio::select! {
                changed = rx.changed() => {
                    if changed.is_err() {
                        return Ok(());
                    }
                }
                () = tokio::time::sleep(std::time::Duration::from_millis(20)) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cdist_core::{ObjectName, Target};
    use cdist_testutil::{make_type, SessionFixture};

    /// Builds a `Runtime` over a fresh fixture with `types` registered under
    /// its type cache (no manifest/explorer/gencode files unless the test
    /// adds them), so `realize` drives only dependency resolution and
    /// bookkeeping without touching a real shell, unless a type's
    /// `gencode-local` is populated.
    fn fixture(types: &[&str]) -> (SessionFixture, Arc<Runtime>) {
        let session = SessionFixture::new();
        let types_dir = session.path().join("conf/type");
        for name in types {
            make_type(&types_dir, name, true, &[]);
        }
        let target = Target::new("ssh://example.com/").unwrap();
        let runtime = Runtime::new(
            target,
            session.path().to_path_buf(),
            session.path().join("remote"),
            types_dir,
        )
        .unwrap();
        (session, Arc::new(runtime))
    }

    fn object(type_name: &str) -> Object {
        Object::new(ObjectName::new(type_name, None), BTreeMap::new())
    }

    #[tokio::test]
    async fn resolve_dependencies_propagates_after_onto_auto_children() {
        let (_session, runtime) = fixture(&["__x", "__parent", "__child"]);
        let manager = ObjectManager::new(runtime.clone(), TagFilter::default());

        manager.add(object("__x")).await;
        manager.add(object("__parent")).await;
        manager.add(object("__child")).await;

        runtime.dep_store().after("__parent", "__x").unwrap();
        runtime.dep_store().auto("__parent", "__child").unwrap();

        manager.resolve_dependencies("__parent").await.unwrap();

        let child_record = runtime.dep_store().load("__child").unwrap();
        assert_eq!(child_record.after, vec!["__x".to_string()]);
    }

    #[tokio::test]
    async fn resolve_dependencies_triggers_events_immediately_when_nothing_is_unresolved() {
        let (_session, runtime) = fixture(&["__solo"]);
        let manager = ObjectManager::new(runtime.clone(), TagFilter::default());

        manager.add(object("__solo")).await;
        manager.resolve_dependencies("__solo").await.unwrap();

        let state = manager.state.lock().await;
        let (prepare, apply) = state.events.get("__solo").unwrap();
        assert!(prepare.poll_triggered());
        assert!(apply.poll_triggered());
    }

    #[tokio::test]
    async fn resolve_dependencies_blocks_prepare_when_require_is_unresolved() {
        let (_session, runtime) = fixture(&["__a", "__b"]);
        let manager = ObjectManager::new(runtime.clone(), TagFilter::default());

        manager.add(object("__a")).await;
        manager.add(object("__b")).await;
        runtime.dep_store().require("__b", "__a").unwrap();

        manager.resolve_dependencies("__b").await.unwrap();

        let state = manager.state.lock().await;
        let (prepare, apply) = state.events.get("__b").unwrap();
        assert!(!prepare.poll_triggered());
        assert!(!apply.poll_triggered());
    }

    #[tokio::test]
    async fn finish_triggers_events_for_dependents_whose_unresolved_set_empties() {
        let (_session, runtime) = fixture(&["__a", "__b"]);
        let manager = ObjectManager::new(runtime.clone(), TagFilter::default());

        manager.add(object("__a")).await;
        manager.add(object("__b")).await;
        runtime.dep_store().require("__b", "__a").unwrap();
        manager.resolve_dependencies("__b").await.unwrap();

        manager.finish("__a").await;

        let state = manager.state.lock().await;
        let (prepare, apply) = state.events.get("__b").unwrap();
        assert!(prepare.poll_triggered());
        assert!(apply.poll_triggered());
        assert!(state.realized.contains("__a"));
        assert_eq!(state.outstanding, 1);
    }

    #[tokio::test]
    async fn process_realizes_a_required_object_before_its_dependent_applies() {
        let (session, runtime) = fixture(&["__a", "__b"]);
        let log = session.path().join("order.log");

        std::fs::write(
            session.path().join("conf/type/__a/gencode-local"),
            format!("#!/bin/sh\necho \"echo a >> {}\"\n", log.display()),
        )
        .unwrap();
        std::fs::write(
            session.path().join("conf/type/__b/gencode-local"),
            format!("#!/bin/sh\necho \"echo b >> {}\"\n", log.display()),
        )
        .unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            for name in ["__a", "__b"] {
                let path = session.path().join("conf/type").join(name).join("gencode-local");
                std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            }
        }

        runtime.dep_store().require("__b", "__a").unwrap();

        let manager = ObjectManager::new(runtime.clone(), TagFilter::default());
        manager.add(object("__a")).await;
        manager.add(object("__b")).await;

        manager.process().await.unwrap();

        let contents = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn process_detects_a_two_object_cycle() {
        let (_session, runtime) = fixture(&["__a", "__b"]);
        runtime.dep_store().require("__a", "__b").unwrap();
        runtime.dep_store().require("__b", "__a").unwrap();

        let manager = ObjectManager::new(runtime.clone(), TagFilter::default());
        manager.add(object("__a")).await;
        manager.add(object("__b")).await;

        let err = manager.process().await.unwrap_err();
        assert!(matches!(err, CdistError::CircularReference(_)));
    }

    #[tokio::test]
    async fn process_realizes_every_independent_object_with_no_dependencies() {
        let (_session, runtime) = fixture(&["__a", "__b", "__c"]);
        let manager = ObjectManager::new(runtime.clone(), TagFilter::default());
        manager.add(object("__a")).await;
        manager.add(object("__b")).await;
        manager.add(object("__c")).await;

        manager.process().await.unwrap();

        let state = manager.state.lock().await;
        assert_eq!(state.realized.len(), 3);
        assert_eq!(state.outstanding, 0);
    }
}
