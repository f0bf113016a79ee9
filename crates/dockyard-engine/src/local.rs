//! The filesystem-backed engine.
//!
//! A composition is realized node by node, root first. Each node gets a
//! cache key derived from its parent's key, its structural digest, and the
//! content of whatever host or composition input its operation reads, so a
//! changed host directory invalidates exactly the nodes that depend on it.
//! Nodes already in the store are reused; missing ones are built in a
//! staging directory under a per-key lock and committed atomically.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex};

use dockyard_common::config::EngineConfig;
use dockyard_common::error::{DockyardError, Result};
use dockyard_common::types::{Digest, ImageRef};
use dockyard_core::cancel::CancelToken;
use dockyard_core::composition::Composition;
use dockyard_core::engine::{Artifact, Engine, Mount, MountKind};
use dockyard_core::operation::{BaseImage, Operation};
use dockyard_core::source::{DirectorySource, FileSource, SocketSource};
use dockyard_core::variant::PlatformVariantSet;
use sha2::{Digest as _, Sha256};

use crate::exec::{self, Bind, Confinement, ExecRequest};
use crate::logs::CommandLog;
use crate::publish::Registry;
use crate::registry::ImageCatalog;
use crate::source::ImageSource;
use crate::store::{SnapshotState, SnapshotStore};
use crate::tree::{self, container_path, host_path};

/// What an operation reads, resolved to something on disk.
enum Input {
    Nothing,
    Image(ImageSource, Digest),
    Path { path: PathBuf, key: String },
}

impl Input {
    fn key(&self) -> &str {
        match self {
            Self::Nothing => "",
            Self::Image(_, digest) => digest.as_hex(),
            Self::Path { key, .. } => key,
        }
    }

    fn path(&self) -> Result<&Path> {
        match self {
            Self::Path { path, .. } => Ok(path),
            _ => Err(DockyardError::Config {
                message: "operation input was not resolved to a path".into(),
            }),
        }
    }
}

/// An engine that realizes compositions into a local snapshot store and
/// runs their commands against each snapshot's root filesystem.
#[derive(Debug)]
pub struct LocalEngine {
    store: SnapshotStore,
    catalog: ImageCatalog,
    registry: Registry,
    log: Arc<CommandLog>,
    confinement: Confinement,
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    in_flight: InFlight,
    host_hashes: HostHashes,
}

impl LocalEngine {
    /// Name reported in logs and connection errors.
    pub const NAME: &'static str = "local";

    /// Opens the engine's data directory and log sink.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::Connection` if the data directory or the log
    /// sink cannot be opened.
    pub fn connect(config: &EngineConfig) -> Result<Self> {
        let open = || -> Result<Self> {
            Ok(Self {
                store: SnapshotStore::open(&config.data_dir)?,
                catalog: ImageCatalog::open(&config.data_dir)?,
                registry: Registry::open(&config.data_dir)?,
                log: Arc::new(CommandLog::open(&config.log_sink)?),
                confinement: Confinement::detect(config.isolation)?,
                locks: Mutex::new(HashMap::new()),
                in_flight: InFlight::default(),
                host_hashes: HostHashes::default(),
            })
        };
        let engine = open().map_err(|e| DockyardError::Connection {
            engine: Self::NAME.into(),
            message: e.to_string(),
        })?;
        tracing::info!(
            data_dir = %config.data_dir.display(),
            confinement = ?engine.confinement,
            "local engine ready"
        );
        Ok(engine)
    }

    /// The base-image catalog.
    #[must_use]
    pub const fn catalog(&self) -> &ImageCatalog {
        &self.catalog
    }

    /// The image registry publishes are written to.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// The snapshot store.
    #[must_use]
    pub const fn store(&self) -> &SnapshotStore {
        &self.store
    }

    /// Runs `f` while holding the lock for `key`. The table entry is
    /// dropped once no other caller is waiting on it.
    fn with_key_lock<T>(&self, key: &str, op: &str, f: impl FnOnce() -> Result<T>) -> Result<T> {
        let lock = {
            let mut locks = self
                .locks
                .lock()
                .map_err(|_| DockyardError::execution(op, "lock table poisoned"))?;
            Arc::clone(locks.entry(key.to_string()).or_default())
        };
        let result = match lock.lock() {
            Ok(_guard) => f(),
            Err(_) => Err(DockyardError::execution(op, "key lock poisoned")),
        };
        self.release(key, lock);
        result
    }

    fn release(&self, key: &str, lock: Arc<Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        drop(lock);
        if locks.get(key).is_some_and(|l| Arc::strong_count(l) == 1) {
            let _ = locks.remove(key);
        }
    }

    fn realize_node(&self, composition: &Composition, cancel: &CancelToken) -> Result<SnapshotState> {
        if cancel.is_cancelled() {
            return Err(DockyardError::Cancelled);
        }
        let parent = composition
            .parent()
            .map(|p| self.realize_node(p, cancel))
            .transpose()?;
        let op = composition.operation();
        let input = self
            .resolve_input(composition, cancel)
            .map_err(|e| unsatisfied(op, e))?;
        let key = cache_key(parent.as_ref(), composition, &input);

        self.with_key_lock(&key, &op.to_string(), || {
            if self.store.is_complete(&key) {
                tracing::debug!(op = %op, key = %key, "snapshot cache hit");
                return self.store.load(&key);
            }
            if cancel.is_cancelled() {
                return Err(DockyardError::Cancelled);
            }

            tracing::debug!(op = %op, key = %key, "applying operation");
            let staging = self.store.staging()?;
            let applied = self
                .apply(composition, parent.as_ref(), &input, &key, &staging, cancel)
                .and_then(|state| self.store.commit(&staging, &state).map(|()| state));
            if applied.is_err() {
                let _ = tree::remove_path(&staging);
            }
            applied.map_err(|e| unsatisfied(op, e))
        })
    }

    fn resolve_input(&self, composition: &Composition, cancel: &CancelToken) -> Result<Input> {
        match composition.operation() {
            Operation::Base {
                image: BaseImage::Registry(image),
                platform,
            } => {
                let entry = self.catalog.find(image, *platform)?;
                let source = entry.image_source()?;
                let digest = source.content_digest()?;
                Ok(Input::Image(source, digest))
            }
            Operation::WithDirectory { source, .. } | Operation::MountDirectory { source, .. } => {
                self.directory_input(source, cancel)
            }
            Operation::WithFile { source, .. } | Operation::MountFile { source, .. } => {
                self.file_input(source, cancel)
            }
            Operation::UnixSocket {
                source: SocketSource::Host(path),
                ..
            } => {
                if std::fs::symlink_metadata(path).is_err() {
                    return Err(DockyardError::NotFound {
                        kind: "socket",
                        id: path.display().to_string(),
                    });
                }
                Ok(Input::Path {
                    path: path.clone(),
                    key: path.display().to_string(),
                })
            }
            _ => Ok(Input::Nothing),
        }
    }

    fn directory_input(&self, source: &DirectorySource, cancel: &CancelToken) -> Result<Input> {
        match source {
            DirectorySource::Empty => Ok(Input::Path {
                path: self.store.empty_dir(),
                key: "empty".into(),
            }),
            DirectorySource::Host(path) => {
                if !path.is_dir() {
                    return Err(DockyardError::NotFound {
                        kind: "host directory",
                        id: path.display().to_string(),
                    });
                }
                Ok(Input::Path {
                    path: path.clone(),
                    key: self.host_hashes.directory(path)?.as_hex().to_string(),
                })
            }
            DirectorySource::Composition { composition, path } => {
                let (host, key) = self.composition_path(composition, path, cancel)?;
                if !host.is_dir() {
                    return Err(DockyardError::NotFound {
                        kind: "directory",
                        id: format!("{path} in {composition}"),
                    });
                }
                Ok(Input::Path { path: host, key })
            }
            DirectorySource::Git { url, reference } => {
                let (path, key) = self.checkout(url, reference, cancel)?;
                Ok(Input::Path { path, key })
            }
        }
    }

    fn file_input(&self, source: &FileSource, cancel: &CancelToken) -> Result<Input> {
        match source {
            FileSource::Host(path) => {
                if !path.is_file() {
                    return Err(DockyardError::NotFound {
                        kind: "host file",
                        id: path.display().to_string(),
                    });
                }
                Ok(Input::Path {
                    path: path.clone(),
                    key: crate::hash::hash_file(path)?.as_hex().to_string(),
                })
            }
            FileSource::Composition { composition, path } => {
                let (host, key) = self.composition_path(composition, path, cancel)?;
                if !host.is_file() {
                    return Err(DockyardError::NotFound {
                        kind: "file",
                        id: format!("{path} in {composition}"),
                    });
                }
                Ok(Input::Path { path: host, key })
            }
        }
    }

    fn composition_path(
        &self,
        composition: &Composition,
        path: &str,
        cancel: &CancelToken,
    ) -> Result<(PathBuf, String)> {
        let state = self.realize_node(composition, cancel)?;
        let resolved = container_path(&state.workdir, path);
        let host = host_path(&self.store.rootfs(&state.rootfs_key), &resolved);
        Ok((host, format!("{}:{resolved}", state.key)))
    }

    fn checkout(&self, url: &str, reference: &str, cancel: &CancelToken) -> Result<(PathBuf, String)> {
        let key = Digest::of_bytes(format!("{url}#{reference}").as_bytes())
            .as_hex()
            .to_string();
        let dir = self.store.sources_dir().join(&key);
        let tree = dir.join("tree");
        let marker = dir.join(".complete");

        self.with_key_lock(&key, "git checkout", || {
            if marker.exists() {
                return Ok(());
            }
            self.clone_into(url, reference, &dir, cancel)
        })?;
        Ok((tree, key))
    }

    fn clone_into(&self, url: &str, reference: &str, dir: &Path, cancel: &CancelToken) -> Result<()> {
        tracing::info!(url, reference, "fetching git source");
        let git = which::which("git").map_err(|_| DockyardError::NotFound {
            kind: "command",
            id: "git".into(),
        })?;
        let staging = self.store.staging()?;
        let args = vec![
            git.display().to_string(),
            "clone".into(),
            "--depth".into(),
            "1".into(),
            "--branch".into(),
            reference.to_string(),
            url.to_string(),
            "tree".into(),
        ];
        let cloned = exec::run(
            &ExecRequest {
                args: &args,
                rootfs: None,
                cwd: &staging,
                env: &[],
                binds: &[],
                confinement: &Confinement::Unconfined,
            },
            cancel,
            &self.log,
        );
        let cloned = match cloned {
            Ok(output) if output.success() => Ok(()),
            Ok(output) => Err(DockyardError::Execution {
                operation: format!("git clone {url}#{reference}"),
                message: exit_message(output.exit_code),
                exit_code: output.exit_code,
                stderr: output.stderr,
            }),
            Err(e) => Err(e),
        }
        .and_then(|()| {
            std::fs::write(staging.join(".complete"), b"")
                .map_err(|e| DockyardError::io(&staging, e))?;
            tree::remove_path(dir)?;
            if let Some(parent) = dir.parent() {
                tree::create_dir(parent)?;
            }
            std::fs::rename(&staging, dir).map_err(|e| DockyardError::io(dir, e))
        });
        if cloned.is_err() {
            let _ = tree::remove_path(&staging);
        }
        cloned
    }

    fn apply(
        &self,
        composition: &Composition,
        parent: Option<&SnapshotState>,
        input: &Input,
        key: &str,
        staging: &Path,
        cancel: &CancelToken,
    ) -> Result<SnapshotState> {
        let mut state = parent.map_or_else(
            || SnapshotState {
                key: key.to_string(),
                rootfs_key: key.to_string(),
                digest: composition.digest().clone(),
                platform: composition.platform(),
                env: Vec::new(),
                workdir: "/".into(),
                mounts: Vec::new(),
                stdout: String::new(),
            },
            |p| SnapshotState {
                key: key.to_string(),
                digest: composition.digest().clone(),
                platform: composition.platform(),
                ..p.clone()
            },
        );

        match composition.operation() {
            Operation::Base { .. } => {
                let rootfs = SnapshotStore::staging_rootfs(staging);
                tree::create_dir(&rootfs)?;
                if let Input::Image(source, _) = input {
                    source.materialize(&rootfs, &self.store.downloads_dir())?;
                }
                state.rootfs_key = key.to_string();
                state.env.clear();
                state.workdir = "/".into();
                state.mounts.clear();
                state.stdout.clear();
            }
            Operation::Exec { args } => {
                let rootfs = self.fork_rootfs(parent, staging)?;
                let output =
                    self.run_command(composition.operation(), args, &rootfs, &state, cancel)?;
                state.rootfs_key = key.to_string();
                state.stdout = output;
            }
            Operation::NewFile {
                path,
                contents,
                permissions,
            } => {
                let rootfs = self.fork_rootfs(parent, staging)?;
                let dest = host_path(&rootfs, &container_path(&state.workdir, path));
                if let Some(dir) = dest.parent() {
                    tree::create_dir(dir)?;
                }
                std::fs::write(&dest, contents).map_err(|e| DockyardError::io(&dest, e))?;
                set_permissions(&dest, *permissions)?;
                state.rootfs_key = key.to_string();
            }
            Operation::WithFile { path, .. } => {
                let src = input.path()?;
                let rootfs = self.fork_rootfs(parent, staging)?;
                let mut dest = host_path(&rootfs, &container_path(&state.workdir, path));
                if path.ends_with('/') {
                    if let Some(name) = src.file_name() {
                        dest.push(name);
                    }
                }
                tree::copy_file(src, &dest)?;
                state.rootfs_key = key.to_string();
            }
            Operation::WithDirectory { path, .. } => {
                let src = input.path()?;
                let rootfs = self.fork_rootfs(parent, staging)?;
                let dest = host_path(&rootfs, &container_path(&state.workdir, path));
                let _ = tree::copy_tree(src, &dest)?;
                state.rootfs_key = key.to_string();
            }
            Operation::MountDirectory { path, .. } => {
                add_mount(&mut state, path, MountKind::Directory, input.path()?);
            }
            Operation::MountFile { path, .. } => {
                add_mount(&mut state, path, MountKind::File, input.path()?);
            }
            Operation::UnixSocket { path, .. } => {
                add_mount(&mut state, path, MountKind::Socket, input.path()?);
            }
            Operation::Env { key, value } => {
                state.env.retain(|(k, _)| k != key);
                state.env.push((key.clone(), value.clone()));
            }
            Operation::Workdir { path } => {
                state.workdir = container_path(&state.workdir, path);
            }
        }
        Ok(state)
    }

    fn fork_rootfs(&self, parent: Option<&SnapshotState>, staging: &Path) -> Result<PathBuf> {
        let rootfs = SnapshotStore::staging_rootfs(staging);
        match parent {
            Some(p) => {
                let _ = tree::copy_tree(&self.store.rootfs(&p.rootfs_key), &rootfs)?;
            }
            None => tree::create_dir(&rootfs)?,
        }
        Ok(rootfs)
    }

    fn run_command(
        &self,
        op: &Operation,
        args: &[String],
        rootfs: &Path,
        state: &SnapshotState,
        cancel: &CancelToken,
    ) -> Result<String> {
        let guard = self.attach_mounts(rootfs, &state.mounts)?;
        let cwd = host_path(rootfs, &state.workdir);
        let result = tree::create_dir(&cwd).and_then(|()| {
            exec::run(
                &ExecRequest {
                    args,
                    rootfs: Some(rootfs),
                    cwd: &cwd,
                    env: &state.env,
                    binds: &guard.binds,
                    confinement: &self.confinement,
                },
                cancel,
                &self.log,
            )
        });
        guard.detach()?;
        let output = result?;
        if !output.success() {
            return Err(DockyardError::Execution {
                operation: op.to_string(),
                message: exit_message(output.exit_code),
                exit_code: output.exit_code,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }

    /// Makes mounts visible inside `rootfs` for one command. Host paths are
    /// linked, or bound when confined, so writes reach the host; content
    /// owned by the store is copied so cached snapshots stay immutable.
    fn attach_mounts(&self, rootfs: &Path, mounts: &[Mount]) -> Result<MountGuard> {
        let mut guard = MountGuard {
            bind: matches!(self.confinement, Confinement::Bubblewrap(_)),
            ..MountGuard::default()
        };
        for mount in mounts {
            if let Err(e) = guard.attach(rootfs, mount, self.store.root()) {
                let _ = guard.detach();
                return Err(e);
            }
        }
        Ok(guard)
    }
}

impl Engine for LocalEngine {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn realize(&self, composition: &Composition, cancel: &CancelToken) -> Result<Artifact> {
        let _running = self.in_flight.enter()?;
        let state = self.realize_node(composition, cancel)?;
        self.store.artifact(&state)
    }

    fn export(&self, artifact: &Artifact, target: &Path) -> Result<Vec<PathBuf>> {
        let written = tree::copy_tree(&artifact.rootfs, target)?;
        tracing::info!(
            target = %target.display(),
            files = written.len(),
            "artifact exported"
        );
        Ok(written)
    }

    fn publish(&self, reference: &ImageRef, variants: &PlatformVariantSet<Artifact>) -> Result<Digest> {
        self.registry.publish(reference, variants)
    }

    fn close(&self) -> Result<()> {
        self.in_flight.wait_idle()?;
        let staging = self.store.root().join("tmp");
        let entries = std::fs::read_dir(&staging).map_err(|e| DockyardError::io(&staging, e))?;
        for entry in entries.flatten() {
            let _ = tree::remove_path(&entry.path());
        }
        Ok(())
    }
}

#[derive(Debug)]
struct Attached {
    target: PathBuf,
    shadow: Option<PathBuf>,
    created: Vec<PathBuf>,
}

#[derive(Debug, Default)]
struct MountGuard {
    attached: Vec<Attached>,
    bind: bool,
    binds: Vec<Bind>,
}

impl MountGuard {
    fn attach(&mut self, rootfs: &Path, mount: &Mount, store_root: &Path) -> Result<()> {
        let target = host_path(rootfs, &mount.path);
        let mut created = Vec::new();
        let mut cursor = target.parent();
        while let Some(dir) = cursor {
            if dir.exists() || dir == rootfs {
                break;
            }
            created.push(dir.to_path_buf());
            cursor = dir.parent();
        }
        if let Some(parent) = target.parent() {
            tree::create_dir(parent)?;
        }

        let shadow = if std::fs::symlink_metadata(&target).is_ok() {
            let name = format!(".dockyard-shadow-{}", uuid::Uuid::new_v4());
            let shadow = target.with_file_name(name);
            std::fs::rename(&target, &shadow).map_err(|e| DockyardError::io(&target, e))?;
            Some(shadow)
        } else {
            None
        };
        self.attached.push(Attached {
            target: target.clone(),
            shadow,
            created,
        });

        let owned_by_store = mount.host_path.starts_with(store_root);
        match mount.kind {
            MountKind::Directory if owned_by_store => {
                let _ = tree::copy_tree(&mount.host_path, &target)?;
            }
            MountKind::File if owned_by_store => tree::copy_file(&mount.host_path, &target)?,
            MountKind::Directory if self.bind => {
                tree::create_dir(&target)?;
                self.binds.push(Bind {
                    source: mount.host_path.clone(),
                    target: mount.path.clone(),
                });
            }
            _ if self.bind => {
                std::fs::write(&target, b"").map_err(|e| DockyardError::io(&target, e))?;
                self.binds.push(Bind {
                    source: mount.host_path.clone(),
                    target: mount.path.clone(),
                });
            }
            _ => link(&mount.host_path, &target)?,
        }
        Ok(())
    }

    fn detach(self) -> Result<()> {
        for attached in self.attached.into_iter().rev() {
            tree::remove_path(&attached.target)?;
            if let Some(shadow) = &attached.shadow {
                std::fs::rename(shadow, &attached.target)
                    .map_err(|e| DockyardError::io(&attached.target, e))?;
            }
            for dir in &attached.created {
                let _ = std::fs::remove_dir(dir);
            }
        }
        Ok(())
    }
}

/// Counts realizations running on blocking threads so `close` can wait for
/// them before clearing the staging area.
#[derive(Debug, Default)]
struct InFlight {
    count: Mutex<usize>,
    idle: Condvar,
}

impl InFlight {
    fn enter(&self) -> Result<InFlightGuard<'_>> {
        let mut count = self
            .count
            .lock()
            .map_err(|_| DockyardError::execution("realize", "in-flight counter poisoned"))?;
        *count += 1;
        Ok(InFlightGuard(self))
    }

    fn wait_idle(&self) -> Result<()> {
        let count = self
            .count
            .lock()
            .map_err(|_| DockyardError::execution("close", "in-flight counter poisoned"))?;
        let _idle = self
            .idle
            .wait_while(count, |n| *n > 0)
            .map_err(|_| DockyardError::execution("close", "in-flight counter poisoned"))?;
        Ok(())
    }
}

struct InFlightGuard<'a>(&'a InFlight);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut count) = self.0.count.lock() {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.0.idle.notify_all();
            }
        }
    }
}

/// Directory hashes keyed by path, reused while the tree's metadata is
/// unchanged.
#[derive(Debug, Default)]
struct HostHashes {
    entries: Mutex<HashMap<PathBuf, (Digest, Digest)>>,
}

impl HostHashes {
    fn directory(&self, path: &Path) -> Result<Digest> {
        let fingerprint = crate::hash::fingerprint_directory(path)?;
        if let Ok(entries) = self.entries.lock() {
            if let Some((seen, digest)) = entries.get(path) {
                if *seen == fingerprint {
                    tracing::trace!(path = %path.display(), "host directory unchanged");
                    return Ok(digest.clone());
                }
            }
        }
        let digest = crate::hash::hash_directory(path)?;
        if let Ok(mut entries) = self.entries.lock() {
            let _ = entries.insert(path.to_path_buf(), (fingerprint, digest.clone()));
        }
        Ok(digest)
    }
}

fn add_mount(state: &mut SnapshotState, path: &str, kind: MountKind, host: &Path) {
    let path = container_path(&state.workdir, path);
    state.mounts.retain(|m| m.path != path);
    state.mounts.push(Mount {
        path,
        kind,
        host_path: host.to_path_buf(),
    });
}

fn cache_key(parent: Option<&SnapshotState>, composition: &Composition, input: &Input) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parent.map_or("", |p| p.key.as_str()));
    hasher.update(b"\n");
    hasher.update(composition.digest().as_hex());
    hasher.update(b"\n");
    hasher.update(input.key());
    Digest::from_hasher(hasher).as_hex().to_string()
}

/// Folds plumbing errors raised while applying `op` into an execution
/// error naming it. Execution errors from deeper in the chain and
/// cancellation pass through unchanged.
fn unsatisfied(op: &Operation, err: DockyardError) -> DockyardError {
    match err {
        DockyardError::Execution { .. } | DockyardError::Cancelled => err,
        other => DockyardError::execution(op.to_string(), other.to_string()),
    }
}

fn exit_message(code: Option<i32>) -> String {
    code.map_or_else(
        || "terminated by signal".to_string(),
        |c| format!("exit status {c}"),
    )
}

#[cfg(unix)]
fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .map_err(|e| DockyardError::io(path, e))
}

#[cfg(not(unix))]
fn set_permissions(_path: &Path, _mode: u32) -> Result<()> {
    Ok(())
}

#[cfg(unix)]
fn link(src: &Path, dst: &Path) -> Result<()> {
    std::os::unix::fs::symlink(src, dst).map_err(|e| DockyardError::io(dst, e))
}

#[cfg(not(unix))]
fn link(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        tree::copy_tree(src, dst).map(|_| ())
    } else {
        tree::copy_file(src, dst)
    }
}
