//! Running composed commands against a root filesystem.
//!
//! Commands that run against a root filesystem only ever resolve programs
//! inside it. Where `bwrap` is available the child is additionally confined
//! to a private mount view rooted at that filesystem; otherwise it runs as
//! a plain host process with the rootfs as its working tree.

use std::ffi::OsString;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use dockyard_common::config::Isolation;
use dockyard_common::error::{DockyardError, Result};
use dockyard_core::cancel::CancelToken;

use crate::logs::{CommandLog, Stream};

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Directories inside a root filesystem searched when the composition
/// declares no `PATH` of its own.
const ROOTFS_BIN_DIRS: [&str; 6] = [
    "usr/local/sbin",
    "usr/local/bin",
    "usr/sbin",
    "usr/bin",
    "sbin",
    "bin",
];

/// Mount points the sandbox needs inside a root filesystem.
const SANDBOX_DIRS: [&str; 2] = ["dev", "proc"];

/// How commands that run against a root filesystem are confined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Confinement {
    /// Plain host process; only program lookup is restricted to the rootfs.
    Unconfined,
    /// Run through the `bwrap` binary at this path.
    Bubblewrap(PathBuf),
}

impl Confinement {
    /// Picks the confinement for `isolation`.
    ///
    /// # Errors
    ///
    /// Returns `DockyardError::NotFound` if `bubblewrap` is required but no
    /// usable `bwrap` is installed.
    pub fn detect(isolation: Isolation) -> Result<Self> {
        match isolation {
            Isolation::Unconfined => Ok(Self::Unconfined),
            Isolation::Bubblewrap => usable_bwrap().map(Self::Bubblewrap).ok_or_else(|| {
                DockyardError::NotFound {
                    kind: "command",
                    id: "bwrap".into(),
                }
            }),
            Isolation::Auto => Ok(usable_bwrap().map_or_else(
                || {
                    tracing::warn!("bwrap unavailable, commands run unconfined");
                    Self::Unconfined
                },
                Self::Bubblewrap,
            )),
        }
    }
}

/// Locates `bwrap` and checks that this host lets it create namespaces.
fn usable_bwrap() -> Option<PathBuf> {
    let bwrap = which::which("bwrap").ok()?;
    let status = Command::new(&bwrap)
        .args(["--ro-bind", "/", "/", "--", "true"])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .ok()?;
    if status.success() {
        tracing::debug!(bwrap = %bwrap.display(), "using bubblewrap confinement");
        Some(bwrap)
    } else {
        None
    }
}

/// A host path made visible at a container path for one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    /// Path on the host.
    pub source: PathBuf,
    /// Absolute path inside the root filesystem.
    pub target: String,
}

/// A command to run.
#[derive(Debug, Clone)]
pub struct ExecRequest<'a> {
    /// Program and arguments.
    pub args: &'a [String],
    /// Root filesystem the command runs against, if any.
    pub rootfs: Option<&'a Path>,
    /// Working directory on the host. With a rootfs it must lie inside it.
    pub cwd: &'a Path,
    /// Variables set for the command.
    pub env: &'a [(String, String)],
    /// Host paths bound into the rootfs when confined.
    pub binds: &'a [Bind],
    /// Confinement applied when a rootfs is given.
    pub confinement: &'a Confinement,
}

/// Output from a finished command.
#[derive(Debug, Clone)]
pub struct ExecOutput {
    /// Standard output.
    pub stdout: String,
    /// Standard error.
    pub stderr: String,
    /// Exit code; `None` when terminated by a signal.
    pub exit_code: Option<i32>,
}

impl ExecOutput {
    /// Returns `true` if the command exited with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }
}

/// Runs a command to completion, forwarding its output to `log`.
///
/// The child is killed as soon as `cancel` fires.
///
/// # Errors
///
/// Returns `DockyardError::Execution` if the program is not present in the
/// root filesystem, `DockyardError::NotFound` if a host program cannot be
/// located, `DockyardError::Cancelled` if cancelled, or an I/O error if it
/// cannot be spawned. A non-zero exit is not an error here; see
/// [`ExecOutput::success`].
pub fn run(
    request: &ExecRequest<'_>,
    cancel: &CancelToken,
    log: &Arc<CommandLog>,
) -> Result<ExecOutput> {
    let Some((program, args)) = request.args.split_first() else {
        return Err(DockyardError::Config {
            message: "exec command is empty".into(),
        });
    };
    let (mut command, label, scaffold) = match request.rootfs {
        Some(rootfs) => rootfs_command(request, rootfs, program, args)?,
        None => {
            let program = resolve_host_program(program, request.cwd)?;
            let mut command = Command::new(&program);
            let _ = command
                .args(args)
                .current_dir(request.cwd)
                .envs(request.env.iter().map(|(k, v)| (k, v)));
            (command, program, Vec::new())
        }
    };
    tracing::debug!(program = %label.display(), args = ?args, cwd = %request.cwd.display(), "spawning command");

    let spawned = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| DockyardError::io(&label, e));
    let result = spawned.and_then(|mut child| {
        let stdout = child.stdout.take().map(|pipe| drain(pipe, Stream::Stdout, log));
        let stderr = child.stderr.take().map(|pipe| drain(pipe, Stream::Stderr, log));
        let status = wait(&mut child, cancel, &label)?;
        let collect = |reader: Option<std::thread::JoinHandle<String>>| {
            reader.and_then(|h| h.join().ok()).unwrap_or_default()
        };
        Ok(ExecOutput {
            stdout: collect(stdout),
            stderr: collect(stderr),
            exit_code: status.code(),
        })
    });
    for dir in scaffold.iter().rev() {
        let _ = std::fs::remove_dir(dir);
    }
    result
}

/// Builds the command for a program that must come from `rootfs`, plus
/// any mount-point directories created for the sandbox.
fn rootfs_command(
    request: &ExecRequest<'_>,
    rootfs: &Path,
    program: &str,
    args: &[String],
) -> Result<(Command, PathBuf, Vec<PathBuf>)> {
    let workdir = container_dir(rootfs, request.cwd)?;
    let container_dirs = container_search_dirs(request.env);
    let resolved = resolve_in_rootfs(program, rootfs, &workdir, &container_dirs)?;
    let path_var = container_dirs.join(":");

    match request.confinement {
        Confinement::Unconfined => {
            let host_dirs = container_dirs
                .iter()
                .map(|d| crate::tree::host_path(rootfs, d))
                .filter(|d| d.is_dir());
            let search_path = std::env::join_paths(host_dirs).unwrap_or_default();
            let mut command = Command::new(&resolved.host);
            let _ = command
                .args(args)
                .current_dir(request.cwd)
                .envs(request.env.iter().map(|(k, v)| (k, v)))
                .env("PATH", search_path);
            Ok((command, resolved.host, Vec::new()))
        }
        Confinement::Bubblewrap(bwrap) => {
            let mut scaffold = Vec::new();
            for dir in SANDBOX_DIRS {
                let path = rootfs.join(dir);
                if std::fs::symlink_metadata(&path).is_err() {
                    crate::tree::create_dir(&path)?;
                    scaffold.push(path);
                }
            }
            let mut command = Command::new(bwrap);
            let _ = command
                .args(bwrap_args(rootfs, &workdir, request.binds))
                .arg(&resolved.container)
                .args(args)
                .env_clear()
                .envs(request.env.iter().map(|(k, v)| (k, v)))
                .env("PATH", path_var);
            Ok((command, resolved.host, scaffold))
        }
    }
}

/// Arguments placing `bwrap`'s child in a private view rooted at `rootfs`.
fn bwrap_args(rootfs: &Path, workdir: &str, binds: &[Bind]) -> Vec<OsString> {
    let mut args: Vec<OsString> = vec![
        "--bind".into(),
        rootfs.into(),
        "/".into(),
        "--dev".into(),
        "/dev".into(),
        "--proc".into(),
        "/proc".into(),
        "--unshare-pid".into(),
        "--unshare-ipc".into(),
        "--unshare-uts".into(),
        "--die-with-parent".into(),
    ];
    for bind in binds {
        args.extend([
            "--bind".into(),
            bind.source.clone().into_os_string(),
            bind.target.clone().into(),
        ]);
    }
    args.extend(["--chdir".into(), workdir.into(), "--".into()]);
    args
}

fn wait(child: &mut std::process::Child, cancel: &CancelToken, program: &Path) -> Result<ExitStatus> {
    loop {
        if let Some(status) = child.try_wait().map_err(|e| DockyardError::io(program, e))? {
            return Ok(status);
        }
        if cancel.is_cancelled() {
            tracing::info!(program = %program.display(), "killing command after cancellation");
            let _ = child.kill();
            let _ = child.wait();
            return Err(DockyardError::Cancelled);
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn drain<R: Read + Send + 'static>(
    pipe: R,
    stream: Stream,
    log: &Arc<CommandLog>,
) -> std::thread::JoinHandle<String> {
    let log = Arc::clone(log);
    std::thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut collected = String::new();
        let mut buf = Vec::new();
        while reader.read_until(b'\n', &mut buf).is_ok_and(|n| n > 0) {
            let line = String::from_utf8_lossy(&buf);
            log.line(stream, line.trim_end_matches(['\n', '\r']));
            collected.push_str(&line);
            buf.clear();
        }
        collected
    })
}

/// Container directories searched for a program: the composition's own
/// `PATH`, or the standard binary directories.
fn container_search_dirs(env: &[(String, String)]) -> Vec<String> {
    let declared = env
        .iter()
        .rev()
        .find(|(k, _)| k == "PATH")
        .map(|(_, v)| v.as_str());
    declared.map_or_else(
        || ROOTFS_BIN_DIRS.iter().map(|d| format!("/{d}")).collect(),
        |p| {
            p.split(':')
                .filter(|d| d.starts_with('/'))
                .map(str::to_string)
                .collect()
        },
    )
}

/// Container path of a host directory inside `rootfs`.
fn container_dir(rootfs: &Path, cwd: &Path) -> Result<String> {
    let relative = cwd.strip_prefix(rootfs).map_err(|_| DockyardError::Config {
        message: format!(
            "working directory {} is outside the root filesystem",
            cwd.display()
        ),
    })?;
    Ok(format!("/{}", relative.display()))
}

#[derive(Debug, PartialEq, Eq)]
struct Resolved {
    host: PathBuf,
    container: String,
}

/// Finds `program` inside `rootfs`. Nothing outside it is consulted.
fn resolve_in_rootfs(
    program: &str,
    rootfs: &Path,
    workdir: &str,
    container_dirs: &[String],
) -> Result<Resolved> {
    let missing = || DockyardError::execution(program, "not found in the root filesystem");
    if program.contains('/') {
        let container = crate::tree::container_path(workdir, program);
        let host = crate::tree::host_path(rootfs, &container);
        return if std::fs::symlink_metadata(&host).is_ok() {
            Ok(Resolved { host, container })
        } else {
            Err(missing())
        };
    }
    let host_dirs = container_dirs
        .iter()
        .map(|d| crate::tree::host_path(rootfs, d))
        .filter(|d| d.is_dir());
    let search_path = std::env::join_paths(host_dirs).unwrap_or_default();
    if search_path.is_empty() {
        return Err(missing());
    }
    let host = which::which_in(program, Some(&search_path), rootfs).map_err(|_| missing())?;
    let relative = host.strip_prefix(rootfs).map_err(|_| missing())?;
    Ok(Resolved {
        container: format!("/{}", relative.display()),
        host,
    })
}

fn resolve_host_program(program: &str, cwd: &Path) -> Result<PathBuf> {
    if program.contains('/') {
        return Ok(cwd.join(program));
    }
    let host_path = std::env::var_os("PATH").unwrap_or_default();
    which::which_in(program, Some(host_path), cwd).map_err(|_| DockyardError::NotFound {
        kind: "command",
        id: program.to_string(),
    })
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["sh".into(), "-c".into(), script.into()]
    }

    fn null_log() -> Arc<CommandLog> {
        Arc::new(CommandLog::Null)
    }

    #[test]
    fn run_captures_stdout_and_exit_code() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = sh("echo hello; echo oops >&2; exit 3");
        let output = run(
            &ExecRequest {
                args: &args,
                rootfs: None,
                cwd: dir.path(),
                env: &[],
                binds: &[],
                confinement: &Confinement::Unconfined,
            },
            &CancelToken::new(),
            &null_log(),
        )
        .expect("run");
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[test]
    fn run_applies_env_and_cwd() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = sh("printf '%s' \"$GREETING\" > greeting");
        let env = vec![("GREETING".to_string(), "hi".to_string())];
        let output = run(
            &ExecRequest {
                args: &args,
                rootfs: None,
                cwd: dir.path(),
                env: &env,
                binds: &[],
                confinement: &Confinement::Unconfined,
            },
            &CancelToken::new(),
            &null_log(),
        )
        .expect("run");
        assert!(output.success());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("greeting")).expect("read"),
            "hi"
        );
    }

    #[test]
    fn run_unknown_program_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = vec!["dockyard-definitely-missing-binary".to_string()];
        let err = run(
            &ExecRequest {
                args: &args,
                rootfs: None,
                cwd: dir.path(),
                env: &[],
                binds: &[],
                confinement: &Confinement::Unconfined,
            },
            &CancelToken::new(),
            &null_log(),
        )
        .unwrap_err();
        assert!(matches!(err, DockyardError::NotFound { .. }));
    }

    #[test]
    fn run_kills_command_on_cancel() {
        let dir = tempfile::tempdir().expect("tempdir");
        let args = vec!["sleep".to_string(), "5".to_string()];
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            trigger.cancel();
        });
        let started = std::time::Instant::now();
        let err = run(
            &ExecRequest {
                args: &args,
                rootfs: None,
                cwd: dir.path(),
                env: &[],
                binds: &[],
                confinement: &Confinement::Unconfined,
            },
            &cancel,
            &null_log(),
        )
        .unwrap_err();
        canceller.join().expect("canceller");
        assert!(matches!(err, DockyardError::Cancelled));
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    fn executable(path: &Path, script: &str) {
        use std::os::unix::fs::PermissionsExt;
        if let Some(dir) = path.parent() {
            std::fs::create_dir_all(dir).expect("mkdir");
        }
        std::fs::write(path, script).expect("write");
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).expect("chmod");
    }

    /// A rootfs whose `/bin/sh` is the host shell.
    fn rootfs_with_shell(dir: &Path) -> PathBuf {
        let rootfs = dir.join("rootfs");
        std::fs::create_dir_all(rootfs.join("bin")).expect("mkdir");
        let host_sh = which::which("sh").expect("host sh");
        std::os::unix::fs::symlink(host_sh, rootfs.join("bin/sh")).expect("symlink");
        rootfs
    }

    fn run_in(rootfs: &Path, args: &[String]) -> Result<ExecOutput> {
        run(
            &ExecRequest {
                args,
                rootfs: Some(rootfs),
                cwd: rootfs,
                env: &[],
                binds: &[],
                confinement: &Confinement::Unconfined,
            },
            &CancelToken::new(),
            &null_log(),
        )
    }

    #[test]
    fn absolute_program_prefers_rootfs_copy() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(rootfs.join("usr/bin")).expect("mkdir");
        std::fs::write(rootfs.join("usr/bin/tool"), b"").expect("write");
        let resolved =
            resolve_in_rootfs("/usr/bin/tool", &rootfs, "/", &[]).expect("resolve");
        assert_eq!(resolved.host, rootfs.join("usr/bin/tool"));
        assert_eq!(resolved.container, "/usr/bin/tool");
    }

    #[test]
    fn program_missing_from_rootfs_is_an_execution_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).expect("mkdir");
        // `sh` exists on the host but not in this rootfs.
        let err = run_in(&rootfs, &sh("echo escaped")).unwrap_err();
        assert!(err.is_execution(), "{err:?}");
        assert!(err.to_string().contains("not found in the root filesystem"));
    }

    #[test]
    fn absolute_host_program_outside_rootfs_is_not_used() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = dir.path().join("rootfs");
        std::fs::create_dir_all(&rootfs).expect("mkdir");
        let host_sh = which::which("sh").expect("host sh");
        let args = vec![host_sh.display().to_string(), "-c".into(), "true".into()];
        let err = run_in(&rootfs, &args).unwrap_err();
        assert!(err.is_execution(), "{err:?}");
    }

    #[test]
    fn sbin_directories_are_searched() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = dir.path().join("rootfs");
        executable(&rootfs.join("sbin/admin-tool"), "#!/bin/sh\necho sbin\n");
        let resolved = resolve_in_rootfs(
            "admin-tool",
            &rootfs,
            "/",
            &container_search_dirs(&[]),
        )
        .expect("resolve");
        assert_eq!(resolved.container, "/sbin/admin-tool");
        assert_eq!(resolved.host, rootfs.join("sbin/admin-tool"));
    }

    #[test]
    fn rootfs_command_sees_only_rootfs_path() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = rootfs_with_shell(dir.path());
        let output = run_in(&rootfs, &sh("printf '%s' \"$PATH\"")).expect("run");
        assert!(output.success());
        assert!(!output.stdout.is_empty());
        for entry in output.stdout.split(':') {
            assert!(
                Path::new(entry).starts_with(&rootfs),
                "{entry} escapes the root filesystem"
            );
        }
    }

    #[test]
    fn rootfs_command_cannot_reach_host_tools_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let rootfs = rootfs_with_shell(dir.path());
        // `cat` is on the host but the rootfs only ships `sh`.
        let output = run_in(&rootfs, &sh("cat /etc/hostname")).expect("run");
        assert!(!output.success());
    }

    #[test]
    fn declared_path_replaces_default_dirs() {
        let env = vec![("PATH".to_string(), "/opt/tools/bin:relative".to_string())];
        assert_eq!(container_search_dirs(&env), vec!["/opt/tools/bin".to_string()]);
        assert!(container_search_dirs(&[]).contains(&"/sbin".to_string()));
    }

    #[test]
    fn bwrap_args_root_the_child_at_rootfs() {
        let binds = vec![Bind {
            source: PathBuf::from("/host/cache"),
            target: "/cache".into(),
        }];
        let args = bwrap_args(Path::new("/data/rootfs"), "/src", &binds);
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let position = |needle: &[&str]| args.windows(needle.len()).position(|w| w == needle);
        assert!(position(&["--bind", "/data/rootfs", "/"]).is_some());
        assert!(position(&["--bind", "/host/cache", "/cache"]).is_some());
        assert!(position(&["--chdir", "/src"]).is_some());
        assert!(args.contains(&"--unshare-pid".to_string()));
        assert_eq!(args.last().map(String::as_str), Some("--"));
    }

    #[test]
    fn working_directory_outside_rootfs_is_rejected() {
        let err = container_dir(Path::new("/data/rootfs"), Path::new("/elsewhere")).unwrap_err();
        assert!(matches!(err, DockyardError::Config { .. }));
        assert_eq!(
            container_dir(Path::new("/data/rootfs"), Path::new("/data/rootfs/src/app"))
                .expect("inside"),
            "/src/app"
        );
    }

    #[test]
    fn unconfined_isolation_skips_bwrap_lookup() {
        assert_eq!(
            Confinement::detect(Isolation::Unconfined).expect("detect"),
            Confinement::Unconfined
        );
    }
}
