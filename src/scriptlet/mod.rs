// src/scriptlet/mod.rs

//! Package lifecycle script execution
//!
//! Scripts run inside the target root in one of two modes:
//!
//! - Interpreter: the body is written to a private file under the root's
//!   `/tmp` and run by the interpreter named on its `#!` line (`/bin/sh`
//!   when there is none). The interpreter must exist and be executable
//!   inside the root before anything is spawned.
//! - Embedded: the body is parsed as the builtin command language and run
//!   by a forked worker that chroots into the root. The worker receives the
//!   parsed script as JSON over a pipe and reports back only through its
//!   exit status.
//!
//! In both modes the worker leads a new process group, reads stdin from
//! `/dev/null`, and has its stdout and stderr polled without blocking and
//! forwarded line by line to an `OutputSink`. A run that outlives its
//! timeout has its whole group sent SIGTERM, then SIGKILL after a grace
//! period, and is reported as `ExitOutcome::TimeoutExceeded`.

mod embedded;
mod output;
mod supervise;

pub use embedded::{EmbeddedOp, EmbeddedScript, ExecContext};
pub use output::{CollectingSink, OutputSink, Stream, TracingSink};

use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::filesystem::resolve_in_root;
use crate::package::{Package, ScriptMode, ScriptSlot};
use nix::unistd::{ForkResult, Gid, Pid, Uid, fork, pipe2, setgid, setpgid, setuid};
use nix::fcntl::OFlag;
use std::collections::BTreeMap;
use std::ffi::CString;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::os::fd::OwnedFd;
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};
use supervise::{Limits, Pipe, Worker, supervise};
use tracing::{debug, info};

const DEFAULT_INTERPRETER: &str = "/bin/sh";
const SCRIPT_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";

/// Exit status of a panicking embedded worker
pub const PANIC_EXIT_CODE: i32 = 101;

/// How a scriptlet run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitOutcome {
    Success,
    Failed(i32),
    Signaled(i32),
    TimeoutExceeded,
}

impl ExitOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ExitOutcome::Success)
    }

    /// Map to the error an action reports for this outcome
    pub fn into_result(self, label: &str, timeout: Duration) -> Result<()> {
        match self {
            ExitOutcome::Success => Ok(()),
            ExitOutcome::Failed(code) => Err(Error::ScriptletError(format!(
                "{} exited with code {}",
                label, code
            ))),
            ExitOutcome::Signaled(sig) => Err(Error::ScriptletError(format!(
                "{} killed by signal {}",
                label, sig
            ))),
            ExitOutcome::TimeoutExceeded => Err(Error::ScriptTimeout {
                label: label.to_string(),
                seconds: timeout.as_secs(),
            }),
        }
    }
}

/// Identity of one scriptlet run, used for its environment and log lines
#[derive(Debug, Clone)]
pub struct Invocation {
    pub package_name: String,
    pub package_version: String,
    pub slot: ScriptSlot,
    /// e.g. `postin(foo-1.0-1.noarch)`
    pub label: String,
}

impl Invocation {
    pub fn new(package: &Package, slot: ScriptSlot) -> Self {
        Self {
            package_name: package.name.clone(),
            package_version: package.evr.to_string(),
            slot,
            label: format!("{}({})", slot, package.nevra()),
        }
    }
}

/// Interpreter and its optional single argument from a `#!` line
fn parse_shebang(source: &str) -> (PathBuf, Option<String>) {
    let Some(line) = source.lines().next().and_then(|l| l.strip_prefix("#!")) else {
        return (PathBuf::from(DEFAULT_INTERPRETER), None);
    };

    let line = line.trim();
    match line.split_once(char::is_whitespace) {
        Some((interp, arg)) => (PathBuf::from(interp), Some(arg.trim().to_string())),
        None if line.is_empty() => (PathBuf::from(DEFAULT_INTERPRETER), None),
        None => (PathBuf::from(line), None),
    }
}

fn is_host_root(root: &Path) -> bool {
    root == Path::new("/")
}

#[derive(Debug, Clone)]
pub struct ScriptletRunner {
    root: PathBuf,
    timeout: Duration,
    grace: Duration,
    poll_interval: Duration,
    user: Option<u32>,
    group: Option<u32>,
}

impl ScriptletRunner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            timeout: Duration::from_secs(60),
            grace: Duration::from_secs(3),
            poll_interval: Duration::from_millis(50),
            user: None,
            group: None,
        }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            root: config.root.clone(),
            timeout: config.scriptlet_timeout(),
            grace: config.kill_grace(),
            poll_interval: config.poll_interval(),
            user: config.scriptlet_user,
            group: config.scriptlet_group,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_credentials(mut self, user: Option<u32>, group: Option<u32>) -> Self {
        self.user = user;
        self.group = group;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Explicit environment for a run; only TERM is taken from the caller
    fn environment(&self, invocation: &Invocation) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        env.insert("PATH".to_string(), SCRIPT_PATH.to_string());
        if let Ok(term) = std::env::var("TERM") {
            env.insert("TERM".to_string(), term);
        }
        env.insert("STRATA_PACKAGE_NAME".to_string(), invocation.package_name.clone());
        env.insert(
            "STRATA_PACKAGE_VERSION".to_string(),
            invocation.package_version.clone(),
        );
        env.insert("STRATA_ROOT".to_string(), self.root.display().to_string());
        env.insert("STRATA_PHASE".to_string(), invocation.slot.as_str().to_string());
        env
    }

    fn limits(&self, timeout: Duration) -> Limits {
        Limits {
            timeout,
            grace: self.grace,
            poll_interval: self.poll_interval,
        }
    }

    fn root_cstring(&self) -> Result<CString> {
        CString::new(self.root.as_os_str().as_bytes())
            .map_err(|_| Error::InvalidPath(format!("NUL byte in root {}", self.root.display())))
    }

    /// Host path of an executable `interpreter` as seen from inside the root
    fn locate_interpreter(&self, interpreter: &Path, label: &str) -> Result<PathBuf> {
        let on_host = resolve_in_root(&self.root, interpreter)?;
        let executable = fs::metadata(&on_host)
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false);
        if !executable {
            return Err(Error::ScriptletError(format!(
                "Interpreter {} for {} is missing or not executable in {}",
                interpreter.display(),
                label,
                self.root.display()
            )));
        }
        Ok(on_host)
    }

    /// Run one scriptlet to completion or timeout
    ///
    /// Setup problems (missing interpreter, spawn or fork failure, an
    /// unparsable embedded body) are errors; anything the script itself does
    /// is described by the returned outcome.
    pub fn run_scriptlet(
        &self,
        invocation: &Invocation,
        source: &str,
        mode: ScriptMode,
        timeout: Duration,
        sink: &mut dyn OutputSink,
    ) -> Result<ExitOutcome> {
        info!("Running {} ({:?} mode)", invocation.label, mode);
        let outcome = match mode {
            ScriptMode::Interpreter => self.run_external(invocation, source, timeout, sink)?,
            ScriptMode::Embedded => self.run_embedded(invocation, source, timeout, sink)?,
        };
        debug!("{} finished: {:?}", invocation.label, outcome);
        Ok(outcome)
    }

    fn run_external(
        &self,
        invocation: &Invocation,
        source: &str,
        timeout: Duration,
        sink: &mut dyn OutputSink,
    ) -> Result<ExitOutcome> {
        let (interpreter, interpreter_arg) = parse_shebang(source);
        self.locate_interpreter(&interpreter, &invocation.label)?;

        let tmp_dir = resolve_in_root(&self.root, "/tmp")?;
        fs::create_dir_all(&tmp_dir)?;
        let mut script = tempfile::Builder::new()
            .prefix(".scriptlet-")
            .tempfile_in(&tmp_dir)?;
        script.write_all(source.as_bytes())?;
        script.flush()?;
        fs::set_permissions(script.path(), fs::Permissions::from_mode(0o700))?;
        // Closed but still removed on drop, whichever way this function returns
        let script = script.into_temp_path();

        let script_in_root = Path::new("/").join(
            script
                .strip_prefix(&self.root)
                .map_err(|_| Error::InvalidPath(script.display().to_string()))?,
        );

        let mut command = Command::new(&interpreter);
        if let Some(arg) = &interpreter_arg {
            command.arg(arg);
        }
        command
            .arg(&script_in_root)
            .env_clear()
            .envs(self.environment(invocation))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0);

        if is_host_root(&self.root) {
            command.current_dir("/");
            if let Some(gid) = self.group {
                command.gid(gid);
            }
            if let Some(uid) = self.user {
                command.uid(uid);
            }
        } else {
            // Credentials are dropped only after entering the root
            let root = self.root_cstring()?;
            let (group, user) = (self.group, self.user);
            // SAFETY: only async-signal-safe libc calls between fork and exec
            unsafe {
                command.pre_exec(move || {
                    if libc::chroot(root.as_ptr()) != 0 || libc::chdir(c"/".as_ptr()) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                    if let Some(gid) = group
                        && libc::setgid(gid) != 0
                    {
                        return Err(std::io::Error::last_os_error());
                    }
                    if let Some(uid) = user
                        && libc::setuid(uid) != 0
                    {
                        return Err(std::io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
        }

        let mut child = command.spawn().map_err(|e| {
            Error::ScriptletError(format!("Failed to spawn {}: {}", invocation.label, e))
        })?;
        let started = Instant::now();

        let stdout = child.stdout.take().map(|s| File::from(OwnedFd::from(s)));
        let stderr = child.stderr.take().map(|s| File::from(OwnedFd::from(s)));
        let mut pipes = Vec::new();
        if let Some(file) = stdout {
            pipes.push(Pipe::new(file, Stream::Stdout)?);
        }
        if let Some(file) = stderr {
            pipes.push(Pipe::new(file, Stream::Stderr)?);
        }

        let outcome = supervise(
            Worker::Process(child),
            pipes,
            started,
            &self.limits(timeout),
            &invocation.label,
            sink,
        );
        drop(script);
        outcome
    }

    fn run_embedded(
        &self,
        invocation: &Invocation,
        source: &str,
        timeout: Duration,
        sink: &mut dyn OutputSink,
    ) -> Result<ExitOutcome> {
        let script = EmbeddedScript::parse(source)?;
        let context = ExecContext {
            env: self.environment(invocation),
        };
        let payload = script.to_json(&context)?;

        let chroot_to = if is_host_root(&self.root) {
            None
        } else {
            Some(self.root_cstring()?)
        };
        let devnull = File::open("/dev/null")?;

        let pipe = || {
            pipe2(OFlag::O_CLOEXEC)
                .map_err(|e| Error::ScriptletError(format!("pipe failed: {}", e)))
        };
        let (payload_r, payload_w) = pipe()?;
        let (out_r, out_w) = pipe()?;
        let (err_r, err_w) = pipe()?;

        // SAFETY: the child only runs the builtin interpreter and leaves via _exit
        match unsafe { fork() } {
            Ok(ForkResult::Child) => {
                drop((payload_w, out_r, err_r));
                let (group, user) = (self.group, self.user);
                let code = std::panic::catch_unwind(std::panic::AssertUnwindSafe(move || {
                    embedded_child(
                        payload_r,
                        File::from(out_w),
                        File::from(err_w),
                        devnull,
                        chroot_to,
                        group,
                        user,
                    )
                }))
                .unwrap_or(PANIC_EXIT_CODE);
                // SAFETY: terminate the forked child without running parent-owned destructors
                unsafe { libc::_exit(code) }
            }
            Ok(ForkResult::Parent { child }) => {
                let started = Instant::now();
                // Also set from the parent so a kill never races the child's own setpgid
                let _ = setpgid(child, child);
                drop((payload_r, out_w, err_w, devnull));

                // Payloads are small; the child reads it before producing output
                let mut writer = File::from(payload_w);
                let written = writer.write_all(&payload);
                drop(writer);

                let pipes = vec![
                    Pipe::new(File::from(out_r), Stream::Stdout)?,
                    Pipe::new(File::from(err_r), Stream::Stderr)?,
                ];
                let outcome = supervise(
                    Worker::Forked(child),
                    pipes,
                    started,
                    &self.limits(timeout),
                    &invocation.label,
                    sink,
                )?;
                if let Err(e) = written
                    && outcome.is_success()
                {
                    return Err(Error::ScriptletError(format!(
                        "Failed to send {} to worker: {}",
                        invocation.label, e
                    )));
                }
                Ok(outcome)
            }
            Err(e) => Err(Error::ScriptletError(format!("Fork failed: {}", e))),
        }
    }
}

/// Body of the forked embedded worker; the return value is its exit status
fn embedded_child(
    payload: OwnedFd,
    mut out: File,
    mut err: File,
    devnull: File,
    chroot_to: Option<CString>,
    group: Option<u32>,
    user: Option<u32>,
) -> i32 {
    let _ = setpgid(Pid::from_raw(0), Pid::from_raw(0));
    // SAFETY: plain dup2 onto the standard descriptor slot
    unsafe {
        libc::dup2(std::os::fd::AsRawFd::as_raw_fd(&devnull), 0);
    }

    let mut bytes = Vec::new();
    if File::from(payload).read_to_end(&mut bytes).is_err() {
        let _ = writeln!(err, "embedded worker: failed to read script");
        return 127;
    }

    if let Some(root) = &chroot_to {
        // SAFETY: NUL-terminated path prepared by the parent
        let entered =
            unsafe { libc::chroot(root.as_ptr()) == 0 && libc::chdir(c"/".as_ptr()) == 0 };
        if !entered {
            let reason = std::io::Error::last_os_error();
            let _ = writeln!(err, "embedded worker: chroot failed: {}", reason);
            return 127;
        }
    } else if std::env::set_current_dir("/").is_err() {
        return 127;
    }

    if let Some(gid) = group
        && setgid(Gid::from_raw(gid)).is_err()
    {
        let _ = writeln!(err, "embedded worker: setgid({}) failed", gid);
        return 127;
    }
    if let Some(uid) = user
        && setuid(Uid::from_raw(uid)).is_err()
    {
        let _ = writeln!(err, "embedded worker: setuid({}) failed", uid);
        return 127;
    }

    let (script, context) = match EmbeddedScript::from_json(&bytes) {
        Ok(decoded) => decoded,
        Err(e) => {
            let _ = writeln!(err, "embedded worker: {}", e);
            return 127;
        }
    };

    let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        script.run(&context, &mut out, &mut err)
    }));
    let _ = out.flush();
    result.unwrap_or(PANIC_EXIT_CODE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_shebang() {
        assert_eq!(parse_shebang("#!/bin/bash\necho hi"), (PathBuf::from("/bin/bash"), None));
        assert_eq!(
            parse_shebang("#! /usr/bin/env  python3 \nprint()"),
            (PathBuf::from("/usr/bin/env"), Some("python3".to_string()))
        );
        assert_eq!(parse_shebang("echo hi"), (PathBuf::from("/bin/sh"), None));
        assert_eq!(parse_shebang("#!\necho hi"), (PathBuf::from("/bin/sh"), None));
    }

    #[test]
    fn test_outcome_mapping() {
        let timeout = Duration::from_secs(7);
        assert!(ExitOutcome::Success.into_result("x", timeout).is_ok());
        assert!(matches!(
            ExitOutcome::Failed(2).into_result("x", timeout),
            Err(Error::ScriptletError(_))
        ));
        assert!(matches!(
            ExitOutcome::TimeoutExceeded.into_result("postin(a)", timeout),
            Err(Error::ScriptTimeout { seconds: 7, .. })
        ));
    }

    #[test]
    fn test_environment_is_explicit() {
        let runner = ScriptletRunner::new("/");
        let package = Package::new("foo", crate::version::Evr::parse("1.0-2").unwrap(), "noarch");
        let env = runner.environment(&Invocation::new(&package, ScriptSlot::PreIn));
        assert_eq!(env.get("STRATA_PACKAGE_NAME").map(String::as_str), Some("foo"));
        assert_eq!(env.get("STRATA_PACKAGE_VERSION").map(String::as_str), Some("1.0-2"));
        assert_eq!(env.get("STRATA_PHASE").map(String::as_str), Some("prein"));
        assert!(!env.contains_key("HOME"));
    }

    #[test]
    fn test_interpreter_symlinks_resolve_inside_root() {
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(root.path().join("bin")).unwrap();
        fs::write(root.path().join("bin/bash"), b"").unwrap();
        fs::set_permissions(root.path().join("bin/bash"), fs::Permissions::from_mode(0o755))
            .unwrap();
        std::os::unix::fs::symlink("/bin/bash", root.path().join("bin/sh")).unwrap();
        fs::write(root.path().join("bin/data"), b"").unwrap();
        std::os::unix::fs::symlink("/bin/nothing", root.path().join("bin/dangling")).unwrap();

        let runner = ScriptletRunner::new(root.path());
        assert_eq!(
            runner.locate_interpreter(Path::new("/bin/sh"), "postin(foo)").unwrap(),
            root.path().join("bin/bash")
        );
        for missing in ["/bin/data", "/bin/dangling", "/usr/bin/python3"] {
            assert!(matches!(
                runner.locate_interpreter(Path::new(missing), "postin(foo)"),
                Err(Error::ScriptletError(msg)) if msg.contains(missing)
            ));
        }
    }
}
