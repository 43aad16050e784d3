// src/scriptlet/supervise.rs

//! Waiting on a running scriptlet: output polling, timeout and kill escalation

use super::ExitOutcome;
use super::output::{LineBuffer, OutputSink, Stream};
use crate::error::{Error, Result};
use nix::fcntl::{FcntlArg, OFlag, fcntl};
use nix::sys::signal::{Signal, killpg};
use nix::sys::wait::{WaitPidFlag, WaitStatus, waitpid};
use nix::unistd::Pid;
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::os::fd::AsRawFd;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// A spawned scriptlet process; it leads its own process group
pub(crate) enum Worker {
    Process(Child),
    Forked(Pid),
}

impl Worker {
    fn pgid(&self) -> Pid {
        match self {
            Worker::Process(child) => Pid::from_raw(child.id() as i32),
            Worker::Forked(pid) => *pid,
        }
    }

    fn try_wait(&mut self) -> Result<Option<ExitOutcome>> {
        match self {
            Worker::Process(child) => Ok(child.try_wait()?.map(outcome_of_status)),
            Worker::Forked(pid) => match waitpid(*pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => Ok(Some(outcome_of_code(code))),
                Ok(WaitStatus::Signaled(_, sig, _)) => Ok(Some(ExitOutcome::Signaled(sig as i32))),
                Ok(_) => Ok(None),
                Err(e) => Err(Error::ScriptletError(format!("Wait failed: {}", e))),
            },
        }
    }

    fn wait(&mut self) -> Result<ExitOutcome> {
        match self {
            Worker::Process(child) => Ok(outcome_of_status(child.wait()?)),
            Worker::Forked(pid) => loop {
                match waitpid(*pid, None) {
                    Ok(WaitStatus::Exited(_, code)) => return Ok(outcome_of_code(code)),
                    Ok(WaitStatus::Signaled(_, sig, _)) => {
                        return Ok(ExitOutcome::Signaled(sig as i32));
                    }
                    Ok(_) => continue,
                    Err(e) => return Err(Error::ScriptletError(format!("Wait failed: {}", e))),
                }
            },
        }
    }
}

fn outcome_of_code(code: i32) -> ExitOutcome {
    if code == 0 {
        ExitOutcome::Success
    } else {
        ExitOutcome::Failed(code)
    }
}

fn outcome_of_status(status: ExitStatus) -> ExitOutcome {
    match (status.code(), status.signal()) {
        (Some(code), _) => outcome_of_code(code),
        (None, Some(sig)) => ExitOutcome::Signaled(sig),
        (None, None) => ExitOutcome::Failed(-1),
    }
}

/// One non-blocking output pipe
pub(crate) struct Pipe {
    file: File,
    stream: Stream,
    buffer: LineBuffer,
    open: bool,
}

impl Pipe {
    pub(crate) fn new(file: File, stream: Stream) -> Result<Self> {
        let fd = file.as_raw_fd();
        let flags = fcntl(fd, FcntlArg::F_GETFL)
            .map_err(|e| Error::ScriptletError(format!("F_GETFL failed: {}", e)))?;
        let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
        fcntl(fd, FcntlArg::F_SETFL(flags))
            .map_err(|e| Error::ScriptletError(format!("F_SETFL failed: {}", e)))?;

        Ok(Self {
            file,
            stream,
            buffer: LineBuffer::default(),
            open: true,
        })
    }

    /// Read whatever is available right now
    fn drain(&mut self, label: &str, sink: &mut dyn OutputSink) {
        let mut chunk = [0u8; 4096];
        while self.open {
            match self.file.read(&mut chunk) {
                Ok(0) => self.open = false,
                Ok(n) => {
                    let stream = self.stream;
                    self.buffer
                        .push(&chunk[..n], |line| sink.line(label, stream, line));
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!("Reading scriptlet {:?} failed: {}", self.stream, e);
                    self.open = false;
                }
            }
        }
    }

    fn finish(&mut self, label: &str, sink: &mut dyn OutputSink) {
        self.drain(label, sink);
        let stream = self.stream;
        self.buffer.finish(|line| sink.line(label, stream, line));
    }
}

pub(crate) struct Limits {
    pub timeout: Duration,
    pub grace: Duration,
    pub poll_interval: Duration,
}

/// Poll `worker` until it exits or the timeout expires
///
/// On expiry the whole process group gets SIGTERM, then SIGKILL if the
/// leader is still running after the grace period.
pub(crate) fn supervise(
    mut worker: Worker,
    mut pipes: Vec<Pipe>,
    started: Instant,
    limits: &Limits,
    label: &str,
    sink: &mut dyn OutputSink,
) -> Result<ExitOutcome> {
    loop {
        for pipe in pipes.iter_mut() {
            pipe.drain(label, sink);
        }

        if let Some(outcome) = worker.try_wait()? {
            for pipe in pipes.iter_mut() {
                pipe.finish(label, sink);
            }
            return Ok(outcome);
        }

        if started.elapsed() >= limits.timeout {
            break;
        }
        std::thread::sleep(limits.poll_interval);
    }

    let pgid = worker.pgid();
    warn!("{} exceeded {:?}, sending SIGTERM to group {}", label, limits.timeout, pgid);
    if let Err(e) = killpg(pgid, Signal::SIGTERM) {
        debug!("SIGTERM to group {} failed: {}", pgid, e);
    }

    let deadline = Instant::now() + limits.grace;
    let mut exited = false;
    while Instant::now() < deadline {
        for pipe in pipes.iter_mut() {
            pipe.drain(label, sink);
        }
        if worker.try_wait()?.is_some() {
            exited = true;
            break;
        }
        std::thread::sleep(limits.poll_interval);
    }

    if !exited {
        warn!("{} ignored SIGTERM, sending SIGKILL to group {}", label, pgid);
        if let Err(e) = killpg(pgid, Signal::SIGKILL) {
            debug!("SIGKILL to group {} failed: {}", pgid, e);
        }
        worker.wait()?;
    }

    for pipe in pipes.iter_mut() {
        pipe.finish(label, sink);
    }
    Ok(ExitOutcome::TimeoutExceeded)
}
