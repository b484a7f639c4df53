use anyhow::{anyhow, Context, Result};
use std::process::{Command, Stdio};

/// Outcome of probing a local process by pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessProbe {
    Running,
    /// The process exited or no process with that pid exists. The two are
    /// indistinguishable once the pid is gone, and both mean the job is
    /// no longer running here.
    Gone,
}

/// Launch a job command as a local subprocess pinned to one GPU.
///
/// The command is split into argv with shell word rules but no shell is
/// ever invoked, so `$VAR`, globs, and redirections are inert. The child
/// gets `CUDA_VISIBLE_DEVICES` set to the device index and its stdio wired
/// to pipes that nobody reads. The OS pid is the job handle.
pub fn launch(command: &str, device_index: u32) -> Result<u32> {
    let argv = shell_words::split(command).context("Failed to parse job command")?;
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| anyhow!("Job command is empty"))?;

    let child = Command::new(program)
        .args(args)
        .env("CUDA_VISIBLE_DEVICES", device_index.to_string())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("Failed to spawn `{program}`"))?;

    Ok(child.id())
}

/// Check whether a previously launched process is still alive.
///
/// Children of this process are reaped here with a non-blocking waitpid,
/// so exited jobs do not linger as zombies. Pids that are not our children
/// (after a control-plane restart) fall back to a signal-0 probe.
pub fn probe(pid: u32) -> ProcessProbe {
    let pid = pid as libc::pid_t;
    let mut status: libc::c_int = 0;
    match unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) } {
        0 => ProcessProbe::Running,
        p if p == pid => ProcessProbe::Gone,
        _ => {
            if unsafe { libc::kill(pid, 0) } == 0 {
                ProcessProbe::Running
            } else {
                let err = std::io::Error::last_os_error();
                if err.raw_os_error() == Some(libc::EPERM) {
                    // The pid exists but belongs to someone else.
                    ProcessProbe::Running
                } else {
                    ProcessProbe::Gone
                }
            }
        }
    }
}

/// Send SIGTERM to a local job. Terminating a process that already exited
/// is a no-op, which keeps cancellation idempotent.
pub fn terminate(pid: u32) -> Result<()> {
    let rc = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if rc == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        return Ok(());
    }
    Err(anyhow!("Failed to signal pid {pid}: {err}"))
}
