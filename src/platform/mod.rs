use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::thread::JoinHandle;
use std::time::Duration;

use wait_timeout::ChildExt;

#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

#[derive(Debug)]
pub enum CommandError {
    Spawn { cmd: String, err: std::io::Error },
    Wait { cmd: String, err: std::io::Error },
    Timeout { cmd: String, timeout: Duration },
}

impl std::fmt::Display for CommandError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CommandError::Spawn { cmd, err } => write!(f, "failed to start {cmd}: {err}"),
            CommandError::Wait { cmd, err } => write!(f, "failed to wait for {cmd}: {err}"),
            CommandError::Timeout { cmd, timeout } => {
                write!(f, "{cmd} timed out after {timeout:?}")
            }
        }
    }
}

impl std::error::Error for CommandError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CommandError::Spawn { err, .. } | CommandError::Wait { err, .. } => Some(err),
            CommandError::Timeout { .. } => None,
        }
    }
}

/// Runs `cmd` to completion or until `timeout` elapses, then kills it.
///
/// stdout and stderr are drained on helper threads so a chatty child cannot
/// block on a full pipe while we wait.
pub fn run_command(cmd: &str, args: &[&str], timeout: Duration) -> Result<CommandOutput, CommandError> {
    let mut child = Command::new(cmd)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|err| CommandError::Spawn {
            cmd: cmd.to_string(),
            err,
        })?;

    let stdout = drain(child.stdout.take());
    let stderr = drain(child.stderr.take());

    let status = match child.wait_timeout(timeout) {
        Ok(Some(status)) => status,
        Ok(None) => {
            kill(&mut child);
            return Err(CommandError::Timeout {
                cmd: cmd.to_string(),
                timeout,
            });
        }
        Err(err) => {
            kill(&mut child);
            return Err(CommandError::Wait {
                cmd: cmd.to_string(),
                err,
            });
        }
    };

    Ok(CommandOutput {
        exit_code: status.code().unwrap_or(-1),
        stdout: join(stdout),
        stderr: join(stderr),
    })
}

fn kill(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<String>> {
    let mut pipe = pipe?;
    Some(std::thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = pipe.read_to_end(&mut buf);
        String::from_utf8_lossy(&buf).into_owned()
    }))
}

fn join(handle: Option<JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}
