//! The override-scriptlet control protocol: a user shell fragment may
//! call back into the engine (`partforge ctl pull`, etc.) through a pair
//! of named pipes.

use crate::cmd::{CmdResult, CmdRunner};
use crate::error::{Error, Result};
use serde::Deserialize;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::mpsc::TryRecvError;
use std::time::Duration;

#[derive(Deserialize)]
struct ControlCall {
    function: String,
    #[serde(default)]
    #[allow(dead_code)]
    args: serde_json::Value,
}

/// Functions a scriptlet is allowed to call back into.
pub const BUILTIN_FUNCTIONS: &[&str] = &["pull", "build", "stage", "prime"];

pub struct ScriptletRunner {
    _tmpdir: tempfile::TempDir,
    call_fifo: PathBuf,
    feedback_fifo: PathBuf,
}

impl ScriptletRunner {
    pub fn new() -> Result<Self> {
        let tmpdir = tempfile::tempdir()?;
        let call_fifo = tmpdir.path().join("call_fifo");
        let feedback_fifo = tmpdir.path().join("feedback_fifo");
        make_fifo(&call_fifo)?;
        make_fifo(&feedback_fifo)?;
        Ok(Self { _tmpdir: tmpdir, call_fifo, feedback_fifo })
    }

    /// Run `script` in `cwd`, dispatching any control-protocol calls it
    /// makes to `on_call` and acknowledging each only once the dispatch has
    /// actually run, so the scriptlet never observes a stale engine state
    /// after a call it made itself. Returns once the script process exits.
    pub fn run(
        &self,
        part_name: &str,
        name: &str,
        script: &str,
        cwd: &Path,
        env: &[(String, String)],
        mut on_call: impl FnMut(&str) -> Result<()>,
    ) -> Result<()> {
        let body = format!("set -e\nset -x\n{script}\n");

        let mut runner = CmdRunner::new("/bin/sh")
            .arg("-c")
            .arg(&body)
            .current_dir(cwd)
            .env("CRAFT_PARTS_CALL_FIFO", &self.call_fifo)
            .env("CRAFT_PARTS_FEEDBACK_FIFO", &self.feedback_fifo)
            .env(
                "CRAFT_PARTS_INTERPRETER",
                std::env::current_exe().unwrap_or_else(|_| PathBuf::from("partforge")),
            );
        for (k, v) in env {
            runner = runner.env(k, v);
        }

        // The child runs on its own scoped thread so this thread is free to
        // poll `call_fifo` and dispatch built-ins while the script is still
        // running, instead of only finding out about its calls after exit.
        //
        // The read end stays open for the whole scriptlet instead of being
        // reopened every poll: closing it between reads would momentarily
        // leave the FIFO with no reader, and a shell writing to it right
        // then gets SIGPIPE'd.
        let mut call_file = std::fs::OpenOptions::new()
            .read(true)
            .custom_flags_nonblocking()
            .open(&self.call_fifo)?;

        let exec_result = std::thread::scope(|scope| {
            let (done_tx, done_rx) = std::sync::mpsc::channel::<std::io::Result<CmdResult>>();
            scope.spawn(move || {
                let _ = done_tx.send(runner.execute());
            });

            let mut buf = String::new();
            loop {
                let mut chunk = String::new();
                if call_file.read_to_string(&mut chunk).is_ok() {
                    buf.push_str(&chunk);
                }

                while let Some(pos) = buf.find('\n') {
                    let line = buf[..pos].to_string();
                    buf = buf[pos + 1..].to_string();
                    if line.trim().is_empty() {
                        continue;
                    }
                    let ack = match dispatch(&line, &mut on_call) {
                        Ok(()) => String::new(),
                        Err(e) => e.to_string(),
                    };
                    if let Ok(mut fb) =
                        std::fs::OpenOptions::new().write(true).open(&self.feedback_fifo)
                    {
                        let _ = fb.write_all(format!("{ack}\n").as_bytes());
                    }
                }

                match done_rx.try_recv() {
                    Ok(result) => break result,
                    Err(TryRecvError::Empty) => std::thread::sleep(Duration::from_millis(20)),
                    Err(TryRecvError::Disconnected) => {
                        break Err(std::io::Error::other("scriptlet process thread vanished"))
                    }
                }
            }
        })?;

        if !exec_result.status.success() {
            return Err(Error::ScriptletRunError {
                part: part_name.to_string(),
                name: name.to_string(),
                code: exec_result.status.code(),
            });
        }
        Ok(())
    }
}

/// Parse and dispatch one control-protocol call line, in that order, so
/// `on_call` has already run by the time the caller acknowledges it.
fn dispatch(line: &str, on_call: &mut impl FnMut(&str) -> Result<()>) -> Result<()> {
    let call: ControlCall = serde_json::from_str(line)
        .map_err(|e| Error::InternalError(format!("malformed control call: {e}")))?;
    if !BUILTIN_FUNCTIONS.contains(&call.function.as_str()) {
        return Err(Error::InvalidControlAPICall(call.function));
    }
    on_call(&call.function)
}

trait NonBlockingOpen {
    fn custom_flags_nonblocking(&mut self) -> &mut Self;
}

impl NonBlockingOpen for std::fs::OpenOptions {
    #[cfg(unix)]
    fn custom_flags_nonblocking(&mut self) -> &mut Self {
        use std::os::unix::fs::OpenOptionsExt;
        self.custom_flags(libc::O_NONBLOCK)
    }

    #[cfg(not(unix))]
    fn custom_flags_nonblocking(&mut self) -> &mut Self {
        self
    }
}

#[cfg(unix)]
fn make_fifo(path: &Path) -> Result<()> {
    nix::unistd::mkfifo(path, nix::sys::stat::Mode::from_bits_truncate(0o600))
        .map_err(|e| Error::Io(std::io::Error::from(e)))
}

#[cfg(not(unix))]
fn make_fifo(_path: &Path) -> Result<()> {
    Err(Error::InternalError("scriptlet control protocol requires unix named pipes".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A scriptlet that makes a control call and then, in a later shell
    /// line, checks for a side effect `on_call` produces must see that
    /// effect — which only holds if dispatch runs before the ack unblocks
    /// the script's `read`.
    #[test]
    fn dispatch_runs_before_the_calling_script_is_unblocked() {
        let runner = ScriptletRunner::new().unwrap();
        let cwd = tempfile::tempdir().unwrap();
        let marker = cwd.path().join("marker");

        let script = r#"
printf '{"function":"pull","args":{}}\n' > "$CRAFT_PARTS_CALL_FIFO"
read -r _line < "$CRAFT_PARTS_FEEDBACK_FIFO"
test -f marker
"#;

        runner
            .run("foo", "override-pull", script, cwd.path(), &[], |function| {
                assert_eq!(function, "pull");
                std::fs::write(&marker, b"ran").unwrap();
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn a_dispatch_error_fails_the_scriptlet() {
        let runner = ScriptletRunner::new().unwrap();
        let cwd = tempfile::tempdir().unwrap();

        let script = r#"
printf '{"function":"pull","args":{}}\n' > "$CRAFT_PARTS_CALL_FIFO"
read -r line < "$CRAFT_PARTS_FEEDBACK_FIFO"
test -z "$line"
"#;

        let result = runner.run("foo", "override-pull", script, cwd.path(), &[], |_| {
            Err(Error::InternalError("boom".into()))
        });
        assert!(result.is_err());
    }
}
