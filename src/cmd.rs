//! Synchronous subprocess execution used by the build/scriptlet runners.
//!
//! Steps execute strictly sequentially, so there is no async runtime
//! anywhere in this crate; subprocesses are run to completion on the
//! calling thread while their stdout/stderr are drained on helper threads
//! and forwarded line by line.

use std::collections::HashSet;
use std::ffi::OsStr;
use std::fmt::{Debug, Display, Formatter};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::sync::mpsc::channel;
use std::sync::{Mutex, RwLock};
use std::thread;

#[cfg(all(unix, not(test)))]
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
#[cfg(all(unix, not(test)))]
use signal_hook::iterator::Signals;
use std::sync::LazyLock as Lazy;

type OutputCallback<'a> = Box<dyn Fn(&str) + Send + 'a>;

/// Runs a single subprocess, optionally streaming output to callbacks.
pub struct CmdRunner<'a> {
    cmd: Command,
    stdin: Option<String>,
    raw: bool,
    on_stdout: Option<OutputCallback<'a>>,
    on_stderr: Option<OutputCallback<'a>>,
}

static OUTPUT_LOCK: Mutex<()> = Mutex::new(());
static RUNNING_PIDS: Lazy<Mutex<HashSet<u32>>> = Lazy::new(Default::default);

impl<'a> CmdRunner<'a> {
    pub fn new<P: AsRef<OsStr>>(program: P) -> Self {
        let mut cmd = Command::new(program);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());
        Self { cmd, stdin: None, raw: false, on_stdout: None, on_stderr: None }
    }

    /// Kill every subprocess this runner currently has in flight.
    #[cfg(unix)]
    pub fn kill_all(signal: nix::sys::signal::Signal) {
        let pids = RUNNING_PIDS.lock().unwrap();
        for pid in pids.iter() {
            let pid = nix::unistd::Pid::from_raw(*pid as i32);
            let _ = nix::sys::signal::kill(pid, signal);
        }
    }

    pub fn arg<S: AsRef<OsStr>>(mut self, arg: S) -> Self {
        self.cmd.arg(arg.as_ref());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.cmd.args(args);
        self
    }

    pub fn current_dir<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.cmd.current_dir(dir);
        self
    }

    pub fn env_clear(mut self) -> Self {
        self.cmd.env_clear();
        self
    }

    pub fn env<K, V>(mut self, key: K, val: V) -> Self
    where
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.cmd.env(key, val);
        self
    }

    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<OsStr>,
        V: AsRef<OsStr>,
    {
        self.cmd.envs(vars);
        self
    }

    /// Run without capturing/forwarding output line by line; the child
    /// inherits this process's stdio directly. Used for interactive builds.
    pub fn raw(mut self, raw: bool) -> Self {
        self.raw = raw;
        self
    }

    pub fn stdin_string(mut self, input: impl Into<String>) -> Self {
        self.cmd.stdin(Stdio::piped());
        self.stdin = Some(input.into());
        self
    }

    pub fn with_on_stdout<F: Fn(&str) + Send + 'a>(mut self, f: F) -> Self {
        self.on_stdout = Some(Box::new(f));
        self
    }

    pub fn with_on_stderr<F: Fn(&str) + Send + 'a>(mut self, f: F) -> Self {
        self.on_stderr = Some(Box::new(f));
        self
    }

    pub fn execute(mut self) -> std::io::Result<CmdResult> {
        static RAW_LOCK: RwLock<()> = RwLock::new(());
        let program = self.get_program();
        tracing::debug!(%program, "$ {self}");
        if self.raw {
            let _write_lock = RAW_LOCK.write().unwrap();
            return self.execute_raw();
        }
        let _read_lock = RAW_LOCK.read().unwrap();

        let mut child = self.cmd.spawn()?;
        let id = child.id();
        RUNNING_PIDS.lock().unwrap().insert(id);

        let (tx, rx) = channel();
        if let Some(stdout) = child.stdout.take() {
            let tx = tx.clone();
            thread::spawn(move || {
                for line in BufReader::new(stdout).lines().map_while(Result::ok) {
                    let _ = tx.send(ChildOutput::Stdout(line));
                }
            });
        }
        if let Some(stderr) = child.stderr.take() {
            let tx = tx.clone();
            thread::spawn(move || {
                for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                    let _ = tx.send(ChildOutput::Stderr(line));
                }
            });
        }
        if let Some(text) = self.stdin.take()
            && let Some(mut stdin) = child.stdin.take()
        {
            thread::spawn(move || {
                let _ = stdin.write_all(text.as_bytes());
            });
        }

        #[cfg(all(unix, not(test)))]
        let mut sighandle = None;
        #[cfg(all(unix, not(test)))]
        {
            if let Ok(mut signals) = Signals::new([SIGINT, SIGTERM, SIGHUP, SIGQUIT]) {
                sighandle = Some(signals.handle());
                let tx = tx.clone();
                thread::spawn(move || {
                    for sig in &mut signals {
                        let _ = tx.send(ChildOutput::Signal(sig));
                    }
                });
            }
        }

        thread::spawn(move || {
            let status = child.wait();
            #[cfg(all(unix, not(test)))]
            if let Some(h) = sighandle {
                h.close();
            }
            let _ = tx.send(ChildOutput::Exit(status));
        });

        let mut result = CmdResult::default();
        let mut exit_status = None;
        for msg in rx {
            match msg {
                ChildOutput::Stdout(line) => {
                    self.forward_stdout(&line);
                    result.stdout.push_str(&line);
                    result.stdout.push('\n');
                }
                ChildOutput::Stderr(line) => {
                    self.forward_stderr(&line);
                    result.stderr.push_str(&line);
                    result.stderr.push('\n');
                }
                ChildOutput::Exit(status) => {
                    RUNNING_PIDS.lock().unwrap().remove(&id);
                    exit_status = Some(status?);
                }
                #[cfg(all(unix, not(test)))]
                ChildOutput::Signal(sig) => {
                    if sig != SIGINT {
                        let pid = nix::unistd::Pid::from_raw(id as i32);
                        if let Ok(sig) = nix::sys::signal::Signal::try_from(sig) {
                            let _ = nix::sys::signal::kill(pid, sig);
                        }
                    }
                }
            }
        }
        RUNNING_PIDS.lock().unwrap().remove(&id);
        result.status = exit_status.expect("child exit status channel closed without a status");
        Ok(result)
    }

    fn execute_raw(mut self) -> std::io::Result<CmdResult> {
        self.cmd.stdin(Stdio::inherit());
        self.cmd.stdout(Stdio::inherit());
        self.cmd.stderr(Stdio::inherit());
        let status = self.cmd.spawn()?.wait()?;
        Ok(CmdResult { status, ..Default::default() })
    }

    fn forward_stdout(&self, line: &str) {
        let _lock = OUTPUT_LOCK.lock().unwrap();
        if let Some(f) = &self.on_stdout {
            f(line);
        } else {
            println!("{line}");
        }
    }

    fn forward_stderr(&self, line: &str) {
        let _lock = OUTPUT_LOCK.lock().unwrap();
        if let Some(f) = &self.on_stderr {
            f(line);
        } else {
            eprintln!("{line}");
        }
    }

    fn get_program(&self) -> String {
        self.cmd.get_program().to_string_lossy().to_string()
    }

    fn get_args(&self) -> Vec<String> {
        self.cmd.get_args().map(|s| s.to_string_lossy().to_string()).collect()
    }
}

enum ChildOutput {
    Stdout(String),
    Stderr(String),
    Exit(std::io::Result<ExitStatus>),
    #[cfg(all(unix, not(test)))]
    Signal(i32),
}

#[derive(Debug, Default)]
pub struct CmdResult {
    pub stdout: String,
    pub stderr: String,
    pub status: ExitStatus,
}

impl Display for CmdRunner<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.get_program(), self.get_args().join(" "))
    }
}

impl Debug for CmdRunner<'_> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
