//! Host process runner built on `tokio::process`.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, warn};

use super::{CommandOutput, CommandRunner, CommandSpec, ExecError, ExecResult, LineSink};

/// How long a terminated child gets to exit before it is killed.
pub const DEFAULT_GRACE_PERIOD: Duration = Duration::from_secs(10);

/// How long to keep reading buffered output once the child has exited.
const EXIT_DRAIN_WINDOW: Duration = Duration::from_millis(500);

const GROUP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Which pipe a line was read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamSource {
    Stdout,
    Stderr,
}

/// One line of child output, without its trailing newline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLine {
    pub source: StreamSource,
    pub text: String,
}

/// Lazy, finite sequence of output lines from a child's stdout and stderr.
///
/// Both pipes are read concurrently; lines are yielded in arrival order.
/// The sequence ends once both pipes are closed.
pub struct OutputLines {
    rx: mpsc::UnboundedReceiver<OutputLine>,
}

impl OutputLines {
    /// Take the child's piped stdout/stderr and start reading them.
    pub fn from_child(child: &mut Child) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(stdout, StreamSource::Stdout, tx.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(stderr, StreamSource::Stderr, tx));
        }
        Self { rx }
    }

    /// Next line, or `None` when both pipes have closed.
    pub async fn next(&mut self) -> Option<OutputLine> {
        self.rx.recv().await
    }
}

async fn forward_lines<R>(reader: R, source: StreamSource, tx: mpsc::UnboundedSender<OutputLine>)
where
    R: AsyncRead + Unpin,
{
    let mut segments = BufReader::new(reader).split(b'\n');
    while let Ok(Some(mut bytes)) = segments.next_segment().await {
        if bytes.last() == Some(&b'\r') {
            bytes.pop();
        }
        let text = String::from_utf8_lossy(&bytes).into_owned();
        if tx.send(OutputLine { source, text }).is_err() {
            break;
        }
    }
}

#[derive(Default)]
struct Collected {
    stdout: String,
    stderr: String,
}

impl Collected {
    fn push(&mut self, line: &OutputLine) {
        let buf = match line.source {
            StreamSource::Stdout => &mut self.stdout,
            StreamSource::Stderr => &mut self.stderr,
        };
        buf.push_str(&line.text);
        buf.push('\n');
    }
}

/// Runs commands on the host.
///
/// Each child is spawned as the leader of a new process group. When built
/// with [`with_interrupt`](Self::with_interrupt), flipping the watched flag
/// to `true` terminates that group (SIGTERM, then SIGKILL after the grace
/// period) and makes every later `capture`/`stream` call fail with
/// [`ExecError::Interrupted`] without spawning anything. `cleanup` still runs.
#[derive(Debug, Clone)]
pub struct SystemRunner {
    interrupt: Option<watch::Receiver<bool>>,
    grace_period: Duration,
}

impl Default for SystemRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemRunner {
    pub fn new() -> Self {
        Self {
            interrupt: None,
            grace_period: DEFAULT_GRACE_PERIOD,
        }
    }

    /// Watch `interrupt` for an operator cancellation request.
    pub fn with_interrupt(mut self, interrupt: watch::Receiver<bool>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn with_grace_period(mut self, grace_period: Duration) -> Self {
        self.grace_period = grace_period;
        self
    }

    fn is_interrupted(&self) -> bool {
        self.interrupt.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn supervise(
        &self,
        spec: &CommandSpec,
        sink: &mut LineSink<'_>,
        mut interrupt: Option<watch::Receiver<bool>>,
    ) -> ExecResult<CommandOutput> {
        let command_line = spec.to_string();
        if interrupt.as_ref().is_some_and(|rx| *rx.borrow()) {
            return Err(ExecError::Interrupted {
                command: command_line,
            });
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        // The child leads its own process group so an interrupt reaches
        // everything it forked.
        #[cfg(unix)]
        cmd.process_group(0);
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        debug!(command = %command_line, "spawning");
        let mut child = cmd.spawn().map_err(|source| ExecError::Spawn {
            program: spec.program.clone(),
            source,
        })?;
        let group = child.id();

        let mut lines = OutputLines::from_child(&mut child);
        let mut collected = Collected::default();
        let mut pipes_open = true;

        // Exit is observed through `wait`, not through the pipes: a grandchild
        // may keep a pipe open long after the child itself is gone.
        let status = loop {
            tokio::select! {
                line = lines.next(), if pipes_open => match line {
                    Some(line) => {
                        sink(&line.text);
                        collected.push(&line);
                    }
                    None => pipes_open = false,
                },
                status = child.wait() => break status,
                () = interrupted(&mut interrupt) => {
                    warn!(command = %command_line, "interrupt received, terminating child process group");
                    terminate(&mut child, group, self.grace_period).await;
                    return Err(ExecError::Interrupted { command: command_line });
                }
            }
        };

        // One deadline for the whole drain; a grandchild that keeps writing
        // cannot extend it.
        let deadline = Instant::now() + EXIT_DRAIN_WINDOW;
        while pipes_open {
            tokio::select! {
                line = tokio::time::timeout_at(deadline, lines.next()) => match line {
                    Ok(Some(line)) => {
                        sink(&line.text);
                        collected.push(&line);
                    }
                    Ok(None) => pipes_open = false,
                    Err(_) => {
                        debug!(command = %command_line, "output still open after exit, no longer reading");
                        break;
                    }
                },
                () = interrupted(&mut interrupt) => {
                    warn!(command = %command_line, "interrupt received, terminating child process group");
                    terminate(&mut child, group, self.grace_period).await;
                    return Err(ExecError::Interrupted { command: command_line });
                }
            }
        }

        let status = status.map_err(|source| ExecError::Io {
            command: command_line.clone(),
            source,
        })?;
        let exit_code = status.code().unwrap_or(-1);
        debug!(command = %command_line, exit_code, "process exited");

        Ok(CommandOutput {
            exit_code,
            stdout: collected.stdout,
            stderr: collected.stderr,
        })
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn capture(&self, spec: &CommandSpec) -> ExecResult<CommandOutput> {
        self.supervise(spec, &mut |_line: &str| {}, self.interrupt.clone())
            .await
    }

    async fn stream(
        &self,
        spec: &CommandSpec,
        sink: &mut LineSink<'_>,
    ) -> ExecResult<CommandOutput> {
        self.supervise(spec, sink, self.interrupt.clone()).await
    }

    async fn cleanup(&self, spec: &CommandSpec) -> ExecResult<CommandOutput> {
        if self.is_interrupted() {
            debug!(command = %spec, "running cleanup after interrupt");
        }
        self.supervise(spec, &mut |_line: &str| {}, None).await
    }
}

/// Resolves once the flag is `true`; pends forever without a receiver or
/// after the sender is gone.
async fn interrupted(rx: &mut Option<watch::Receiver<bool>>) {
    if let Some(rx) = rx {
        if rx.wait_for(|flag| *flag).await.is_ok() {
            return;
        }
    }
    std::future::pending::<()>().await
}

/// SIGTERM the child's process group, give it `grace_period` to empty out,
/// then SIGKILL whatever is left.
async fn terminate(child: &mut Child, group: Option<u32>, grace_period: Duration) {
    let deadline = Instant::now() + grace_period;
    signal_group(child, group, Signal::Terminate);

    let exited = tokio::time::timeout_at(deadline, child.wait()).await.is_ok();
    while group_alive(group) && Instant::now() < deadline {
        tokio::time::sleep(GROUP_POLL_INTERVAL).await;
    }

    if !exited || group_alive(group) {
        warn!(
            grace_secs = grace_period.as_secs(),
            "process group ignored termination request, killing"
        );
        signal_group(child, group, Signal::Kill);
    }
    if !exited {
        if let Err(e) = child.kill().await {
            warn!(error = %e, "failed to kill child process");
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(_child: &mut Child, group: Option<u32>, signal: Signal) {
    let Some(pgid) = group else { return };
    let signo = match signal {
        Signal::Terminate => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
    };
    // SAFETY: `pgid` is the group this runner created for its child; the id
    // is not reused while any member of the group is alive.
    let rc = unsafe { libc::kill(-(pgid as libc::pid_t), signo) };
    if rc != 0 {
        debug!(pgid, ?signal, "signal delivery failed, group already gone");
    }
}

#[cfg(not(unix))]
fn signal_group(child: &mut Child, _group: Option<u32>, _signal: Signal) {
    let _ = child.start_kill();
}

#[cfg(unix)]
fn group_alive(group: Option<u32>) -> bool {
    let Some(pgid) = group else { return false };
    // SAFETY: signal 0 only checks that the group exists.
    unsafe { libc::kill(-(pgid as libc::pid_t), 0) == 0 }
}

#[cfg(not(unix))]
fn group_alive(_group: Option<u32>) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> CommandSpec {
        CommandSpec::new("sh").args(["-c", script])
    }

    #[tokio::test]
    async fn test_capture_simple_command() {
        let out = SystemRunner::new()
            .capture(&CommandSpec::new("echo").arg("hello"))
            .await
            .expect("capture failed");
        assert!(out.success());
        assert_eq!(out.stdout, "hello\n");
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_capture_keeps_streams_apart() {
        let out = SystemRunner::new()
            .capture(&sh("echo out; echo err >&2; exit 3"))
            .await
            .expect("capture failed");
        assert_eq!(out.exit_code, 3);
        assert_eq!(out.stdout, "out\n");
        assert_eq!(out.stderr, "err\n");
    }

    #[tokio::test]
    async fn test_stream_forwards_lines_in_order() {
        let mut seen = Vec::new();
        let out = SystemRunner::new()
            .stream(&sh("echo one; sleep 0.1; echo two"), &mut |line: &str| {
                seen.push(line.to_string())
            })
            .await
            .expect("stream failed");
        assert!(out.success());
        assert_eq!(seen, vec!["one", "two"]);
    }

    #[tokio::test]
    async fn test_capture_respects_current_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = SystemRunner::new()
            .capture(&CommandSpec::new("pwd").current_dir(dir.path()))
            .await
            .expect("capture failed");
        let reported = std::fs::canonicalize(out.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let err = SystemRunner::new()
            .capture(&CommandSpec::new("definitely_not_a_real_command_12345"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_interrupted_runner_refuses_to_spawn() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let err = SystemRunner::new()
            .with_interrupt(rx)
            .capture(&CommandSpec::new("echo").arg("hello"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Interrupted { .. }));
    }

    #[tokio::test]
    async fn test_exit_detected_while_grandchild_holds_pipe() {
        let started = std::time::Instant::now();
        let out = SystemRunner::new()
            .capture(&sh("echo done; sleep 30 &"))
            .await
            .expect("capture failed");
        assert!(out.success());
        assert_eq!(out.stdout, "done\n");
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_cleanup_runs_after_interrupt() {
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let out = SystemRunner::new()
            .with_interrupt(rx)
            .cleanup(&CommandSpec::new("echo").arg("removed"))
            .await
            .expect("cleanup refused after interrupt");
        assert_eq!(out.stdout, "removed\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_drain_is_bounded_when_grandchild_keeps_writing() {
        let script = "echo $$; (while :; do echo tick; sleep 0.1; done) & echo started";
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            SystemRunner::new().capture(&sh(script)),
        )
        .await;

        let out = result
            .expect("drain never finished")
            .expect("capture failed");
        assert!(out.success());
        assert!(out.stdout.contains("started"));

        let pgid: i32 = out.stdout.lines().next().unwrap().trim().parse().unwrap();
        unsafe { libc::kill(-pgid, libc::SIGKILL) };
    }
}
