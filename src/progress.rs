// Progress bridge: normalizes an external engine's ad-hoc progress signal
// into a single monotone 0..1 value, and supervises the engine process —
// stall detection, cancellation, and termination escalation.
//
// The bridge owns the child process exclusively for the duration of
// `run_supervised`; no other component reads its pipes.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, warn};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// How long a terminated engine gets to exit before the forced kill.
const KILL_GRACE: Duration = Duration::from_secs(5);

/// Diagnostic lines kept from the engine's chatter stream.
const DIAGNOSTIC_TAIL_LINES: usize = 40;

pub type ProgressCallback = Arc<dyn Fn(f64) + Send + Sync>;

/// A single parsed signal from an engine's progress stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    /// Normalized completion fraction.
    Fraction(f64),
    /// The engine's explicit end-of-stream sentinel. Forces 1.0 even when
    /// the computed ratio undershoots due to rounding.
    Completed,
}

/// Normalized progress handle with an enforced contract: values are clamped
/// to [0, 1] and never decrease; `finish` always lands on 1.0.
pub struct ProgressSink {
    callback: Option<ProgressCallback>,
    last_bits: AtomicU64,
}

impl ProgressSink {
    pub fn new(callback: ProgressCallback) -> Self {
        ProgressSink {
            callback: Some(callback),
            last_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    /// A sink that enforces the contract but reports to nobody.
    pub fn silent() -> Self {
        ProgressSink {
            callback: None,
            last_bits: AtomicU64::new(0f64.to_bits()),
        }
    }

    pub fn report(&self, value: f64) {
        let value = if value.is_finite() {
            value.clamp(0.0, 1.0)
        } else {
            return;
        };

        // Engines occasionally emit regressions (seeks, segment reorders);
        // drop them instead of passing them downstream.
        let mut current = self.last_bits.load(Ordering::Acquire);
        loop {
            if value < f64::from_bits(current) {
                return;
            }
            match self.last_bits.compare_exchange(
                current,
                value.to_bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        if let Some(cb) = &self.callback {
            cb(value);
        }
    }

    pub fn finish(&self) {
        self.report(1.0);
    }

    pub fn apply(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::Fraction(value) => self.report(value),
            ProgressEvent::Completed => self.finish(),
        }
    }

    pub fn last(&self) -> f64 {
        f64::from_bits(self.last_bits.load(Ordering::Acquire))
    }
}

#[derive(Debug, Error)]
pub enum EngineFailure {
    #[error("{engine} produced no progress for {stalled_for:?} and was killed: {diagnostics}")]
    Stalled {
        engine: String,
        stalled_for: Duration,
        diagnostics: String,
    },
    #[error("{engine} exited with status {status}: {diagnostics}")]
    Failed {
        engine: String,
        status: i32,
        diagnostics: String,
    },
    #[error("failed to drive {engine}: {source}")]
    Io {
        engine: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{engine} invocation cancelled")]
    Cancelled { engine: String },
}

impl EngineFailure {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, EngineFailure::Cancelled { .. })
    }
}

/// Ask the engine to exit, then force the issue after a grace period.
/// On unix this is SIGTERM followed by SIGKILL; elsewhere only the forced
/// kill is available.
async fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Some(pid) = child.id() {
            unsafe {
                libc::kill(pid as libc::pid_t, libc::SIGTERM);
            }
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
                return;
            }
            warn!("engine ignored the termination signal; killing it");
        }
    }

    if let Err(e) = child.kill().await {
        warn!("failed to kill engine process: {}", e);
    }
}

/// Collect the trailing lines of a diagnostic stream in the background so
/// the pipe never backs up while the progress loop runs.
fn collect_tail<R>(stream: R) -> JoinHandle<String>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        let mut tail: Vec<String> = Vec::new();
        while let Ok(Some(line)) = lines.next_line().await {
            if tail.len() == DIAGNOSTIC_TAIL_LINES {
                tail.remove(0);
            }
            tail.push(line);
        }
        tail.join("\n")
    })
}

async fn finish_tail(handle: JoinHandle<String>) -> String {
    match handle.await {
        Ok(tail) => tail,
        Err(_) => String::new(),
    }
}

/// Drive an engine child process to completion.
///
/// `progress` is the pipe carrying the engine's native progress signal;
/// each line goes through `parse`, and parsed events feed the sink.
/// `diagnostics` is the other pipe, buffered for error reporting. No line
/// on the progress pipe for `stall_timeout` means the engine is hung: it is
/// terminated and the failure carries the diagnostic tail. Returns the
/// diagnostic tail on success.
pub async fn run_supervised<P, D, F>(
    engine: &str,
    child: &mut Child,
    progress: P,
    diagnostics: D,
    parse: F,
    sink: &ProgressSink,
    stall_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<String, EngineFailure>
where
    P: AsyncRead + Unpin,
    D: AsyncRead + Unpin + Send + 'static,
    F: Fn(&str) -> Option<ProgressEvent>,
{
    let tail = collect_tail(diagnostics);
    let mut lines = BufReader::new(progress).lines();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                debug!("{}: cancellation requested, terminating", engine);
                terminate(child).await;
                finish_tail(tail).await;
                return Err(EngineFailure::Cancelled { engine: engine.to_string() });
            }
            next = tokio::time::timeout(stall_timeout, lines.next_line()) => {
                match next {
                    Err(_) => {
                        terminate(child).await;
                        return Err(EngineFailure::Stalled {
                            engine: engine.to_string(),
                            stalled_for: stall_timeout,
                            diagnostics: finish_tail(tail).await,
                        });
                    }
                    Ok(Ok(Some(line))) => {
                        if let Some(event) = parse(&line) {
                            sink.apply(event);
                        }
                    }
                    Ok(Ok(None)) => break, // progress stream closed, engine is wrapping up
                    Ok(Err(e)) => {
                        terminate(child).await;
                        finish_tail(tail).await;
                        return Err(EngineFailure::Io { engine: engine.to_string(), source: e });
                    }
                }
            }
        }
    }

    let status = match tokio::time::timeout(stall_timeout, child.wait()).await {
        Ok(Ok(status)) => status,
        Ok(Err(e)) => {
            finish_tail(tail).await;
            return Err(EngineFailure::Io {
                engine: engine.to_string(),
                source: e,
            });
        }
        Err(_) => {
            terminate(child).await;
            return Err(EngineFailure::Stalled {
                engine: engine.to_string(),
                stalled_for: stall_timeout,
                diagnostics: finish_tail(tail).await,
            });
        }
    };

    let diagnostics = finish_tail(tail).await;
    if !status.success() {
        return Err(EngineFailure::Failed {
            engine: engine.to_string(),
            status: status.code().unwrap_or(-1),
            diagnostics,
        });
    }

    Ok(diagnostics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Stdio;
    use std::sync::Mutex;
    use tokio::process::Command;

    #[test]
    fn test_sink_clamps_and_stays_monotone() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_cb = seen.clone();
        let sink = ProgressSink::new(Arc::new(move |v| seen_cb.lock().unwrap().push(v)));

        sink.report(0.5);
        sink.report(0.25); // regression, dropped
        sink.report(2.0); // clamped
        sink.report(f64::NAN); // ignored

        assert_eq!(*seen.lock().unwrap(), vec![0.5, 1.0]);
        assert_eq!(sink.last(), 1.0);
    }

    #[test]
    fn test_finish_forces_one() {
        let sink = ProgressSink::silent();
        sink.report(0.93);
        sink.finish();
        assert_eq!(sink.last(), 1.0);
    }

    fn spawn_sh(script: &str) -> Child {
        Command::new("sh")
            .arg("-c")
            .arg(script)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .unwrap()
    }

    fn fraction_parser(line: &str) -> Option<ProgressEvent> {
        line.trim().parse::<f64>().ok().map(ProgressEvent::Fraction)
    }

    #[tokio::test]
    async fn test_supervise_happy_path() {
        let mut child = spawn_sh("echo 0.25; echo 0.75; echo oops >&2");
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        let sink = ProgressSink::silent();
        let cancel = CancellationToken::new();

        let diagnostics = run_supervised(
            "test-engine",
            &mut child,
            stdout,
            stderr,
            fraction_parser,
            &sink,
            Duration::from_secs(5),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(sink.last(), 0.75);
        assert_eq!(diagnostics, "oops");
    }

    #[tokio::test]
    async fn test_supervise_nonzero_exit() {
        let mut child = spawn_sh("echo 0.5; echo broken >&2; exit 3");
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        let sink = ProgressSink::silent();
        let cancel = CancellationToken::new();

        let err = run_supervised(
            "test-engine",
            &mut child,
            stdout,
            stderr,
            fraction_parser,
            &sink,
            Duration::from_secs(5),
            &cancel,
        )
        .await
        .unwrap_err();

        match err {
            EngineFailure::Failed { status, diagnostics, .. } => {
                assert_eq!(status, 3);
                assert!(diagnostics.contains("broken"));
            }
            other => panic!("expected Failed, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_supervise_stall_kills_process() {
        let mut child = spawn_sh("sleep 30");
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        let sink = ProgressSink::silent();
        let cancel = CancellationToken::new();

        let err = run_supervised(
            "test-engine",
            &mut child,
            stdout,
            stderr,
            fraction_parser,
            &sink,
            Duration::from_millis(100),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(matches!(err, EngineFailure::Stalled { .. }));
    }

    #[tokio::test]
    async fn test_supervise_honors_cancellation() {
        let mut child = spawn_sh("sleep 30");
        let stdout = child.stdout.take().unwrap();
        let stderr = child.stderr.take().unwrap();
        let sink = ProgressSink::silent();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = run_supervised(
            "test-engine",
            &mut child,
            stdout,
            stderr,
            fraction_parser,
            &sink,
            Duration::from_secs(5),
            &cancel,
        )
        .await
        .unwrap_err();

        assert!(err.is_cancelled());
    }
}
