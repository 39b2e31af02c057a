// Out-of-process worker pipeline
//
// One driver task owns the worker's stdin/stdout and a FIFO of pending
// requests. Only the head of the queue is outstanding against the current
// incarnation, and responses are matched by arrival order, never by id.
//
//   Starting --spawned--> Ready --EOF / write error / timeout--> Draining
//      ^                                                           |
//      +-----------------------------------------------------------+
//   Starting --respawn_limit consecutive failures--> Dead
//   any state --exit()--> Stopping
//
// A lost incarnation leaves the head in place; the next incarnation gets it
// again (at-least-once delivery).

use std::collections::VecDeque;
use std::fmt;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, timeout, Instant};

use super::{parse_timing, Ticket, TimingSource};
use crate::config::PipelineConfig;
use crate::error::{ProbeError, Result};
use crate::probe::ProbeBody;

/// Program and arguments used to start each worker incarnation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }

    /// External worker started as `<program> <port> <host>`
    pub fn external(program: impl Into<PathBuf>, port: u16, host: &str) -> Self {
        Self::new(program, vec![port.to_string(), host.to_string()])
    }

    /// This binary's own `worker` subcommand
    pub fn self_worker(port: u16, host: &str) -> Result<Self> {
        let program = std::env::current_exe().map_err(|e| {
            ProbeError::WorkerSpawn(format!("cannot locate own executable: {}", e))
        })?;
        Ok(Self::new(
            program,
            vec!["worker".to_string(), port.to_string(), host.to_string()],
        ))
    }

    fn spawn(&self) -> std::io::Result<Child> {
        Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
    }
}

impl fmt::Display for WorkerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.display())?;
        for arg in &self.args {
            write!(f, " {}", arg)?;
        }
        Ok(())
    }
}

/// Snapshot of the pipeline counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Worker processes started
    pub incarnations: u64,
    /// Response lines delivered to callers
    pub responses: u64,
    /// Bodies written again after their incarnation was lost
    pub resubmissions: u64,
}

#[derive(Debug, Default)]
struct Counters {
    incarnations: AtomicU64,
    responses: AtomicU64,
    resubmissions: AtomicU64,
}

struct Request {
    body: Arc<str>,
    reply: oneshot::Sender<Result<f64>>,
    attempts: usize,
}

struct Incarnation {
    id: u64,
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    /// Bytes of the current response line read so far
    partial: Vec<u8>,
    /// Set while the head of the queue is outstanding
    deadline: Option<Instant>,
    answered: bool,
}

enum Dispatch {
    Written,
    /// Nothing left to write
    Idle,
    Failed(String),
    Shutdown,
}

enum State {
    Starting,
    Ready(Incarnation),
    Draining(Incarnation, String),
    Dead(ProbeError),
    Stopping(Option<Incarnation>),
}

struct Driver {
    command: WorkerCommand,
    config: PipelineConfig,
    inbound: mpsc::UnboundedReceiver<Request>,
    inbound_open: bool,
    shutdown: oneshot::Receiver<()>,
    queue: VecDeque<Request>,
    counters: Arc<Counters>,
    spawned: u64,
    /// Consecutive incarnations that failed to start or died without answering
    unproductive: usize,
    last_failure: String,
}

impl Driver {
    async fn run(mut self) {
        let mut state = State::Starting;
        loop {
            state = match state {
                State::Starting => self.start().await,
                State::Ready(incarnation) => self.serve(incarnation).await,
                State::Draining(incarnation, reason) => self.drain(incarnation, reason).await,
                State::Dead(err) => {
                    self.dead(err).await;
                    return;
                }
                State::Stopping(incarnation) => {
                    self.stop(incarnation).await;
                    return;
                }
            };
        }
    }

    async fn start(&mut self) -> State {
        if self.unproductive >= self.config.respawn_limit.max(1) {
            return State::Dead(ProbeError::WorkerSpawn(format!(
                "{} consecutive incarnations of `{}` failed, last: {}",
                self.unproductive, self.command, self.last_failure
            )));
        }

        if self.spawned > 0 || self.unproductive > 0 {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => return State::Stopping(None),
                _ = sleep(self.config.respawn_backoff()) => {}
            }
        }

        let mut child = match self.command.spawn() {
            Ok(child) => child,
            Err(err) => {
                tracing::warn!(command = %self.command, error = %err, "failed to spawn worker");
                self.unproductive += 1;
                self.last_failure = err.to_string();
                return State::Starting;
            }
        };

        let (stdin, stdout) = match (child.stdin.take(), child.stdout.take()) {
            (Some(stdin), Some(stdout)) => (stdin, stdout),
            _ => {
                let _ = child.start_kill();
                self.unproductive += 1;
                self.last_failure = "worker stdio was not captured".to_string();
                return State::Starting;
            }
        };

        self.spawned += 1;
        self.counters.incarnations.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(incarnation = self.spawned, pid = ?child.id(), "worker started");

        State::Ready(Incarnation {
            id: self.spawned,
            child,
            stdin,
            stdout: BufReader::new(stdout),
            partial: Vec::new(),
            deadline: None,
            answered: false,
        })
    }

    async fn serve(&mut self, mut incarnation: Incarnation) -> State {
        loop {
            if incarnation.deadline.is_none() {
                match self.dispatch_head(&mut incarnation).await {
                    Dispatch::Written | Dispatch::Idle => {}
                    Dispatch::Failed(reason) => return State::Draining(incarnation, reason),
                    Dispatch::Shutdown => return State::Stopping(Some(incarnation)),
                }
            }
            if self.queue.is_empty() && !self.inbound_open {
                return State::Stopping(Some(incarnation));
            }

            let deadline = incarnation.deadline;
            tokio::select! {
                biased;
                _ = &mut self.shutdown => return State::Stopping(Some(incarnation)),
                // read_until keeps partial bytes in `partial` when another branch wins
                read = incarnation.stdout.read_until(b'\n', &mut incarnation.partial) => match read {
                    Ok(0) if incarnation.partial.is_empty() => {
                        return State::Draining(incarnation, "worker closed its output".to_string());
                    }
                    Ok(_) if incarnation.partial.ends_with(b"\n") => {
                        let line = std::mem::take(&mut incarnation.partial);
                        self.complete_head(&mut incarnation, &String::from_utf8_lossy(&line));
                    }
                    // Only EOF stops read_until short of the delimiter
                    Ok(_) => {
                        let reason = "worker closed its output mid-response".to_string();
                        return State::Draining(incarnation, reason);
                    }
                    Err(err) => {
                        return State::Draining(incarnation, format!("read failed: {}", err));
                    }
                },
                request = self.inbound.recv(), if self.inbound_open => match request {
                    Some(request) => self.queue.push_back(request),
                    None => self.inbound_open = false,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let reason = format!("no response within {:?}", self.config.request_timeout());
                    return State::Draining(incarnation, reason);
                }
            }
        }
    }

    /// Write the head of the queue, failing requests whose attempts ran out
    async fn dispatch_head(&mut self, incarnation: &mut Incarnation) -> Dispatch {
        while let Some(head) = self.queue.front_mut() {
            if head.reply.is_closed() {
                self.queue.pop_front();
                continue;
            }
            if head.attempts >= self.config.max_attempts {
                if let Some(head) = self.queue.pop_front() {
                    let err = ProbeError::WorkerIo(format!(
                        "request abandoned after {} delivery attempts",
                        head.attempts
                    ));
                    let _ = head.reply.send(Err(err));
                }
                continue;
            }

            head.attempts += 1;
            if head.attempts > 1 {
                self.counters.resubmissions.fetch_add(1, Ordering::Relaxed);
            }

            let body = Arc::clone(&head.body);
            let stdin = &mut incarnation.stdin;
            let write = async {
                stdin.write_all(body.as_bytes()).await?;
                stdin.write_all(b"\n").await?;
                stdin.flush().await
            };

            let request_timeout = self.config.request_timeout();
            // A worker that stops reading must not hold up exit()
            let written = tokio::select! {
                biased;
                _ = &mut self.shutdown => return Dispatch::Shutdown,
                written = timeout(request_timeout, write) => written,
            };
            return match written {
                Ok(Ok(())) => {
                    incarnation.deadline = Some(Instant::now() + request_timeout);
                    Dispatch::Written
                }
                Ok(Err(err)) => Dispatch::Failed(format!("write failed: {}", err)),
                Err(_) => Dispatch::Failed(format!("write blocked for {:?}", request_timeout)),
            };
        }
        Dispatch::Idle
    }

    fn complete_head(&mut self, incarnation: &mut Incarnation, line: &str) {
        if incarnation.deadline.take().is_none() {
            tracing::warn!(incarnation = incarnation.id, line, "ignoring unsolicited worker output");
            return;
        }

        incarnation.answered = true;
        self.unproductive = 0;
        self.counters.responses.fetch_add(1, Ordering::Relaxed);

        if let Some(head) = self.queue.pop_front() {
            // An unparseable line is still an answer: no retry
            let _ = head.reply.send(parse_timing(line));
        }
    }

    async fn drain(&mut self, mut incarnation: Incarnation, reason: String) -> State {
        tracing::warn!(
            incarnation = incarnation.id,
            reason = %reason,
            pending = self.queue.len(),
            "worker lost, respawning"
        );

        if !incarnation.answered {
            self.unproductive += 1;
        }
        self.last_failure = reason;

        let _ = incarnation.child.start_kill();
        let _ = incarnation.child.wait().await;
        State::Starting
    }

    async fn dead(&mut self, err: ProbeError) {
        tracing::warn!(error = %err, "worker pipeline is dead");

        for request in self.queue.drain(..) {
            let _ = request.reply.send(Err(err.clone()));
        }

        loop {
            tokio::select! {
                biased;
                _ = &mut self.shutdown => break,
                request = self.inbound.recv() => match request {
                    Some(request) => {
                        let _ = request.reply.send(Err(err.clone()));
                    }
                    None => break,
                },
            }
        }
        self.inbound.close();
    }

    async fn stop(&mut self, incarnation: Option<Incarnation>) {
        // Dropped reply senders resolve their tickets to PipelineClosed
        self.inbound.close();
        self.queue.clear();
        while self.inbound.try_recv().is_ok() {}

        if let Some(incarnation) = incarnation {
            self.terminate(incarnation).await;
        }
        tracing::debug!(incarnations = self.spawned, "worker pipeline stopped");
    }

    /// SIGTERM, then kill once the grace period expires
    async fn terminate(&self, incarnation: Incarnation) {
        let Incarnation {
            id,
            mut child,
            stdin,
            ..
        } = incarnation;
        drop(stdin);

        if let Some(pid) = child.id().and_then(|pid| i32::try_from(pid).ok()) {
            if let Err(err) = kill(Pid::from_raw(pid), Signal::SIGTERM) {
                tracing::debug!(incarnation = id, error = %err, "SIGTERM failed");
            }
        }

        if timeout(self.config.shutdown_grace(), child.wait()).await.is_err() {
            tracing::warn!(incarnation = id, "worker ignored SIGTERM, killing");
            let _ = child.kill().await;
        }
    }
}

/// Timing source backed by a respawning worker process
pub struct WorkerPipeline {
    requests: mpsc::UnboundedSender<Request>,
    shutdown: Mutex<Option<oneshot::Sender<()>>>,
    driver: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
    counters: Arc<Counters>,
}

impl WorkerPipeline {
    /// Start the driver task and the first worker incarnation
    ///
    /// Must be called from within a tokio runtime. Dropping the pipeline
    /// without `exit()` shuts the driver down the same way.
    pub fn start(command: WorkerCommand, config: PipelineConfig) -> Self {
        let (requests, inbound) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown) = oneshot::channel();
        let counters = Arc::new(Counters::default());

        let driver = Driver {
            command,
            config,
            inbound,
            inbound_open: true,
            shutdown,
            queue: VecDeque::new(),
            counters: Arc::clone(&counters),
            spawned: 0,
            unproductive: 0,
            last_failure: String::new(),
        };
        let handle = tokio::spawn(driver.run());

        Self {
            requests,
            shutdown: Mutex::new(Some(shutdown_tx)),
            driver: Mutex::new(Some(handle)),
            closed: AtomicBool::new(false),
            counters,
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            incarnations: self.counters.incarnations.load(Ordering::Relaxed),
            responses: self.counters.responses.load(Ordering::Relaxed),
            resubmissions: self.counters.resubmissions.load(Ordering::Relaxed),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Terminate the worker and discard every pending request
    ///
    /// When this returns no ticket can resolve to a timing any more, and every
    /// later `submit` fails with `PipelineClosed`.
    pub async fn exit(&self) {
        self.closed.store(true, Ordering::SeqCst);

        let shutdown = self.shutdown.lock().ok().and_then(|mut slot| slot.take());
        if let Some(shutdown) = shutdown {
            let _ = shutdown.send(());
        }

        let driver = self.driver.lock().ok().and_then(|mut slot| slot.take());
        if let Some(driver) = driver {
            if let Err(err) = driver.await {
                tracing::warn!(error = %err, "pipeline driver task failed");
            }
        }
    }
}

impl fmt::Debug for WorkerPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPipeline")
            .field("closed", &self.is_closed())
            .field("stats", &self.stats())
            .finish()
    }
}

impl TimingSource for WorkerPipeline {
    fn submit(&self, body: &ProbeBody) -> Result<Ticket> {
        if self.is_closed() {
            return Err(ProbeError::PipelineClosed);
        }

        let (reply, receiver) = oneshot::channel();
        self.requests
            .send(Request {
                body: body.shared(),
                reply,
                attempts: 0,
            })
            .map_err(|_| ProbeError::PipelineClosed)?;

        Ok(Ticket::pending(receiver))
    }
}
