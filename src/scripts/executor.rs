//! Script Executor
//!
//! Runs a compiled program against an [`ExecutionContext`] on the blocking
//! pool. Every run is held to a [`ResourceLimits`] budget: the interpreter
//! checks its deadline and step count between operations, and the caller
//! stops waiting once the deadline passes even if the blocking thread has
//! not noticed yet.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::{Result, TigerError};
use crate::scripts::{CompiledScript, ExecutionContext, Op, ResourceLimits};

/// Longest single nap while interpreting `sleep`; bounds deadline overshoot.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

// == Script Output ==
/// Response produced by a successful run.
#[derive(Debug, Clone, PartialEq)]
pub struct ScriptOutput {
    pub status: u16,
    pub content_type: String,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
    /// Final cacheability directive
    pub cacheable: bool,
}

// == Execution Stats ==
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ExecutionStats {
    pub runs: u64,
    pub succeeded: u64,
    pub timeouts: u64,
    pub faults: u64,
}

#[derive(Debug, Default)]
struct Counters {
    runs: AtomicU64,
    succeeded: AtomicU64,
    timeouts: AtomicU64,
    faults: AtomicU64,
}

// == Script Executor ==
#[derive(Debug)]
pub struct ScriptExecutor {
    limits: ResourceLimits,
    permits: Arc<Semaphore>,
    counters: Counters,
}

impl ScriptExecutor {
    /// Creates an executor allowing `max_concurrent` simultaneous runs.
    pub fn new(limits: ResourceLimits, max_concurrent: usize) -> Self {
        Self {
            limits,
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            counters: Counters::default(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(ResourceLimits::from_config(config), config.max_concurrent_scripts)
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    // == Execute ==
    /// Runs `script` for one request.
    ///
    /// # Errors
    /// - `ExecutionTimeout` when the deadline or step budget runs out,
    ///   including while waiting for a free executor slot
    /// - `ExecutionFault` when the program faults, overflows its output
    ///   budget or panics
    pub async fn execute(
        &self,
        script: Arc<CompiledScript>,
        context: ExecutionContext,
    ) -> Result<ScriptOutput> {
        self.counters.runs.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + self.limits.execution_timeout;
        let id = script.id.clone();

        let result = self.run(script, context, deadline).await;
        match &result {
            Ok(output) => {
                self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                debug!(
                    "Script {} answered {} with {} bytes",
                    id,
                    output.status,
                    output.body.len()
                );
            }
            Err(TigerError::ExecutionTimeout(reason)) => {
                self.counters.timeouts.fetch_add(1, Ordering::Relaxed);
                warn!("Script {} timed out: {}", id, reason);
            }
            Err(e) => {
                self.counters.faults.fetch_add(1, Ordering::Relaxed);
                warn!("Script {} failed: {}", id, e);
            }
        }
        result
    }

    async fn run(
        &self,
        script: Arc<CompiledScript>,
        context: ExecutionContext,
        deadline: Instant,
    ) -> Result<ScriptOutput> {
        let permit = match timeout_at(deadline, Arc::clone(&self.permits).acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(TigerError::Internal("executor is shut down".to_string())),
            Err(_) => {
                return Err(TigerError::ExecutionTimeout(
                    "no executor slot before the deadline".to_string(),
                ))
            }
        };

        let limits = self.limits.clone();
        let std_deadline = deadline.into_std();
        let task = tokio::task::spawn_blocking(move || {
            // Held until the interpreter returns, even if the caller gave up.
            let _permit = permit;
            Interpreter::new(&script, &context, &limits, std_deadline).run()
        });

        match timeout_at(deadline, task).await {
            Ok(Ok(result)) => result,
            Ok(Err(join)) if join.is_panic() => {
                Err(TigerError::ExecutionFault("script panicked".to_string()))
            }
            Ok(Err(join)) => Err(TigerError::Internal(join.to_string())),
            Err(_) => Err(TigerError::ExecutionTimeout(format!(
                "exceeded {} ms",
                self.limits.execution_timeout.as_millis()
            ))),
        }
    }

    // == Stats ==
    pub fn stats(&self) -> ExecutionStats {
        ExecutionStats {
            runs: self.counters.runs.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            timeouts: self.counters.timeouts.load(Ordering::Relaxed),
            faults: self.counters.faults.load(Ordering::Relaxed),
        }
    }

    /// Slots not currently held by a running script.
    pub fn available_slots(&self) -> usize {
        self.permits.available_permits()
    }
}

// == Interpreter ==
struct Interpreter<'a> {
    script: &'a CompiledScript,
    context: &'a ExecutionContext,
    limits: &'a ResourceLimits,
    deadline: std::time::Instant,
    steps: u64,
    status: u16,
    content_type: String,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
    cacheable: bool,
}

impl<'a> Interpreter<'a> {
    fn new(
        script: &'a CompiledScript,
        context: &'a ExecutionContext,
        limits: &'a ResourceLimits,
        deadline: std::time::Instant,
    ) -> Self {
        Self {
            script,
            context,
            limits,
            deadline,
            steps: 0,
            status: 200,
            content_type: script.manifest.content_type.clone(),
            headers: Vec::new(),
            body: Vec::new(),
            cacheable: script.manifest.cacheable,
        }
    }

    fn run(mut self) -> Result<ScriptOutput> {
        let script = self.script;
        self.block(&script.manifest.program)?;
        Ok(ScriptOutput {
            status: self.status,
            content_type: self.content_type,
            headers: self.headers,
            body: Bytes::from(self.body),
            cacheable: self.cacheable,
        })
    }

    fn block(&mut self, ops: &'a [Op]) -> Result<()> {
        let context = self.context;
        for op in ops {
            self.step()?;
            match op {
                Op::Text { value } => self.emit(value.as_bytes())?,
                Op::Method => self.emit(context.method.as_bytes())?,
                Op::Path => self.emit(context.key.path().as_bytes())?,
                Op::Query { name } => {
                    if let Some(value) = context.query_param(name) {
                        self.emit(value.as_bytes())?;
                    }
                }
                Op::Header { name } => {
                    if let Some(value) = context.header(name) {
                        self.emit(value.as_bytes())?;
                    }
                }
                Op::Body => self.emit(&context.body)?,
                Op::Status { code } => self.status = *code,
                Op::SetHeader { name, value } => {
                    self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
                    self.headers.push((name.clone(), value.clone()));
                }
                Op::ContentType { value } => self.content_type = value.clone(),
                Op::Cacheable { value } => self.cacheable = *value,
                Op::Sleep { millis } => self.sleep(Duration::from_millis(*millis))?,
                Op::Repeat { times, ops } => {
                    // Each iteration is a step, so an empty body still ends.
                    for _ in 0..*times {
                        self.step()?;
                        self.block(ops)?;
                    }
                }
                Op::Fault { message } => {
                    return Err(TigerError::ExecutionFault(message.clone()));
                }
            }
        }
        Ok(())
    }

    fn step(&mut self) -> Result<()> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(TigerError::ExecutionTimeout(format!(
                "step limit of {} exceeded",
                self.limits.max_steps
            )));
        }
        self.check_deadline()
    }

    fn check_deadline(&self) -> Result<()> {
        if std::time::Instant::now() >= self.deadline {
            return Err(TigerError::ExecutionTimeout(format!(
                "exceeded {} ms",
                self.limits.execution_timeout.as_millis()
            )));
        }
        Ok(())
    }

    fn emit(&mut self, bytes: &[u8]) -> Result<()> {
        if self.body.len() + bytes.len() > self.limits.max_output {
            return Err(TigerError::ExecutionFault(format!(
                "output exceeds {} bytes",
                self.limits.max_output
            )));
        }
        self.body.extend_from_slice(bytes);
        Ok(())
    }

    fn sleep(&self, total: Duration) -> Result<()> {
        let wake = std::time::Instant::now() + total;
        loop {
            self.check_deadline()?;
            let now = std::time::Instant::now();
            if now >= wake {
                return Ok(());
            }
            std::thread::sleep((wake - now).min(SLEEP_SLICE));
        }
    }
}
