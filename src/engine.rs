//! Embedding API for Kestrel
//!
//! An `Engine` owns the global scope, the host type registry and the named
//! schedulers. Every `execute` runs on a fresh [`Interpreter`] over the same
//! globals, so definitions persist between calls.

use std::any::Any;
use std::collections::{HashMap, VecDeque};
use std::ops::RangeInclusive;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::Deserialize;
use tracing::{debug, error, warn};

use crate::ast::Program;
use crate::environment::Scope;
use crate::error::{ErrorKind, KestrelError, Result};
use crate::gc::Collector;
use crate::host::{HostClass, HostRegistry};
use crate::interpreter::Interpreter;
use crate::lexer::Lexer;
use crate::natives;
use crate::parser::Parser;
use crate::value::{NativeFunction, Value};

/// Opaque host context that natives may retrieve
pub type HostContext = Arc<dyn Any + Send + Sync>;

/// Engine settings, loadable from TOML
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Nested script calls allowed before a stack overflow error
    pub max_call_depth: usize,
    /// Install the built-in native library
    pub stdlib: bool,
    /// Whether `print` writes to stdout
    pub echo_print: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_call_depth: 256,
            stdlib: true,
            echo_print: true,
        }
    }
}

impl EngineConfig {
    pub fn from_toml_str(source: &str) -> Result<Self> {
        toml::from_str(source).map_err(|e| {
            KestrelError::new(ErrorKind::Config(e.message().to_string()), None).with_cause(e)
        })
    }
}

/// State shared by every interpreter an engine creates
pub struct Runtime {
    config: EngineConfig,
    globals: Scope,
    registry: RwLock<HostRegistry>,
    schedulers: RwLock<HashMap<String, Arc<dyn Scheduler>>>,
    context: RwLock<Option<HostContext>>,
    enclosing: RwLock<Option<Value>>,
    collector: Collector,
}

impl Runtime {
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn globals(&self) -> &Scope {
        &self.globals
    }

    pub fn resolve_host_class(&self, path: &str) -> Option<Arc<HostClass>> {
        self.registry.read().resolve(path)
    }

    pub fn scheduler(&self, name: &str) -> Option<Arc<dyn Scheduler>> {
        self.schedulers.read().get(name).cloned()
    }

    pub fn context(&self) -> Option<HostContext> {
        self.context.read().clone()
    }

    pub fn enclosing(&self) -> Option<Value> {
        self.enclosing.read().clone()
    }

    pub(crate) fn collector(&self) -> &Collector {
        &self.collector
    }
}

/// The embedding entry point
pub struct Engine {
    runtime: Arc<Runtime>,
}

impl Engine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let install_stdlib = config.stdlib;
        let engine = Self {
            runtime: Arc::new(Runtime {
                config,
                globals: Scope::new(),
                registry: RwLock::new(HostRegistry::new()),
                schedulers: RwLock::new(HashMap::new()),
                context: RwLock::new(None),
                enclosing: RwLock::new(None),
                collector: Collector::new(),
            }),
        };
        if install_stdlib {
            if let Err(err) = natives::install(&engine) {
                error!(error = %err, "failed to install native library");
            }
        }
        engine
    }

    /// Attach a host context handle
    pub fn with_context(self, context: HostContext) -> Self {
        *self.runtime.context.write() = Some(context);
        self
    }

    /// Attach an enclosing object natives can retrieve
    pub fn with_enclosing(self, enclosing: Value) -> Self {
        *self.runtime.enclosing.write() = Some(enclosing);
        self
    }

    pub fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn config(&self) -> &EngineConfig {
        self.runtime.config()
    }

    pub fn globals(&self) -> &Scope {
        self.runtime.globals()
    }

    /// Install a native function as a global
    pub fn register_native<F>(&self, name: &str, arity: RangeInclusive<usize>, func: F) -> Result<()>
    where
        F: Fn(&mut Interpreter, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        let native = NativeFunction::new(name, arity, func);
        self.globals().define(name, Value::Native(Arc::new(native)))
    }

    /// Make a host type importable as `import <path>`
    pub fn register_host_class(&self, path: &str, class: Arc<HostClass>) {
        self.runtime.registry.write().register(path, class);
    }

    pub fn set_scheduler(&self, name: &str, scheduler: Arc<dyn Scheduler>) {
        debug!(scheduler = %name, "registered scheduler");
        self.runtime.schedulers.write().insert(name.to_string(), scheduler);
    }

    pub fn define_global(&self, name: &str, value: Value) -> Result<()> {
        self.globals().define(name, value)
    }

    pub fn global(&self, name: &str) -> Option<Value> {
        self.globals().lookup(name)
    }

    /// Lex and parse, reporting every error found
    pub fn check(&self, source: &str) -> Vec<KestrelError> {
        match parse(source) {
            Ok(_) => Vec::new(),
            Err(errors) => errors,
        }
    }

    /// Run source text in the global scope
    pub fn execute(&self, source: &str) -> Result<Value> {
        let program = match parse(source) {
            Ok(program) => program,
            Err(errors) => {
                let mut errors = errors.into_iter();
                return Err(errors
                    .next()
                    .unwrap_or_else(|| KestrelError::runtime("parse failed", None)));
            }
        };
        let result = self.run_program(&program);
        self.collect_garbage();
        result.map_err(|err| {
            let err = err.with_source(source);
            error!(line = err.line(), "{}", err.message());
            err
        })
    }

    /// Run an already parsed program in the global scope
    pub fn run_program(&self, program: &Program) -> Result<Value> {
        Interpreter::new(self.runtime.clone()).interpret(program)
    }

    /// Call a script callable from the host
    pub fn call(&self, callee: &Value, args: Vec<Value>) -> Result<Value> {
        let result = Interpreter::new(self.runtime.clone()).call_value(callee, args);
        self.collect_garbage();
        result
    }

    /// Reclaim unreachable reference cycles, such as closures stored in
    /// the scope they captured. Runs after every `execute` and `call`;
    /// skipped while any interpreter of this engine is running.
    pub fn collect_garbage(&self) -> usize {
        self.runtime.collector.collect(&self.runtime, false)
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        let cleared = self.runtime.collector.collect(&self.runtime, true);
        debug!(cleared, "engine dropped");
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

/// Lex and parse source text. Syntax errors are collected across the whole
/// file; a lexical error stops at the first.
pub fn parse(source: &str) -> std::result::Result<Program, Vec<KestrelError>> {
    let tokens = Lexer::new(source)
        .tokenize()
        .map_err(|e| vec![e.with_source(source)])?;
    let (program, errors) = Parser::new(tokens).parse_with_recovery();
    if errors.is_empty() {
        Ok(program)
    } else {
        for err in &errors {
            warn!(line = err.line(), "{}", err.message());
        }
        Err(errors.into_iter().map(|e| e.with_source(source)).collect())
    }
}

/// Unit of work handed to a scheduler
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// A host scheduling primitive such as a UI thread or worker pool
pub trait Scheduler: Send + Sync {
    fn schedule(&self, job: Job);
}

/// Runs every job on a newly spawned thread
#[derive(Debug, Default)]
pub struct ThreadScheduler;

impl ThreadScheduler {
    const STACK_SIZE: usize = 16 * 1024 * 1024;
}

impl Scheduler for ThreadScheduler {
    fn schedule(&self, job: Job) {
        let spawned = std::thread::Builder::new()
            .name("kestrel-handoff".to_string())
            .stack_size(Self::STACK_SIZE)
            .spawn(job);
        if let Err(err) = spawned {
            error!(error = %err, "failed to spawn hand-off thread");
        }
    }
}

/// Queues jobs until the host drains them from its own loop
#[derive(Default)]
pub struct QueueScheduler {
    jobs: Mutex<VecDeque<Job>>,
}

impl QueueScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.jobs.lock().len()
    }

    /// Run queued jobs, including any they schedule, until the queue is empty
    pub fn run_pending(&self) -> usize {
        let mut ran = 0;
        loop {
            let job = self.jobs.lock().pop_front();
            match job {
                Some(job) => {
                    job();
                    ran += 1;
                }
                None => return ran,
            }
        }
    }
}

impl Scheduler for QueueScheduler {
    fn schedule(&self, job: Job) {
        self.jobs.lock().push_back(job);
    }
}

/// What a hand-off runs
#[derive(Debug, Clone)]
pub enum Task {
    /// Call a callable with no arguments
    Call(Value),
    /// Parse and run source text
    Source(String),
}

/// A captured scope plus work to run in it on another interpreter
pub struct Handoff {
    runtime: Arc<Runtime>,
    scope: Scope,
    task: Task,
}

impl Handoff {
    pub fn new(runtime: Arc<Runtime>, scope: Scope, task: Task) -> Self {
        Self { runtime, scope, task }
    }

    /// Run to completion on a fresh interpreter
    pub fn run(self) -> Result<Value> {
        let mut interpreter = Interpreter::with_scope(self.runtime, self.scope);
        match self.task {
            Task::Call(callee) => interpreter.call_value(&callee, Vec::new()),
            Task::Source(source) => {
                let program = parse(&source).map_err(|errors| {
                    errors
                        .into_iter()
                        .next()
                        .unwrap_or_else(|| KestrelError::runtime("parse failed", None))
                })?;
                interpreter.interpret(&program)
            }
        }
    }

    /// Wrap into a scheduler job; failures are logged, never propagated
    pub fn into_job(self) -> Job {
        Box::new(move || {
            if let Err(err) = self.run() {
                error!(target: "kestrel::handoff", line = err.line(), "{}", err.message());
            }
        })
    }
}
