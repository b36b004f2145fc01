//! Per-preview script realm.
//!
//! Each [`ScriptScope`] owns its own QuickJS runtime and context, so globals
//! written by one preview's scripts are invisible to the host page and to
//! every other preview. A scope has a heap limit, a stack limit and a
//! wall-clock deadline per execution. `console.*` calls land in the tracing
//! output under the `preview_script` target and in an in-memory log.
//! Scripts run through [`ScriptScope::execute_in`] also get a `document`
//! confined to their preview boundary.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

use rquickjs::{Context, Ctx, Function, Runtime, Value};

use crate::bridge::{DocumentBridge, DOM_PRELUDE};
use crate::dom::NodeId;
use crate::error::ScriptExecutionError;
use crate::window::Window;

/// Heap limit per scope: 1 MB.
pub const SCRIPT_MEMORY_LIMIT_BYTES: usize = 1024 * 1024;

const SCRIPT_STACK_LIMIT_BYTES: usize = 256 * 1024;

/// Wall-clock budget for one execution.
pub const SCRIPT_TIMEOUT_MS: u64 = 200;

/// Prefix of the console message logged when a wrapped fragment throws.
pub const SCRIPT_ERROR_PREFIX: &str = "[HTML Preview] Script execution error:";

const NATIVE_CONSOLE: &str = "__preview_console";

const SCOPE_PRELUDE: &str = r#"
(function (global) {
  var emit = global.__preview_console;
  delete global.__preview_console;
  global.window = global;
  global.self = global;
  function describe(value) {
    if (value instanceof Error) {
      return value.name + ': ' + value.message;
    }
    if (typeof value === 'object' && value !== null) {
      try { return JSON.stringify(value); } catch (e) { return String(value); }
    }
    return String(value);
  }
  function writer(level) {
    return function () {
      emit(level, Array.prototype.map.call(arguments, describe).join(' '));
    };
  }
  global.console = {
    log: writer('log'),
    debug: writer('log'),
    info: writer('info'),
    warn: writer('warn'),
    error: writer('error')
  };
})(globalThis);
"#;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleLevel {
    Log,
    Info,
    Warn,
    Error,
}

impl ConsoleLevel {
    fn parse(level: &str) -> Self {
        match level {
            "info" => ConsoleLevel::Info,
            "warn" => ConsoleLevel::Warn,
            "error" => ConsoleLevel::Error,
            _ => ConsoleLevel::Log,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleLine {
    pub level: ConsoleLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScriptLimits {
    pub memory_limit_bytes: usize,
    pub timeout_ms: u64,
}

impl Default for ScriptLimits {
    fn default() -> Self {
        Self {
            memory_limit_bytes: SCRIPT_MEMORY_LIMIT_BYTES,
            timeout_ms: SCRIPT_TIMEOUT_MS,
        }
    }
}

/// A global scope of its own: `globalThis`, `window` and `self` all refer to it.
pub struct ScriptScope {
    label: String,
    ctx: Context,
    #[allow(dead_code)]
    rt: Runtime,
    console: Arc<Mutex<Vec<ConsoleLine>>>,
    dom: DocumentBridge,
    deadline_ms: Arc<AtomicU64>,
    timeout_ms: u64,
}

impl ScriptScope {
    pub fn new(label: impl Into<String>, limits: ScriptLimits) -> Result<Self, ScriptExecutionError> {
        let label = label.into();
        let rt = Runtime::new()
            .map_err(|e| ScriptExecutionError::Init(format!("runtime: {}", e)))?;
        rt.set_memory_limit(limits.memory_limit_bytes);
        rt.set_max_stack_size(SCRIPT_STACK_LIMIT_BYTES);

        let deadline_ms = Arc::new(AtomicU64::new(0));
        let deadline_guard = Arc::clone(&deadline_ms);
        rt.set_interrupt_handler(Some(Box::new(move || {
            let deadline = deadline_guard.load(Ordering::Relaxed);
            deadline != 0 && now_ms() >= deadline
        })));

        let ctx = Context::full(&rt)
            .map_err(|e| ScriptExecutionError::Init(format!("context: {}", e)))?;
        let console = Arc::new(Mutex::new(Vec::new()));
        let dom = DocumentBridge::default();

        let sink = Arc::clone(&console);
        let scope_label = label.clone();
        ctx.with(|ctx| {
            let emit = Function::new(ctx.clone(), move |level: String, message: String| {
                record_console(&sink, &scope_label, &level, message);
            })
            .map_err(|err| ScriptExecutionError::Init(format_js_error(&ctx, err)))?;
            ctx.globals()
                .set(NATIVE_CONSOLE, emit)
                .map_err(|err| ScriptExecutionError::Init(format_js_error(&ctx, err)))?;
            ctx.eval::<(), _>(SCOPE_PRELUDE)
                .map_err(|err| ScriptExecutionError::Init(format_js_error(&ctx, err)))?;
            dom.install(&ctx)
                .map_err(|err| ScriptExecutionError::Init(format_js_error(&ctx, err)))?;
            ctx.eval::<(), _>(DOM_PRELUDE)
                .map_err(|err| ScriptExecutionError::Init(format_js_error(&ctx, err)))
        })?;

        tracing::debug!(scope = %label, "created script scope");

        Ok(Self {
            label,
            ctx,
            rt,
            console,
            dom,
            deadline_ms,
            timeout_ms: limits.timeout_ms,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run `source` as a classic script in this scope.
    pub fn execute(&self, source: &str) -> Result<(), ScriptExecutionError> {
        self.deadline_ms
            .store(now_ms() + self.timeout_ms, Ordering::Relaxed);
        let result = self.ctx.with(|ctx| {
            ctx.eval::<(), _>(source)
                .map_err(|err| format_js_error(&ctx, err))
        });
        let timed_out = now_ms() >= self.deadline_ms.load(Ordering::Relaxed);
        self.deadline_ms.store(0, Ordering::Relaxed);

        result.map_err(|message| {
            if timed_out {
                ScriptExecutionError::Timeout {
                    scope: self.label.clone(),
                    timeout_ms: self.timeout_ms,
                }
            } else {
                ScriptExecutionError::Exception {
                    scope: self.label.clone(),
                    message,
                }
            }
        })
    }

    /// Run `source` with `document` resolving inside `boundary`. The host
    /// document is lent to the scope for the duration and handed back after.
    pub fn execute_in(
        &self,
        window: &mut Window,
        boundary: NodeId,
        source: &str,
    ) -> Result<(), ScriptExecutionError> {
        self.dom.lend(std::mem::take(window.document_mut()), boundary);
        let result = self.execute(source);
        if let Some(doc) = self.dom.reclaim() {
            *window.document_mut() = doc;
        }
        result
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.ctx.with(|ctx| {
            ctx.globals()
                .get::<_, Value>(name)
                .map(|v| !v.is_undefined())
                .unwrap_or(false)
        })
    }

    pub fn global_number(&self, name: &str) -> Option<f64> {
        self.ctx.with(|ctx| {
            ctx.globals()
                .get::<_, Value>(name)
                .ok()
                .and_then(|v| v.as_number())
        })
    }

    pub fn global_string(&self, name: &str) -> Option<String> {
        self.ctx.with(|ctx| {
            ctx.globals()
                .get::<_, Value>(name)
                .ok()
                .and_then(|v| v.as_string().and_then(|s| s.to_string().ok()))
        })
    }

    pub fn console_lines(&self) -> Vec<ConsoleLine> {
        self.console
            .lock()
            .map(|lines| lines.clone())
            .unwrap_or_default()
    }
}

impl std::fmt::Debug for ScriptScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptScope")
            .field("label", &self.label)
            .field("timeout_ms", &self.timeout_ms)
            .finish_non_exhaustive()
    }
}

/// Wrap fragment source so a throw is reported on the console instead of
/// escaping, and so top-level declarations stay local to the fragment.
pub fn wrap_isolated(content: &str) -> String {
    format!(
        "try {{\n  (function () {{\n{}\n  }})();\n}} catch (error) {{\n  console.error('{}', error);\n}}\n",
        content, SCRIPT_ERROR_PREFIX
    )
}

fn record_console(sink: &Mutex<Vec<ConsoleLine>>, scope: &str, level: &str, message: String) {
    let level = ConsoleLevel::parse(level);
    match level {
        ConsoleLevel::Error => tracing::error!(target: "preview_script", scope, "{}", message),
        ConsoleLevel::Warn => tracing::warn!(target: "preview_script", scope, "{}", message),
        ConsoleLevel::Info => tracing::info!(target: "preview_script", scope, "{}", message),
        ConsoleLevel::Log => tracing::debug!(target: "preview_script", scope, "{}", message),
    }
    if let Ok(mut lines) = sink.lock() {
        lines.push(ConsoleLine { level, message });
    }
}

fn format_js_error(ctx: &Ctx<'_>, err: rquickjs::Error) -> String {
    if let rquickjs::Error::Exception = err {
        let value = ctx.catch();
        if let Some(exception) = value.as_exception() {
            if let Some(message) = exception.message().filter(|m| !m.trim().is_empty()) {
                return message;
            }
            if let Some(stack) = exception.stack().filter(|s| !s.trim().is_empty()) {
                return stack;
            }
        }
        if let Some(text) = value.as_string().and_then(|s| s.to_string().ok()) {
            return text;
        }
        return format!("{:?}", value);
    }
    err.to_string()
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
