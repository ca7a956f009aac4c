use std::sync::Mutex;
use std::time::Instant;

use rustpython_pylib;
use rustpython_stdlib;
use rustpython_vm as vm;
use rustpython_vm::builtins::PyBaseException;
use rustpython_vm::scope::Scope;
use rustpython_vm::{AsObject, Interpreter, InterpreterBuilder};
use serde_json::Value;
use tempfile::TempDir;
use thiserror::Error;

use crate::EngineConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecFailureKind {
    Syntax,
    Runtime,
    Timeout,
}

/// In-band failure raised by the submitted code. Machinery breakage is a
/// plain `anyhow` error instead.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct ExecFailure {
    pub kind: ExecFailureKind,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ExecRecord {
    pub stdout: String,
    pub stderr: String,
    pub value: Option<Value>,
    pub failure: Option<ExecFailure>,
    pub duration_secs: f64,
}

pub struct PyEnv {
    interpreter: Interpreter,
    scope: Scope,
    temp_dir: TempDir,
    execution_timeout_secs: f64,
    execution_lock: Mutex<()>,
}

impl PyEnv {
    pub fn new(config: &EngineConfig) -> anyhow::Result<Self> {
        let builder = InterpreterBuilder::new();
        let interpreter = init_stdlib(builder).interpreter();
        let scope = interpreter
            .enter(|vm: &vm::VirtualMachine| {
                let scope = vm.new_scope_with_builtins();
                Ok(scope)
            })
            .map_err(|err: vm::PyRef<PyBaseException>| {
                anyhow::anyhow!("python init error: {err:?}")
            })?;
        let temp_dir = TempDir::new()?;

        let env = Self {
            interpreter,
            scope,
            temp_dir,
            execution_timeout_secs: config.execution_timeout_secs,
            execution_lock: Mutex::new(()),
        };
        env.install_sandbox()?;
        Ok(env)
    }

    fn install_sandbox(&self) -> anyhow::Result<()> {
        let scope = self.scope.clone();
        let temp_dir_str = self.temp_dir.path().to_string_lossy().to_string();

        let enter_result = self
            .interpreter
            .enter(move |vm: &vm::VirtualMachine| -> vm::PyResult<()> {
                scope.globals.set_item(
                    "__pad_sandbox_dir",
                    vm.ctx.new_str(temp_dir_str.as_str()).into(),
                    vm,
                )?;
                for (label, code) in INIT_SEGMENTS {
                    vm.run_string(scope.clone(), code, format!("<pad_init_{label}>"))?;
                }
                Ok(())
            });
        enter_result.map_err(|err: vm::PyRef<PyBaseException>| {
            anyhow::anyhow!("python init error: {err:?}")
        })
    }

    pub fn execute(&self, code: &str) -> anyhow::Result<ExecRecord> {
        let _lock = self
            .execution_lock
            .lock()
            .map_err(|_| anyhow::anyhow!("interpreter lock poisoned"))?;
        let scope = self.scope.clone();
        let timeout_secs = self.execution_timeout_secs;
        let start = Instant::now();

        let mut record = self
            .interpreter
            .enter(|vm: &vm::VirtualMachine| -> vm::PyResult<ExecRecord> {
                let preamble = format!(
                    "import io, sys, time\n\
                     __pad_prev_stdout = sys.stdout\n\
                     __pad_prev_stderr = sys.stderr\n\
                     __pad_stdout = io.StringIO()\n\
                     __pad_stderr = io.StringIO()\n\
                     sys.stdout = __pad_stdout\n\
                     sys.stderr = __pad_stderr\n\
                     __pad_exec_deadline = time.time() + {timeout_secs}\n\
                     \n\
                     def __pad_trace(frame, event, arg):\n\
                     \x20   if time.time() > __pad_exec_deadline:\n\
                     \x20       raise TimeoutError('execution deadline exceeded')\n\
                     \x20   return __pad_trace\n\
                     \n\
                     sys.settrace(__pad_trace)\n"
                );
                vm.run_string(scope.clone(), &preamble, "<pad_preamble>".to_owned())?;

                scope
                    .globals
                    .set_item("__pad_code", vm.ctx.new_str(code).into(), vm)?;
                let failure = match vm.run_string(
                    scope.clone(),
                    "__pad_exec(__pad_code)\n",
                    "<pad_exec>".to_owned(),
                ) {
                    Ok(_) => None,
                    Err(exc) => {
                        let failure = failure_from_exception(vm, &exc);
                        vm.print_exception(exc);
                        Some(failure)
                    }
                };

                // The trace hook fires on the postamble too; move the deadline
                // out of reach before running it.
                scope.globals.set_item(
                    "__pad_exec_deadline",
                    vm.ctx.new_float(f64::INFINITY).into(),
                    vm,
                )?;
                let postamble = "import sys\n\
                     sys.settrace(None)\n\
                     sys.stdout = __pad_prev_stdout\n\
                     sys.stderr = __pad_prev_stderr\n\
                     __pad_stdout_value = __pad_stdout.getvalue()\n\
                     __pad_stderr_value = __pad_stderr.getvalue()\n\
                     import json as __pad_json_mod\n\
                     try:\n\
                     \x20   __pad_result_json = None if __pad_result is None else __pad_json_mod.dumps(__pad_result)\n\
                     except Exception:\n\
                     \x20   __pad_result_json = __pad_json_mod.dumps(repr(__pad_result))\n";
                vm.run_string(scope.clone(), postamble, "<pad_postamble>".to_owned())?;

                let stdout = string_from_scope(vm, &scope, "__pad_stdout_value").unwrap_or_default();
                let stderr = string_from_scope(vm, &scope, "__pad_stderr_value").unwrap_or_default();
                let value = if failure.is_none() {
                    string_from_scope(vm, &scope, "__pad_result_json")
                        .and_then(|raw| serde_json::from_str(&raw).ok())
                } else {
                    None
                };
                Ok(ExecRecord {
                    stdout,
                    stderr,
                    value,
                    failure,
                    duration_secs: 0.0,
                })
            })
            .map_err(|err: vm::PyRef<PyBaseException>| {
                anyhow::anyhow!("python exec error: {err:?}")
            })?;

        record.duration_secs = start.elapsed().as_secs_f64();
        Ok(record)
    }
}

fn init_stdlib(builder: InterpreterBuilder) -> InterpreterBuilder {
    let defs = rustpython_stdlib::stdlib_module_defs(&builder.ctx);
    builder
        .add_native_modules(&defs)
        .add_frozen_modules(rustpython_pylib::FROZEN_STDLIB)
        .init_hook(set_frozen_stdlib_dir)
}

fn set_frozen_stdlib_dir(vm: &mut vm::VirtualMachine) {
    use rustpython_vm::common::rc::PyRc;

    let state = PyRc::get_mut(&mut vm.state).expect("vm state");
    state.config.paths.stdlib_dir = Some(rustpython_pylib::LIB_PATH.to_owned());
}

fn string_from_scope(vm: &vm::VirtualMachine, scope: &Scope, name: &str) -> Option<String> {
    scope
        .globals
        .get_item(name, vm)
        .ok()
        .and_then(|value| value.try_to_value::<String>(vm).ok())
}

fn failure_from_exception(vm: &vm::VirtualMachine, exc: &vm::PyRef<PyBaseException>) -> ExecFailure {
    let class_name = exc.class().name().to_string();
    let kind = match class_name.as_str() {
        "SyntaxError" | "IndentationError" | "TabError" => ExecFailureKind::Syntax,
        "TimeoutError" => ExecFailureKind::Timeout,
        _ => ExecFailureKind::Runtime,
    };
    let detail: vm::PyObjectRef = exc.clone().into();
    let message = match detail.str(vm) {
        Ok(text) if !text.expect_str().is_empty() => format!("{class_name}: {}", text.expect_str()),
        _ => class_name,
    };
    ExecFailure { kind, message }
}

const INIT_SEGMENTS: &[(&str, &str)] = &[
    (
        "builtins_ref",
        r#"__pad_builtins = __builtins__
if isinstance(__pad_builtins, dict):
    def __pad_get_builtin(name):
        return __pad_builtins.get(name)
else:
    def __pad_get_builtin(name):
        return getattr(__pad_builtins, name, None)
"#,
    ),
    (
        "builtin_refs",
        "__pad_exec_builtin = __pad_get_builtin('exec')\n__pad_eval_builtin = __pad_get_builtin('eval')\n__pad_globals_builtin = __pad_get_builtin('globals')\n",
    ),
    (
        "safe_list",
        r#"__pad_safe_builtin_names = [
    "print", "len", "str", "int", "float", "list", "dict", "set", "tuple", "bool",
    "type", "isinstance", "enumerate", "zip", "map", "filter", "sorted", "min", "max",
    "sum", "abs", "round", "chr", "ord", "hex", "bin", "oct", "repr", "ascii", "format",
    "__import__", "open", "any", "all", "hasattr", "getattr", "setattr", "delattr", "dir",
    "vars", "range", "reversed", "slice", "iter", "next", "pow", "divmod", "complex",
    "bytes", "bytearray", "memoryview", "hash", "id", "callable", "issubclass", "super",
    "property", "staticmethod", "classmethod", "object", "BaseException", "ArithmeticError",
    "LookupError", "EnvironmentError", "AssertionError", "NotImplementedError", "UnicodeError",
    "Warning", "UserWarning", "DeprecationWarning", "PendingDeprecationWarning", "SyntaxWarning",
    "RuntimeWarning", "FutureWarning", "ImportWarning", "UnicodeWarning", "BytesWarning",
    "ResourceWarning", "Exception", "ValueError", "TypeError", "KeyError", "IndexError",
    "AttributeError", "FileNotFoundError", "OSError", "IOError", "RuntimeError", "NameError",
    "ImportError", "StopIteration", "GeneratorExit", "SystemExit", "KeyboardInterrupt",
    "TimeoutError", "ZeroDivisionError", "OverflowError", "SyntaxError",
    "IndentationError", "TabError", "PermissionError",
]"#,
    ),
    (
        "safe_builtins",
        "__pad_safe_builtins = {}\nfor __pad_name in __pad_safe_builtin_names:\n    __pad_value = __pad_get_builtin(__pad_name)\n    if __pad_value is not None:\n        __pad_safe_builtins[__pad_name] = __pad_value\n",
    ),
    (
        "safe_blocklist",
        "for __pad_name in [\"input\", \"eval\", \"exec\", \"compile\", \"globals\", \"locals\"]:\n    __pad_safe_builtins[__pad_name] = None\n",
    ),
    (
        "safe_imports",
        r#"__pad_allowed_modules = {
    "json", "math", "statistics", "random", "re", "itertools", "functools",
    "collections", "datetime", "decimal", "fractions", "io", "sys", "time"
}
__pad_import_builtin = __pad_get_builtin('__import__')
def __pad_safe_import(name, globals=None, locals=None, fromlist=(), level=0, _import=__pad_import_builtin):
    root = name.split('.')[0]
    if root not in __pad_allowed_modules:
        raise ImportError(f"Import of '{root}' is blocked")
    return _import(name, globals, locals, fromlist, level)
"#,
    ),
    (
        "safe_open",
        r#"__pad_open_builtin = __pad_get_builtin('open')
def __pad_safe_open(path, *args, _import=__pad_import_builtin, _open=__pad_open_builtin, _root=__pad_sandbox_dir, **kwargs):
    __pad_os = _import('os')
    __pad_root = __pad_os.path.abspath(_root)
    __pad_path = str(path)
    if not __pad_os.path.isabs(__pad_path):
        __pad_path = __pad_os.path.join(__pad_root, __pad_path)
    __pad_path = __pad_os.path.abspath(__pad_path)
    if not (__pad_path == __pad_root or __pad_path.startswith(__pad_root + __pad_os.sep)):
        raise PermissionError("open restricted to the sandbox dir")
    return _open(__pad_path, *args, **kwargs)
"#,
    ),
    (
        "safe_cleanup",
        "del __pad_import_builtin\ndel __pad_open_builtin\n",
    ),
    (
        "safe_overrides",
        "__pad_safe_builtins['__import__'] = __pad_safe_import\n__pad_safe_builtins['open'] = __pad_safe_open\n",
    ),
    ("builtins_assign", "__builtins__ = __pad_safe_builtins\n"),
    (
        "exec_wrapper",
        r#"__pad_result = None

def __pad_is_expression(line):
    head = line.split('#')[0].rstrip()
    if not head:
        return False
    if head.startswith((
        'import ', 'from ', 'def ', 'class ', 'if ', 'elif ', 'else', 'for ',
        'while ', 'try', 'except', 'finally', 'with ', 'return', 'yield',
        'raise', 'assert', 'del ', 'global ', 'nonlocal ', 'pass', 'break',
        'continue', '@', 'print(',
    )):
        return False
    if '=' in head or head.endswith(':'):
        return False
    return True

def __pad_exec(code):
    g = __pad_globals_builtin()
    g['__pad_result'] = None
    lines = code.split('\n')
    tail = None
    for idx in range(len(lines) - 1, -1, -1):
        stripped = lines[idx].strip()
        if stripped and not stripped.startswith('#'):
            tail = idx
            break
    if tail is None:
        return
    last = lines[tail]
    if last[:1] in (' ', '\t') or not __pad_is_expression(last):
        __pad_exec_builtin(code, g, g)
        return
    if tail > 0:
        __pad_exec_builtin('\n'.join(lines[:tail]), g, g)
    try:
        g['__pad_result'] = __pad_eval_builtin(last, g, g)
    except SyntaxError:
        __pad_exec_builtin('\n'.join(lines[tail:]), g, g)
"#,
    ),
];
