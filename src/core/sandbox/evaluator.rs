//! Sandboxed formula interpreter
//!
//! An [`Interpreter`] owns one parsed [`Program`] and runs it many times, once
//! per dataframe row. Every [`Interpreter::run`] starts by resetting all
//! per-run state (scope arena, completion value, step counter, call depth), so
//! nothing from one row is visible to the next. The only names a formula can
//! resolve are the read-only built-ins from [`super::stdlib`] and the bindings
//! passed to `run`.

use std::collections::{BTreeMap, HashMap};
use std::rc::Rc;

use super::parser::{
    AssignOp, BinaryOp, DeclKind, Expr, FunctionBody, FunctionDef, LogicalOp, Program, Stmt,
    UnaryOp,
};
use super::stdlib::{self, call_builtin};
use super::value::{Closure, Native, ScopeId, Value};
use crate::types::EngineOptions;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvalErrorKind {
    /// An unbound name was read or assigned
    Reference,
    /// An operation was applied to a value of the wrong type
    Type,
    /// Call nesting exceeded the configured depth
    Range,
    /// The step budget ran out
    StepLimit,
}

/// Error during evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct EvalError {
    pub kind: EvalErrorKind,
    pub message: String,
}

impl EvalError {
    pub fn new(kind: EvalErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn reference(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Reference, message)
    }

    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(EvalErrorKind::Type, message)
    }
}

impl std::fmt::Display for EvalError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let prefix = match self.kind {
            EvalErrorKind::Reference => "ReferenceError",
            EvalErrorKind::Type => "TypeError",
            EvalErrorKind::Range => "RangeError",
            EvalErrorKind::StepLimit => "StepLimitError",
        };
        write!(f, "{}: {}", prefix, self.message)
    }
}

impl std::error::Error for EvalError {}

/// Functions the embedding runtime makes callable from formulas.
///
/// Host functions are bound as `Value::Native(Native::Host(name))`; calling
/// one dispatches here with the evaluated arguments.
pub trait NativeHost {
    fn call_host(&mut self, name: &'static str, args: &[Value]) -> Result<Value, EvalError>;
}

/// Host with no functions
pub struct NoHost;

impl NativeHost for NoHost {
    fn call_host(&mut self, name: &'static str, _args: &[Value]) -> Result<Value, EvalError> {
        Err(EvalError::reference(format!("{} is not defined", name)))
    }
}

#[derive(Debug)]
struct Binding {
    value: Value,
    constant: bool,
}

#[derive(Debug)]
struct Scope {
    vars: HashMap<String, Binding>,
    parent: Option<ScopeId>,
    function_scope: bool,
}

enum Flow {
    Normal,
    Return(Value),
}

/// Reusable interpreter for one parsed formula
pub struct Interpreter {
    program: Rc<Program>,
    globals: HashMap<String, Value>,
    scopes: Vec<Scope>,
    completion: Value,
    steps: u64,
    max_steps: Option<u64>,
    call_depth: usize,
    max_call_depth: usize,
}

impl Interpreter {
    pub fn new(program: Rc<Program>, options: &EngineOptions) -> Self {
        Self {
            program,
            globals: stdlib::globals(),
            scopes: Vec::new(),
            completion: Value::Undefined,
            steps: 0,
            max_steps: options.max_steps,
            call_depth: 0,
            max_call_depth: options.max_call_depth,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Steps taken by the last run
    pub fn steps(&self) -> u64 {
        self.steps
    }

    fn reset(&mut self) {
        self.scopes.clear();
        self.completion = Value::Undefined;
        self.steps = 0;
        self.call_depth = 0;
    }

    /// Run the program with `bindings` in scope and return its completion value
    /// (the value of the last top-level expression statement executed).
    pub fn run<I>(&mut self, bindings: I, host: &mut dyn NativeHost) -> Result<Value, EvalError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        self.reset();
        let root = self.push_scope(None, true);
        for (name, value) in bindings {
            self.scopes[root].vars.insert(
                name,
                Binding {
                    value,
                    constant: false,
                },
            );
        }

        let program = Rc::clone(&self.program);
        self.exec_block(&program.body, root, host)?;
        Ok(std::mem::take(&mut self.completion))
    }

    fn tick(&mut self) -> Result<(), EvalError> {
        self.steps += 1;
        match self.max_steps {
            Some(max) if self.steps > max => Err(EvalError::new(
                EvalErrorKind::StepLimit,
                format!("formula exceeded {} evaluation steps", max),
            )),
            _ => Ok(()),
        }
    }

    fn push_scope(&mut self, parent: Option<ScopeId>, function_scope: bool) -> ScopeId {
        self.scopes.push(Scope {
            vars: HashMap::new(),
            parent,
            function_scope,
        });
        self.scopes.len() - 1
    }

    fn function_scope_of(&self, mut scope: ScopeId) -> ScopeId {
        loop {
            let current = &self.scopes[scope];
            match current.parent {
                Some(parent) if !current.function_scope => scope = parent,
                _ => return scope,
            }
        }
    }

    fn declare(&mut self, scope: ScopeId, name: &str, value: Value, constant: bool) {
        self.scopes[scope]
            .vars
            .insert(name.to_string(), Binding { value, constant });
    }

    /// Scope holding `name`, walking outwards from `scope`
    fn resolve(&self, mut scope: ScopeId, name: &str) -> Option<ScopeId> {
        loop {
            if self.scopes[scope].vars.contains_key(name) {
                return Some(scope);
            }
            scope = self.scopes[scope].parent?;
        }
    }

    fn lookup(&self, scope: ScopeId, name: &str) -> Result<Value, EvalError> {
        if let Some(found) = self.resolve(scope, name) {
            return Ok(self.scopes[found].vars[name].value.clone());
        }
        self.globals
            .get(name)
            .cloned()
            .ok_or_else(|| EvalError::reference(format!("{} is not defined", name)))
    }

    fn assign(&mut self, scope: ScopeId, name: &str, value: Value) -> Result<(), EvalError> {
        match self.resolve(scope, name) {
            Some(found) => {
                let binding = self.scopes[found].vars.get_mut(name).ok_or_else(|| {
                    EvalError::reference(format!("{} is not defined", name))
                })?;
                if binding.constant {
                    return Err(EvalError::type_error("Assignment to constant variable."));
                }
                binding.value = value;
                Ok(())
            }
            None if self.globals.contains_key(name) => Err(EvalError::type_error(format!(
                "Cannot assign to read only global '{}'",
                name
            ))),
            None => Err(EvalError::reference(format!("{} is not defined", name))),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Statements
    // ─────────────────────────────────────────────────────────────────────

    fn exec_block(
        &mut self,
        stmts: &[Stmt],
        scope: ScopeId,
        host: &mut dyn NativeHost,
    ) -> Result<Flow, EvalError> {
        // Function declarations are visible throughout their block
        for stmt in stmts {
            if let Stmt::Function(def) = stmt {
                let closure = self.make_closure(def, scope);
                if let Some(name) = &def.name {
                    self.declare(scope, name, closure, false);
                }
            }
        }

        for stmt in stmts {
            if let Flow::Return(value) = self.exec(stmt, scope, host)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Normal)
    }

    fn exec(
        &mut self,
        stmt: &Stmt,
        scope: ScopeId,
        host: &mut dyn NativeHost,
    ) -> Result<Flow, EvalError> {
        self.tick()?;
        match stmt {
            Stmt::Expr(expr) => {
                let value = self.eval(expr, scope, host)?;
                if self.call_depth == 0 {
                    self.completion = value;
                }
                Ok(Flow::Normal)
            }
            Stmt::Declare { kind, declarations } => {
                let target = match kind {
                    DeclKind::Var => self.function_scope_of(scope),
                    DeclKind::Let | DeclKind::Const => scope,
                };
                for (name, init) in declarations {
                    let value = match init {
                        Some(expr) => self.eval(expr, scope, host)?,
                        None if *kind == DeclKind::Var => {
                            // Redeclaring a var keeps its value
                            match self.scopes[target].vars.get(name) {
                                Some(existing) => existing.value.clone(),
                                None => Value::Undefined,
                            }
                        }
                        None => Value::Undefined,
                    };
                    self.declare(target, name, value, *kind == DeclKind::Const);
                }
                Ok(Flow::Normal)
            }
            Stmt::If {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope, host)?.is_truthy() {
                    self.exec(consequent, scope, host)
                } else if let Some(alternate) = alternate {
                    self.exec(alternate, scope, host)
                } else {
                    Ok(Flow::Normal)
                }
            }
            Stmt::Block(body) => {
                let block_scope = self.push_scope(Some(scope), false);
                self.exec_block(body, block_scope, host)
            }
            Stmt::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr, scope, host)?,
                    None => Value::Undefined,
                };
                Ok(Flow::Return(value))
            }
            // Declared when the enclosing block was entered
            Stmt::Function(_) | Stmt::Empty => Ok(Flow::Normal),
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Expressions
    // ─────────────────────────────────────────────────────────────────────

    fn eval(
        &mut self,
        expr: &Expr,
        scope: ScopeId,
        host: &mut dyn NativeHost,
    ) -> Result<Value, EvalError> {
        self.tick()?;
        match expr {
            Expr::Number(n) => Ok(Value::Number(*n)),
            Expr::Str(s) => Ok(Value::str(s)),
            Expr::Bool(b) => Ok(Value::Bool(*b)),
            Expr::Null => Ok(Value::Null),
            Expr::Identifier(name) => self.lookup(scope, name),

            Expr::Array(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, scope, host)?);
                }
                Ok(Value::array(values))
            }

            Expr::Object(entries) => {
                let mut object = BTreeMap::new();
                for (key, value) in entries {
                    let value = self.eval(value, scope, host)?;
                    object.insert(key.clone(), value);
                }
                Ok(Value::object(object))
            }

            Expr::Member { object, property } => {
                let object = self.eval(object, scope, host)?;
                get_property(&object, property)
            }

            Expr::Index { object, index } => {
                let object = self.eval(object, scope, host)?;
                let index = self.eval(index, scope, host)?;
                get_index(&object, &index)
            }

            Expr::Call { callee, args } => self.eval_call(callee, args, scope, host),

            Expr::Unary { op, operand } => {
                if let (UnaryOp::TypeOf, Expr::Identifier(name)) = (op, operand.as_ref()) {
                    // typeof tolerates undeclared names
                    let value = self.lookup(scope, name).unwrap_or(Value::Undefined);
                    return Ok(Value::str(value.type_of()));
                }
                let value = self.eval(operand, scope, host)?;
                Ok(match op {
                    UnaryOp::Neg => Value::Number(-value.to_number()),
                    UnaryOp::Plus => Value::Number(value.to_number()),
                    UnaryOp::Not => Value::Bool(!value.is_truthy()),
                    UnaryOp::TypeOf => Value::str(value.type_of()),
                })
            }

            Expr::Binary { op, left, right } => {
                let left = self.eval(left, scope, host)?;
                let right = self.eval(right, scope, host)?;
                Ok(binary_op(*op, &left, &right))
            }

            Expr::Logical { op, left, right } => {
                let left = self.eval(left, scope, host)?;
                match (op, left.is_truthy()) {
                    (LogicalOp::And, false) | (LogicalOp::Or, true) => Ok(left),
                    _ => self.eval(right, scope, host),
                }
            }

            Expr::Conditional {
                test,
                consequent,
                alternate,
            } => {
                if self.eval(test, scope, host)?.is_truthy() {
                    self.eval(consequent, scope, host)
                } else {
                    self.eval(alternate, scope, host)
                }
            }

            Expr::Assign { target, op, value } => {
                let value = self.eval(value, scope, host)?;
                let value = match op {
                    AssignOp(None) => value,
                    AssignOp(Some(binary)) => {
                        let current = self.lookup(scope, target)?;
                        binary_op(*binary, &current, &value)
                    }
                };
                self.assign(scope, target, value.clone())?;
                Ok(value)
            }

            Expr::Function(def) => Ok(self.make_closure(def, scope)),
        }
    }

    fn make_closure(&self, def: &Rc<FunctionDef>, scope: ScopeId) -> Value {
        Value::Function(Rc::new(Closure {
            def: Rc::clone(def),
            scope,
        }))
    }

    fn eval_args(
        &mut self,
        args: &[Expr],
        scope: ScopeId,
        host: &mut dyn NativeHost,
    ) -> Result<Vec<Value>, EvalError> {
        let mut values = Vec::with_capacity(args.len());
        for arg in args {
            values.push(self.eval(arg, scope, host)?);
        }
        Ok(values)
    }

    fn eval_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        scope: ScopeId,
        host: &mut dyn NativeHost,
    ) -> Result<Value, EvalError> {
        if let Expr::Member { object, property } = callee {
            let receiver = self.eval(object, scope, host)?;
            if let Value::Array(items) = &receiver {
                if is_array_method(property) {
                    let items = Rc::clone(items);
                    let args = self.eval_args(args, scope, host)?;
                    return self.call_array_method(&items, property, &args, host);
                }
            }
            let function = get_property(&receiver, property)?;
            let args = self.eval_args(args, scope, host)?;
            return self.call_value(&function, &args, property, host);
        }

        let function = self.eval(callee, scope, host)?;
        let args = self.eval_args(args, scope, host)?;
        let name = match callee {
            Expr::Identifier(name) => name.as_str(),
            _ => "expression",
        };
        self.call_value(&function, &args, name, host)
    }

    /// Call a function value with evaluated arguments
    pub fn call_value(
        &mut self,
        function: &Value,
        args: &[Value],
        name: &str,
        host: &mut dyn NativeHost,
    ) -> Result<Value, EvalError> {
        match function {
            Value::Native(Native::Builtin(builtin)) => call_builtin(*builtin, args),
            Value::Native(Native::Host(host_name)) => host.call_host(*host_name, args),
            Value::Function(closure) => self.call_closure(closure, args, host),
            other => Err(EvalError::type_error(format!(
                "{} is not a function (got {})",
                name,
                other.type_name()
            ))),
        }
    }

    fn call_closure(
        &mut self,
        closure: &Closure,
        args: &[Value],
        host: &mut dyn NativeHost,
    ) -> Result<Value, EvalError> {
        if self.call_depth >= self.max_call_depth {
            return Err(EvalError::new(
                EvalErrorKind::Range,
                "Maximum call stack size exceeded",
            ));
        }

        let scope = self.push_scope(Some(closure.scope), true);
        for (i, param) in closure.def.params.iter().enumerate() {
            let value = args.get(i).cloned().unwrap_or_default();
            self.declare(scope, param, value, false);
        }

        self.call_depth += 1;
        let result = match &closure.def.body {
            FunctionBody::Expr(expr) => self.eval(expr, scope, host),
            FunctionBody::Block(body) => {
                self.exec_block(body, scope, host).map(|flow| match flow {
                    Flow::Return(value) => value,
                    Flow::Normal => Value::Undefined,
                })
            }
        };
        self.call_depth -= 1;
        result
    }

    fn call_array_method(
        &mut self,
        items: &Rc<Vec<Value>>,
        method: &str,
        args: &[Value],
        host: &mut dyn NativeHost,
    ) -> Result<Value, EvalError> {
        let callback = || -> Result<&Value, EvalError> {
            args.first()
                .filter(|f| f.is_callable())
                .ok_or_else(|| EvalError::type_error(format!("{} expects a function", method)))
        };

        match method {
            "map" => {
                let f = callback()?.clone();
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    out.push(self.call_value(
                        &f,
                        &[item.clone(), Value::Number(i as f64)],
                        method,
                        host,
                    )?);
                }
                Ok(Value::array(out))
            }
            "filter" => {
                let f = callback()?.clone();
                let mut out = Vec::new();
                for (i, item) in items.iter().enumerate() {
                    let keep = self.call_value(
                        &f,
                        &[item.clone(), Value::Number(i as f64)],
                        method,
                        host,
                    )?;
                    if keep.is_truthy() {
                        out.push(item.clone());
                    }
                }
                Ok(Value::array(out))
            }
            "reduce" => {
                let f = callback()?.clone();
                let mut iter = items.iter().enumerate();
                let mut acc = match args.get(1) {
                    Some(initial) => initial.clone(),
                    None => match iter.next() {
                        Some((_, first)) => first.clone(),
                        None => {
                            return Err(EvalError::type_error(
                                "Reduce of empty array with no initial value",
                            ))
                        }
                    },
                };
                for (i, item) in iter {
                    acc = self.call_value(
                        &f,
                        &[acc, item.clone(), Value::Number(i as f64)],
                        method,
                        host,
                    )?;
                }
                Ok(acc)
            }
            "slice" => {
                let len = items.len() as f64;
                let clamp = |value: Option<&Value>, default: f64| -> usize {
                    let n = match value {
                        Some(v) if !matches!(v, Value::Undefined) => v.to_number().trunc(),
                        _ => default,
                    };
                    let n = if n.is_nan() { 0.0 } else { n };
                    let n = if n < 0.0 { (len + n).max(0.0) } else { n.min(len) };
                    n as usize
                };
                let start = clamp(args.first(), 0.0);
                let end = clamp(args.get(1), len);
                let out = if start < end {
                    items[start..end].to_vec()
                } else {
                    Vec::new()
                };
                Ok(Value::array(out))
            }
            "indexOf" => {
                let needle = args.first().cloned().unwrap_or_default();
                let position = items.iter().position(|item| item.strict_equals(&needle));
                Ok(Value::Number(position.map_or(-1.0, |p| p as f64)))
            }
            "includes" => {
                let needle = args.first().cloned().unwrap_or_default();
                let found = items.iter().any(|item| {
                    item.strict_equals(&needle)
                        || matches!((item, &needle), (Value::Number(a), Value::Number(b)) if a.is_nan() && b.is_nan())
                });
                Ok(Value::Bool(found))
            }
            _ => Err(EvalError::type_error(format!(
                "array.{} is not a function",
                method
            ))),
        }
    }
}

fn is_array_method(name: &str) -> bool {
    matches!(
        name,
        "map" | "filter" | "reduce" | "slice" | "indexOf" | "includes"
    )
}

fn get_property(object: &Value, property: &str) -> Result<Value, EvalError> {
    match object {
        Value::Undefined | Value::Null => Err(EvalError::type_error(format!(
            "Cannot read properties of {} (reading '{}')",
            object.type_name(),
            property
        ))),
        Value::Array(items) => Ok(match property {
            "length" => Value::Number(items.len() as f64),
            _ => property
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or_default(),
        }),
        Value::Str(s) => Ok(match property {
            "length" => Value::Number(s.chars().count() as f64),
            _ => Value::Undefined,
        }),
        Value::Object(entries) => Ok(entries.get(property).cloned().unwrap_or_default()),
        _ => Ok(Value::Undefined),
    }
}

fn get_index(object: &Value, index: &Value) -> Result<Value, EvalError> {
    match (object, index) {
        (Value::Array(items), Value::Number(n)) => {
            if *n >= 0.0 && n.fract() == 0.0 {
                Ok(items.get(*n as usize).cloned().unwrap_or_default())
            } else {
                Ok(Value::Undefined)
            }
        }
        (Value::Str(s), Value::Number(n)) if *n >= 0.0 && n.fract() == 0.0 => Ok(s
            .chars()
            .nth(*n as usize)
            .map(|c| Value::str(&c.to_string()))
            .unwrap_or_default()),
        _ => get_property(object, &index.to_js_string()),
    }
}

/// Objects, arrays and functions become strings before arithmetic
fn to_primitive(value: &Value) -> Value {
    match value {
        Value::Array(_) | Value::Object(_) | Value::Function(_) | Value::Native(_) => {
            Value::str(&value.to_js_string())
        }
        other => other.clone(),
    }
}

fn binary_op(op: BinaryOp, left: &Value, right: &Value) -> Value {
    match op {
        BinaryOp::Add => {
            let l = to_primitive(left);
            let r = to_primitive(right);
            if matches!(l, Value::Str(_)) || matches!(r, Value::Str(_)) {
                Value::str(&format!("{}{}", l.to_js_string(), r.to_js_string()))
            } else {
                Value::Number(l.to_number() + r.to_number())
            }
        }
        BinaryOp::Sub => Value::Number(left.to_number() - right.to_number()),
        BinaryOp::Mul => Value::Number(left.to_number() * right.to_number()),
        BinaryOp::Div => Value::Number(left.to_number() / right.to_number()),
        BinaryOp::Rem => Value::Number(left.to_number() % right.to_number()),
        BinaryOp::Pow => {
            let exponent = right.to_number();
            if exponent.is_nan() {
                Value::Number(f64::NAN)
            } else {
                Value::Number(left.to_number().powf(exponent))
            }
        }
        BinaryOp::Eq => Value::Bool(left.loose_equals(right)),
        BinaryOp::NotEq => Value::Bool(!left.loose_equals(right)),
        BinaryOp::StrictEq => Value::Bool(left.strict_equals(right)),
        BinaryOp::StrictNotEq => Value::Bool(!left.strict_equals(right)),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => {
            let l = to_primitive(left);
            let r = to_primitive(right);
            let ordering = match (&l, &r) {
                (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
                _ => l.to_number().partial_cmp(&r.to_number()),
            };
            Value::Bool(match ordering {
                None => false,
                Some(ordering) => match op {
                    BinaryOp::Lt => ordering.is_lt(),
                    BinaryOp::LtEq => ordering.is_le(),
                    BinaryOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                },
            })
        }
    }
}
