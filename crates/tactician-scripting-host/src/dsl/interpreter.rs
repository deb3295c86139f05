use std::collections::HashMap;
use std::sync::Arc;

use tactician_events::{BusEvent, Mention, Value};

use super::parser::{BinOp, Block, Expr, MAX_NESTING, MentionKind, Program, Stmt, StmtKind};
use crate::event_bus::{Filter, Handler};
use crate::{Cleanup, ScriptContext, ScriptError, ScriptOutcome};

/// Evaluation depth allowed before giving up; parsed programs stay well below it
const MAX_EVAL_DEPTH: usize = MAX_NESTING * 2;

/// Deepest list or map nesting a script may build
const MAX_VALUE_DEPTH: usize = 32;

/// Bounds applied to every invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_steps: u64,
    /// Characters plus elements, summed over the whole value
    pub max_value_len: usize,
}

enum Flow {
    Next,
    Return(Value),
}

type Scope = HashMap<String, Value>;

/// Tree-walking evaluator for one invocation
pub struct Interpreter<'a> {
    ctx: &'a mut ScriptContext,
    scopes: Vec<Scope>,
    steps: u64,
    depth: usize,
    limits: Limits,
    cleanup: Option<DslCleanup>,
    last_value: Value,
}

impl<'a> Interpreter<'a> {
    pub fn new(ctx: &'a mut ScriptContext, limits: Limits) -> Self {
        Self {
            ctx,
            scopes: vec![Scope::new()],
            steps: 0,
            depth: 0,
            limits,
            cleanup: None,
            last_value: Value::Null,
        }
    }

    fn with_scope(ctx: &'a mut ScriptContext, limits: Limits, scope: Scope) -> Self {
        let mut interp = Self::new(ctx, limits);
        interp.scopes = vec![scope];
        interp
    }

    /// Run a whole program: top-level statements, then the first entry point
    /// found among `run` and `default`. Without an entry point the value of
    /// the last top-level statement is the result.
    pub fn run_program(mut self, program: &Program) -> Result<ScriptOutcome, ScriptError> {
        let raw = match self.exec_block_in_place(&program.body)? {
            Flow::Return(value) => value,
            Flow::Next => std::mem::take(&mut self.last_value),
        };

        let value = match program.run.as_ref().or(program.default.as_ref()) {
            Some(entry) => match self.exec_block(entry)? {
                Flow::Return(value) => value,
                Flow::Next => Value::Null,
            },
            None => raw,
        };

        Ok(ScriptOutcome {
            value,
            cleanup: self
                .cleanup
                .take()
                .map(|c| Box::new(c) as Box<dyn Cleanup>),
        })
    }

    /// Flattened copy of every visible local, innermost binding winning
    fn capture(&self) -> Scope {
        let mut captured = Scope::new();
        for scope in &self.scopes {
            for (name, value) in scope {
                captured.insert(name.clone(), value.clone());
            }
        }
        captured
    }

    fn step(&mut self) -> Result<(), ScriptError> {
        self.steps += 1;
        if self.steps > self.limits.max_steps {
            return Err(ScriptError::BudgetExhausted(self.limits.max_steps));
        }
        Ok(())
    }

    fn descend(&mut self) -> Result<(), ScriptError> {
        if self.depth >= MAX_EVAL_DEPTH {
            return Err(ScriptError::runtime("evaluation nested too deeply"));
        }
        self.depth += 1;
        Ok(())
    }

    /// Reject values past the size or nesting cap before they are stored or grown further
    fn bounded(&self, value: Value) -> Result<Value, ScriptError> {
        let mut budget = self.limits.max_value_len;
        if !fits(&value, &mut budget, MAX_VALUE_DEPTH) {
            return Err(ScriptError::runtime(format!(
                "{} exceeds the value size limit of {}",
                value.type_name(),
                self.limits.max_value_len
            )));
        }
        Ok(value)
    }

    fn exec_block(&mut self, block: &Block) -> Result<Flow, ScriptError> {
        self.descend()?;
        self.scopes.push(Scope::new());
        let flow = self.exec_block_in_place(block);
        self.scopes.pop();
        self.depth -= 1;
        flow
    }

    fn exec_block_in_place(&mut self, block: &Block) -> Result<Flow, ScriptError> {
        for stmt in block {
            if let Flow::Return(value) = self.exec_stmt(stmt)? {
                return Ok(Flow::Return(value));
            }
        }
        Ok(Flow::Next)
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> Result<Flow, ScriptError> {
        self.step()?;
        self.exec_kind(&stmt.kind).map_err(|e| match e {
            ScriptError::Runtime(message) if !message.starts_with("line ") => {
                ScriptError::Runtime(format!("line {}: {}", stmt.line, message))
            }
            other => other,
        })
    }

    fn exec_kind(&mut self, kind: &StmtKind) -> Result<Flow, ScriptError> {
        match kind {
            StmtKind::Let(name, expr) => {
                let value = self.eval(expr)?;
                if let Some(scope) = self.scopes.last_mut() {
                    scope.insert(name.clone(), value);
                }
            }
            StmtKind::Assign(name, expr) => {
                let value = self.eval(expr)?;
                let slot = self
                    .scopes
                    .iter_mut()
                    .rev()
                    .find_map(|scope| scope.get_mut(name))
                    .ok_or_else(|| ScriptError::runtime(format!("assignment to undeclared '{}'", name)))?;
                *slot = value;
            }
            StmtKind::SetState(key, expr) => {
                let value = self.eval(expr)?;
                let value = self.bounded(value)?;
                self.ctx.state_set(key.clone(), value);
            }
            StmtKind::If {
                branches,
                otherwise,
            } => {
                for (condition, body) in branches {
                    if self.eval(condition)?.is_truthy() {
                        return self.exec_block(body);
                    }
                }
                if let Some(body) = otherwise {
                    return self.exec_block(body);
                }
            }
            StmtKind::For { var, iter, body } => {
                let items = match self.eval(iter)? {
                    Value::List(items) => items,
                    Value::Map(entries) => entries.into_keys().map(Value::Text).collect(),
                    Value::Null => Vec::new(),
                    other => {
                        return Err(ScriptError::runtime(format!(
                            "cannot iterate over {}",
                            other.type_name()
                        )));
                    }
                };
                for item in items {
                    self.step()?;
                    let mut scope = Scope::new();
                    scope.insert(var.clone(), item);
                    self.scopes.push(scope);
                    let flow = self.exec_block(body);
                    self.scopes.pop();
                    if let Flow::Return(value) = flow? {
                        return Ok(Flow::Return(value));
                    }
                }
            }
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Null,
                };
                return Ok(Flow::Return(value));
            }
            StmtKind::Fail(expr) => {
                let value = self.eval(expr)?;
                return Err(ScriptError::Raised(value.to_string()));
            }
            StmtKind::Trade { stop, target } => {
                let target = self.eval(target)?;
                if *stop {
                    self.ctx.game.stop_trade(&target)?;
                } else {
                    self.ctx.game.start_trade(&target)?;
                }
            }
            StmtKind::Log {
                level,
                message,
                mentions,
            } => {
                let message = self.eval(message)?.to_string();
                let mut resolved = Vec::new();
                for (kind, expr) in mentions {
                    let value = self.eval(expr)?;
                    if let Some(mention) = self.mention(*kind, &value) {
                        resolved.push(mention);
                    }
                }
                self.ctx.log.log(*level, message, resolved);
            }
            StmtKind::Emit { event, payload } => {
                let payload = match payload {
                    Some(expr) => self.eval(expr)?,
                    None => Value::map(),
                };
                let tick = self.ctx.tick();
                self.ctx.bus.emit(BusEvent::new(event.clone(), tick, payload));
            }
            StmtKind::On {
                event,
                delivery,
                filter,
                body,
            } => {
                let env = self.capture();
                let filter = filter
                    .as_ref()
                    .map(|expr| make_filter(expr.clone(), env.clone(), self.limits));
                let handler = make_handler(body.clone(), env, self.limits);
                self.ctx.bus.subscribe(event.clone(), *delivery, filter, handler);
            }
            StmtKind::Cleanup(body) => {
                self.cleanup = Some(DslCleanup {
                    body: body.clone(),
                    env: self.capture(),
                    limits: self.limits,
                });
            }
            StmtKind::Expr(expr) => {
                self.last_value = self.eval(expr)?;
            }
        }
        Ok(Flow::Next)
    }

    fn mention(&self, kind: MentionKind, value: &Value) -> Option<Mention> {
        match (kind, value) {
            (_, Value::Null) => None,
            (MentionKind::Player, Value::Map(_)) => {
                let id = value.get("id")?.as_str()?.to_string();
                let name = value.get("name").and_then(Value::as_str).map(str::to_string);
                Some(Mention::Player { id, name })
            }
            (MentionKind::Player, other) => {
                let id = other.to_string();
                let name = self.ctx.game.player(&id).map(|p| p.name.clone());
                Some(Mention::Player { id, name })
            }
            (MentionKind::Team, other) => Some(Mention::Team(other.to_string())),
            (MentionKind::Clan, other) => Some(Mention::Clan(other.to_string())),
        }
    }

    fn lookup(&self, name: &str) -> Result<Value, ScriptError> {
        if let Some(value) = self.scopes.iter().rev().find_map(|scope| scope.get(name)) {
            return Ok(value.clone());
        }
        Ok(match name {
            "players" => self.ctx.game.players_value(),
            "me" => self.ctx.game.me_value(),
            "tick" => Value::from(self.ctx.tick()),
            "settings" => self.ctx.settings.clone(),
            "state" => self.ctx.state.clone(),
            "meta" => self.ctx.meta.to_value(),
            _ => return Err(ScriptError::runtime(format!("unknown name '{}'", name))),
        })
    }

    fn eval(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        self.descend()?;
        let value = self.eval_inner(expr);
        self.depth -= 1;
        value
    }

    fn eval_inner(&mut self, expr: &Expr) -> Result<Value, ScriptError> {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::List(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item)?);
                }
                self.bounded(Value::List(values))
            }
            Expr::Map(entries) => {
                let mut map = Value::map();
                for (key, item) in entries {
                    let value = self.eval(item)?;
                    map = map.with(key.clone(), value);
                }
                self.bounded(map)
            }
            Expr::Var(name) => self.lookup(name),
            Expr::Member(base, field) => {
                // Avoid cloning whole context maps for `state.x` and friends
                let source = match base.as_ref() {
                    Expr::Var(name) if !self.scopes.iter().any(|scope| scope.contains_key(name)) => {
                        match name.as_str() {
                            "settings" => Some(&self.ctx.settings),
                            "state" => Some(&self.ctx.state),
                            _ => None,
                        }
                    }
                    _ => None,
                };
                if let Some(source) = source {
                    return Ok(source.get(field).cloned().unwrap_or_default());
                }
                let base = self.eval(base)?;
                member(&base, field)
            }
            Expr::Index(base, index) => {
                let base = self.eval(base)?;
                let index = self.eval(index)?;
                index_value(&base, &index)
            }
            Expr::Call(name, args) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(self.eval(arg)?);
                }
                let value = call_builtin(name, &values)?;
                self.bounded(value)
            }
            Expr::Neg(inner) => match self.eval(inner)? {
                Value::Number(n) => Ok(Value::Number(-n)),
                other => Err(ScriptError::runtime(format!("cannot negate {}", other.type_name()))),
            },
            Expr::Not(inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::And(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() { self.eval(right) } else { Ok(left) }
            }
            Expr::Or(left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() { Ok(left) } else { self.eval(right) }
            }
            Expr::Binary(op, left, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                let value = binary(*op, left, right)?;
                if *op == BinOp::Add {
                    return self.bounded(value);
                }
                Ok(value)
            }
        }
    }
}

/// Charge `value` against `budget`, failing once it runs out or nesting passes `depth`
fn fits(value: &Value, budget: &mut usize, depth: usize) -> bool {
    let cost = match value {
        Value::Text(text) => text.len(),
        Value::List(items) => items.len(),
        Value::Map(entries) => entries.keys().map(String::len).sum::<usize>() + entries.len(),
        _ => 1,
    };
    let Some(left) = budget.checked_sub(cost) else {
        return false;
    };
    *budget = left;
    match value {
        Value::List(items) => depth > 0 && items.iter().all(|item| fits(item, budget, depth - 1)),
        Value::Map(entries) => depth > 0 && entries.values().all(|item| fits(item, budget, depth - 1)),
        _ => true,
    }
}

fn member(base: &Value, field: &str) -> Result<Value, ScriptError> {
    match base {
        Value::Null => Err(ScriptError::runtime(format!("cannot read '{}' of null", field))),
        Value::Map(_) => Ok(base.get(field).cloned().unwrap_or_default()),
        _ => Ok(Value::Null),
    }
}

fn index_value(base: &Value, index: &Value) -> Result<Value, ScriptError> {
    match (base, index) {
        (Value::List(items), Value::Number(n)) => {
            if *n < 0.0 || n.fract() != 0.0 {
                return Ok(Value::Null);
            }
            Ok(items.get(*n as usize).cloned().unwrap_or_default())
        }
        (Value::Map(_), Value::Text(key)) => Ok(base.get(key).cloned().unwrap_or_default()),
        (Value::Null, _) => Err(ScriptError::runtime("cannot index into null")),
        (base, index) => Err(ScriptError::runtime(format!(
            "cannot index {} with {}",
            base.type_name(),
            index.type_name()
        ))),
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> Result<Value, ScriptError> {
    use std::cmp::Ordering;

    let compare = |left: &Value, right: &Value| -> Result<Ordering, ScriptError> {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => a
                .partial_cmp(b)
                .ok_or_else(|| ScriptError::runtime("cannot compare NaN")),
            (Value::Text(a), Value::Text(b)) => Ok(a.cmp(b)),
            _ => Err(ScriptError::runtime(format!(
                "cannot compare {} with {}",
                left.type_name(),
                right.type_name()
            ))),
        }
    };

    match op {
        BinOp::Eq => Ok(Value::Bool(left == right)),
        BinOp::NotEq => Ok(Value::Bool(left != right)),
        BinOp::Lt => Ok(Value::Bool(compare(&left, &right)? == Ordering::Less)),
        BinOp::LtEq => Ok(Value::Bool(compare(&left, &right)? != Ordering::Greater)),
        BinOp::Gt => Ok(Value::Bool(compare(&left, &right)? == Ordering::Greater)),
        BinOp::GtEq => Ok(Value::Bool(compare(&left, &right)? != Ordering::Less)),
        BinOp::Add => match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
            (Value::List(mut a), Value::List(b)) => {
                a.extend(b);
                Ok(Value::List(a))
            }
            (left @ Value::Text(_), right) | (left, right @ Value::Text(_)) => {
                Ok(Value::Text(format!("{}{}", left, right)))
            }
            (left, right) => Err(ScriptError::runtime(format!(
                "cannot add {} and {}",
                left.type_name(),
                right.type_name()
            ))),
        },
        BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Rem => {
            let (Value::Number(a), Value::Number(b)) = (&left, &right) else {
                return Err(ScriptError::runtime(format!(
                    "arithmetic needs numbers, got {} and {}",
                    left.type_name(),
                    right.type_name()
                )));
            };
            let (a, b) = (*a, *b);
            if matches!(op, BinOp::Div | BinOp::Rem) && b == 0.0 {
                return Err(ScriptError::runtime("division by zero"));
            }
            Ok(Value::Number(match op {
                BinOp::Sub => a - b,
                BinOp::Mul => a * b,
                BinOp::Div => a / b,
                _ => a % b,
            }))
        }
    }
}

fn expect_args(name: &str, args: &[Value], count: usize) -> Result<(), ScriptError> {
    if args.len() != count {
        return Err(ScriptError::runtime(format!(
            "{}() takes {} argument(s), got {}",
            name,
            count,
            args.len()
        )));
    }
    Ok(())
}

fn text_arg<'v>(name: &str, value: &'v Value) -> Result<&'v str, ScriptError> {
    value
        .as_str()
        .ok_or_else(|| ScriptError::runtime(format!("{}() expects text, got {}", name, value.type_name())))
}

fn call_builtin(name: &str, args: &[Value]) -> Result<Value, ScriptError> {
    match name {
        "len" => {
            expect_args(name, args, 1)?;
            let len = match &args[0] {
                Value::List(items) => items.len(),
                Value::Map(entries) => entries.len(),
                Value::Text(s) => s.chars().count(),
                Value::Null => 0,
                other => {
                    return Err(ScriptError::runtime(format!("len() of {}", other.type_name())));
                }
            };
            Ok(Value::from(len as u64))
        }
        "find" => {
            expect_args(name, args, 3)?;
            let items = args[0].as_list().unwrap_or_default();
            let key = text_arg(name, &args[1])?;
            Ok(items
                .iter()
                .find(|item| item.get(key) == Some(&args[2]))
                .cloned()
                .unwrap_or_default())
        }
        "contains" => {
            expect_args(name, args, 2)?;
            Ok(Value::Bool(match (&args[0], &args[1]) {
                (Value::List(items), needle) => items.contains(needle),
                (Value::Map(entries), Value::Text(key)) => entries.contains_key(key),
                (Value::Text(hay), Value::Text(needle)) => hay.contains(needle.as_str()),
                _ => false,
            }))
        }
        "lower" => {
            expect_args(name, args, 1)?;
            Ok(Value::Text(text_arg(name, &args[0])?.to_lowercase()))
        }
        "upper" => {
            expect_args(name, args, 1)?;
            Ok(Value::Text(text_arg(name, &args[0])?.to_uppercase()))
        }
        "str" => {
            expect_args(name, args, 1)?;
            Ok(Value::Text(args[0].to_string()))
        }
        "num" => {
            expect_args(name, args, 1)?;
            Ok(match &args[0] {
                Value::Number(n) => Value::Number(*n),
                Value::Bool(b) => Value::Number(if *b { 1.0 } else { 0.0 }),
                Value::Text(s) => s
                    .trim()
                    .replace(',', "")
                    .parse::<f64>()
                    .map(Value::Number)
                    .unwrap_or_default(),
                _ => Value::Null,
            })
        }
        "floor" => {
            expect_args(name, args, 1)?;
            match &args[0] {
                Value::Number(n) => Ok(Value::Number(n.floor())),
                other => Err(ScriptError::runtime(format!("floor() of {}", other.type_name()))),
            }
        }
        "min" | "max" => {
            let values: &[Value] = match args {
                [Value::List(items)] => items.as_slice(),
                _ => args,
            };
            let mut best: Option<f64> = None;
            for value in values {
                let n = value.as_f64().ok_or_else(|| {
                    ScriptError::runtime(format!("{}() expects numbers, got {}", name, value.type_name()))
                })?;
                best = Some(match best {
                    None => n,
                    Some(b) if name == "min" => b.min(n),
                    Some(b) => b.max(n),
                });
            }
            Ok(best.map(Value::Number).unwrap_or_default())
        }
        _ => Err(ScriptError::runtime(format!("unknown function '{}'", name))),
    }
}

fn make_handler(body: Arc<Block>, env: Scope, limits: Limits) -> Handler {
    Box::new(move |event: &BusEvent, ctx: &mut ScriptContext| {
        let mut scope = env.clone();
        scope.insert("event".to_string(), event.payload.clone());
        let mut interp = Interpreter::with_scope(ctx, limits, scope);
        interp.exec_block(&body).map(|_| ())
    })
}

fn make_filter(expr: Arc<Expr>, env: Scope, limits: Limits) -> Filter {
    Box::new(move |event: &BusEvent, ctx: &mut ScriptContext| {
        let mut scope = env.clone();
        scope.insert("event".to_string(), event.payload.clone());
        let mut interp = Interpreter::with_scope(ctx, limits, scope);
        Ok(interp.eval(&expr)?.is_truthy())
    })
}

/// Cleanup routine registered with `cleanup { ... }`
struct DslCleanup {
    body: Arc<Block>,
    env: Scope,
    limits: Limits,
}

impl Cleanup for DslCleanup {
    fn run(self: Box<Self>, ctx: &mut ScriptContext) -> Result<(), ScriptError> {
        let DslCleanup {
            body,
            env,
            limits,
        } = *self;
        let mut interp = Interpreter::with_scope(ctx, limits, env);
        interp.exec_block(&body).map(|_| ())
    }
}
