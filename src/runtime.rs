use log::{debug, error, warn};
use nu_ansi_term::Color;
use std::{
    collections::HashMap,
    io::{self, BufRead, BufReader, Write},
    path::PathBuf,
    rc::Rc,
};

use crate::{
    ast::{
        BinaryOp, Block, Expr, ExprType, ForKind, ForLoop, FunctionDef, Lambda, Literal,
        PropertyChain, Stmt, StmtType, SwitchCase, UnaryOp,
    },
    environment::Environment,
    error::{runtime_error, Error, Result, RuntimeError, SafetyError},
    loop_manager::{LoopContext, LoopLimits, LoopManager, LoopStatistics},
    module::ModuleTable,
    parser::parse,
    stdlib::{LibraryTable, CORE},
    tokenizer::tokenize,
    value::{set_field, Number, Value},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeConfig {
    /// Directory that relative `use` paths are resolved against.
    pub base_dir: PathBuf,
    pub max_call_depth: usize,
    pub loop_limits: LoopLimits,
    /// Paint error reports red.
    pub color: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        RuntimeConfig {
            base_dir: PathBuf::from("."),
            max_call_depth: 200,
            loop_limits: LoopLimits::default(),
            color: true,
        }
    }
}

/// How a statement finished.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFlow {
    Normal,
    Break,
    Continue,
    Return(Value),
}

enum LoopStep {
    Next,
    Exit(ControlFlow),
}

pub struct Runtime {
    pub(crate) env: Environment,
    pub(crate) functions: HashMap<String, Rc<FunctionDef>>,
    pub(crate) modules: ModuleTable,
    pub(crate) libraries: LibraryTable,
    pub(crate) base_dir: PathBuf,
    /// Resolved paths of modules whose loading is in progress.
    pub(crate) loading: Vec<PathBuf>,
    loops: LoopManager,
    config: RuntimeConfig,
    call_depth: usize,
    output: Box<dyn Write>,
    errors: Box<dyn Write>,
    input: Box<dyn BufRead>,
}

impl Runtime {
    pub fn new(config: RuntimeConfig) -> Self {
        Runtime::with_io(
            config,
            Box::new(io::stdout()),
            Box::new(io::stderr()),
            Box::new(BufReader::new(io::stdin())),
        )
    }

    pub fn with_io(
        config: RuntimeConfig,
        output: Box<dyn Write>,
        errors: Box<dyn Write>,
        input: Box<dyn BufRead>,
    ) -> Self {
        Runtime {
            env: Environment::new(),
            functions: HashMap::new(),
            modules: ModuleTable::new(),
            libraries: LibraryTable::standard(),
            base_dir: config.base_dir.clone(),
            loading: Vec::new(),
            loops: LoopManager::new(config.loop_limits),
            config,
            call_depth: 0,
            output,
            errors,
            input,
        }
    }

    pub fn statistics(&self) -> LoopStatistics {
        self.loops.statistics()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.env.get(name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionDef> {
        self.functions.get(name).map(|function| function.as_ref())
    }

    pub fn modules(&self) -> &ModuleTable {
        &self.modules
    }

    /// Tokenizes, parses and runs a complete program.
    pub fn run_source(&mut self, source: &[u8]) -> Result<()> {
        let tokens = tokenize(source)?;
        let program = parse(&tokens)?;
        self.run(&program)
    }

    /// Runs each top-level statement in turn. A recoverable error is reported
    /// and execution moves on to the next statement; fatal errors abort.
    pub fn run(&mut self, program: &Block) -> Result<()> {
        for stmt in program {
            match self.execute(stmt) {
                Ok(ControlFlow::Normal) => {}
                Ok(ControlFlow::Return(_)) => {
                    debug!("top-level return at line {}", stmt.line);
                    break;
                }
                Ok(ControlFlow::Break | ControlFlow::Continue) => {
                    warn!("ignoring 'break' or 'continue' outside a loop at line {}", stmt.line);
                }
                Err(Error::Runtime(err)) if !err.is_fatal() => {
                    error!("{} at line {}: {}", err.code(), err.line(), err);
                    self.report(&err.to_string(), err.line())?;
                }
                Err(err) => {
                    self.output.flush()?;
                    return Err(err);
                }
            }
        }

        self.output.flush()?;
        Ok(())
    }

    /// Writes `Line N: message` to the error sink.
    pub(crate) fn report(&mut self, message: &str, line: usize) -> Result<()> {
        let text = format!("Line {}: {}", line, message);
        if self.config.color {
            writeln!(self.errors, "{}", Color::Red.paint(text))?;
        } else {
            writeln!(self.errors, "{}", text)?;
        }
        Ok(())
    }

    pub fn execute_block(&mut self, block: &[Stmt]) -> Result<ControlFlow> {
        for stmt in block {
            match self.execute(stmt)? {
                ControlFlow::Normal => {}
                flow => return Ok(flow),
            }
        }
        Ok(ControlFlow::Normal)
    }

    fn execute(&mut self, stmt: &Stmt) -> Result<ControlFlow> {
        let line = stmt.line;

        match &stmt.stmt_type {
            StmtType::Use { path, alias } => self.use_module(path, alias, line)?,
            StmtType::Let {
                name, initializer, ..
            } => {
                let value = self.evaluate(initializer)?;
                self.env.declare(name, value);
            }
            StmtType::Assign { name, value } => {
                let value = self.evaluate(value)?;
                self.env.assign(name, value);
            }
            StmtType::IndexAssign { name, index, value } => {
                let index = self.evaluate(index)?;
                let value = self.evaluate(value)?;
                let target = self.env.get_mut(name).ok_or_else(|| {
                    RuntimeError::UndefinedVariable {
                        name: name.clone(),
                        line,
                    }
                })?;
                assign_index(target, &index, value, line)?;
            }
            StmtType::PropertyAssign(chain) => self.assign_property(chain, line)?,
            StmtType::Function(function) => {
                debug!("registering function '{}'", function.name);
                self.functions
                    .insert(function.name.clone(), Rc::new(function.clone()));
            }
            StmtType::If {
                condition,
                then_branch,
                else_branch,
            } => {
                if self.evaluate(condition)?.is_truthy() {
                    return self.execute_block(then_branch);
                }
                if let Some(else_branch) = else_branch {
                    return self.execute_block(else_branch);
                }
            }
            StmtType::While { condition, body } => {
                return self.execute_while(condition, body, line)
            }
            StmtType::For(for_loop) => return self.execute_for(for_loop, line),
            StmtType::Switch {
                subject,
                cases,
                default,
            } => return self.execute_switch(subject, cases, default.as_ref()),
            StmtType::Try {
                body,
                catch_var,
                handler,
            } => return self.execute_try(body, catch_var, handler),
            StmtType::Print(arguments) => {
                let values = self.evaluate_all(arguments)?;
                let text = values
                    .iter()
                    .map(Value::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                writeln!(self.output, "{}", text)?;
            }
            StmtType::Return(value) => {
                let value = match value {
                    Some(expr) => self.evaluate(expr)?,
                    None => Value::None,
                };
                return Ok(ControlFlow::Return(value));
            }
            StmtType::Break => return Ok(ControlFlow::Break),
            StmtType::Continue => return Ok(ControlFlow::Continue),
            StmtType::Expression(expr) => {
                self.evaluate(expr)?;
            }
        }

        Ok(ControlFlow::Normal)
    }

    fn assign_property(&mut self, chain: &PropertyChain, line: usize) -> Result<()> {
        let value = self.evaluate(chain.value())?;
        let base = chain.base();
        let properties = chain.properties();

        // `m.x = v` on a module constant rebinds the qualified name.
        let qualified = format!("{}.{}", base, properties[0]);
        if self.env.get(base).is_none() && self.env.get(&qualified).is_some() {
            if let Some(target) = self.env.get_mut(&qualified) {
                return set_path(target, &properties[1..], value, line);
            }
        }

        if self.env.get(base).is_none() {
            self.env.assign(base, Value::Object(Vec::new()));
        }
        let target = self
            .env
            .get_mut(base)
            .ok_or_else(|| RuntimeError::UndefinedVariable {
                name: base.to_string(),
                line,
            })?;
        set_path(target, &properties, value, line)
    }

    fn execute_switch(
        &mut self,
        subject: &Expr,
        cases: &[SwitchCase],
        default: Option<&Block>,
    ) -> Result<ControlFlow> {
        let subject = self.evaluate(subject)?;

        let mut body = default;
        for case in cases {
            if self.evaluate(&case.value)? == subject {
                body = Some(&case.body);
                break;
            }
        }

        match body {
            Some(body) => match self.execute_block(body)? {
                ControlFlow::Break => Ok(ControlFlow::Normal),
                flow => Ok(flow),
            },
            None => Ok(ControlFlow::Normal),
        }
    }

    fn execute_try(
        &mut self,
        body: &Block,
        catch_var: &str,
        handler: &Block,
    ) -> Result<ControlFlow> {
        let mark = self.env.mark();
        let loop_depth = self.loops.depth();
        let call_depth = self.call_depth;

        let flow = match self.execute_block(body) {
            Err(Error::Runtime(err)) if !err.is_fatal() => {
                debug!("caught {} at line {}: {}", err.code(), err.line(), err);
                self.env.restore(mark);
                self.loops.unwind_to(loop_depth);
                self.call_depth = call_depth;

                self.env
                    .define(catch_var, Value::String(err.description().to_string()));
                self.execute_block(handler)
            }
            flow => flow,
        };

        self.env.restore(mark);
        flow
    }

    fn safety_failure(&mut self, err: SafetyError) -> Result<()> {
        error!("{} at line {}: {}", err.code(), err.line(), err);
        self.loops.record_error();
        self.report(&err.to_string(), err.line())
    }

    /// Runs `body` inside a fresh loop context. A loop nested too deeply is
    /// reported and skipped.
    fn with_loop<F>(&mut self, context: LoopContext, body: F) -> Result<ControlFlow>
    where
        F: FnOnce(&mut Self) -> Result<ControlFlow>,
    {
        if let Err(err) = self.loops.push(context) {
            self.safety_failure(err)?;
            return Ok(ControlFlow::Normal);
        }

        let flow = body(self);
        self.loops.pop();
        flow
    }

    fn loop_body(&mut self, body: &Block) -> Result<LoopStep> {
        if let Err(err) = self.loops.tick() {
            self.safety_failure(err)?;
            return Ok(LoopStep::Exit(ControlFlow::Normal));
        }

        match self.execute_block(body)? {
            ControlFlow::Normal | ControlFlow::Continue => Ok(LoopStep::Next),
            ControlFlow::Break => Ok(LoopStep::Exit(ControlFlow::Normal)),
            flow @ ControlFlow::Return(_) => Ok(LoopStep::Exit(flow)),
        }
    }

    fn execute_while(&mut self, condition: &Expr, body: &Block, line: usize) -> Result<ControlFlow> {
        let context = LoopContext::new("while", Number::ZERO, Number::ZERO, Number::ONE, line);

        self.with_loop(context, |runtime| {
            while runtime.evaluate(condition)?.is_truthy() {
                if let LoopStep::Exit(flow) = runtime.loop_body(body)? {
                    return Ok(flow);
                }
            }
            Ok(ControlFlow::Normal)
        })
    }

    fn execute_for(&mut self, for_loop: &ForLoop, line: usize) -> Result<ControlFlow> {
        let variable = for_loop.variable.as_str();
        let body = &for_loop.body;

        match &for_loop.kind {
            ForKind::Range { start, end } => self.execute_range(variable, start, end, None, body, line),
            ForKind::Step { start, end, step } | ForKind::Countdown { start, end, step } => {
                self.execute_range(variable, start, end, Some(step), body, line)
            }
            ForKind::Array { iterable } => self.execute_each(variable, iterable, body, line),
        }
    }

    fn execute_range(
        &mut self,
        variable: &str,
        start: &Expr,
        end: &Expr,
        step: Option<&Expr>,
        body: &Block,
        line: usize,
    ) -> Result<ControlFlow> {
        let start = self.loop_bound(start)?;
        let end = self.loop_bound(end)?;
        let step = match step {
            Some(step) => self.loop_bound(step)?,
            None => Number::ONE,
        };

        if !self.loops.validate_range(start, end, step) {
            debug!("range check failed for loop at line {}", line);
        }
        if step.is_zero() {
            return Ok(ControlFlow::Normal);
        }

        let context = LoopContext::new(variable, start, end, step, line);
        self.with_loop(context, |runtime| {
            let mut current = start;
            while (step > Number::ZERO && current <= end) || (step < Number::ZERO && current >= end) {
                runtime.loops.advance(current);
                runtime.env.declare(variable, Value::Number(current));

                if let LoopStep::Exit(flow) = runtime.loop_body(body)? {
                    return Ok(flow);
                }

                current = match current.checked_add(step) {
                    Some(next) => next,
                    None => break,
                };
            }
            Ok(ControlFlow::Normal)
        })
    }

    fn execute_each(
        &mut self,
        variable: &str,
        iterable: &Expr,
        body: &Block,
        line: usize,
    ) -> Result<ControlFlow> {
        let items: Vec<Value> = match self.evaluate(iterable)? {
            Value::Array(items) => items,
            Value::String(text) => text.chars().map(|c| Value::String(c.to_string())).collect(),
            Value::Object(fields) => fields.into_iter().map(|(key, _)| Value::String(key)).collect(),
            other => {
                return runtime_error(RuntimeError::TypeMismatch {
                    message: format!("cannot iterate over a {}", other.kind().name()),
                    line,
                })
            }
        };

        let end = count(items.len());
        let context = LoopContext::new(variable, Number::ZERO, end, Number::ONE, line);
        self.with_loop(context, |runtime| {
            for (position, item) in items.into_iter().enumerate() {
                runtime.loops.advance(count(position));
                runtime.env.declare(variable, item);

                if let LoopStep::Exit(flow) = runtime.loop_body(body)? {
                    return Ok(flow);
                }
            }
            Ok(ControlFlow::Normal)
        })
    }

    fn loop_bound(&mut self, expr: &Expr) -> Result<Number> {
        match self.evaluate(expr)? {
            Value::Number(n) => Ok(n),
            other => runtime_error(RuntimeError::TypeMismatch {
                message: format!("loop bounds must be numbers, found {}", other.kind().name()),
                line: expr.line,
            }),
        }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Value> {
        let line = expr.line;

        match &expr.expr_type {
            ExprType::Literal(literal) => Ok(match literal {
                Literal::Number(n) => Value::Number(*n),
                Literal::String(s) => Value::String(s.clone()),
                Literal::Boolean(b) => Value::Boolean(*b),
            }),
            ExprType::Variable(name) => self.env.get(name).cloned().ok_or_else(|| {
                Error::Runtime(RuntimeError::UndefinedVariable {
                    name: name.clone(),
                    line,
                })
            }),
            ExprType::Unary { operator, operand } => {
                let operand = self.evaluate(operand)?;
                match (operator, operand) {
                    (UnaryOp::Negate, Value::Number(n)) => n
                        .checked_neg()
                        .map(Value::Number)
                        .ok_or_else(|| overflow("-", line)),
                    (UnaryOp::Negate, other) => runtime_error(RuntimeError::TypeMismatch {
                        message: format!("cannot negate a {}", other.kind().name()),
                        line,
                    }),
                }
            }
            ExprType::Binary {
                left,
                operator,
                right,
            } => self.evaluate_binary(left, *operator, right, line),
            ExprType::Call { callee, arguments } => self.evaluate_call(callee, arguments, line),
            ExprType::Member { object, name } => self.evaluate_member(object, name, line),
            ExprType::Index { object, index } => {
                let target = self.evaluate(object)?;
                let index = self.evaluate(index)?;
                read_index(&target, &index, line)
            }
            ExprType::Array(elements) => Ok(Value::Array(self.evaluate_all(elements)?)),
            ExprType::Object(entries) => {
                let mut fields = Vec::with_capacity(entries.len());
                for (key, value) in entries {
                    let value = self.evaluate(value)?;
                    set_field(&mut fields, key, value);
                }
                Ok(Value::Object(fields))
            }
            ExprType::Lambda(lambda) => Ok(Value::Lambda(Rc::new(lambda.clone()))),
        }
    }

    pub fn evaluate_all(&mut self, exprs: &[Expr]) -> Result<Vec<Value>> {
        let mut values = Vec::with_capacity(exprs.len());
        for expr in exprs {
            values.push(self.evaluate(expr)?);
        }
        Ok(values)
    }

    fn evaluate_binary(
        &mut self,
        left: &Expr,
        operator: BinaryOp,
        right: &Expr,
        line: usize,
    ) -> Result<Value> {
        match operator {
            BinaryOp::And => {
                if !self.evaluate(left)?.is_truthy() {
                    return Ok(Value::Boolean(false));
                }
                Ok(Value::Boolean(self.evaluate(right)?.is_truthy()))
            }
            BinaryOp::Or => {
                if self.evaluate(left)?.is_truthy() {
                    return Ok(Value::Boolean(true));
                }
                Ok(Value::Boolean(self.evaluate(right)?.is_truthy()))
            }
            _ => {
                let left = self.evaluate(left)?;
                let right = self.evaluate(right)?;
                apply_binary(operator, left, right, line)
            }
        }
    }

    fn evaluate_member(&mut self, object: &Expr, name: &str, line: usize) -> Result<Value> {
        if let ExprType::Variable(alias) = &object.expr_type {
            if self.env.get(alias).is_none() {
                if let Some(value) = self.env.get(&format!("{}.{}", alias, name)) {
                    return Ok(value.clone());
                }
                if let Some(value) = self
                    .modules
                    .library(alias)
                    .and_then(|library| LibraryTable::constant(library, name))
                {
                    return Ok(value);
                }
            }
        }

        let target = self.evaluate(object)?;
        read_member(&target, name, line)
    }

    fn evaluate_call(&mut self, callee: &Expr, arguments: &[Expr], line: usize) -> Result<Value> {
        match &callee.expr_type {
            ExprType::Variable(name) => self.call_named(name, arguments, line),
            ExprType::Member { object, name } => {
                if let ExprType::Variable(alias) = &object.expr_type {
                    if let Some(result) = self.call_qualified(alias, name, arguments, line) {
                        return result;
                    }
                    if self.env.get(alias).is_none() {
                        return runtime_error(RuntimeError::FunctionCall {
                            message: format!("undefined function '{}.{}'", alias, name),
                            line,
                        });
                    }
                }
                let target = self.evaluate(callee)?;
                self.call_value(target, arguments, line)
            }
            _ => {
                let target = self.evaluate(callee)?;
                self.call_value(target, arguments, line)
            }
        }
    }

    /// `alias.name(...)`: module function, then library function.
    fn call_qualified(
        &mut self,
        alias: &str,
        name: &str,
        arguments: &[Expr],
        line: usize,
    ) -> Option<Result<Value>> {
        let qualified = format!("{}.{}", alias, name);
        if let Some(function) = self.functions.get(&qualified).cloned() {
            return Some(self.call_function(&function, arguments, line));
        }

        let library = self.modules.library(alias)?;
        LibraryTable::call(self, library, name, arguments, line)
    }

    /// Bare `name(...)`: registered function, then a lambda variable, then a core built-in.
    fn call_named(&mut self, name: &str, arguments: &[Expr], line: usize) -> Result<Value> {
        if let Some(function) = self.functions.get(name).cloned() {
            return self.call_function(&function, arguments, line);
        }

        if let Some(Value::Lambda(lambda)) = self.env.get(name) {
            let lambda = Rc::clone(lambda);
            return self.call_lambda(&lambda, arguments, line);
        }

        if let Some(result) = LibraryTable::call(self, CORE, name, arguments, line) {
            return result;
        }

        let message = match self.env.get(name) {
            Some(value) => format!("'{}' is a {}, not a function", name, value.kind().name()),
            None => format!("undefined function '{}'", name),
        };
        runtime_error(RuntimeError::FunctionCall { message, line })
    }

    fn call_value(&mut self, target: Value, arguments: &[Expr], line: usize) -> Result<Value> {
        match target {
            Value::Lambda(lambda) => self.call_lambda(&lambda, arguments, line),
            other => runtime_error(RuntimeError::FunctionCall {
                message: format!("cannot call a {}", other.kind().name()),
                line,
            }),
        }
    }

    fn call_function(
        &mut self,
        function: &FunctionDef,
        arguments: &[Expr],
        line: usize,
    ) -> Result<Value> {
        let values = self.evaluate_all(arguments)?;
        check_arity(&function.name, function.params.len(), values.len(), line)?;

        let params: Vec<&str> = function.params.iter().map(|p| p.name.as_str()).collect();
        self.invoke(&params, values, line, |runtime| {
            match runtime.execute_block(&function.body)? {
                ControlFlow::Return(value) => Ok(value),
                _ => Ok(Value::None),
            }
        })
    }

    fn call_lambda(&mut self, lambda: &Lambda, arguments: &[Expr], line: usize) -> Result<Value> {
        let values = self.evaluate_all(arguments)?;
        check_arity("lambda", lambda.params.len(), values.len(), line)?;

        let params: Vec<&str> = lambda.params.iter().map(String::as_str).collect();
        self.invoke(&params, values, line, |runtime| runtime.evaluate(&lambda.body))
    }

    /// Binds `params` in a new scope, runs `body`, and pops the scope again
    /// whether or not `body` succeeded.
    fn invoke<F>(&mut self, params: &[&str], values: Vec<Value>, line: usize, body: F) -> Result<Value>
    where
        F: FnOnce(&mut Self) -> Result<Value>,
    {
        if self.call_depth >= self.config.max_call_depth {
            return runtime_error(RuntimeError::Recursion {
                limit: self.config.max_call_depth,
                line,
            });
        }

        self.call_depth += 1;
        self.env.push_scope();
        for (name, value) in params.iter().zip(values) {
            self.env.define(name, value);
        }

        let result = body(self);

        self.call_depth -= 1;
        if !self.env.pop_scope() {
            return runtime_error(RuntimeError::BadMemory {
                message: "scope stack underflow".to_string(),
                line,
            });
        }
        result
    }

    /// Reads one line for `input()`, echoing `prompt` first.
    pub(crate) fn read_input(&mut self, prompt: Option<&str>, line: usize) -> Result<String> {
        if let Some(prompt) = prompt {
            write!(self.output, "{}", prompt)?;
        }
        self.output.flush()?;

        let mut buffer = String::new();
        match self.input.read_line(&mut buffer) {
            Ok(0) | Err(_) => runtime_error(RuntimeError::InputFailed { line }),
            Ok(_) => Ok(buffer.trim_end_matches(&['\n', '\r'][..]).to_string()),
        }
    }
}

fn check_arity(name: &str, expected: usize, found: usize, line: usize) -> Result<()> {
    if expected == found {
        return Ok(());
    }
    runtime_error(RuntimeError::FunctionCall {
        message: format!("'{}' expects {} arguments, got {}", name, expected, found),
        line,
    })
}

fn count(n: usize) -> Number {
    Number::from_int(n as i64).unwrap_or(Number::ZERO)
}

fn overflow(symbol: &str, line: usize) -> Error {
    Error::Runtime(RuntimeError::InvalidOperation {
        message: format!("numeric overflow in '{}'", symbol),
        line,
    })
}

fn arithmetic(
    operator: BinaryOp,
    left: Value,
    right: Value,
    line: usize,
    apply: fn(Number, Number) -> Option<Number>,
) -> Result<Value> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => apply(a, b)
            .map(Value::Number)
            .ok_or_else(|| overflow(operator.symbol(), line)),
        (left, right) => runtime_error(RuntimeError::TypeMismatch {
            message: format!(
                "'{}' needs numbers, found {} and {}",
                operator.symbol(),
                left.kind().name(),
                right.kind().name()
            ),
            line,
        }),
    }
}

fn apply_binary(operator: BinaryOp, left: Value, right: Value, line: usize) -> Result<Value> {
    match operator {
        BinaryOp::Add => match (left, right) {
            (Value::Array(mut a), Value::Array(b)) => {
                a.extend(b);
                Ok(Value::Array(a))
            }
            (left @ Value::String(_), right) | (left, right @ Value::String(_)) => {
                Ok(Value::String(format!("{}{}", left, right)))
            }
            (left, right) => arithmetic(operator, left, right, line, Number::checked_add),
        },
        BinaryOp::Subtract => arithmetic(operator, left, right, line, Number::checked_sub),
        BinaryOp::Multiply => arithmetic(operator, left, right, line, Number::checked_mul),
        BinaryOp::Divide => match right {
            Value::Number(n) if n.is_zero() => runtime_error(RuntimeError::DivisionByZero { line }),
            right => arithmetic(operator, left, right, line, Number::checked_div),
        },
        BinaryOp::Modulo => match right {
            Value::Number(n) if n.is_zero() => runtime_error(RuntimeError::ModuloByZero { line }),
            right => arithmetic(operator, left, right, line, Number::checked_rem),
        },
        BinaryOp::Equal => Ok(Value::Boolean(left == right)),
        BinaryOp::NotEqual => Ok(Value::Boolean(left != right)),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = left.compare(&right).ok_or_else(|| {
                Error::Runtime(RuntimeError::TypeMismatch {
                    message: format!(
                        "cannot compare {} with {}",
                        left.kind().name(),
                        right.kind().name()
                    ),
                    line,
                })
            })?;
            Ok(Value::Boolean(match operator {
                BinaryOp::Less => ordering.is_lt(),
                BinaryOp::LessEqual => ordering.is_le(),
                BinaryOp::Greater => ordering.is_gt(),
                _ => ordering.is_ge(),
            }))
        }
        BinaryOp::And => Ok(Value::Boolean(left.is_truthy() && right.is_truthy())),
        BinaryOp::Or => Ok(Value::Boolean(left.is_truthy() || right.is_truthy())),
    }
}

fn position(index: Number, len: usize, line: usize) -> Result<usize> {
    usize::try_from(index.to_int())
        .ok()
        .filter(|&i| index.is_integral() && i < len)
        .ok_or_else(|| {
            Error::Runtime(RuntimeError::InvalidOperation {
                message: format!("index {} out of bounds for length {}", index, len),
                line,
            })
        })
}

fn read_member(target: &Value, name: &str, line: usize) -> Result<Value> {
    match target {
        Value::Object(_) => target.property(name).cloned().ok_or_else(|| {
            Error::Runtime(RuntimeError::InvalidOperation {
                message: format!("object has no property '{}'", name),
                line,
            })
        }),
        Value::String(text) if name == "length" => Ok(Value::Number(count(text.chars().count()))),
        Value::Array(items) if name == "length" => Ok(Value::Number(count(items.len()))),
        other => runtime_error(RuntimeError::TypeMismatch {
            message: format!("cannot read property '{}' of a {}", name, other.kind().name()),
            line,
        }),
    }
}

fn read_index(target: &Value, index: &Value, line: usize) -> Result<Value> {
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => Ok(items[position(*n, items.len(), line)?].clone()),
        (Value::String(text), Value::Number(n)) => {
            let chars: Vec<char> = text.chars().collect();
            let i = position(*n, chars.len(), line)?;
            Ok(Value::String(chars[i].to_string()))
        }
        (Value::Object(_), Value::String(key)) => read_member(target, key, line),
        (target, index) => runtime_error(RuntimeError::TypeMismatch {
            message: format!(
                "cannot index a {} with a {}",
                target.kind().name(),
                index.kind().name()
            ),
            line,
        }),
    }
}

fn assign_index(target: &mut Value, index: &Value, value: Value, line: usize) -> Result<()> {
    match (target, index) {
        (Value::Array(items), Value::Number(n)) => {
            let i = position(*n, items.len(), line)?;
            items[i] = value;
            Ok(())
        }
        (Value::Object(fields), Value::String(key)) => {
            set_field(fields, key, value);
            Ok(())
        }
        (target, index) => runtime_error(RuntimeError::TypeMismatch {
            message: format!(
                "cannot assign into a {} with a {} index",
                target.kind().name(),
                index.kind().name()
            ),
            line,
        }),
    }
}

/// Writes `value` at `path` below `target`, creating missing intermediate objects.
fn set_path(target: &mut Value, path: &[&str], value: Value, line: usize) -> Result<()> {
    let Some((first, rest)) = path.split_first() else {
        *target = value;
        return Ok(());
    };

    let Value::Object(fields) = target else {
        return runtime_error(RuntimeError::TypeMismatch {
            message: format!("cannot set property '{}' on a {}", first, target.kind().name()),
            line,
        });
    };

    let index = match fields.iter().position(|(key, _)| key == first) {
        Some(index) => index,
        None => {
            fields.push((first.to_string(), Value::Object(Vec::new())));
            fields.len() - 1
        }
    };
    set_path(&mut fields[index].1, rest, value, line)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::SharedBuffer;
    use std::io::Cursor;

    struct Harness {
        runtime: Runtime,
        output: SharedBuffer,
        errors: SharedBuffer,
    }

    impl Harness {
        fn with_config(config: RuntimeConfig) -> Self {
            let output = SharedBuffer::new();
            let errors = SharedBuffer::new();
            let runtime = Runtime::with_io(
                config,
                Box::new(output.clone()),
                Box::new(errors.clone()),
                Box::new(Cursor::new(b"alice\n".to_vec())),
            );
            Harness {
                runtime,
                output,
                errors,
            }
        }

        fn new() -> Self {
            Harness::with_config(RuntimeConfig {
                color: false,
                ..RuntimeConfig::default()
            })
        }

        fn run(&mut self, source: &str) -> Result<String> {
            self.runtime.run_source(source.as_bytes())?;
            Ok(self.output.take())
        }
    }

    fn output_of(source: &str) -> Result<String> {
        Harness::new().run(source)
    }

    #[test]
    fn test_arithmetic_and_printing() -> Result<()> {
        assert_eq!(output_of("print(1 + 2 * 3);")?, "7\n");
        assert_eq!(output_of("print((1 + 2) * 3, 10 % 4);")?, "9 2\n");
        assert_eq!(output_of("print(7 / 2, 1 / 3);")?, "3.5 0.333333\n");
        assert_eq!(output_of("print(0.1 + 0.2 == 0.3);")?, "True\n");
        assert_eq!(output_of("print(-5 + 2);")?, "-3\n");
        Ok(())
    }

    #[test]
    fn test_string_and_array_addition() -> Result<()> {
        assert_eq!(output_of("print(\"n = \" + 4);")?, "n = 4\n");
        assert_eq!(output_of("print(1 + \"x\");")?, "1x\n");
        assert_eq!(output_of("print([1, 2] + [3]);")?, "[1, 2, 3]\n");
        Ok(())
    }

    #[test]
    fn test_logical_operators_short_circuit() -> Result<()> {
        let source = "
            let hits = 0;
            bump():
                hits = hits + 1;
                return True;
            end
            let a = False and bump();
            let b = True or bump();
            print(a, b, hits, 1 and \"s\");
        ";
        assert_eq!(output_of(source)?, "False True 0 True\n");
        Ok(())
    }

    #[test]
    fn test_scope_isolation() -> Result<()> {
        let source = "
            let x = 10;
            show(x):
                x = x + 1;
                print(x);
            end
            show(1);
            print(x);
        ";
        assert_eq!(output_of(source)?, "2\n10\n");
        Ok(())
    }

    #[test]
    fn test_assignment_reaches_globals() -> Result<()> {
        let source = "
            let total = 0;
            func add(n):
                total = total + n;
                let scratch = n;
            end
            add(3);
            add(4);
            print(total);
        ";
        let mut harness = Harness::new();
        assert_eq!(harness.run(source)?, "7\n");
        assert_eq!(harness.runtime.get("scratch"), None);
        Ok(())
    }

    #[test]
    fn test_recursion_and_return() -> Result<()> {
        let source = "
            fib(n: int) -> int:
                if n < 2:
                    return n;
                end
                return fib(n - 1) + fib(n - 2);
            end
            print(fib(15));
        ";
        assert_eq!(output_of(source)?, "610\n");
        Ok(())
    }

    #[test]
    fn test_recursion_limit() -> Result<()> {
        let mut harness = Harness::with_config(RuntimeConfig {
            color: false,
            max_call_depth: 20,
            ..RuntimeConfig::default()
        });
        let source = "
            down(n):
                return down(n + 1);
            end
            down(0);
            print(\"after\");
        ";
        assert_eq!(harness.run(source)?, "after\n");
        assert!(harness
            .errors
            .contents()
            .contains("Maximum call depth of 20 exceeded"));
        assert_eq!(harness.runtime.env.scope_depth(), 0);
        Ok(())
    }

    #[test]
    fn test_if_else_chain() -> Result<()> {
        let source = "
            grade(n):
                if n >= 90:
                    return \"A\";
                else if n >= 80:
                    return \"B\";
                else:
                    return \"C\";
                end
            end
            print(grade(95), grade(85), grade(10));
        ";
        assert_eq!(output_of(source)?, "A B C\n");
        Ok(())
    }

    #[test]
    fn test_for_loops() -> Result<()> {
        assert_eq!(output_of("for i in 1:3: print(i); end")?, "1\n2\n3\n");
        assert_eq!(output_of("for i in 0:10:5: print(i); end")?, "0\n5\n10\n");
        assert_eq!(output_of("for i in 3:1:-1: print(i); end")?, "3\n2\n1\n");
        assert_eq!(output_of("for i in 0:1:0.5: print(i); end")?, "0\n0.5\n1\n");
        assert_eq!(output_of("for x in [\"a\", \"b\"]: print(x); end")?, "a\nb\n");
        assert_eq!(output_of("for c in \"hi\": print(c); end")?, "h\ni\n");
        Ok(())
    }

    #[test]
    fn test_loops_that_never_run() -> Result<()> {
        let mut harness = Harness::new();
        assert_eq!(harness.run("for i in 5:1: print(i); end")?, "");
        assert_eq!(harness.run("for i in 1:5:0: print(i); end")?, "");
        assert_eq!(harness.errors.contents(), "");
        assert_eq!(harness.runtime.statistics().iterations_executed, 0);
        Ok(())
    }

    #[test]
    fn test_break_and_continue() -> Result<()> {
        let source = "
            for i in 1:10:
                if i % 2 == 0:
                    continue;
                end
                if i > 6:
                    break;
                end
                print(i);
            end
        ";
        assert_eq!(output_of(source)?, "1\n3\n5\n");

        let source = "
            let i = 0;
            while True:
                i = i + 1;
                if i == 4:
                    break;
                end
            end
            print(i);
        ";
        assert_eq!(output_of(source)?, "4\n");

        let source = "
            let i = 0;
            let total = 0;
            while i < 6:
                i = i + 1;
                if i % 3 == 0:
                    continue;
                end
                total = total + i;
            end
            print(total);
        ";
        assert_eq!(output_of(source)?, "12\n");
        Ok(())
    }

    #[test]
    fn test_return_from_inside_loop() -> Result<()> {
        let source = "
            find_first(items, wanted):
                for item in items:
                    if item == wanted:
                        return \"found\";
                    end
                end
                return \"missing\";
            end
            print(find_first([1, 2, 3], 2), find_first([1], 9));
        ";
        assert_eq!(output_of(source)?, "found missing\n");
        Ok(())
    }

    #[test]
    fn test_iteration_limit_ends_loop() -> Result<()> {
        let mut harness = Harness::with_config(RuntimeConfig {
            color: false,
            loop_limits: LoopLimits {
                max_iterations: 50,
                ..LoopLimits::default()
            },
            ..RuntimeConfig::default()
        });
        let source = "
            let n = 0;
            while True:
                n = n + 1;
            end
            print(n);
        ";
        assert_eq!(harness.run(source)?, "50\n");
        assert_eq!(
            harness.errors.contents(),
            "Line 3: Loop exceeded the maximum of 50 iterations\n"
        );

        let stats = harness.runtime.statistics();
        assert_eq!(stats.loops_with_errors, 1);
        assert_eq!(stats.iterations_executed, 50);
        Ok(())
    }

    #[test]
    fn test_range_loop_halts_at_default_limit() -> Result<()> {
        let mut harness = Harness::new();
        let output = harness.run("let n = 0; for i in 1:2000000: n = n + 1; end print(n);")?;
        assert_eq!(output, "1000000\n");
        assert!(harness
            .errors
            .contents()
            .contains("maximum of 1000000 iterations"));
        Ok(())
    }

    #[test]
    fn test_safety_errors_are_not_catchable() -> Result<()> {
        let mut harness = Harness::with_config(RuntimeConfig {
            color: false,
            loop_limits: LoopLimits {
                max_iterations: 3,
                ..LoopLimits::default()
            },
            ..RuntimeConfig::default()
        });
        let source = "
            try:
                while True: print(\"tick\"); end
                print(\"after loop\");
            catch e:
                print(\"caught\", e);
            end
        ";
        assert_eq!(harness.run(source)?, "tick\ntick\ntick\nafter loop\n");
        Ok(())
    }

    #[test]
    fn test_loop_depth_limit() -> Result<()> {
        let mut harness = Harness::with_config(RuntimeConfig {
            color: false,
            loop_limits: LoopLimits {
                max_depth: 2,
                ..LoopLimits::default()
            },
            ..RuntimeConfig::default()
        });
        let source = "
            for a in 1:1:
                for b in 1:1:
                    for c in 1:1:
                        print(\"too deep\");
                    end
                    print(\"inner\");
                end
            end
        ";
        assert_eq!(harness.run(source)?, "inner\n");
        assert!(harness
            .errors
            .contents()
            .starts_with("Line 4: Loop nesting exceeded the maximum depth of 2"));
        assert_eq!(harness.runtime.statistics().max_depth_reached, 2);
        Ok(())
    }

    #[test]
    fn test_division_by_zero_recovery() -> Result<()> {
        let source = "
            try:
                let x = 1 / 0;
                print(\"unreachable\");
            catch e:
                print(e);
            end
            print(\"continues\");
        ";
        assert_eq!(output_of(source)?, "division by zero\ncontinues\n");

        let mut harness = Harness::new();
        let output = harness.run("print(1 / 0);\nprint(10 % 0);\nprint(\"next\");")?;
        assert_eq!(output, "next\n");
        assert_eq!(
            harness.errors.contents(),
            "Line 1: Division by zero\nLine 2: Modulo by zero\n"
        );
        Ok(())
    }

    #[test]
    fn test_try_discards_inner_bindings() -> Result<()> {
        let source = "
            let kept = 1;
            try:
                kept = 2;
                let inner = 3;
            catch e:
                print(e);
            end
            print(kept);
            print(inner);
        ";
        let mut harness = Harness::new();
        assert_eq!(harness.run(source)?, "2\n");
        assert_eq!(
            harness.errors.contents(),
            "Line 10: Undefined variable 'inner'\n"
        );
        Ok(())
    }

    #[test]
    fn test_errors_inside_calls_are_caught() -> Result<()> {
        let source = "
            risky(n):
                for i in 1:3:
                    if i == n:
                        return undefined_name;
                    end
                end
                return n;
            end
            try:
                risky(2);
            catch problem:
                print(problem);
            end
            print(risky(9));
        ";
        let mut harness = Harness::new();
        assert_eq!(harness.run(source)?, "undefined variable\n9\n");
        assert_eq!(harness.runtime.env.scope_depth(), 0);
        assert_eq!(harness.runtime.loops.depth(), 0);
        Ok(())
    }

    #[test]
    fn test_switch() -> Result<()> {
        let source = "
            name(n):
                switch n:
                    case 1:
                        return \"one\";
                    case 2:
                        break;
                    default:
                        return \"many\";
                end
                return \"two\";
            end
            print(name(1), name(2), name(3));
        ";
        assert_eq!(output_of(source)?, "one two many\n");
        Ok(())
    }

    #[test]
    fn test_objects_and_chained_assignment() -> Result<()> {
        let source = "
            let point = {x: 1, \"y\": 2};
            point.x = 10;
            config.window.size.width = 7;
            print(point.x, point[\"y\"], config.window.size.width);
            print(point);
        ";
        assert_eq!(output_of(source)?, "10 2 7\n{x: 10, y: 2}\n");
        Ok(())
    }

    #[test]
    fn test_indexing() -> Result<()> {
        let source = "
            let items = [1, 2, 3];
            items[1] = 20;
            print(items[1], items.length, \"hey\"[0], \"hey\".length);
        ";
        assert_eq!(output_of(source)?, "20 3 h 3\n");

        let mut harness = Harness::new();
        harness.run("let a = [1];\nprint(a[5]);")?;
        assert_eq!(
            harness.errors.contents(),
            "Line 2: Invalid operation: index 5 out of bounds for length 1\n"
        );
        Ok(())
    }

    #[test]
    fn test_value_semantics() -> Result<()> {
        let source = "
            let a = [1, 2];
            let b = a;
            b[0] = 99;
            print(a, b);
        ";
        assert_eq!(output_of(source)?, "[1, 2] [99, 2]\n");
        Ok(())
    }

    #[test]
    fn test_lambdas() -> Result<()> {
        let source = "
            let double = x => x * 2;
            let add = (a, b) => a + b;
            let answer = () => 42;
            let ops = {twice: double};
            print(double(4), add(1, 2), answer(), ops.twice(5));
        ";
        assert_eq!(output_of(source)?, "8 3 42 10\n");
        Ok(())
    }

    #[test]
    fn test_call_errors() -> Result<()> {
        let mut harness = Harness::new();
        harness.run("f(a): return a; end\nf(1, 2);\nmissing();\nlet n = 1;\nn();")?;
        assert_eq!(
            harness.errors.contents(),
            "Line 2: Function call failed: 'f' expects 1 arguments, got 2\n\
             Line 3: Function call failed: undefined function 'missing'\n\
             Line 5: Function call failed: 'n' is a number, not a function\n"
        );
        Ok(())
    }

    #[test]
    fn test_type_mismatch() -> Result<()> {
        let mut harness = Harness::new();
        harness.run("print(1 < \"a\");\nprint(True - 1);")?;
        assert_eq!(
            harness.errors.contents(),
            "Line 1: Type mismatch: cannot compare number with string\n\
             Line 2: Type mismatch: '-' needs numbers, found boolean and number\n"
        );
        Ok(())
    }

    #[test]
    fn test_core_builtins() -> Result<()> {
        let mut harness = Harness::new();
        let output = harness.run(
            "let name = input(\"name? \");\nprint(len(name), type(name), str(12) + \"!\");",
        )?;
        assert_eq!(output, "name? 5 string 12!\n");

        harness.run("input();")?;
        assert_eq!(harness.errors.contents(), "Line 1: Failed to read input\n");
        Ok(())
    }

    #[test]
    fn test_top_level_return_stops_program() -> Result<()> {
        assert_eq!(output_of("print(1);\nreturn;\nprint(2);")?, "1\n");
        Ok(())
    }

    #[test]
    fn test_colored_reports() -> Result<()> {
        let mut harness = Harness::with_config(RuntimeConfig::default());
        harness.run("print(missing);")?;
        assert_eq!(
            harness.errors.contents(),
            format!("{}\n", Color::Red.paint("Line 1: Undefined variable 'missing'"))
        );
        Ok(())
    }

    #[test]
    fn test_state_persists_between_runs() -> Result<()> {
        let mut harness = Harness::new();
        harness.run("let x = 5; sq(n): return n * n; end")?;
        assert_eq!(harness.run("print(sq(x));")?, "25\n");
        assert!(harness.runtime.function("sq").is_some());
        Ok(())
    }
}
