use log::debug;
use rand::{seq::SliceRandom, Rng};
use std::{collections::HashMap, f64::consts, ops::RangeInclusive};

use crate::{
    ast::Expr,
    error::{runtime_error, Result, RuntimeError},
    runtime::Runtime,
    value::{Number, Value},
};

/// Library holding the built-ins that are callable without an alias.
pub const CORE: &str = "core";

/// Libraries a `use` statement can bind to an alias.
pub const LIBRARIES: [&str; 3] = ["math", "util", "text"];

/// Receives the raw argument expressions and evaluates them itself.
pub type BuiltinFn = fn(&mut Runtime, &[Expr], usize) -> Result<Value>;

#[derive(Clone)]
pub struct Builtin {
    pub arity: RangeInclusive<usize>,
    pub func: BuiltinFn,
}

/// Built-in functions keyed by library, then by function name.
#[derive(Clone, Default)]
pub struct LibraryTable {
    libraries: HashMap<&'static str, HashMap<&'static str, Builtin>>,
}

impl LibraryTable {
    pub fn standard() -> Self {
        let mut libraries: HashMap<&'static str, HashMap<&'static str, Builtin>> = HashMap::new();

        // Wraps a function over evaluated values into a `Builtin`.
        macro_rules! define_builtin {
            ($library:expr, $name:expr, $arity:expr, $func:expr) => {
                libraries.entry($library).or_default().insert(
                    $name,
                    Builtin {
                        arity: $arity,
                        func: |runtime, args, line| {
                            let values = runtime.evaluate_all(args)?;
                            let func: fn(&mut Runtime, &[Value], usize) -> Result<Value> = $func;
                            func(runtime, &values, line)
                        },
                    },
                );
            };
        }

        // Core
        define_builtin!(CORE, "len", 1..=1, length);
        define_builtin!(CORE, "str", 1..=1, to_str);
        define_builtin!(CORE, "type", 1..=1, type_name);
        define_builtin!(CORE, "input", 0..=1, |runtime, values, line| {
            let prompt = values.first().map(Value::to_string);
            runtime
                .read_input(prompt.as_deref(), line)
                .map(Value::String)
        });

        // Math
        define_builtin!("math", "abs", 1..=1, |_, values, line| {
            let n = number(&values[0], "abs", line)?;
            let result = if n < Number::ZERO { n.checked_neg() } else { Some(n) };
            checked(result, "abs", line)
        });

        define_builtin!("math", "pow", 2..=2, |_, values, line| {
            let base = number(&values[0], "pow", line)?;
            let exponent = number(&values[1], "pow", line)?;
            if exponent.is_integral() && exponent >= Number::ZERO {
                checked(power(base, exponent.to_int()), "pow", line)
            } else {
                float(base.to_f64().powf(exponent.to_f64()), "pow", line)
            }
        });

        define_builtin!("math", "sqrt", 1..=1, |_, values, line| {
            let n = number(&values[0], "sqrt", line)?;
            if n < Number::ZERO {
                return invalid("sqrt() of a negative number", line);
            }
            float(n.to_f64().sqrt(), "sqrt", line)
        });

        define_builtin!("math", "floor", 1..=1, |_, values, line| {
            let n = number(&values[0], "floor", line)?;
            checked(floor(n), "floor", line)
        });

        define_builtin!("math", "ceil", 1..=1, |_, values, line| {
            let n = number(&values[0], "ceil", line)?;
            checked(ceil(n), "ceil", line)
        });

        define_builtin!("math", "sin", 1..=1, |_, values, line| {
            float(number(&values[0], "sin", line)?.to_f64().sin(), "sin", line)
        });

        define_builtin!("math", "cos", 1..=1, |_, values, line| {
            float(number(&values[0], "cos", line)?.to_f64().cos(), "cos", line)
        });

        define_builtin!("math", "tan", 1..=1, |_, values, line| {
            float(number(&values[0], "tan", line)?.to_f64().tan(), "tan", line)
        });

        define_builtin!("math", "min", 2..=2, |_, values, line| {
            let a = number(&values[0], "min", line)?;
            let b = number(&values[1], "min", line)?;
            Ok(Value::Number(a.min(b)))
        });

        define_builtin!("math", "max", 2..=2, |_, values, line| {
            let a = number(&values[0], "max", line)?;
            let b = number(&values[1], "max", line)?;
            Ok(Value::Number(a.max(b)))
        });

        define_builtin!("math", "random", 0..=0, |_, _, line| {
            float(rand::thread_rng().gen::<f64>(), "random", line)
        });

        define_builtin!("math", "randint", 2..=2, |_, values, line| {
            let low = number(&values[0], "randint", line)?.to_int();
            let high = number(&values[1], "randint", line)?.to_int();
            if low > high {
                return invalid("randint() needs low <= high", line);
            }
            Ok(Value::int(rand::thread_rng().gen_range(low..=high)))
        });

        define_builtin!("math", "choice", 1..=1, |_, values, line| {
            let items = array(&values[0], "choice", line)?;
            match items.choose(&mut rand::thread_rng()) {
                Some(item) => Ok(item.clone()),
                None => invalid("choice() of an empty array", line),
            }
        });

        define_builtin!("math", "get_constant", 1..=1, |_, values, line| {
            let name = text(&values[0], "get_constant", line)?;
            match LibraryTable::constant("math", name) {
                Some(value) => Ok(value),
                None => invalid(&format!("unknown constant '{}'", name), line),
            }
        });

        // Util
        define_builtin!("util", "type", 1..=1, type_name);
        define_builtin!("util", "str", 1..=1, to_str);
        define_builtin!("util", "len", 1..=1, length);

        define_builtin!("util", "is_num", 1..=1, |_, values, _| {
            Ok(Value::Boolean(matches!(values[0], Value::Number(_))))
        });

        define_builtin!("util", "is_str", 1..=1, |_, values, _| {
            Ok(Value::Boolean(matches!(values[0], Value::String(_))))
        });

        define_builtin!("util", "is_arr", 1..=1, |_, values, _| {
            Ok(Value::Boolean(matches!(values[0], Value::Array(_))))
        });

        define_builtin!("util", "is_obj", 1..=1, |_, values, _| {
            Ok(Value::Boolean(matches!(values[0], Value::Object(_))))
        });

        define_builtin!("util", "find", 2..=2, |_, values, line| {
            let found = match (&values[0], &values[1]) {
                (Value::Array(items), needle) => items.iter().position(|item| item == needle),
                (Value::String(haystack), Value::String(needle)) => haystack
                    .find(needle.as_str())
                    .map(|byte| haystack[..byte].chars().count()),
                (other, _) => return type_error("find", "an array or string", other, line),
            };
            Ok(found.map_or(Value::int(-1), |index| Value::int(index as i64)))
        });

        define_builtin!("util", "copy", 1..=1, |_, values, _| Ok(values[0].clone()));

        define_builtin!("util", "has", 2..=2, |_, values, line| match &values[0] {
            Value::Object(_) => {
                let key = text(&values[1], "has", line)?;
                Ok(Value::Boolean(values[0].property(key).is_some()))
            }
            Value::Array(items) => Ok(Value::Boolean(items.contains(&values[1]))),
            other => type_error("has", "an object or array", other, line),
        });

        define_builtin!("util", "first", 1..=1, |_, values, line| {
            let items = array(&values[0], "first", line)?;
            Ok(items.first().cloned().unwrap_or(Value::None))
        });

        define_builtin!("util", "last", 1..=1, |_, values, line| {
            let items = array(&values[0], "last", line)?;
            Ok(items.last().cloned().unwrap_or(Value::None))
        });

        define_builtin!("util", "push", 2..=2, |_, values, line| {
            let mut items = array(&values[0], "push", line)?.to_vec();
            items.push(values[1].clone());
            Ok(Value::Array(items))
        });

        define_builtin!("util", "pop", 1..=1, |_, values, line| {
            let mut items = array(&values[0], "pop", line)?.to_vec();
            items.pop();
            Ok(Value::Array(items))
        });

        define_builtin!("util", "reverse", 1..=1, |_, values, line| match &values[0] {
            Value::Array(items) => Ok(Value::Array(items.iter().rev().cloned().collect())),
            Value::String(s) => Ok(Value::String(s.chars().rev().collect())),
            other => type_error("reverse", "an array or string", other, line),
        });

        // Text
        define_builtin!("text", "upper", 1..=1, |_, values, line| {
            Ok(Value::String(text(&values[0], "upper", line)?.to_uppercase()))
        });

        define_builtin!("text", "lower", 1..=1, |_, values, line| {
            Ok(Value::String(text(&values[0], "lower", line)?.to_lowercase()))
        });

        define_builtin!("text", "trim", 1..=1, |_, values, line| {
            Ok(Value::String(text(&values[0], "trim", line)?.trim().to_string()))
        });

        define_builtin!("text", "split", 2..=2, |_, values, line| {
            let s = text(&values[0], "split", line)?;
            let separator = text(&values[1], "split", line)?;
            let parts: Vec<Value> = if separator.is_empty() {
                s.chars().map(|c| Value::String(c.to_string())).collect()
            } else {
                s.split(separator)
                    .map(|part| Value::String(part.to_string()))
                    .collect()
            };
            Ok(Value::Array(parts))
        });

        define_builtin!("text", "join", 2..=2, |_, values, line| {
            let items = array(&values[0], "join", line)?;
            let separator = text(&values[1], "join", line)?;
            let parts: Vec<String> = items.iter().map(Value::to_string).collect();
            Ok(Value::String(parts.join(separator)))
        });

        define_builtin!("text", "contains", 2..=2, |_, values, line| {
            let s = text(&values[0], "contains", line)?;
            let needle = text(&values[1], "contains", line)?;
            Ok(Value::Boolean(s.contains(needle)))
        });

        define_builtin!("text", "replace", 3..=3, |_, values, line| {
            let s = text(&values[0], "replace", line)?;
            let from = text(&values[1], "replace", line)?;
            let to = text(&values[2], "replace", line)?;
            if from.is_empty() {
                return Ok(Value::String(s.to_string()));
            }
            Ok(Value::String(s.replace(from, to)))
        });

        LibraryTable { libraries }
    }

    /// Maps a `use` target onto a library name, if it names one.
    pub fn library_name(name: &str) -> Option<&'static str> {
        LIBRARIES.into_iter().find(|library| *library == name)
    }

    /// Named constants readable as `alias.NAME`.
    pub fn constant(library: &str, name: &str) -> Option<Value> {
        let value = match (library, name) {
            ("math", "PI") => consts::PI,
            ("math", "E") => consts::E,
            _ => return None,
        };
        Number::from_f64(value).map(Value::Number)
    }

    pub fn get(&self, library: &str, function: &str) -> Option<&Builtin> {
        self.libraries.get(library)?.get(function)
    }

    /// Calls `library.function` with raw arguments. `None` when the library has
    /// no such function.
    pub fn call(
        runtime: &mut Runtime,
        library: &str,
        function: &str,
        args: &[Expr],
        line: usize,
    ) -> Option<Result<Value>> {
        let builtin = runtime.libraries.get(library, function)?.clone();

        if !builtin.arity.contains(&args.len()) {
            let name = if library == CORE {
                function.to_string()
            } else {
                format!("{}.{}", library, function)
            };
            let (min, max) = (builtin.arity.start(), builtin.arity.end());
            let expected = if min == max {
                min.to_string()
            } else {
                format!("{} to {}", min, max)
            };
            return Some(runtime_error(RuntimeError::FunctionCall {
                message: format!("'{}' expects {} arguments, got {}", name, expected, args.len()),
                line,
            }));
        }

        debug!("calling built-in {}.{}", library, function);
        Some((builtin.func)(runtime, args, line))
    }
}

fn length(_: &mut Runtime, values: &[Value], line: usize) -> Result<Value> {
    let n = match &values[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(fields) => fields.len(),
        other => return type_error("len", "a string, array or object", other, line),
    };
    Ok(Value::int(n as i64))
}

fn to_str(_: &mut Runtime, values: &[Value], _: usize) -> Result<Value> {
    Ok(Value::String(values[0].to_string()))
}

fn type_name(_: &mut Runtime, values: &[Value], _: usize) -> Result<Value> {
    Ok(Value::String(values[0].kind().name().to_string()))
}

fn type_error<T>(function: &str, expected: &str, found: &Value, line: usize) -> Result<T> {
    runtime_error(RuntimeError::TypeMismatch {
        message: format!(
            "{}() expects {}, found {}",
            function,
            expected,
            found.kind().name()
        ),
        line,
    })
}

fn invalid<T>(message: &str, line: usize) -> Result<T> {
    runtime_error(RuntimeError::InvalidOperation {
        message: message.to_string(),
        line,
    })
}

fn number(value: &Value, function: &str, line: usize) -> Result<Number> {
    match value {
        Value::Number(n) => Ok(*n),
        other => type_error(function, "a number", other, line),
    }
}

fn text<'a>(value: &'a Value, function: &str, line: usize) -> Result<&'a str> {
    match value {
        Value::String(s) => Ok(s),
        other => type_error(function, "a string", other, line),
    }
}

fn array<'a>(value: &'a Value, function: &str, line: usize) -> Result<&'a [Value]> {
    match value {
        Value::Array(items) => Ok(items),
        other => type_error(function, "an array", other, line),
    }
}

fn checked(result: Option<Number>, function: &str, line: usize) -> Result<Value> {
    match result {
        Some(n) => Ok(Value::Number(n)),
        None => invalid(&format!("{}() overflowed", function), line),
    }
}

fn float(value: f64, function: &str, line: usize) -> Result<Value> {
    match Number::from_f64(value) {
        Some(n) => Ok(Value::Number(n)),
        None => invalid(&format!("{}() result is not a representable number", function), line),
    }
}

fn floor(n: Number) -> Option<Number> {
    n.raw()
        .div_euclid(Number::SCALE)
        .checked_mul(Number::SCALE)
        .map(Number::from_raw)
}

fn ceil(n: Number) -> Option<Number> {
    let whole = n.raw().div_euclid(Number::SCALE);
    let whole = if n.is_integral() { whole } else { whole + 1 };
    whole.checked_mul(Number::SCALE).map(Number::from_raw)
}

/// Exponentiation by squaring on fixed-point values.
fn power(base: Number, mut exponent: i64) -> Option<Number> {
    let mut result = Number::ONE;
    let mut square = base;
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = result.checked_mul(square)?;
        }
        exponent >>= 1;
        if exponent > 0 {
            square = square.checked_mul(square)?;
        }
    }
    Some(result)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{output::SharedBuffer, runtime::RuntimeConfig};
    use std::io::Cursor;

    fn run(source: &str) -> Result<(String, String)> {
        let output = SharedBuffer::new();
        let errors = SharedBuffer::new();
        let mut runtime = Runtime::with_io(
            RuntimeConfig {
                color: false,
                ..RuntimeConfig::default()
            },
            Box::new(output.clone()),
            Box::new(errors.clone()),
            Box::new(Cursor::new(Vec::new())),
        );
        runtime.run_source(source.as_bytes())?;
        Ok((output.contents(), errors.contents()))
    }

    #[test]
    fn test_math_library() -> Result<()> {
        let (output, errors) = run(
            "use math as math
             print(math.abs(-2.5), math.pow(2, 10), math.pow(4, 0.5), math.sqrt(16));
             print(math.floor(-1.5), math.ceil(1.2), math.ceil(3), math.min(3, 1), math.max(3, 1));
             print(math.sin(0), math.cos(0), math.get_constant(\"PI\"), math.E);",
        )?;
        assert_eq!(output, "2.5 1024 2 4\n-2 2 3 1 3\n0 1 3.141593 2.718282\n");
        assert_eq!(errors, "");
        Ok(())
    }

    #[test]
    fn test_floor_and_ceil_overflow() -> Result<()> {
        let (output, errors) = run(
            "use math as m
             let x = 0 - 9223372036854.775807 - 0.000001;
             print(m.floor(x));
             print(m.ceil(x), m.floor(0 - 9223372036853.5));
             print(m.ceil(9223372036854.5));",
        )?;
        assert_eq!(output, "-9223372036854 -9223372036854\n");
        assert_eq!(
            errors,
            "Line 3: Invalid operation: floor() overflowed\n\
             Line 5: Invalid operation: ceil() overflowed\n"
        );
        Ok(())
    }

    #[test]
    fn test_math_random() -> Result<()> {
        let (output, _) = run(
            "use math as m
             let r = m.random();
             print(r >= 0 and r < 1, m.randint(4, 4), m.choice([7]));",
        )?;
        assert_eq!(output, "True 4 7\n");
        Ok(())
    }

    #[test]
    fn test_util_library() -> Result<()> {
        let (output, errors) = run(
            "use util as util
             print(util.type([1]), util.is_num(1), util.is_str(1), util.is_obj({a: 1}));
             print(util.find([5, 6], 6), util.find(\"hello\", \"ll\"), util.find([1], 9));
             print(util.has({a: 1}, \"a\"), util.has([1, 2], 3), util.len({a: 1, b: 2}));
             print(util.first([]), util.last([1, 2]));
             let a = util.push([1], 2);
             print(a, util.pop(a), util.reverse(\"abc\"), util.reverse([1, 2]), util.copy(a));",
        )?;
        assert_eq!(
            output,
            "array True False True\n1 2 -1\nTrue False 2\nNone 2\n[1, 2] [1] cba [2, 1] [1, 2]\n"
        );
        assert_eq!(errors, "");
        Ok(())
    }

    #[test]
    fn test_text_library() -> Result<()> {
        let (output, _) = run(
            "use text as t
             print(t.upper(\"ab\"), t.lower(\"AB\"), t.trim(\"  x \"), t.split(\"a,b\", \",\"));
             print(t.join([1, \"b\"], \"-\"), t.contains(\"team\", \"ea\"), t.replace(\"a-b-c\", \"-\", \"+\"));",
        )?;
        assert_eq!(output, "AB ab x [\"a\", \"b\"]\n1-b True a+b+c\n");
        Ok(())
    }

    #[test]
    fn test_builtin_errors() -> Result<()> {
        let (_, errors) = run(
            "use math as math
             math.pow(1);
             math.sqrt(\"x\");
             math.sqrt(-1);
             len(5);",
        )?;
        assert_eq!(
            errors,
            "Line 2: Function call failed: 'math.pow' expects 2 arguments, got 1\n\
             Line 3: Type mismatch: sqrt() expects a number, found string\n\
             Line 4: Invalid operation: sqrt() of a negative number\n\
             Line 5: Type mismatch: len() expects a string, array or object, found number\n"
        );
        Ok(())
    }

    #[test]
    fn test_library_lookup() {
        let table = LibraryTable::standard();
        assert_eq!(LibraryTable::library_name("math"), Some("math"));
        assert_eq!(LibraryTable::library_name("core"), None);
        assert!(table.get("text", "split").is_some());
        assert!(table.get(CORE, "input").is_some());
        assert!(table.get("math", "split").is_none());
        assert_eq!(table.get("util", "push").map(|b| b.arity.clone()), Some(2..=2));
    }

    #[test]
    fn test_power() {
        let two = Number::from_int(2).unwrap();
        assert_eq!(power(two, 0), Some(Number::ONE));
        assert_eq!(power(two, 16), Number::from_int(65536));
        assert_eq!(power(two, 200), None);
    }
}
