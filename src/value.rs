use crate::ast::Lambda;
use std::{
    cmp::Ordering,
    fmt::{self, Debug, Display, Formatter},
    rc::Rc,
};

/// Fixed-point number: the raw integer is the value scaled by [`Number::SCALE`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Number(i64);

impl Number {
    pub const SCALE: i64 = 1_000_000;
    pub const FRACTION_DIGITS: usize = 6;
    pub const ZERO: Number = Number(0);
    pub const ONE: Number = Number(Self::SCALE);

    pub fn from_raw(raw: i64) -> Self {
        Number(raw)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn from_int(value: i64) -> Option<Self> {
        value.checked_mul(Self::SCALE).map(Number)
    }

    pub fn from_f64(value: f64) -> Option<Self> {
        let scaled = (value * Self::SCALE as f64).round();
        if scaled.is_finite() && scaled >= i64::MIN as f64 && scaled <= i64::MAX as f64 {
            Some(Number(scaled as i64))
        } else {
            None
        }
    }

    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    /// Integer part, rounded toward zero.
    pub fn to_int(self) -> i64 {
        self.0 / Self::SCALE
    }

    /// Parses decimal literal text (`42`, `3.14`, `.5`) without going through
    /// floating point. Digits past the sixth fractional place are dropped.
    pub fn parse(text: &str) -> Option<Self> {
        let (whole, fraction) = match text.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (text, ""),
        };

        if whole.is_empty() && fraction.is_empty() {
            return None;
        }
        if !whole.bytes().chain(fraction.bytes()).all(|b| b.is_ascii_digit()) {
            return None;
        }

        let whole: i64 = if whole.is_empty() { 0 } else { whole.parse().ok()? };
        let mut fraction_raw: i64 = 0;
        for (i, digit) in fraction.bytes().take(Self::FRACTION_DIGITS).enumerate() {
            let place = 10_i64.pow((Self::FRACTION_DIGITS - 1 - i) as u32);
            fraction_raw += (digit - b'0') as i64 * place;
        }

        whole
            .checked_mul(Self::SCALE)?
            .checked_add(fraction_raw)
            .map(Number)
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_integral(self) -> bool {
        self.0 % Self::SCALE == 0
    }

    pub fn checked_add(self, other: Number) -> Option<Number> {
        self.0.checked_add(other.0).map(Number)
    }

    pub fn checked_sub(self, other: Number) -> Option<Number> {
        self.0.checked_sub(other.0).map(Number)
    }

    pub fn checked_mul(self, other: Number) -> Option<Number> {
        let product = self.0 as i128 * other.0 as i128 / Self::SCALE as i128;
        i64::try_from(product).ok().map(Number)
    }

    /// `None` on a zero divisor or overflow.
    pub fn checked_div(self, other: Number) -> Option<Number> {
        if other.is_zero() {
            return None;
        }
        let quotient = self.0 as i128 * Self::SCALE as i128 / other.0 as i128;
        i64::try_from(quotient).ok().map(Number)
    }

    pub fn checked_rem(self, other: Number) -> Option<Number> {
        self.0.checked_rem(other.0).map(Number)
    }

    pub fn checked_neg(self) -> Option<Number> {
        self.0.checked_neg().map(Number)
    }

    pub fn abs_diff(self, other: Number) -> u64 {
        self.0.abs_diff(other.0)
    }

    pub fn unsigned_abs(self) -> u64 {
        self.0.unsigned_abs()
    }
}

impl Display for Number {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let magnitude = self.0.unsigned_abs();
        let scale = Self::SCALE as u64;
        let whole = magnitude / scale;
        let fraction = magnitude % scale;

        if fraction == 0 {
            return write!(f, "{}{}", sign, whole);
        }

        let digits = format!("{:06}", fraction);
        write!(f, "{}{}.{}", sign, whole, digits.trim_end_matches('0'))
    }
}

impl Debug for Number {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

#[derive(Clone)]
pub enum Value {
    Number(Number),
    String(String),
    Boolean(bool),
    Array(Vec<Value>),
    Object(Vec<(String, Value)>),
    Lambda(Rc<Lambda>),
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Number,
    String,
    Boolean,
    Array,
    Object,
    Lambda,
    None,
}

impl ValueKind {
    pub fn name(self) -> &'static str {
        match self {
            ValueKind::Number => "number",
            ValueKind::String => "string",
            ValueKind::Boolean => "boolean",
            ValueKind::Array => "array",
            ValueKind::Object => "object",
            ValueKind::Lambda => "lambda",
            ValueKind::None => "none",
        }
    }
}

impl Value {
    pub fn int(value: i64) -> Value {
        Value::Number(Number::from_int(value).unwrap_or(Number::ZERO))
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Number(_) => ValueKind::Number,
            Value::String(_) => ValueKind::String,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Array(_) => ValueKind::Array,
            Value::Object(_) => ValueKind::Object,
            Value::Lambda(_) => ValueKind::Lambda,
            Value::None => ValueKind::None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Number(n) => !n.is_zero(),
            Value::String(s) => !s.is_empty(),
            Value::Boolean(b) => *b,
            Value::Array(_) | Value::Object(_) | Value::Lambda(_) => true,
            Value::None => false,
        }
    }

    pub fn property(&self, name: &str) -> Option<&Value> {
        match self {
            Value::Object(fields) => fields.iter().find(|(key, _)| key == name).map(|(_, v)| v),
            _ => None,
        }
    }

    /// Orders numbers and strings; every other pairing is unordered.
    pub fn compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => Some(a.cmp(b)),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            _ => None,
        }
    }
}

/// Sets `name` on an object's ordered field list, keeping insertion order.
pub fn set_field(fields: &mut Vec<(String, Value)>, name: &str, value: Value) {
    match fields.iter_mut().find(|(key, _)| key == name) {
        Some((_, slot)) => *slot = value,
        None => fields.push((name.to_string(), value)),
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Object(a), Value::Object(b)) => a == b,
            (Value::Lambda(a), Value::Lambda(b)) => Rc::ptr_eq(a, b),
            (Value::None, Value::None) => true,
            _ => false,
        }
    }
}

impl Display for Value {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{}", s),
            Value::Boolean(true) => write!(f, "True"),
            Value::Boolean(false) => write!(f, "False"),
            Value::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}", item)?;
                }
                write!(f, "]")
            }
            Value::Object(fields) => {
                write!(f, "{{")?;
                for (i, (key, value)) in fields.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {:?}", key, value)?;
                }
                write!(f, "}}")
            }
            Value::Lambda(lambda) => write!(f, "<lambda({})>", lambda.params.join(", ")),
            Value::None => write!(f, "None"),
        }
    }
}

impl Debug for Value {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Value::String(s) = self {
            write!(f, "\"{}\"", s)
        } else {
            write!(f, "{}", self)
        }
    }
}
