use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike, Utc};
use std::cmp::Ordering;
use std::fmt::Write;

use super::ast::{BinOp, Expr, Node, UnaryOp};
use super::error::TemplateError;
use super::TemplateManager;
use crate::value::{Map, Params, Value};

type EvalResult = Result<Value, TemplateError>;

const NAIVE_DATETIME_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

const WEEKDAYS: [&str; 7] = [
    "MONDAY",
    "TUESDAY",
    "WEDNESDAY",
    "THURSDAY",
    "FRIDAY",
    "SATURDAY",
    "SUNDAY",
];

pub(crate) struct Evaluator<'a> {
    manager: &'a TemplateManager,
    overrides: &'a Params,
    locals: Vec<(String, Value)>,
}

impl<'a> Evaluator<'a> {
    pub(crate) fn new(manager: &'a TemplateManager, overrides: &'a Params) -> Self {
        Self {
            manager,
            overrides,
            locals: Vec::new(),
        }
    }

    fn lookup(&self, name: &str) -> EvalResult {
        if let Some((_, value)) = self.locals.iter().rev().find(|(n, _)| n == name) {
            return Ok(value.clone());
        }
        if let Some(value) = self.overrides.get(name).or_else(|| self.manager.params.get(name)) {
            return Ok(value.clone());
        }
        if let Some(global) = self.manager.globals.get(name) {
            return Ok(global());
        }
        if name == "today" {
            return Ok(Value::Date(self.manager.today()));
        }
        if let Some(day) = WEEKDAYS.iter().position(|d| *d == name) {
            return Ok(Value::from(day));
        }
        Err(TemplateError::Undefined(name.to_string()))
    }

    pub(crate) fn render(&mut self, nodes: &[Node], out: &mut String) -> Result<(), TemplateError> {
        for node in nodes {
            match node {
                Node::Text(text) => out.push_str(text),
                Node::Output(expr) => {
                    let value = self.eval(expr)?;
                    let _ = write!(out, "{value}");
                }
                Node::If {
                    branches,
                    otherwise,
                } => {
                    let mut taken = None;
                    for (condition, body) in branches {
                        if self.eval(condition)?.is_truthy() {
                            taken = Some(body);
                            break;
                        }
                    }
                    self.render(taken.unwrap_or(otherwise), out)?;
                }
                Node::For {
                    var,
                    iterable,
                    body,
                } => {
                    let items = iterate(self.eval(iterable)?)?;
                    let length = items.len();
                    for (index, item) in items.into_iter().enumerate() {
                        let mut loop_info = Map::new();
                        loop_info.insert("index".into(), Value::from(index + 1));
                        loop_info.insert("index0".into(), Value::from(index));
                        loop_info.insert("first".into(), Value::Bool(index == 0));
                        loop_info.insert("last".into(), Value::Bool(index + 1 == length));
                        loop_info.insert("length".into(), Value::from(length));
                        self.locals.push(("loop".into(), Value::Map(loop_info)));
                        self.locals.push((var.clone(), item));
                        let result = self.render(body, out);
                        self.locals.truncate(self.locals.len() - 2);
                        result?;
                    }
                }
            }
        }
        Ok(())
    }

    pub(crate) fn eval(&self, expr: &Expr) -> EvalResult {
        match expr {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Var(name) => self.lookup(name),
            Expr::List(items) => items
                .iter()
                .map(|item| self.eval(item))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::List),
            Expr::Map(entries) => {
                let mut map = Map::new();
                for (key, value) in entries {
                    let key = match self.eval(key)? {
                        Value::String(s) => s,
                        other => other.to_string(),
                    };
                    map.insert(key, self.eval(value)?);
                }
                Ok(Value::Map(map))
            }
            Expr::Attr(object, name) => attribute(&self.eval(object)?, name),
            Expr::Index(object, index) => item(&self.eval(object)?, &self.eval(index)?),
            Expr::Call { func, args } => {
                let args = self.eval_args(args)?;
                match func.as_ref() {
                    Expr::Attr(receiver, method) => match self.builtin_module(receiver) {
                        Some(module) => self.call_module(module, method, &args),
                        None => call_method(&self.eval(receiver)?, method, &args),
                    },
                    Expr::Var(name) => self.call_function(name, &args),
                    other => Err(TemplateError::eval(format!(
                        "'{}' is not callable",
                        self.eval(other)?.type_name()
                    ))),
                }
            }
            Expr::Filter { value, name, args } => {
                let args = self.eval_args(args)?;
                if name == "default" || name == "d" {
                    return match self.eval(value) {
                        Err(e) if e.is_undefined() => {
                            Ok(args.into_iter().next().unwrap_or_else(|| Value::from("")))
                        }
                        other => other,
                    };
                }
                self.apply_filter(name, &self.eval(value)?, &args)
            }
            Expr::Test {
                value,
                name,
                negated,
            } => {
                let result = self.test(value, name)?;
                Ok(Value::Bool(result != *negated))
            }
            Expr::Unary(UnaryOp::Not, inner) => Ok(Value::Bool(!self.eval(inner)?.is_truthy())),
            Expr::Unary(UnaryOp::Neg, inner) => negate(self.eval(inner)?),
            Expr::Binary(BinOp::And, left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    self.eval(right)
                } else {
                    Ok(left)
                }
            }
            Expr::Binary(BinOp::Or, left, right) => {
                let left = self.eval(left)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    self.eval(right)
                }
            }
            Expr::Binary(op, left, right) => binary(*op, self.eval(left)?, self.eval(right)?),
            Expr::Conditional {
                condition,
                then,
                otherwise,
            } => {
                if self.eval(condition)?.is_truthy() {
                    self.eval(then)
                } else {
                    match otherwise {
                        Some(otherwise) => self.eval(otherwise),
                        None => Ok(Value::Null),
                    }
                }
            }
        }
    }

    fn eval_args(&self, args: &[Expr]) -> Result<Vec<Value>, TemplateError> {
        args.iter().map(|arg| self.eval(arg)).collect()
    }

    fn test(&self, value: &Expr, name: &str) -> Result<bool, TemplateError> {
        let value = match self.eval(value) {
            Err(e) if e.is_undefined() => {
                return match name {
                    "defined" => Ok(false),
                    "undefined" => Ok(true),
                    _ => Err(e),
                }
            }
            other => other?,
        };
        match name {
            "defined" => Ok(true),
            "undefined" => Ok(false),
            "none" => Ok(value.is_null()),
            "string" => Ok(matches!(value, Value::String(_))),
            "number" => Ok(matches!(value, Value::Int(_) | Value::Float(_))),
            "mapping" => Ok(matches!(value, Value::Map(_))),
            "sequence" => Ok(matches!(value, Value::List(_) | Value::String(_))),
            "even" => Ok(value.as_i64().is_some_and(|i| i % 2 == 0)),
            "odd" => Ok(value.as_i64().is_some_and(|i| i % 2 != 0)),
            _ => Err(TemplateError::eval(format!("unknown test '{name}'"))),
        }
    }

    fn call_function(&self, name: &str, args: &[Value]) -> EvalResult {
        if let Some(function) = self.manager.functions.get(name) {
            return function(args);
        }
        match name {
            "now" => Ok(Value::DateTime(Utc::now())),
            "date" => to_date(arg(args, 0, name)?),
            "range" => range(args),
            "days" | "day" | "weeks" | "week" | "hours" | "hour" | "minutes" | "minute"
            | "seconds" | "second" => {
                self.apply_filter(name, arg(args, 0, name)?, &[])
            }
            _ => match self.lookup(name) {
                Ok(value) => Err(TemplateError::eval(format!(
                    "'{}' is not callable",
                    value.type_name()
                ))),
                Err(e) => Err(e),
            },
        }
    }

    /// `datetime` and `date` act as namespaces unless a variable shadows them.
    fn builtin_module<'e>(&self, receiver: &'e Expr) -> Option<&'e str> {
        match receiver {
            Expr::Var(name)
                if matches!(name.as_str(), "datetime" | "date") && self.lookup(name).is_err() =>
            {
                Some(name.as_str())
            }
            _ => None,
        }
    }

    fn call_module(&self, module: &str, method: &str, args: &[Value]) -> EvalResult {
        match (module, method) {
            ("datetime", "fromisoformat") => to_datetime(arg(args, 0, method)?),
            ("datetime", "now" | "utcnow") => Ok(Value::DateTime(Utc::now())),
            ("date", "fromisoformat") => to_date(arg(args, 0, method)?),
            ("date", "today") => Ok(Value::Date(self.manager.today())),
            _ => Err(TemplateError::eval(format!(
                "'{module}' has no method '{method}'"
            ))),
        }
    }

    fn apply_filter(&self, name: &str, value: &Value, args: &[Value]) -> EvalResult {
        if let Some(filter) = self.manager.filters.get(name) {
            return filter(value, args);
        }
        match name {
            "days" | "day" => duration(value, 86_400),
            "weeks" | "week" => duration(value, 7 * 86_400),
            "hours" | "hour" => duration(value, 3_600),
            "minutes" | "minute" => duration(value, 60),
            "seconds" | "second" => duration(value, 1),
            "date" => to_date(value),
            "string" => Ok(Value::String(value.to_string())),
            "int" => to_int(value),
            "float" => to_float(value),
            "length" | "count" => length(value),
            "lower" => Ok(Value::String(value.to_string().to_lowercase())),
            "upper" => Ok(Value::String(value.to_string().to_uppercase())),
            "trim" => Ok(Value::String(value.to_string().trim().to_string())),
            "tojson" => Ok(Value::String(value.to_json().to_string())),
            "abs" => match value {
                Value::Int(i) => Ok(Value::Int(i.abs())),
                Value::Float(f) => Ok(Value::Float(f.abs())),
                Value::Duration(d) => Ok(Value::Duration(d.abs())),
                other => Err(type_error("abs", other)),
            },
            "join" => {
                let separator = args.first().map(Value::to_string).unwrap_or_default();
                let items = iterate(value.clone())?;
                Ok(Value::String(
                    items
                        .iter()
                        .map(Value::to_string)
                        .collect::<Vec<_>>()
                        .join(&separator),
                ))
            }
            "first" | "last" => {
                let items = iterate(value.clone())?;
                let picked = if name == "first" {
                    items.into_iter().next()
                } else {
                    items.into_iter().last()
                };
                picked.ok_or_else(|| TemplateError::Undefined(format!("{name} item")))
            }
            "replace" => {
                let from = arg(args, 0, name)?.to_string();
                let to = arg(args, 1, name)?.to_string();
                Ok(Value::String(value.to_string().replace(&from, &to)))
            }
            "list" => Ok(Value::List(iterate(value.clone())?)),
            "sort" => {
                let mut items = iterate(value.clone())?;
                items.sort_by(|a, b| a.compare(b).unwrap_or(Ordering::Equal));
                Ok(Value::List(items))
            }
            _ => Err(TemplateError::eval(format!("unknown filter '{name}'"))),
        }
    }
}

fn arg<'v>(args: &'v [Value], index: usize, name: &str) -> Result<&'v Value, TemplateError> {
    args.get(index)
        .ok_or_else(|| TemplateError::eval(format!("'{name}' expects argument {}", index + 1)))
}

fn type_error(operation: &str, value: &Value) -> TemplateError {
    TemplateError::eval(format!(
        "'{operation}' is not supported for {}",
        value.type_name()
    ))
}

fn iterate(value: Value) -> Result<Vec<Value>, TemplateError> {
    match value {
        Value::List(items) => Ok(items),
        Value::Map(map) => Ok(map.into_keys().map(Value::String).collect()),
        Value::String(s) => Ok(s.chars().map(|c| Value::String(c.to_string())).collect()),
        other => Err(TemplateError::eval(format!(
            "'{}' is not iterable",
            other.type_name()
        ))),
    }
}

fn attribute(value: &Value, name: &str) -> EvalResult {
    let found = match value {
        Value::Map(map) => map.get(name).cloned(),
        Value::Date(d) => match name {
            "year" => Some(Value::from(d.year())),
            "month" => Some(Value::from(d.month())),
            "day" => Some(Value::from(d.day())),
            _ => None,
        },
        Value::DateTime(dt) => match name {
            "year" => Some(Value::from(dt.year())),
            "month" => Some(Value::from(dt.month())),
            "day" => Some(Value::from(dt.day())),
            "hour" => Some(Value::from(dt.hour())),
            "minute" => Some(Value::from(dt.minute())),
            "second" => Some(Value::from(dt.second())),
            _ => None,
        },
        Value::Duration(d) => match name {
            "days" => Some(Value::Int(d.num_seconds().div_euclid(86_400))),
            "seconds" => Some(Value::Int(d.num_seconds().rem_euclid(86_400))),
            _ => None,
        },
        _ => None,
    };
    found.ok_or_else(|| TemplateError::Undefined(format!("{}.{name}", value.type_name())))
}

fn item(value: &Value, index: &Value) -> EvalResult {
    let found = match (value, index) {
        (Value::List(items), Value::Int(i)) => {
            let i = if *i < 0 { items.len() as i64 + i } else { *i };
            usize::try_from(i).ok().and_then(|i| items.get(i)).cloned()
        }
        (Value::String(s), Value::Int(i)) => usize::try_from(*i)
            .ok()
            .and_then(|i| s.chars().nth(i))
            .map(|c| Value::String(c.to_string())),
        (Value::Map(map), Value::String(key)) => map.get(key).cloned(),
        (Value::Map(_), _) | (Value::List(_), _) | (Value::String(_), _) => None,
        _ => return Err(type_error("[]", value)),
    };
    found.ok_or_else(|| TemplateError::Undefined(format!("[{index}]")))
}

fn call_method(receiver: &Value, method: &str, args: &[Value]) -> EvalResult {
    match (receiver, method) {
        (Value::Date(d), "weekday") => Ok(Value::from(d.weekday().num_days_from_monday())),
        (Value::Date(d), "isoweekday") => Ok(Value::from(d.weekday().number_from_monday())),
        (Value::Date(_), "isoformat") => Ok(Value::String(receiver.to_string())),
        (Value::Date(d), "strftime") => {
            let format = arg(args, 0, method)?.to_string();
            strftime(&format, |items, out| write!(out, "{}", d.format_with_items(items)))
        }
        (Value::DateTime(dt), "weekday") => Ok(Value::from(dt.weekday().num_days_from_monday())),
        (Value::DateTime(dt), "date") => Ok(Value::Date(dt.date_naive())),
        (Value::DateTime(_), "isoformat") => Ok(Value::String(receiver.to_string())),
        (Value::DateTime(dt), "strftime") => {
            let format = arg(args, 0, method)?.to_string();
            strftime(&format, |items, out| write!(out, "{}", dt.format_with_items(items)))
        }
        (Value::Duration(d), "total_seconds") => Ok(Value::Float(d.num_milliseconds() as f64 / 1000.0)),
        (Value::Map(map), "get") => {
            let key = arg(args, 0, method)?.to_string();
            Ok(map
                .get(&key)
                .cloned()
                .unwrap_or_else(|| args.get(1).cloned().unwrap_or(Value::Null)))
        }
        (Value::Map(map), "json") => map
            .get("json")
            .cloned()
            .ok_or_else(|| TemplateError::Undefined("json".into())),
        (Value::Map(map), "keys") => Ok(Value::List(map.keys().map(Value::from).collect())),
        (Value::Map(map), "values") => Ok(Value::List(map.values().cloned().collect())),
        (Value::Map(map), "items") => Ok(Value::List(
            map.iter()
                .map(|(k, v)| Value::List(vec![Value::from(k), v.clone()]))
                .collect(),
        )),
        (Value::String(s), "startswith") => {
            Ok(Value::Bool(s.starts_with(&arg(args, 0, method)?.to_string())))
        }
        (Value::String(s), "endswith") => {
            Ok(Value::Bool(s.ends_with(&arg(args, 0, method)?.to_string())))
        }
        (Value::String(s), "lower") => Ok(Value::String(s.to_lowercase())),
        (Value::String(s), "upper") => Ok(Value::String(s.to_uppercase())),
        (Value::String(s), "strip") => Ok(Value::String(s.trim().to_string())),
        (Value::String(s), "split") => Ok(Value::List(match args.first() {
            Some(sep) => s.split(&sep.to_string()).map(Value::from).collect(),
            None => s.split_whitespace().map(Value::from).collect(),
        })),
        (Value::String(s), "replace") => {
            let from = arg(args, 0, method)?.to_string();
            let to = arg(args, 1, method)?.to_string();
            Ok(Value::String(s.replace(&from, &to)))
        }
        _ => Err(TemplateError::eval(format!(
            "'{}' has no method '{method}'",
            receiver.type_name()
        ))),
    }
}

fn strftime(
    format: &str,
    write_with: impl FnOnce(std::slice::Iter<'_, Item<'_>>, &mut String) -> std::fmt::Result,
) -> EvalResult {
    let items: Vec<Item> = StrftimeItems::new(format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return Err(TemplateError::eval(format!("invalid date format '{format}'")));
    }
    let mut out = String::new();
    write_with(items.iter(), &mut out)
        .map_err(|_| TemplateError::eval(format!("cannot format date with '{format}'")))?;
    Ok(Value::String(out))
}

fn duration(value: &Value, unit_seconds: i64) -> EvalResult {
    let delta = match value {
        Value::Int(n) => n
            .checked_mul(unit_seconds)
            .and_then(TimeDelta::try_seconds),
        Value::Float(f) => {
            let millis = f * unit_seconds as f64 * 1000.0;
            millis
                .is_finite()
                .then(|| TimeDelta::try_milliseconds(millis as i64))
                .flatten()
        }
        other => return Err(type_error("duration", other)),
    };
    delta
        .map(Value::Duration)
        .ok_or_else(|| TemplateError::eval("duration out of range"))
}

fn to_date(value: &Value) -> EvalResult {
    match value {
        Value::Date(_) => Ok(value.clone()),
        Value::DateTime(dt) => Ok(Value::Date(dt.date_naive())),
        Value::String(s) => NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Value::Date)
            .map_err(|e| TemplateError::eval(format!("invalid date '{s}': {e}"))),
        other => Err(type_error("date", other)),
    }
}

fn to_datetime(value: &Value) -> EvalResult {
    let text = match value {
        Value::DateTime(_) => return Ok(value.clone()),
        Value::Date(d) => return Ok(Value::DateTime(d.and_time(NaiveTime::MIN).and_utc())),
        Value::String(s) => s.trim(),
        other => return Err(type_error("fromisoformat", other)),
    };
    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Ok(Value::DateTime(dt.with_timezone(&Utc)));
    }
    if let Ok(dt) = DateTime::parse_from_str(text, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Ok(Value::DateTime(dt.with_timezone(&Utc)));
    }
    let naive = NAIVE_DATETIME_FORMATS
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())
        .or_else(|| {
            NaiveDate::parse_from_str(text, "%Y-%m-%d")
                .ok()
                .map(|d| d.and_time(NaiveTime::MIN))
        });
    naive
        .map(|dt| Value::DateTime(dt.and_utc()))
        .ok_or_else(|| TemplateError::eval(format!("invalid isoformat string '{text}'")))
}

fn to_int(value: &Value) -> EvalResult {
    match value {
        Value::Int(_) => Ok(value.clone()),
        Value::Float(f) => Ok(Value::Int(f.trunc() as i64)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::String(s) => s
            .trim()
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| TemplateError::eval(format!("invalid integer '{s}'"))),
        other => Err(type_error("int", other)),
    }
}

fn to_float(value: &Value) -> EvalResult {
    match value {
        Value::Int(i) => Ok(Value::Float(*i as f64)),
        Value::Float(_) => Ok(value.clone()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(Value::Float)
            .map_err(|_| TemplateError::eval(format!("invalid number '{s}'"))),
        other => Err(type_error("float", other)),
    }
}

fn length(value: &Value) -> EvalResult {
    match value {
        Value::List(items) => Ok(Value::from(items.len())),
        Value::Map(map) => Ok(Value::from(map.len())),
        Value::String(s) => Ok(Value::from(s.chars().count())),
        other => Err(type_error("length", other)),
    }
}

fn range(args: &[Value]) -> EvalResult {
    let ints = args
        .iter()
        .map(|a| a.as_i64().ok_or_else(|| type_error("range", a)))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, stop, step) = match ints.as_slice() {
        [stop] => (0, *stop, 1),
        [start, stop] => (*start, *stop, 1),
        [start, stop, step] if *step != 0 => (*start, *stop, *step),
        _ => return Err(TemplateError::eval("invalid range arguments")),
    };
    let mut items = Vec::new();
    let mut i = start;
    while (step > 0 && i < stop) || (step < 0 && i > stop) {
        items.push(Value::Int(i));
        i += step;
    }
    Ok(Value::List(items))
}

fn negate(value: Value) -> EvalResult {
    match value {
        Value::Int(i) => i
            .checked_neg()
            .map(Value::Int)
            .ok_or_else(|| TemplateError::eval("integer overflow")),
        Value::Float(f) => Ok(Value::Float(-f)),
        Value::Duration(d) => Ok(Value::Duration(-d)),
        other => Err(type_error("-", &other)),
    }
}

fn overflow() -> TemplateError {
    TemplateError::eval("arithmetic overflow")
}

fn as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Int(i) => Some(*i as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    }
}

fn contains(haystack: &Value, needle: &Value) -> Result<bool, TemplateError> {
    match haystack {
        Value::List(items) => Ok(items.contains(needle)),
        Value::Map(map) => Ok(needle.as_str().is_some_and(|k| map.contains_key(k))),
        Value::String(s) => match needle {
            Value::String(n) => Ok(s.contains(n.as_str())),
            other => Err(type_error("in", other)),
        },
        other => Err(type_error("in", other)),
    }
}

fn binary(op: BinOp, left: Value, right: Value) -> EvalResult {
    use Value::*;
    let unsupported = |left: &Value, right: &Value| {
        TemplateError::eval(format!(
            "unsupported operand types for {op:?}: {} and {}",
            left.type_name(),
            right.type_name()
        ))
    };
    match op {
        BinOp::Eq => Ok(Bool(left == right)),
        BinOp::Ne => Ok(Bool(left != right)),
        BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
            let ordering = left.compare(&right).ok_or_else(|| {
                TemplateError::eval(format!(
                    "cannot compare {} and {}",
                    left.type_name(),
                    right.type_name()
                ))
            })?;
            Ok(Bool(match op {
                BinOp::Lt => ordering == Ordering::Less,
                BinOp::Le => ordering != Ordering::Greater,
                BinOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinOp::In => contains(&right, &left).map(Bool),
        BinOp::NotIn => contains(&right, &left).map(|found| Bool(!found)),
        BinOp::Concat => Ok(String(format!("{left}{right}"))),
        BinOp::Add => match (&left, &right) {
            (Int(a), Int(b)) => a.checked_add(*b).map(Int).ok_or_else(overflow),
            (String(a), String(b)) => Ok(String(format!("{a}{b}"))),
            (List(a), List(b)) => Ok(List(a.iter().chain(b).cloned().collect())),
            (Date(d), Duration(t)) | (Duration(t), Date(d)) => {
                d.checked_add_signed(*t).map(Date).ok_or_else(overflow)
            }
            (DateTime(d), Duration(t)) | (Duration(t), DateTime(d)) => {
                d.checked_add_signed(*t).map(DateTime).ok_or_else(overflow)
            }
            (Duration(a), Duration(b)) => a.checked_add(b).map(Duration).ok_or_else(overflow),
            _ => match (as_f64(&left), as_f64(&right)) {
                (Some(a), Some(b)) => Ok(Float(a + b)),
                _ => Err(unsupported(&left, &right)),
            },
        },
        BinOp::Sub => match (&left, &right) {
            (Int(a), Int(b)) => a.checked_sub(*b).map(Int).ok_or_else(overflow),
            (Date(d), Duration(t)) => d.checked_sub_signed(*t).map(Date).ok_or_else(overflow),
            (Date(a), Date(b)) => Ok(Duration(a.signed_duration_since(*b))),
            (DateTime(d), Duration(t)) => {
                d.checked_sub_signed(*t).map(DateTime).ok_or_else(overflow)
            }
            (DateTime(a), DateTime(b)) => Ok(Duration(a.signed_duration_since(*b))),
            (Duration(a), Duration(b)) => a.checked_sub(b).map(Duration).ok_or_else(overflow),
            _ => match (as_f64(&left), as_f64(&right)) {
                (Some(a), Some(b)) => Ok(Float(a - b)),
                _ => Err(unsupported(&left, &right)),
            },
        },
        BinOp::Mul => match (&left, &right) {
            (Int(a), Int(b)) => a.checked_mul(*b).map(Int).ok_or_else(overflow),
            (Duration(d), Int(n)) | (Int(n), Duration(d)) => i32::try_from(*n)
                .ok()
                .and_then(|n| d.checked_mul(n))
                .map(Duration)
                .ok_or_else(overflow),
            (String(s), Int(n)) | (Int(n), String(s)) => {
                Ok(String(s.repeat(usize::try_from(*n).unwrap_or(0))))
            }
            _ => match (as_f64(&left), as_f64(&right)) {
                (Some(a), Some(b)) => Ok(Float(a * b)),
                _ => Err(unsupported(&left, &right)),
            },
        },
        BinOp::Div => match (as_f64(&left), as_f64(&right)) {
            (Some(_), Some(b)) if b == 0.0 => Err(TemplateError::eval("division by zero")),
            (Some(a), Some(b)) => Ok(Float(a / b)),
            _ => Err(unsupported(&left, &right)),
        },
        BinOp::FloorDiv | BinOp::Mod => match (&left, &right) {
            (Int(_), Int(0)) => Err(TemplateError::eval("division by zero")),
            (Int(a), Int(b)) => {
                let (a, b) = (*a, *b);
                let rem = a.wrapping_rem(b);
                let adjust = rem != 0 && ((rem < 0) != (b < 0));
                if op == BinOp::FloorDiv {
                    Ok(Int(a.wrapping_div(b) - i64::from(adjust)))
                } else {
                    Ok(Int(if adjust { rem + b } else { rem }))
                }
            }
            _ => match (as_f64(&left), as_f64(&right)) {
                (Some(_), Some(b)) if b == 0.0 => Err(TemplateError::eval("division by zero")),
                (Some(a), Some(b)) if op == BinOp::FloorDiv => Ok(Float((a / b).floor())),
                (Some(a), Some(b)) => Ok(Float(a - b * (a / b).floor())),
                _ => Err(unsupported(&left, &right)),
            },
        },
        BinOp::And => Ok(if left.is_truthy() { right } else { left }),
        BinOp::Or => Ok(if left.is_truthy() { left } else { right }),
    }
}
