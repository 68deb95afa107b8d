//! Built-in globals of the sandbox
//!
//! These are the only names a formula can see besides what the runtime binds
//! for the current row. Nothing here touches host state.

use std::collections::{BTreeMap, HashMap};
use std::f64::consts;

use super::evaluator::EvalError;
use super::value::{Native, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Builtin {
    Abs,
    Ceil,
    Floor,
    Round,
    Trunc,
    Sign,
    Sqrt,
    Pow,
    Min,
    Max,
    Log,
    Log10,
    Exp,
    IsFinite,
    IsNaN,
    ToNumber,
}

const MATH_FUNCTIONS: &[(&str, Builtin)] = &[
    ("abs", Builtin::Abs),
    ("ceil", Builtin::Ceil),
    ("floor", Builtin::Floor),
    ("round", Builtin::Round),
    ("trunc", Builtin::Trunc),
    ("sign", Builtin::Sign),
    ("sqrt", Builtin::Sqrt),
    ("pow", Builtin::Pow),
    ("min", Builtin::Min),
    ("max", Builtin::Max),
    ("log", Builtin::Log),
    ("log10", Builtin::Log10),
    ("exp", Builtin::Exp),
];

/// Read-only global bindings shared by every run
pub fn globals() -> HashMap<String, Value> {
    let mut math: BTreeMap<String, Value> = MATH_FUNCTIONS
        .iter()
        .map(|(name, builtin)| (name.to_string(), Value::Native(Native::Builtin(*builtin))))
        .collect();
    math.insert("PI".to_string(), Value::Number(consts::PI));
    math.insert("E".to_string(), Value::Number(consts::E));

    let mut globals = HashMap::new();
    globals.insert("Math".to_string(), Value::object(math));
    globals.insert("undefined".to_string(), Value::Undefined);
    globals.insert("NaN".to_string(), Value::Number(f64::NAN));
    globals.insert("Infinity".to_string(), Value::Number(f64::INFINITY));
    globals.insert(
        "isFinite".to_string(),
        Value::Native(Native::Builtin(Builtin::IsFinite)),
    );
    globals.insert(
        "isNaN".to_string(),
        Value::Native(Native::Builtin(Builtin::IsNaN)),
    );
    globals.insert(
        "Number".to_string(),
        Value::Native(Native::Builtin(Builtin::ToNumber)),
    );
    globals
}

fn arg_number(args: &[Value], index: usize) -> f64 {
    args.get(index).map_or(f64::NAN, Value::to_number)
}

/// Call a built-in with already evaluated arguments
pub fn call_builtin(builtin: Builtin, args: &[Value]) -> Result<Value, EvalError> {
    let x = arg_number(args, 0);
    let result = match builtin {
        Builtin::Abs => x.abs(),
        Builtin::Ceil => x.ceil(),
        Builtin::Floor => x.floor(),
        // JavaScript rounds half up, towards +Infinity
        Builtin::Round => (x + 0.5).floor(),
        Builtin::Trunc => x.trunc(),
        Builtin::Sign => {
            if x.is_nan() || x == 0.0 {
                x
            } else {
                x.signum()
            }
        }
        Builtin::Sqrt => x.sqrt(),
        Builtin::Pow => x.powf(arg_number(args, 1)),
        Builtin::Min => args.iter().map(Value::to_number).fold(f64::INFINITY, |acc, n| {
            if acc.is_nan() || n.is_nan() {
                f64::NAN
            } else {
                acc.min(n)
            }
        }),
        Builtin::Max => args
            .iter()
            .map(Value::to_number)
            .fold(f64::NEG_INFINITY, |acc, n| {
                if acc.is_nan() || n.is_nan() {
                    f64::NAN
                } else {
                    acc.max(n)
                }
            }),
        Builtin::Log => x.ln(),
        Builtin::Log10 => x.log10(),
        Builtin::Exp => x.exp(),
        Builtin::IsFinite => return Ok(Value::Bool(x.is_finite())),
        Builtin::IsNaN => return Ok(Value::Bool(x.is_nan())),
        Builtin::ToNumber => {
            if args.is_empty() {
                0.0
            } else {
                x
            }
        }
    };
    Ok(Value::Number(result))
}
