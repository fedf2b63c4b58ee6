use std::collections::HashMap;
use std::rc::Rc;

use crate::command::AutoVar;
use crate::eval::{EvalError, Evaluator};
use crate::value::{Expr, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarOrigin {
    Undefined,
    Default,
    Environment,
    File,
    CommandLine,
    Override,
    Automatic,
}

impl VarOrigin {
    /// The spelling `$(origin)` reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            VarOrigin::Undefined => "undefined",
            VarOrigin::Default => "default",
            VarOrigin::Environment => "environment",
            VarOrigin::File => "file",
            VarOrigin::CommandLine => "command line",
            VarOrigin::Override => "override",
            VarOrigin::Automatic => "automatic",
        }
    }
}

/// Anything that can be expanded by name.
///
/// Expansion is deferred until a reference is evaluated, so the result may
/// depend on evaluator state such as the rule currently being evaluated.
pub trait LazyVar {
    fn eval(&self, ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError>;

    fn flavor(&self) -> &'static str;

    fn origin(&self) -> VarOrigin;

    /// Whether the value can only be produced by evaluating it in context.
    fn is_func(&self, _ev: &Evaluator) -> bool {
        false
    }

    /// Builds the variable `+=` turns this one into.
    fn append(&self, ev: &mut Evaluator, text: &str, rhs: &Expr) -> Result<Var, EvalError>;

    /// The unexpanded text, as `$(value NAME)` shows it.
    fn string(&self, ev: &mut Evaluator) -> Result<String, EvalError>;
}

#[derive(Debug, Clone)]
pub enum Var {
    Simple {
        value: String,
        origin: VarOrigin,
    },
    Recursive {
        expr: Expr,
        text: String,
        origin: VarOrigin,
    },
    Automatic(AutoVar),
}

impl Var {
    pub fn simple(value: impl Into<String>, origin: VarOrigin) -> Self {
        Var::Simple {
            value: value.into(),
            origin,
        }
    }

    pub fn recursive(text: &str, expr: Expr, origin: VarOrigin) -> Self {
        Var::Recursive {
            expr,
            text: text.to_string(),
            origin,
        }
    }

    pub fn is_recursive(&self) -> bool {
        matches!(self, Var::Recursive { .. })
    }
}

impl LazyVar for Var {
    fn eval(&self, ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError> {
        match self {
            Var::Simple { value, .. } => {
                out.push_str(value);
                Ok(())
            }
            Var::Recursive { expr, .. } => expr.value.eval(ev, out),
            Var::Automatic(v) => v.eval(ev, out),
        }
    }

    fn flavor(&self) -> &'static str {
        match self {
            Var::Simple { .. } => "simple",
            Var::Recursive { .. } => "recursive",
            Var::Automatic(v) => v.flavor(),
        }
    }

    fn origin(&self) -> VarOrigin {
        match self {
            Var::Simple { origin, .. } | Var::Recursive { origin, .. } => *origin,
            Var::Automatic(v) => v.origin(),
        }
    }

    fn is_func(&self, ev: &Evaluator) -> bool {
        match self {
            Var::Automatic(v) => v.is_func(ev),
            _ => false,
        }
    }

    fn append(&self, ev: &mut Evaluator, text: &str, rhs: &Expr) -> Result<Var, EvalError> {
        match self {
            Var::Simple { value, origin } => {
                let mut value = value.clone();
                let appended = rhs.eval(ev)?;
                if !value.is_empty() {
                    value.push(' ');
                }
                value.push_str(&appended);
                Ok(Var::simple(value, *origin))
            }
            Var::Recursive {
                expr,
                text: old,
                origin,
            } => {
                let value = Value::List(vec![
                    expr.value.clone(),
                    Value::Literal(" ".to_string()),
                    rhs.value.clone(),
                ]);
                let expr = Expr {
                    value,
                    loc: expr.loc.clone(),
                };
                Ok(Var::recursive(&format!("{} {}", old, text), expr, *origin))
            }
            Var::Automatic(v) => v.append(ev, text, rhs),
        }
    }

    fn string(&self, ev: &mut Evaluator) -> Result<String, EvalError> {
        match self {
            Var::Simple { value, .. } => Ok(value.clone()),
            Var::Recursive { text, .. } => Ok(text.clone()),
            Var::Automatic(v) => v.string(ev),
        }
    }
}

/// A single variable namespace, such as the globals or a rule's
/// target-specific variables.
#[derive(Debug, Clone, Default)]
pub struct Vars {
    vars: HashMap<String, Rc<Var>>,
}

impl Vars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookup(&self, name: &str) -> Option<Rc<Var>> {
        self.vars.get(name).cloned()
    }

    pub fn assign(&mut self, name: &str, var: Var) {
        self.vars.insert(name.to_string(), Rc::new(var));
    }
}
