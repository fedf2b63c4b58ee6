//! The general expression evaluator.
//!
//! [`Evaluator`] owns the variable tables and the transient context that
//! command evaluation mutates: the active location, the active rule scope,
//! whether recipe commands are being expanded, an optional override of the
//! rule automatic variables resolve against, and the commands built-ins
//! deferred while that happened.

use std::rc::Rc;

use crate::flags::{Backend, Flags};
use crate::graph::node::DepNode;
use crate::loc::Loc;
use crate::value::Expr;
use crate::var::{LazyVar, Var, VarOrigin, Vars};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("{loc}: *** {message}")]
    Reported { loc: Loc, message: String },
}

impl EvalError {
    pub fn message(&self) -> &str {
        match self {
            EvalError::Reported { message, .. } => message,
        }
    }

    pub fn loc(&self) -> &Loc {
        match self {
            EvalError::Reported { loc, .. } => loc,
        }
    }
}

pub struct Evaluator {
    backend: Backend,
    fatal_errors: bool,
    globals: Vars,
    current_scope: Option<Rc<Vars>>,
    loc: Loc,
    evaluating_command: bool,
    current_dep_node: Option<Rc<DepNode>>,
    delayed_output_commands: Vec<String>,
    errors: Vec<EvalError>,
    expanding: Vec<String>,
}

impl Evaluator {
    pub fn new(flags: &Flags) -> Self {
        Self {
            backend: flags.backend,
            fatal_errors: flags.fatal_errors,
            globals: Vars::new(),
            current_scope: None,
            loc: Loc::default(),
            evaluating_command: false,
            current_dep_node: None,
            delayed_output_commands: Vec::new(),
            errors: Vec::new(),
            expanding: Vec::new(),
        }
    }

    pub fn loc(&self) -> &Loc {
        &self.loc
    }

    pub fn set_loc(&mut self, loc: Loc) {
        self.loc = loc;
    }

    pub fn current_scope(&self) -> Option<&Rc<Vars>> {
        self.current_scope.as_ref()
    }

    pub fn set_current_scope(&mut self, scope: Option<Rc<Vars>>) -> Option<Rc<Vars>> {
        std::mem::replace(&mut self.current_scope, scope)
    }

    pub fn is_evaluating_command(&self) -> bool {
        self.evaluating_command
    }

    pub fn set_evaluating_command(&mut self, evaluating: bool) -> bool {
        std::mem::replace(&mut self.evaluating_command, evaluating)
    }

    /// The rule automatic variables resolve against when set; it takes
    /// priority over the command evaluator's own current rule.
    pub fn current_dep_node(&self) -> Option<&Rc<DepNode>> {
        self.current_dep_node.as_ref()
    }

    pub fn set_current_dep_node(&mut self, node: Option<Rc<DepNode>>) -> Option<Rc<DepNode>> {
        std::mem::replace(&mut self.current_dep_node, node)
    }

    /// Runs `f` with automatic variables redirected to `node`, restoring the
    /// previous override afterwards.
    pub fn with_current_dep_node<R>(
        &mut self,
        node: Rc<DepNode>,
        f: impl FnOnce(&mut Self) -> R,
    ) -> R {
        let prev = self.set_current_dep_node(Some(node));
        let r = f(self);
        self.current_dep_node = prev;
        r
    }

    /// True while recipe commands are being expanded for a static build
    /// description, where built-ins must not touch the outside world.
    pub fn avoid_io(&self) -> bool {
        self.evaluating_command && self.backend == Backend::Ninja
    }

    pub fn delayed_output_commands(&self) -> &[String] {
        &self.delayed_output_commands
    }

    pub fn add_delayed_output_command(&mut self, cmd: String) {
        self.delayed_output_commands.push(cmd);
    }

    pub fn clear_delayed_output_commands(&mut self) {
        self.delayed_output_commands.clear();
    }

    pub fn lookup_var(&self, name: &str) -> Option<Rc<Var>> {
        if let Some(scope) = &self.current_scope {
            if let Some(v) = scope.lookup(name) {
                return Some(v);
            }
        }
        self.globals.lookup(name)
    }

    pub fn lookup_global(&self, name: &str) -> Option<Rc<Var>> {
        self.globals.lookup(name)
    }

    pub fn set_global_var(&mut self, name: &str, var: Var) {
        self.globals.assign(name, var);
    }

    pub fn eval_var(&mut self, name: &str, out: &mut String) -> Result<(), EvalError> {
        let Some(var) = self.lookup_var(name) else {
            return Ok(());
        };
        if !var.is_recursive() {
            return var.eval(self, out);
        }
        if self.expanding.iter().any(|n| n == name) {
            return self.error(format!(
                "Recursive variable `{}' references itself (eventually)",
                name
            ));
        }
        self.expanding.push(name.to_string());
        let r = var.eval(self, out);
        self.expanding.pop();
        r
    }

    /// Parses and expands `text` at the current location.
    pub fn expand(&mut self, text: &str) -> Result<String, EvalError> {
        match Expr::parse(text, self.loc.clone()) {
            Ok(expr) => expr.eval(self),
            Err(e) => {
                self.error(e.to_string())?;
                Ok(String::new())
            }
        }
    }

    /// Reports an evaluation error at the current location.
    ///
    /// Returns the error when errors are fatal; otherwise it is recorded and
    /// evaluation carries on.
    pub fn error(&mut self, message: impl Into<String>) -> Result<(), EvalError> {
        let err = EvalError::Reported {
            loc: self.loc.clone(),
            message: message.into(),
        };
        tracing::error!("{}", err);
        if self.fatal_errors {
            return Err(err);
        }
        self.errors.push(err);
        Ok(())
    }

    pub fn errors(&self) -> &[EvalError] {
        &self.errors
    }

    pub fn set_fatal_errors(&mut self, fatal: bool) {
        self.fatal_errors = fatal;
    }

    /// Imports variables as if they had been set before any Makefile was
    /// read, mirroring how `make` seeds its tables.
    pub fn define(&mut self, name: &str, text: &str, origin: VarOrigin) {
        let expr = match Expr::parse(text, self.loc.clone()) {
            Ok(expr) => expr,
            Err(_) => Expr::literal(text, self.loc.clone()),
        };
        self.globals.assign(name, Var::recursive(text, expr, origin));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ev() -> Evaluator {
        Evaluator::new(&Flags::default())
    }

    #[test]
    fn expands_recursive_variables_lazily() {
        let mut ev = ev();
        ev.define("A", "$(B) world", VarOrigin::File);
        ev.define("B", "hello", VarOrigin::File);
        assert_eq!(ev.expand("$(A)!").unwrap(), "hello world!");
    }

    #[test]
    fn scope_shadows_globals() {
        let mut ev = ev();
        ev.define("CFLAGS", "-O2", VarOrigin::File);
        let mut scope = Vars::new();
        scope.assign("CFLAGS", Var::simple("-g", VarOrigin::File));
        let prev = ev.set_current_scope(Some(Rc::new(scope)));
        assert!(prev.is_none());
        assert_eq!(ev.expand("$(CFLAGS)").unwrap(), "-g");
        ev.set_current_scope(None);
        assert_eq!(ev.expand("$(CFLAGS)").unwrap(), "-O2");
    }

    #[test]
    fn self_reference_is_reported() {
        let mut ev = ev();
        ev.set_loc(Loc::new("Makefile", 3));
        ev.define("X", "a $(X)", VarOrigin::File);
        assert_eq!(ev.expand("$(X)").unwrap(), "a ");
        assert_eq!(ev.errors().len(), 1);
        assert_eq!(
            ev.errors()[0].to_string(),
            "Makefile:3: *** Recursive variable `X' references itself (eventually)"
        );
    }

    #[test]
    fn fatal_errors_propagate() {
        let mut ev = ev();
        ev.set_fatal_errors(true);
        assert!(ev.expand("$(error boom)").is_err());
        assert!(ev.errors().is_empty());
    }

    #[test]
    fn substitution_references() {
        let mut ev = ev();
        ev.define("SRCS", "a.c  b.c", VarOrigin::File);
        assert_eq!(ev.expand("$(SRCS:.c=.o)").unwrap(), "a.o b.o");
        assert_eq!(ev.expand("$(SRCS:%.c=obj/%.o)").unwrap(), "obj/a.o obj/b.o");
    }

    #[test]
    fn builtin_functions() {
        let mut ev = ev();
        assert_eq!(ev.expand("$(dir a/b/c.o d.o)").unwrap(), "a/b/ ./");
        assert_eq!(ev.expand("$(notdir a/b/c.o d.o)").unwrap(), "c.o d.o");
        assert_eq!(ev.expand("$(subst .c,.o,x.c y.c)").unwrap(), "x.o y.o");
        assert_eq!(ev.expand("$(patsubst %.c,%.o,x.c y.h)").unwrap(), "x.o y.h");
        assert_eq!(ev.expand("$(strip  a   b )").unwrap(), "a b");
        ev.define("R", "$(X)", VarOrigin::File);
        assert_eq!(ev.expand("$(value R)").unwrap(), "$(X)");
        assert_eq!(ev.expand("$(flavor R)").unwrap(), "recursive");
        assert_eq!(ev.expand("$(origin R) $(origin NOPE)").unwrap(), "file undefined");
    }
}
