//! Turning a rule's recipe into the command lines a shell will run.
//!
//! [`CommandEvaluator`] expands each recipe template of a [`DepNode`] with
//! the automatic variables (`$@`, `$<`, `$^`, ...) bound to that node, then
//! splits the result into lines and strips the `@`, `-` and `+` prefixes.

use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::rc::{Rc, Weak};

use crate::eval::{EvalError, Evaluator};
use crate::fileutil::get_timestamp;
use crate::flags::Flags;
use crate::graph::node::DepNode;
use crate::loc::Loc;
use crate::strutil::{basename, dirname, find_end_of_line, trim_left_space, words, Pattern, WordWriter};
use crate::value::Expr;
use crate::var::{LazyVar, Var, VarOrigin, Vars};

/// A single shell command line, ready for a backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub target: String,
    pub cmd: String,
    pub echo: bool,
    pub ignore_error: bool,
}

impl Command {
    pub fn new(target: &str) -> Self {
        Self {
            target: target.to_string(),
            cmd: String::new(),
            echo: true,
            ignore_error: false,
        }
    }
}

const AUTO_VAR_SYMS: [&str; 8] = ["@", "<", "^", "+", "*", "?", "%", "|"];

/// Whether `name` is an automatic variable such as `@` or `<D`.
pub fn is_automatic_var_name(name: &str) -> bool {
    let base = name.strip_suffix(['D', 'F']).unwrap_or(name);
    AUTO_VAR_SYMS.contains(&base)
}

/// The rule a command evaluator is working on, shared with the automatic
/// variables it registered.
type NodeSlot = RefCell<Option<Rc<DepNode>>>;

#[derive(Clone)]
enum AutoVarKind {
    At,
    Less,
    Hat,
    Plus,
    Star,
    Question,
    NotImplemented,
    SuffixD(Rc<AutoVar>),
    SuffixF(Rc<AutoVar>),
}

/// An automatic variable such as `$@` or `$(<D)`.
///
/// It holds no value of its own: every expansion reads the rule currently
/// being evaluated.
#[derive(Clone)]
pub struct AutoVar {
    kind: AutoVarKind,
    sym: String,
    ce: Weak<NodeSlot>,
}

impl fmt::Debug for AutoVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "AutoVar({})", self.sym)
    }
}

impl AutoVar {
    fn new(kind: AutoVarKind, sym: &str, ce: Weak<NodeSlot>) -> Self {
        Self {
            kind,
            sym: sym.to_string(),
            ce,
        }
    }

    /// A node set on the evaluator wins over the command evaluator's own,
    /// so nested evaluation can redirect `$@` without touching the outer rule.
    fn current_dep_node(&self, ev: &Evaluator) -> Option<Rc<DepNode>> {
        if let Some(n) = ev.current_dep_node() {
            return Some(n.clone());
        }
        self.ce.upgrade().and_then(|slot| slot.borrow().clone())
    }
}

fn eval_words(
    wrapped: &AutoVar,
    ev: &mut Evaluator,
    out: &mut String,
    project: fn(&str) -> &str,
) -> Result<(), EvalError> {
    let mut buf = String::new();
    wrapped.eval(ev, &mut buf)?;
    let mut ww = WordWriter::new(out);
    for tok in words(&buf) {
        ww.write(project(tok));
    }
    Ok(())
}

impl LazyVar for AutoVar {
    fn eval(&self, ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError> {
        match &self.kind {
            AutoVarKind::NotImplemented => {
                return ev.error(format!("Automatic variable `${}' isn't supported yet", self.sym));
            }
            AutoVarKind::SuffixD(wrapped) => return eval_words(wrapped, ev, out, dirname),
            AutoVarKind::SuffixF(wrapped) => return eval_words(wrapped, ev, out, basename),
            _ => {}
        }

        // Outside of any rule there is nothing to expand to.
        let Some(n) = self.current_dep_node(ev) else {
            return Ok(());
        };
        match &self.kind {
            AutoVarKind::At => out.push_str(&n.output),
            AutoVarKind::Less => {
                if let Some(first) = n.actual_inputs.first() {
                    out.push_str(first);
                }
            }
            AutoVarKind::Hat => {
                let mut seen = HashSet::new();
                let mut ww = WordWriter::new(out);
                for ai in &n.actual_inputs {
                    if seen.insert(ai.as_str()) {
                        ww.write(ai);
                    }
                }
            }
            AutoVarKind::Plus => {
                let mut ww = WordWriter::new(out);
                for ai in &n.actual_inputs {
                    ww.write(ai);
                }
            }
            AutoVarKind::Star => {
                if let Some(pat) = &n.output_pattern {
                    out.push_str(Pattern::new(pat).stem(&n.output));
                }
            }
            AutoVarKind::Question => {
                let target_age = get_timestamp(&n.output);
                let mut seen = HashSet::new();
                let mut ww = WordWriter::new(out);
                for ai in &n.actual_inputs {
                    if seen.insert(ai.as_str()) && get_timestamp(ai) > target_age {
                        ww.write(ai);
                    }
                }
            }
            AutoVarKind::NotImplemented | AutoVarKind::SuffixD(_) | AutoVarKind::SuffixF(_) => {}
        }
        Ok(())
    }

    fn flavor(&self) -> &'static str {
        "undefined"
    }

    fn origin(&self) -> VarOrigin {
        VarOrigin::Automatic
    }

    fn is_func(&self, _ev: &Evaluator) -> bool {
        true
    }

    fn append(&self, _ev: &mut Evaluator, _text: &str, _rhs: &Expr) -> Result<Var, EvalError> {
        panic!("cannot append to automatic variable `${}'", self.sym);
    }

    fn string(&self, ev: &mut Evaluator) -> Result<String, EvalError> {
        ev.error(format!("$(value {}) is not implemented yet", self.sym))?;
        Ok(String::new())
    }
}

/// Strips leading `@`, `-` and `+` markers (and the blanks around them)
/// from `s`, updating the flags they stand for.
pub fn parse_command_prefixes(s: &mut &str, echo: &mut bool, ignore_error: &mut bool) {
    let mut rest = trim_left_space(*s);
    loop {
        match rest.as_bytes().first() {
            Some(b'@') => *echo = false,
            Some(b'-') => *ignore_error = true,
            // Recursion marker; only the evaluator's sub-make bookkeeping cares.
            Some(b'+') => {}
            _ => break,
        }
        rest = trim_left_space(&rest[1..]);
    }
    *s = rest;
}

/// One line of an expanded recipe, with its own prefixes applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine<'a> {
    pub text: &'a str,
    pub echo: bool,
    pub ignore_error: bool,
    /// Line terminators consumed by this line, continuations included.
    pub lf_cnt: usize,
}

/// Splits an expanded recipe into shell command lines.
///
/// Backslash-newline continuations stay inside a line. Each line may carry
/// its own prefixes, which replace `echo`/`ignore_error` for that line only.
/// Lines that are empty once prefixes are stripped are skipped.
pub struct CommandLines<'a> {
    rest: Option<&'a str>,
    echo: bool,
    ignore_error: bool,
}

impl<'a> CommandLines<'a> {
    pub fn new(cmds: &'a str, echo: bool, ignore_error: bool) -> Self {
        Self {
            rest: Some(cmds),
            echo,
            ignore_error,
        }
    }
}

impl<'a> Iterator for CommandLines<'a> {
    type Item = CommandLine<'a>;

    fn next(&mut self) -> Option<CommandLine<'a>> {
        while let Some(cmds) = self.rest {
            let mut lf_cnt = 0;
            let index = find_end_of_line(cmds, 0, &mut lf_cnt);
            let line = if index < cmds.len() {
                self.rest = Some(&cmds[index + 1..]);
                &cmds[..index]
            } else {
                self.rest = None;
                cmds
            };

            let mut text = trim_left_space(line);
            let mut echo = self.echo;
            let mut ignore_error = self.ignore_error;
            parse_command_prefixes(&mut text, &mut echo, &mut ignore_error);
            if !text.is_empty() {
                return Some(CommandLine {
                    text,
                    echo,
                    ignore_error,
                    lf_cnt,
                });
            }
        }
        None
    }
}

/// Sets up the evaluator for one rule's recipe and puts everything back
/// when dropped, whether or not evaluation succeeded.
struct CommandScope<'a> {
    ev: &'a mut Evaluator,
    current: &'a NodeSlot,
    prev_loc: Loc,
    prev_scope: Option<Rc<Vars>>,
    prev_evaluating: bool,
    prev_node: Option<Rc<DepNode>>,
}

impl<'a> CommandScope<'a> {
    fn enter(ev: &'a mut Evaluator, current: &'a NodeSlot, n: &Rc<DepNode>) -> Self {
        let prev_loc = ev.loc().clone();
        ev.set_loc(n.loc.clone());
        let prev_scope = ev.set_current_scope(n.rule_vars.clone());
        let prev_evaluating = ev.set_evaluating_command(true);
        let prev_node = current.replace(Some(n.clone()));
        Self {
            ev,
            current,
            prev_loc,
            prev_scope,
            prev_evaluating,
            prev_node,
        }
    }
}

impl Deref for CommandScope<'_> {
    type Target = Evaluator;

    fn deref(&self) -> &Evaluator {
        self.ev
    }
}

impl DerefMut for CommandScope<'_> {
    fn deref_mut(&mut self) -> &mut Evaluator {
        self.ev
    }
}

impl Drop for CommandScope<'_> {
    fn drop(&mut self) {
        self.ev.set_loc(std::mem::take(&mut self.prev_loc));
        self.ev.set_current_scope(self.prev_scope.take());
        self.ev.set_evaluating_command(self.prev_evaluating);
        self.current.replace(self.prev_node.take());
    }
}

pub struct CommandEvaluator {
    current: Rc<NodeSlot>,
    silent_mode: bool,
}

impl CommandEvaluator {
    /// Registers the automatic variables in `ev`'s global table.
    ///
    /// `$?` depends on file timestamps, so when generating a static build
    /// description it is registered as unsupported, like `$%` and `$|`.
    pub fn new(ev: &mut Evaluator, flags: &Flags) -> Self {
        let ce = Self {
            current: Rc::new(RefCell::new(None)),
            silent_mode: flags.silent_mode,
        };
        ce.insert_auto_var(ev, "@", AutoVarKind::At);
        ce.insert_auto_var(ev, "<", AutoVarKind::Less);
        ce.insert_auto_var(ev, "^", AutoVarKind::Hat);
        ce.insert_auto_var(ev, "+", AutoVarKind::Plus);
        ce.insert_auto_var(ev, "*", AutoVarKind::Star);
        if flags.generate_ninja() {
            ce.insert_auto_var(ev, "?", AutoVarKind::NotImplemented);
        } else {
            ce.insert_auto_var(ev, "?", AutoVarKind::Question);
        }
        // TODO: archive members ($%) and order-only prerequisites ($|).
        ce.insert_auto_var(ev, "%", AutoVarKind::NotImplemented);
        ce.insert_auto_var(ev, "|", AutoVarKind::NotImplemented);
        ce
    }

    fn insert_auto_var(&self, ev: &mut Evaluator, sym: &str, kind: AutoVarKind) {
        let slot = Rc::downgrade(&self.current);
        let v = Rc::new(AutoVar::new(kind, sym, slot.clone()));
        let sym_d = format!("{}D", sym);
        let sym_f = format!("{}F", sym);
        let d = AutoVar::new(AutoVarKind::SuffixD(v.clone()), &sym_d, slot.clone());
        let f = AutoVar::new(AutoVarKind::SuffixF(v.clone()), &sym_f, slot);
        ev.set_global_var(sym, Var::Automatic((*v).clone()));
        ev.set_global_var(&sym_d, Var::Automatic(d));
        ev.set_global_var(&sym_f, Var::Automatic(f));
    }

    /// The rule whose recipe is being evaluated, if any.
    pub fn current_dep_node(&self) -> Option<Rc<DepNode>> {
        self.current.borrow().clone()
    }

    /// Produces the command lines of `n`'s recipe, in order. Commands that
    /// built-ins deferred while expanding come first.
    pub fn eval(&self, ev: &mut Evaluator, n: &Rc<DepNode>) -> Result<Vec<Command>, EvalError> {
        let mut scope = CommandScope::enter(ev, &self.current, n);

        let mut result = match self.eval_templates(&mut scope, n) {
            Ok(result) => result,
            Err(e) => {
                scope.clear_delayed_output_commands();
                return Err(e);
            }
        };

        if !scope.delayed_output_commands().is_empty() {
            let mut output_commands: Vec<Command> = scope
                .delayed_output_commands()
                .iter()
                .map(|cmd| Command {
                    target: n.output.clone(),
                    cmd: cmd.clone(),
                    echo: false,
                    ignore_error: false,
                })
                .collect();
            output_commands.append(&mut result);
            result = output_commands;
            scope.clear_delayed_output_commands();
        }

        tracing::debug!(output = %n.output, commands = result.len(), "evaluated recipe");
        Ok(result)
    }

    /// Template-wide prefixes come from the literal text at the head of each
    /// recipe line, so a leading `@` inside the value of `$(X)` only
    /// silences the first line `$(X)` expands to.
    fn eval_templates(&self, ev: &mut Evaluator, n: &DepNode) -> Result<Vec<Command>, EvalError> {
        let mut result = Vec::new();
        for expr in &n.cmds {
            ev.set_loc(expr.loc.clone());

            // Prefixes written at the head of a recipe line apply to every
            // line it expands to.
            let mut echo = !self.silent_mode;
            let mut ignore_error = false;
            let lead = expr.value.literal_lead();
            let mut rest = lead;
            parse_command_prefixes(&mut rest, &mut echo, &mut ignore_error);
            let consumed = lead.len() - rest.len();

            let buf = expr.eval(ev)?;
            let cmds = buf.get(consumed..).unwrap_or("");
            if trim_left_space(cmds).is_empty() {
                continue;
            }

            for line in CommandLines::new(cmds, echo, ignore_error) {
                tracing::trace!(output = %n.output, lf_cnt = line.lf_cnt, "{}", line.text);
                result.push(Command {
                    target: n.output.clone(),
                    cmd: line.text.to_string(),
                    echo: line.echo,
                    ignore_error: line.ignore_error,
                });
            }
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prefixes(s: &str) -> (bool, bool, &str) {
        let mut s = s;
        let (mut echo, mut ignore_error) = (true, false);
        parse_command_prefixes(&mut s, &mut echo, &mut ignore_error);
        (echo, ignore_error, s)
    }

    #[test]
    fn prefix_parsing() {
        assert_eq!(prefixes("@-+  echo hi"), (false, true, "echo hi"));
        assert_eq!(prefixes("  -@echo hi"), (false, true, "echo hi"));
        assert_eq!(prefixes("+echo hi"), (true, false, "echo hi"));
        assert_eq!(prefixes("echo -n @"), (true, false, "echo -n @"));
        assert_eq!(prefixes(" @ "), (false, false, ""));
    }

    #[test]
    fn splits_lines_with_their_own_prefixes() {
        let lines: Vec<_> = CommandLines::new("@echo a\n-echo b\necho c", true, false).collect();
        assert_eq!(lines.len(), 3);
        assert_eq!((lines[0].text, lines[0].echo, lines[0].ignore_error), ("echo a", false, false));
        assert_eq!((lines[1].text, lines[1].echo, lines[1].ignore_error), ("echo b", true, true));
        assert_eq!((lines[2].text, lines[2].echo, lines[2].ignore_error), ("echo c", true, false));
    }

    #[test]
    fn continuation_stays_in_one_line() {
        let lines: Vec<_> = CommandLines::new("echo a \\\n  b\n\n  \n@\necho c\n", true, false).collect();
        let texts: Vec<&str> = lines.iter().map(|l| l.text).collect();
        assert_eq!(texts, vec!["echo a \\\n  b", "echo c"]);
        assert_eq!(lines[0].lf_cnt, 2);
    }

    #[test]
    fn line_flags_replace_template_defaults() {
        let lines: Vec<_> = CommandLines::new("echo a\n@echo b", false, true).collect();
        assert!(!lines[0].echo && lines[0].ignore_error);
        assert!(!lines[1].echo && lines[1].ignore_error);
    }
}
