use clap::Parser;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;

use crate::command::is_automatic_var_name;
use crate::eval::{EvalError, Evaluator};
use crate::flags::{Backend, Flags};
use crate::graph::{Graph, Rule};
use crate::loc::Loc;
use crate::strutil::{trim_space, words};
use crate::value::{Expr, ValueError};
use crate::var::{LazyVar, Var, VarOrigin};

#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Args {
    /// Makefile to read
    #[arg(short, long)]
    pub file: Option<PathBuf>,

    /// Change to this directory before reading the Makefile
    #[arg(short = 'C', long)]
    pub directory: Option<PathBuf>,

    /// Don't echo commands
    #[arg(short, long)]
    pub silent: bool,

    /// Report evaluation errors and carry on instead of stopping
    #[arg(short, long)]
    pub keep_going: bool,

    /// Write a ninja build file instead of running commands
    #[arg(long)]
    pub ninja: bool,

    /// Where --ninja writes the build file
    #[arg(short = 'o', long, default_value = "build.ninja")]
    pub ninja_file: PathBuf,

    /// Targets to build; NAME=value entries set variables
    pub targets: Vec<String>,
}

impl Args {
    pub fn into_flags(self) -> Flags {
        let (cl_vars, targets): (Vec<String>, Vec<String>) =
            self.targets.into_iter().partition(|t| t.contains('='));
        Flags {
            backend: if self.ninja { Backend::Ninja } else { Backend::Exec },
            silent_mode: self.silent,
            fatal_errors: !self.keep_going,
            makefile: self.file,
            working_dir: self.directory,
            ninja_file: self.ninja_file,
            targets,
            cl_vars,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("{loc}: *** {message}.  Stop.")]
    Syntax { loc: Loc, message: String },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl ParseError {
    fn syntax(loc: &Loc, message: impl Into<String>) -> Self {
        ParseError::Syntax {
            loc: loc.clone(),
            message: message.into(),
        }
    }

    fn value(loc: &Loc, err: ValueError) -> Self {
        Self::syntax(loc, err.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AssignOp {
    Recursive,
    Simple,
    Append,
    Cond,
}

enum Statement<'a> {
    Assign {
        name: &'a str,
        op: AssignOp,
        rhs: &'a str,
    },
    Rule {
        lhs: &'a str,
        rhs: &'a str,
    },
}

/// Finds the first `:` or `=` that isn't inside a variable reference.
fn find_separator(line: &str) -> Option<usize> {
    let b = line.as_bytes();
    let mut depth = 0usize;
    for (i, &c) in b.iter().enumerate() {
        match c {
            b'(' | b'{' if i > 0 && b[i - 1] == b'$' => depth += 1,
            b'(' | b'{' if depth > 0 => depth += 1,
            b')' | b'}' if depth > 0 => depth -= 1,
            b':' | b'=' if depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn classify(line: &str) -> Option<Statement<'_>> {
    let p = find_separator(line)?;
    let b = line.as_bytes();
    if b[p] == b'=' {
        let (name, op) = match p.checked_sub(1).map(|q| b[q]) {
            Some(b'+') => (&line[..p - 1], AssignOp::Append),
            Some(b'?') => (&line[..p - 1], AssignOp::Cond),
            _ => (&line[..p], AssignOp::Recursive),
        };
        return Some(Statement::Assign {
            name: name.trim(),
            op,
            rhs: line[p + 1..].trim_start(),
        });
    }
    if line[p..].starts_with(":=") {
        return Some(Statement::Assign {
            name: line[..p].trim(),
            op: AssignOp::Simple,
            rhs: line[p + 2..].trim_start(),
        });
    }
    if line[p..].starts_with("::=") {
        return Some(Statement::Assign {
            name: line[..p].trim(),
            op: AssignOp::Simple,
            rhs: line[p + 3..].trim_start(),
        });
    }
    // Double-colon rules are read as ordinary ones.
    let rhs = line[p + 1..].strip_prefix(':').unwrap_or(&line[p + 1..]);
    Some(Statement::Rule {
        lhs: &line[..p],
        rhs,
    })
}

/// Strips a trailing comment, honouring `\#`.
fn strip_comment(line: &str) -> String {
    let mut out = String::with_capacity(line.len());
    let mut chars = line.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' if chars.peek() == Some(&'#') => {
                out.push('#');
                chars.next();
            }
            '#' => break,
            c => out.push(c),
        }
    }
    out
}

fn ends_with_continuation(s: &str) -> bool {
    s.bytes().rev().take_while(|&c| c == b'\\').count() % 2 == 1
}

fn find_outside_parens(s: &str, target: u8) -> Option<usize> {
    let b = s.as_bytes();
    let mut depth = 0usize;
    for (i, &c) in b.iter().enumerate() {
        match c {
            b'(' | b'{' => depth += 1,
            b')' | b'}' if depth > 0 => depth -= 1,
            c if c == target && depth == 0 => return Some(i),
            _ => {}
        }
    }
    None
}

fn check_assignable(ev: &Evaluator, name: &str, loc: &Loc) -> Result<(), ParseError> {
    let bound = ev.lookup_var(name).is_some_and(|v| v.is_func(ev));
    if bound || is_automatic_var_name(name) {
        return Err(ParseError::syntax(
            loc,
            format!("cannot assign to automatic variable `{}'", name),
        ));
    }
    Ok(())
}

/// Builds the variable an assignment creates, given what it replaces.
fn assigned_var(
    ev: &mut Evaluator,
    old: Option<Rc<Var>>,
    op: AssignOp,
    rhs: &str,
    loc: &Loc,
    origin: VarOrigin,
) -> Result<Option<Var>, ParseError> {
    let expr = Expr::parse(rhs, loc.clone()).map_err(|e| ParseError::value(loc, e))?;
    let var = match (op, old) {
        (AssignOp::Cond, Some(_)) => return Ok(None),
        (AssignOp::Append, Some(old)) => old.append(ev, rhs, &expr)?,
        (AssignOp::Simple, _) => Var::simple(expr.eval(ev)?, origin),
        (AssignOp::Recursive | AssignOp::Cond | AssignOp::Append, _) => {
            Var::recursive(rhs, expr, origin)
        }
    };
    Ok(Some(var))
}

/// Seeds `ev` the way `make` does before reading any Makefile: the
/// environment, built-in defaults, then command line assignments.
pub fn bootstrap(ev: &mut Evaluator, flags: &Flags) -> Result<(), ParseError> {
    ev.set_loc(Loc::new("*bootstrap*", 0));
    for (name, value) in std::env::vars() {
        if name != "SHELL" && !name.is_empty() {
            ev.define(&name, &value, VarOrigin::Environment);
        }
    }
    for (name, value) in [("CC", "cc"), ("CXX", "g++"), ("AR", "ar"), ("MAKE_VERSION", "4.2.1")] {
        if ev.lookup_global(name).is_none() {
            ev.define(name, value, VarOrigin::Default);
        }
    }
    ev.set_global_var("SHELL", Var::simple("/bin/sh", VarOrigin::File));
    let cwd = std::env::current_dir()?;
    ev.set_global_var("CURDIR", Var::simple(cwd.to_string_lossy(), VarOrigin::File));
    ev.set_global_var("MAKECMDGOALS", Var::simple(flags.targets.join(" "), VarOrigin::File));

    ev.set_loc(Loc::new("*command line*", 0));
    for cl in &flags.cl_vars {
        if let Some((name, value)) = cl.split_once('=') {
            let (name, op) = match name.strip_suffix(':') {
                Some(n) => (n, AssignOp::Simple),
                None => (name, AssignOp::Recursive),
            };
            let loc = ev.loc().clone();
            if let Some(var) = assigned_var(ev, None, op, value, &loc, VarOrigin::CommandLine)? {
                ev.set_global_var(name.trim(), var);
            }
        }
    }
    Ok(())
}

impl Graph {
    pub fn parse_makefile(&mut self, ev: &mut Evaluator, path: &Path) -> Result<(), ParseError> {
        let text = fs::read_to_string(path)?;
        self.parse_str(ev, &text, &path.to_string_lossy())
    }

    pub fn parse_str(&mut self, ev: &mut Evaluator, text: &str, filename: &str) -> Result<(), ParseError> {
        let lines: Vec<&str> = text.lines().collect();
        let mut current: Option<Rule> = None;

        let mut i = 0;
        while i < lines.len() {
            let loc = Loc::new(filename, i + 1);
            let line = lines[i];

            if let Some(cmd) = line.strip_prefix('\t') {
                if let Some(rule) = current.as_mut() {
                    let mut cmd = cmd.to_string();
                    while ends_with_continuation(&cmd) && i + 1 < lines.len() {
                        i += 1;
                        cmd.push('\n');
                        cmd.push_str(lines[i].strip_prefix('\t').unwrap_or(lines[i]));
                    }
                    let expr = Expr::parse(&cmd, loc.clone()).map_err(|e| ParseError::value(&loc, e))?;
                    rule.cmds.push(Rc::new(expr));
                    i += 1;
                    continue;
                }
                let t = line.trim();
                if !t.is_empty() && !t.starts_with('#') {
                    return Err(ParseError::syntax(&loc, "recipe commences before first target"));
                }
                i += 1;
                continue;
            }

            let mut logical = line.to_string();
            while ends_with_continuation(&logical) && i + 1 < lines.len() {
                logical.pop();
                i += 1;
                logical.push(' ');
                logical.push_str(lines[i].trim_start());
            }
            i += 1;

            let logical = strip_comment(&logical);
            let stmt = logical.trim();
            if stmt.is_empty() {
                continue;
            }

            if let Some(rule) = current.take() {
                self.add_rule(rule);
            }
            ev.set_loc(loc.clone());

            if stmt == "define" || stmt.starts_with("define ") || stmt.starts_with("define\t") {
                i = self.parse_define(ev, &lines, i, stmt["define".len()..].trim(), &loc)?;
                continue;
            }

            match classify(stmt) {
                Some(Statement::Assign { name, op, rhs }) => {
                    let name = ev.expand(name)?;
                    let name = trim_space(&name);
                    check_assignable(ev, name, &loc)?;
                    let old = ev.lookup_global(name);
                    if old.as_ref().map(|v| v.origin()) == Some(VarOrigin::CommandLine) {
                        continue;
                    }
                    if let Some(var) = assigned_var(ev, old, op, rhs, &loc, VarOrigin::File)? {
                        ev.set_global_var(name, var);
                    }
                }
                Some(Statement::Rule { lhs, rhs }) => {
                    current = self.parse_rule(ev, lhs, rhs, &loc)?;
                }
                None => return Err(ParseError::syntax(&loc, "missing separator")),
            }
        }

        if let Some(rule) = current.take() {
            self.add_rule(rule);
        }
        Ok(())
    }

    /// Reads the body of a `define` up to its `endef`. Returns the index of
    /// the line after `endef`.
    fn parse_define(
        &mut self,
        ev: &mut Evaluator,
        lines: &[&str],
        mut i: usize,
        header: &str,
        loc: &Loc,
    ) -> Result<usize, ParseError> {
        let (name, op) = match header.split_once(char::is_whitespace) {
            Some((name, "=")) => (name, AssignOp::Recursive),
            Some((name, ":=")) | Some((name, "::=")) => (name, AssignOp::Simple),
            Some((name, "+=")) => (name, AssignOp::Append),
            Some((name, "?=")) => (name, AssignOp::Cond),
            _ => (header, AssignOp::Recursive),
        };
        if name.is_empty() {
            return Err(ParseError::syntax(loc, "empty variable name"));
        }
        check_assignable(ev, name, loc)?;

        let mut body: Vec<&str> = Vec::new();
        loop {
            let Some(line) = lines.get(i) else {
                return Err(ParseError::syntax(loc, "missing `endef', unterminated `define'"));
            };
            i += 1;
            if line.trim() == "endef" {
                break;
            }
            body.push(line);
        }

        let text = body.join("\n");
        let old = ev.lookup_global(name);
        if let Some(var) = assigned_var(ev, old, op, &text, loc, VarOrigin::File)? {
            ev.set_global_var(name, var);
        }
        Ok(i)
    }

    fn parse_rule(
        &mut self,
        ev: &mut Evaluator,
        lhs: &str,
        rhs: &str,
        loc: &Loc,
    ) -> Result<Option<Rule>, ParseError> {
        let (rhs, inline_cmd) = match find_outside_parens(rhs, b';') {
            Some(p) => (&rhs[..p], Some(&rhs[p + 1..])),
            None => (rhs, None),
        };

        let targets = ev.expand(lhs)?;
        let outputs: Vec<String> = words(&targets).map(str::to_string).collect();
        if outputs.is_empty() {
            return Err(ParseError::syntax(loc, "missing target"));
        }

        if inline_cmd.is_none() {
            if let Some(Statement::Assign { name, op, rhs }) = classify(rhs) {
                check_assignable(ev, name, loc)?;
                for output in &outputs {
                    let old = match op {
                        AssignOp::Append | AssignOp::Cond => self
                            .rule_var(output, name)
                            .or_else(|| ev.lookup_global(name)),
                        _ => None,
                    };
                    // Appending to a global is resolved now, so the
                    // target-specific copy never refers to itself.
                    let old = match (op, old) {
                        (AssignOp::Append, Some(v)) if v.is_recursive() => {
                            let mut value = String::new();
                            v.eval(ev, &mut value)?;
                            Some(Rc::new(Var::simple(value, v.origin())))
                        }
                        (_, old) => old,
                    };
                    if let Some(var) = assigned_var(ev, old, op, rhs, loc, VarOrigin::File)? {
                        self.add_rule_var(output, name, var);
                    }
                }
                return Ok(None);
            }
        }

        let deps = ev.expand(rhs)?;
        let (inputs, order_onlys) = match deps.split_once('|') {
            Some((inputs, order_onlys)) => (inputs, order_onlys),
            None => (deps.as_str(), ""),
        };

        let mut rule = Rule {
            outputs,
            inputs: words(inputs).map(str::to_string).collect(),
            order_onlys: words(order_onlys).map(str::to_string).collect(),
            cmds: Vec::new(),
            loc: loc.clone(),
        };
        if let Some(cmd) = inline_cmd {
            let expr = Expr::parse(cmd, loc.clone()).map_err(|e| ParseError::value(loc, e))?;
            rule.cmds.push(Rc::new(expr));
        }
        Ok(Some(rule))
    }

    pub fn debug_print(&self) {
        tracing::debug!("Graph Debug:");
        tracing::debug!(
            "Default target: {}",
            self.default_target.as_deref().unwrap_or("<none>")
        );
    }
}
