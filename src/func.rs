//! Built-in make functions.

use std::fmt;
use std::fs::OpenOptions;
use std::io::Write;

use crate::eval::{EvalError, Evaluator};
use crate::strutil::{dirname, echo_escape, trim_space, words, Pattern, WordWriter};
use crate::value::Value;
use crate::var::LazyVar;

pub type FuncImpl = fn(&[Value], &mut Evaluator, &mut String) -> Result<(), EvalError>;

pub struct FuncInfo {
    pub name: &'static str,
    pub func: FuncImpl,
    pub min_args: usize,
    /// The last argument swallows any further commas.
    pub max_args: usize,
}

impl fmt::Debug for FuncInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FuncInfo({})", self.name)
    }
}

impl PartialEq for FuncInfo {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

static FUNCS: &[FuncInfo] = &[
    FuncInfo { name: "info", func: info_func, min_args: 0, max_args: 1 },
    FuncInfo { name: "warning", func: warning_func, min_args: 0, max_args: 1 },
    FuncInfo { name: "error", func: error_func, min_args: 0, max_args: 1 },
    FuncInfo { name: "dir", func: dir_func, min_args: 1, max_args: 1 },
    FuncInfo { name: "notdir", func: notdir_func, min_args: 1, max_args: 1 },
    FuncInfo { name: "subst", func: subst_func, min_args: 3, max_args: 3 },
    FuncInfo { name: "patsubst", func: patsubst_func, min_args: 3, max_args: 3 },
    FuncInfo { name: "strip", func: strip_func, min_args: 1, max_args: 1 },
    FuncInfo { name: "value", func: value_func, min_args: 1, max_args: 1 },
    FuncInfo { name: "origin", func: origin_func, min_args: 1, max_args: 1 },
    FuncInfo { name: "flavor", func: flavor_func, min_args: 1, max_args: 1 },
    FuncInfo { name: "file", func: file_func, min_args: 1, max_args: 2 },
];

pub fn lookup(name: &str) -> Option<&'static FuncInfo> {
    FUNCS.iter().find(|f| f.name == name)
}

fn arg(args: &[Value], i: usize, ev: &mut Evaluator) -> Result<String, EvalError> {
    match args.get(i) {
        Some(v) => v.eval_to_string(ev),
        None => Ok(String::new()),
    }
}

fn info_func(args: &[Value], ev: &mut Evaluator, _: &mut String) -> Result<(), EvalError> {
    let a = arg(args, 0, ev)?;
    if ev.avoid_io() {
        ev.add_delayed_output_command(format!("echo -e \"{}\"", echo_escape(&a)));
        return Ok(());
    }
    println!("{}", a);
    Ok(())
}

fn warning_func(args: &[Value], ev: &mut Evaluator, _: &mut String) -> Result<(), EvalError> {
    let a = arg(args, 0, ev)?;
    if ev.avoid_io() {
        ev.add_delayed_output_command(format!(
            "echo -e \"{}: {}\" 2>&1",
            ev.loc(),
            echo_escape(&a)
        ));
        return Ok(());
    }
    tracing::warn!("{}: {}", ev.loc(), a);
    eprintln!("{}: {}", ev.loc(), a);
    Ok(())
}

fn error_func(args: &[Value], ev: &mut Evaluator, _: &mut String) -> Result<(), EvalError> {
    let a = arg(args, 0, ev)?;
    if ev.avoid_io() {
        ev.add_delayed_output_command(format!(
            "echo -e \"{}: *** {}.\" 2>&1 && false",
            ev.loc(),
            echo_escape(&a)
        ));
        return Ok(());
    }
    ev.error(format!("{}.", a))
}

fn dir_func(args: &[Value], ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError> {
    let text = arg(args, 0, ev)?;
    let mut needs_space = false;
    for tok in words(&text) {
        if needs_space {
            out.push(' ');
        }
        needs_space = true;
        // Unlike `$(@D)`, `$(dir)` keeps the trailing slash.
        out.push_str(dirname(tok));
        out.push('/');
    }
    Ok(())
}

fn notdir_func(args: &[Value], ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError> {
    let text = arg(args, 0, ev)?;
    let mut ww = WordWriter::new(out);
    for tok in words(&text) {
        match tok.rfind('/') {
            Some(i) => ww.write(&tok[i + 1..]),
            None => ww.write(tok),
        }
    }
    Ok(())
}

fn subst_func(args: &[Value], ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError> {
    let pat = arg(args, 0, ev)?;
    let repl = arg(args, 1, ev)?;
    let text = arg(args, 2, ev)?;
    if pat.is_empty() {
        out.push_str(&text);
        out.push_str(&repl);
    } else {
        out.push_str(&text.replace(&pat, &repl));
    }
    Ok(())
}

fn patsubst_func(args: &[Value], ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError> {
    let pat = Pattern::new(&arg(args, 0, ev)?);
    let repl = arg(args, 1, ev)?;
    let text = arg(args, 2, ev)?;
    let mut needs_space = false;
    for tok in words(&text) {
        if needs_space {
            out.push(' ');
        }
        needs_space = true;
        pat.append_subst(tok, &repl, out);
    }
    Ok(())
}

fn strip_func(args: &[Value], ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError> {
    let text = arg(args, 0, ev)?;
    let mut ww = WordWriter::new(out);
    for tok in words(&text) {
        ww.write(tok);
    }
    Ok(())
}

fn value_func(args: &[Value], ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError> {
    let name = arg(args, 0, ev)?;
    if let Some(var) = ev.lookup_var(&name) {
        out.push_str(&var.string(ev)?);
    }
    Ok(())
}

fn origin_func(args: &[Value], ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError> {
    let name = arg(args, 0, ev)?;
    match ev.lookup_var(&name) {
        Some(var) => out.push_str(var.origin().as_str()),
        None => out.push_str("undefined"),
    }
    Ok(())
}

fn flavor_func(args: &[Value], ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError> {
    let name = arg(args, 0, ev)?;
    match ev.lookup_var(&name) {
        Some(var) => out.push_str(var.flavor()),
        None => out.push_str("undefined"),
    }
    Ok(())
}

fn file_func(args: &[Value], ev: &mut Evaluator, _: &mut String) -> Result<(), EvalError> {
    let spec = arg(args, 0, ev)?;
    let spec = trim_space(&spec);
    let (append, filename) = if let Some(f) = spec.strip_prefix(">>") {
        (true, trim_space(f))
    } else if let Some(f) = spec.strip_prefix('>') {
        (false, trim_space(f))
    } else if spec.starts_with('<') {
        return ev.error("Unimplemented file read");
    } else {
        return ev.error(format!("Invalid file operation: {}", spec));
    };
    if filename.is_empty() {
        return ev.error("Missing filename");
    }

    let mut text = arg(args, 1, ev)?;
    if args.len() > 1 && !text.ends_with('\n') {
        text.push('\n');
    }

    if ev.avoid_io() {
        let redirect = if append { ">>" } else { ">" };
        let cmd = format!(
            "echo -e \"{}\" {} {}",
            echo_escape(text.strip_suffix('\n').unwrap_or(&text)),
            redirect,
            filename
        );
        ev.add_delayed_output_command(cmd);
        return Ok(());
    }

    let written = OpenOptions::new()
        .create(true)
        .write(true)
        .append(append)
        .truncate(!append)
        .open(filename)
        .and_then(|mut f| f.write_all(text.as_bytes()));
    if let Err(e) = written {
        return ev.error(format!("{}: {}", filename, e));
    }
    Ok(())
}
