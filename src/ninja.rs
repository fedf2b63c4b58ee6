//! Writes a static build description for ninja.

use std::collections::HashSet;
use std::rc::Rc;

use crate::command::{Command, CommandEvaluator};
use crate::eval::{EvalError, Evaluator};
use crate::graph::node::DepNode;
use crate::graph::topo_sort;

fn escape_ninja(s: &str) -> String {
    s.replace('$', "$$")
}

fn escape_build_path(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '$' | ' ' | ':' => {
                out.push('$');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

/// Removes backslash-newline pairs; ninja commands are a single line.
fn join_continuations(cmd: &str) -> String {
    cmd.replace("\\\r\n", "").replace("\\\n", "")
}

/// Joins a recipe into one shell command line.
pub fn translate_commands(cmds: &[Command]) -> String {
    let mut out = String::new();
    for c in cmds {
        let cmd = join_continuations(&c.cmd);
        if !out.is_empty() {
            out.push_str(" && ");
        }
        if c.ignore_error {
            out.push_str(&format!("( {} ) ; true", cmd));
        } else {
            out.push_str(&cmd);
        }
    }
    if out.is_empty() {
        out.push_str("true");
    }
    out
}

fn write_paths<'a>(out: &mut String, paths: impl Iterator<Item = &'a String>) {
    for p in paths {
        out.push(' ');
        out.push_str(&escape_build_path(p));
    }
}

/// Generates the build.ninja text for `roots` and all they depend on.
pub fn generate_ninja(
    roots: &[Rc<DepNode>],
    ev: &mut Evaluator,
    ce: &CommandEvaluator,
) -> Result<String, EvalError> {
    let mut out = String::from("# Generated by makecmd\n\n");
    let mut rule_id = 0;

    for n in topo_sort(roots) {
        let mut seen = HashSet::new();
        let inputs = n.actual_inputs.iter().filter(|i| seen.insert(i.as_str()));

        if !n.has_rule() {
            if n.is_phony {
                out.push_str(&format!("build {}: phony", escape_build_path(&n.output)));
                write_paths(&mut out, inputs);
                out.push('\n');
            }
            continue;
        }

        let cmds = ce.eval(ev, &n)?;
        let rule = format!("rule{}", rule_id);
        rule_id += 1;
        out.push_str(&format!("rule {}\n", rule));
        out.push_str(" description = build $out\n");
        out.push_str(&format!(" command = {}\n", escape_ninja(&translate_commands(&cmds))));

        out.push_str(&format!("build {}: {}", escape_build_path(&n.output), rule));
        write_paths(&mut out, inputs);
        if !n.order_onlys.is_empty() {
            out.push_str(" ||");
            write_paths(&mut out, n.order_onlys.iter());
        }
        out.push_str("\n\n");
    }

    out.push_str("\ndefault");
    write_paths(&mut out, roots.iter().map(|n| &n.output));
    out.push('\n');
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cmd(text: &str, ignore_error: bool) -> Command {
        Command {
            cmd: text.to_string(),
            ignore_error,
            ..Command::new("t")
        }
    }

    #[test]
    fn joins_commands() {
        let cmds = vec![cmd("echo a \\\n b", false), cmd("rm x", true)];
        assert_eq!(translate_commands(&cmds), "echo a  b && ( rm x ) ; true");
        assert_eq!(translate_commands(&[]), "true");
    }

    #[test]
    fn escapes_paths() {
        assert_eq!(escape_build_path("a b:$c"), "a$ b$:$$c");
        assert_eq!(escape_ninja("echo $HOME"), "echo $$HOME");
    }
}
