//! Runs recipes directly, rebuilding whatever is out of date.

use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use crate::command::{Command, CommandEvaluator};
use crate::eval::{EvalError, Evaluator};
use crate::fileutil::{exists, get_timestamp};
use crate::graph::node::{DepNode, NodeStatus};
use crate::graph::topo_sort;

#[derive(Debug, thiserror::Error)]
pub enum ExecError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("*** [{target}] Error {code}")]
    CommandFailed {
        target: String,
        cmd: String,
        code: i32,
    },
    #[error(transparent)]
    Eval(#[from] EvalError),
}

pub struct Executor<'a> {
    ev: &'a mut Evaluator,
    ce: &'a CommandEvaluator,
    shell: String,
    status: HashMap<String, NodeStatus>,
}

impl<'a> Executor<'a> {
    pub fn new(ev: &'a mut Evaluator, ce: &'a CommandEvaluator) -> Result<Self, ExecError> {
        let mut shell = ev.expand("$(SHELL)")?;
        if shell.trim().is_empty() {
            shell = "/bin/sh".to_string();
        }
        Ok(Self {
            ev,
            ce,
            shell,
            status: HashMap::new(),
        })
    }

    pub fn status(&self, target: &str) -> Option<&NodeStatus> {
        self.status.get(target)
    }

    /// Brings `roots` up to date. Returns whether any command ran.
    pub async fn exec(&mut self, roots: &[Rc<DepNode>]) -> Result<bool, ExecError> {
        let mut ran_any = false;
        for n in topo_sort(roots) {
            self.status.insert(n.output.clone(), NodeStatus::Building);
            let rebuild = self.needs_rebuild(&n);
            if rebuild && n.has_rule() {
                if let Err(e) = self.run(&n).await {
                    self.status
                        .insert(n.output.clone(), NodeStatus::Failed(e.to_string()));
                    return Err(e);
                }
                ran_any = true;
            }
            self.status
                .insert(n.output.clone(), NodeStatus::Complete { rebuilt: rebuild });
        }

        if !ran_any {
            for n in roots {
                if n.has_rule() {
                    println!("make: `{}' is up to date.", n.output);
                } else {
                    println!("make: Nothing to be done for `{}'.", n.output);
                }
            }
        }
        Ok(ran_any)
    }

    fn needs_rebuild(&self, n: &DepNode) -> bool {
        if n.is_phony || !exists(&n.output) {
            return true;
        }
        let dep_rebuilt = n.deps.iter().any(|d| {
            n.actual_inputs.contains(&d.output)
                && matches!(
                    self.status.get(&d.output),
                    Some(NodeStatus::Complete { rebuilt: true })
                )
        });
        if dep_rebuilt {
            return true;
        }
        let target_age = get_timestamp(&n.output);
        n.actual_inputs
            .iter()
            .any(|i| get_timestamp(i) > target_age)
    }

    async fn run(&mut self, n: &Rc<DepNode>) -> Result<(), ExecError> {
        let cmds = self.ce.eval(self.ev, n)?;
        tracing::debug!(output = %n.output, commands = cmds.len(), "running recipe");
        for cmd in &cmds {
            self.run_command(cmd).await?;
        }
        Ok(())
    }

    async fn run_command(&self, cmd: &Command) -> Result<(), ExecError> {
        if cmd.echo {
            println!("{}", cmd.cmd);
        }
        let status = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(&cmd.cmd)
            .status()
            .await?;
        if status.success() {
            return Ok(());
        }

        let code = status.code().unwrap_or(-1);
        if cmd.ignore_error {
            eprintln!("make: [{}] Error {} (ignored)", cmd.target, code);
            return Ok(());
        }
        Err(ExecError::CommandFailed {
            target: cmd.target.clone(),
            cmd: cmd.cmd.clone(),
            code,
        })
    }
}
