use std::rc::Rc;

use crate::loc::Loc;
use crate::value::Expr;
use crate::var::Vars;

#[derive(Debug, Clone, PartialEq)]
pub enum NodeStatus {
    Building,
    Complete { rebuilt: bool },
    Failed(String),
}

/// A resolved target: everything needed to produce its commands.
#[derive(Debug, Clone, Default)]
pub struct DepNode {
    pub output: String,
    /// Prerequisites in the order they were written, duplicates included.
    pub actual_inputs: Vec<String>,
    pub order_onlys: Vec<String>,
    /// Set when a pattern rule produced this node, e.g. `%.o`.
    pub output_pattern: Option<String>,
    /// Target-specific variables.
    pub rule_vars: Option<Rc<Vars>>,
    pub loc: Loc,
    pub cmds: Vec<Rc<Expr>>,
    pub deps: Vec<Rc<DepNode>>,
    pub is_phony: bool,
}

impl DepNode {
    pub fn new(output: impl Into<String>) -> DepNode {
        Self {
            output: output.into(),
            ..Default::default()
        }
    }

    pub fn has_rule(&self) -> bool {
        !self.cmds.is_empty()
    }
}
