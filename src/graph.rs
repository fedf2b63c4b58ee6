use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use crate::fileutil;
use crate::loc::Loc;
use crate::strutil::Pattern;
use crate::value::Expr;
use crate::var::{Var, Vars};

use self::node::DepNode;

pub mod node;

#[derive(Debug, thiserror::Error)]
pub enum GraphError {
    #[error("Circular dependency detected: {}", .cycle.join(" <- "))]
    CircularDependency { cycle: Vec<String> },
    #[error("No rule to make target `{target}'{}", needed_by_suffix(.needed_by))]
    NoRule {
        target: String,
        needed_by: Option<String>,
    },
}

fn needed_by_suffix(needed_by: &Option<String>) -> String {
    match needed_by {
        Some(n) => format!(", needed by `{}'", n),
        None => String::new(),
    }
}

/// A parsed rule, before any target is resolved against it.
#[derive(Debug, Clone, Default)]
pub struct Rule {
    pub outputs: Vec<String>,
    pub inputs: Vec<String>,
    pub order_onlys: Vec<String>,
    pub cmds: Vec<Rc<Expr>>,
    pub loc: Loc,
}

impl Rule {
    pub fn is_pattern(&self) -> bool {
        self.outputs.iter().any(|o| o.contains('%'))
    }
}

/// Everything the explicit rules of one target say about it.
#[derive(Debug, Clone, Default)]
struct ExplicitRule {
    inputs: Vec<String>,
    order_onlys: Vec<String>,
    cmds: Vec<Rc<Expr>>,
    loc: Loc,
}

#[derive(Debug, Default)]
pub struct Graph {
    rules: HashMap<String, ExplicitRule>,
    pattern_rules: Vec<Rc<Rule>>,
    rule_vars: HashMap<String, Vars>,
    phony: HashSet<String>,
    pub default_target: Option<String>,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&mut self, rule: Rule) {
        if rule.is_pattern() {
            self.pattern_rules.push(Rc::new(rule));
            return;
        }

        for output in &rule.outputs {
            if output == ".PHONY" {
                self.phony.extend(rule.inputs.iter().cloned());
                continue;
            }
            if self.default_target.is_none() && !output.starts_with('.') {
                self.default_target = Some(output.clone());
            }

            match self.rules.entry(output.clone()) {
                Entry::Vacant(e) => {
                    e.insert(ExplicitRule {
                        inputs: rule.inputs.clone(),
                        order_onlys: rule.order_onlys.clone(),
                        cmds: rule.cmds.clone(),
                        loc: rule.loc.clone(),
                    });
                }
                Entry::Occupied(mut e) => {
                    let r = e.get_mut();
                    r.inputs.extend(rule.inputs.iter().cloned());
                    r.order_onlys.extend(rule.order_onlys.iter().cloned());
                    if !rule.cmds.is_empty() {
                        if !r.cmds.is_empty() {
                            tracing::warn!(
                                "{}: overriding recipe for target `{}' (previous at {})",
                                rule.loc,
                                output,
                                r.loc
                            );
                        }
                        r.cmds = rule.cmds.clone();
                        r.loc = rule.loc.clone();
                    }
                }
            }
        }
    }

    pub fn add_rule_var(&mut self, target: &str, name: &str, var: Var) {
        self.rule_vars
            .entry(target.to_string())
            .or_default()
            .assign(name, var);
    }

    pub fn rule_var(&self, target: &str, name: &str) -> Option<Rc<Var>> {
        self.rule_vars.get(target).and_then(|vars| vars.lookup(name))
    }

    pub fn is_phony(&self, target: &str) -> bool {
        self.phony.contains(target)
    }

    fn can_make(&self, target: &str) -> bool {
        self.rules.contains_key(target) || self.phony.contains(target) || fileutil::exists(target)
    }

    /// Resolves `targets` and everything they depend on into nodes.
    pub fn make_dep(&self, targets: &[String]) -> Result<Vec<Rc<DepNode>>, GraphError> {
        let mut builder = DepBuilder {
            graph: self,
            done: HashMap::new(),
            active: Vec::new(),
        };
        targets
            .iter()
            .map(|t| builder.build(t, None))
            .collect()
    }
}

struct DepBuilder<'a> {
    graph: &'a Graph,
    done: HashMap<String, Rc<DepNode>>,
    active: Vec<String>,
}

impl<'a> DepBuilder<'a> {
    fn build(&mut self, output: &str, needed_by: Option<&str>) -> Result<Rc<DepNode>, GraphError> {
        if let Some(n) = self.done.get(output) {
            return Ok(n.clone());
        }
        if let Some(pos) = self.active.iter().position(|t| t == output) {
            let mut cycle = self.active[pos..].to_vec();
            cycle.push(output.to_string());
            return Err(GraphError::CircularDependency { cycle });
        }

        let mut n = DepNode::new(output);
        n.is_phony = self.graph.is_phony(output);
        let explicit = self.graph.rules.get(output);

        let pattern = match explicit {
            Some(r) if !r.cmds.is_empty() => None,
            _ => self.pick_pattern_rule(output),
        };

        match (explicit, pattern) {
            (explicit, Some((rule, pat, inputs))) => {
                n.actual_inputs = inputs;
                n.order_onlys = rule.order_onlys.clone();
                n.cmds = rule.cmds.clone();
                n.loc = rule.loc.clone();
                n.output_pattern = Some(pat);
                if let Some(r) = explicit {
                    n.actual_inputs.extend(r.inputs.iter().cloned());
                    n.order_onlys.extend(r.order_onlys.iter().cloned());
                }
            }
            (Some(r), None) => {
                n.actual_inputs = r.inputs.clone();
                n.order_onlys = r.order_onlys.clone();
                n.cmds = r.cmds.clone();
                n.loc = r.loc.clone();
            }
            (None, None) => {
                if !n.is_phony && !fileutil::exists(output) {
                    return Err(GraphError::NoRule {
                        target: output.to_string(),
                        needed_by: needed_by.map(str::to_string),
                    });
                }
            }
        }
        n.rule_vars = self.graph.rule_vars.get(output).cloned().map(Rc::new);

        self.active.push(output.to_string());
        let mut seen = HashSet::new();
        let children: Vec<String> = n
            .actual_inputs
            .iter()
            .chain(n.order_onlys.iter())
            .filter(|i| seen.insert(i.as_str()))
            .cloned()
            .collect();
        for input in children {
            let child = self.build(&input, Some(output))?;
            n.deps.push(child);
        }
        self.active.pop();

        tracing::trace!(output, inputs = n.actual_inputs.len(), "resolved node");
        let n = Rc::new(n);
        self.done.insert(output.to_string(), n.clone());
        Ok(n)
    }

    /// The first pattern rule matching `output` whose prerequisites are all
    /// makeable, with the stem substituted into them.
    fn pick_pattern_rule(&self, output: &str) -> Option<(Rc<Rule>, String, Vec<String>)> {
        for rule in &self.graph.pattern_rules {
            for pat in &rule.outputs {
                let pattern = Pattern::new(pat);
                if !pattern.has_wildcard() || !pattern.matches(output) {
                    continue;
                }
                let stem = pattern.stem(output);
                let inputs: Vec<String> = rule
                    .inputs
                    .iter()
                    .map(|i| i.replacen('%', stem, 1))
                    .collect();
                if inputs.iter().all(|i| self.graph.can_make(i)) {
                    return Some((rule.clone(), pat.clone(), inputs));
                }
            }
        }
        None
    }
}

/// Every node reachable from `roots`, dependencies before dependents.
pub fn topo_sort(roots: &[Rc<DepNode>]) -> Vec<Rc<DepNode>> {
    fn visit(n: &Rc<DepNode>, seen: &mut HashSet<String>, order: &mut Vec<Rc<DepNode>>) {
        if !seen.insert(n.output.clone()) {
            return;
        }
        for d in &n.deps {
            visit(d, seen, order);
        }
        order.push(n.clone());
    }

    let mut seen = HashSet::new();
    let mut order = Vec::new();
    for n in roots {
        visit(n, &mut seen, &mut order);
    }
    order
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(outputs: &[&str], inputs: &[&str], cmd: Option<&str>) -> Rule {
        Rule {
            outputs: outputs.iter().map(|s| s.to_string()).collect(),
            inputs: inputs.iter().map(|s| s.to_string()).collect(),
            cmds: cmd
                .map(|c| vec![Rc::new(Expr::parse(c, Loc::new("Makefile", 1)).unwrap())])
                .unwrap_or_default(),
            ..Default::default()
        }
    }

    #[test]
    fn merges_prerequisites_across_rules() {
        let mut g = Graph::new();
        g.add_rule(rule(&["all"], &["a", "b"], None));
        g.add_rule(rule(&["all"], &["c"], Some("echo $^")));
        g.add_rule(rule(&[".PHONY"], &["all", "a", "b", "c"], None));
        assert_eq!(g.default_target.as_deref(), Some("all"));

        let nodes = g.make_dep(&["all".to_string()]).unwrap();
        assert_eq!(nodes[0].actual_inputs, vec!["a", "b", "c"]);
        assert_eq!(nodes[0].deps.len(), 3);
        assert!(nodes[0].is_phony);
    }

    #[test]
    fn missing_rule_names_the_dependent() {
        let mut g = Graph::new();
        g.add_rule(rule(&["all"], &["does/not/exist.c"], Some("true")));
        let err = g.make_dep(&["all".to_string()]).unwrap_err();
        assert_eq!(
            err.to_string(),
            "No rule to make target `does/not/exist.c', needed by `all'"
        );
    }

    #[test]
    fn detects_cycles() {
        let mut g = Graph::new();
        g.add_rule(rule(&["a"], &["b"], Some("true")));
        g.add_rule(rule(&["b"], &["a"], Some("true")));
        match g.make_dep(&["a".to_string()]) {
            Err(GraphError::CircularDependency { cycle }) => {
                assert_eq!(cycle, vec!["a", "b", "a"]);
            }
            other => panic!("expected a cycle, got {:?}", other.map(|n| n.len())),
        }
    }

    #[test]
    fn pattern_rule_sets_output_pattern() {
        let mut g = Graph::new();
        g.add_rule(rule(&["foo.c"], &[], Some("touch $@")));
        g.add_rule(rule(&["%.o"], &["%.c"], Some("cc -c $<")));
        g.add_rule(rule(&["foo.o"], &["foo.h"], None));
        g.add_rule(rule(&["foo.h"], &[], Some("touch $@")));

        let nodes = g.make_dep(&["foo.o".to_string()]).unwrap();
        let n = &nodes[0];
        assert_eq!(n.output_pattern.as_deref(), Some("%.o"));
        assert_eq!(n.actual_inputs, vec!["foo.c", "foo.h"]);
        assert_eq!(n.cmds.len(), 1);

        let order: Vec<String> = topo_sort(&nodes).iter().map(|n| n.output.clone()).collect();
        assert_eq!(order, vec!["foo.c", "foo.h", "foo.o"]);
    }
}
