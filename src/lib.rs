//! Recipe command generation for a Makefile-compatible build evaluator.
//!
//! A [`Graph`] read from a Makefile is resolved into [`DepNode`]s; the
//! [`CommandEvaluator`] turns each node's recipe into [`Command`] lines with
//! automatic variables such as `$@` and `$^` expanded, which a backend then
//! runs directly or writes out as a ninja build file.

pub mod command;
pub mod eval;
pub mod exec;
pub mod fileutil;
pub mod flags;
pub mod func;
pub mod graph;
pub mod loc;
pub mod ninja;
pub mod parser;
pub mod strutil;
pub mod value;
pub mod var;

pub use command::{Command, CommandEvaluator};
pub use eval::{EvalError, Evaluator};
pub use flags::{Backend, Flags};
pub use graph::node::DepNode;
pub use graph::Graph;
