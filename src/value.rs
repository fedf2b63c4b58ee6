//! Unevaluated make expressions.
//!
//! Text such as `$(CC) -o $@ $(patsubst %.c,%.o,$^)` is parsed once into a
//! [`Value`] tree and expanded any number of times against an
//! [`Evaluator`].

use crate::eval::{EvalError, Evaluator};
use crate::func::{self, FuncInfo};
use crate::loc::Loc;
use crate::strutil::{words, Pattern};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ValueError {
    #[error("unterminated variable reference")]
    Unterminated,
    #[error("insufficient number of arguments ({given}) to function `{name}'")]
    InsufficientArgs { name: &'static str, given: usize },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Literal(String),
    List(Vec<Value>),
    /// `$X`, `$(NAME)` or `${NAME}`; the name itself may contain references.
    VarRef(Box<Value>),
    /// `$(NAME:pat=subst)`
    SubstRef {
        name: Box<Value>,
        pat: Box<Value>,
        subst: Box<Value>,
    },
    Func {
        func: &'static FuncInfo,
        args: Vec<Value>,
    },
}

impl Value {
    pub fn parse(s: &str) -> Result<Value, ValueError> {
        let parser = ValueParser { b: s.as_bytes(), s };
        let (value, _) = parser.parse_seq(0, &|_| false, None)?;
        Ok(value)
    }

    pub fn eval(&self, ev: &mut Evaluator, out: &mut String) -> Result<(), EvalError> {
        match self {
            Value::Literal(s) => out.push_str(s),
            Value::List(values) => {
                for v in values {
                    v.eval(ev, out)?;
                }
            }
            Value::VarRef(name) => {
                let name = name.eval_to_string(ev)?;
                ev.eval_var(&name, out)?;
            }
            Value::SubstRef { name, pat, subst } => {
                let name = name.eval_to_string(ev)?;
                let pat = Pattern::new(&pat.eval_to_string(ev)?);
                let subst = subst.eval_to_string(ev)?;
                let mut value = String::new();
                ev.eval_var(&name, &mut value)?;
                let mut needs_space = false;
                for word in words(&value) {
                    if needs_space {
                        out.push(' ');
                    }
                    needs_space = true;
                    pat.append_subst_ref(word, &subst, out);
                }
            }
            Value::Func { func, args } => (func.func)(args, ev, out)?,
        }
        Ok(())
    }

    pub fn eval_to_string(&self, ev: &mut Evaluator) -> Result<String, EvalError> {
        let mut s = String::new();
        self.eval(ev, &mut s)?;
        Ok(s)
    }

    /// The literal text this value starts with, before any reference.
    pub fn literal_lead(&self) -> &str {
        match self {
            Value::Literal(s) => s,
            Value::List(values) => match values.first() {
                Some(Value::Literal(s)) => s,
                _ => "",
            },
            _ => "",
        }
    }

    fn from_parts(mut parts: Vec<Value>) -> Value {
        match parts.len() {
            0 => Value::Literal(String::new()),
            1 => parts.remove(0),
            _ => Value::List(parts),
        }
    }
}

/// A value together with where it was written.
#[derive(Debug, Clone, PartialEq)]
pub struct Expr {
    pub value: Value,
    pub loc: Loc,
}

impl Expr {
    pub fn parse(text: &str, loc: Loc) -> Result<Self, ValueError> {
        Ok(Self {
            value: Value::parse(text)?,
            loc,
        })
    }

    pub fn literal(text: &str, loc: Loc) -> Self {
        Self {
            value: Value::Literal(text.to_string()),
            loc,
        }
    }

    pub fn eval(&self, ev: &mut Evaluator) -> Result<String, EvalError> {
        self.value.eval_to_string(ev)
    }
}

struct ValueParser<'a> {
    s: &'a str,
    b: &'a [u8],
}

impl<'a> ValueParser<'a> {
    /// Parses from `i` until `stop` matches a byte outside of any nested
    /// `open`/`close` pair. Returns the value and the offset of the stop
    /// byte (or the end of input).
    fn parse_seq(
        &self,
        mut i: usize,
        stop: &dyn Fn(u8) -> bool,
        parens: Option<(u8, u8)>,
    ) -> Result<(Value, usize), ValueError> {
        let mut parts = Vec::new();
        let mut lit = String::new();
        let mut depth = 0usize;
        let mut start = i;

        while i < self.b.len() {
            let c = self.b[i];
            if depth == 0 && stop(c) {
                break;
            }
            match c {
                b'$' => {
                    lit.push_str(&self.s[start..i]);
                    match self.b.get(i + 1) {
                        None => i += 1,
                        Some(b'$') => {
                            lit.push('$');
                            i += 2;
                        }
                        Some(&open @ (b'(' | b'{')) => {
                            if !lit.is_empty() {
                                parts.push(Value::Literal(std::mem::take(&mut lit)));
                            }
                            let (v, next) = self.parse_dollar_paren(i + 2, open)?;
                            parts.push(v);
                            i = next;
                        }
                        Some(_) => {
                            if !lit.is_empty() {
                                parts.push(Value::Literal(std::mem::take(&mut lit)));
                            }
                            let ch_len = self.s[i + 1..].chars().next().map_or(1, char::len_utf8);
                            let name = &self.s[i + 1..i + 1 + ch_len];
                            parts.push(Value::VarRef(Box::new(Value::Literal(name.to_string()))));
                            i += 1 + ch_len;
                        }
                    }
                    start = i;
                    continue;
                }
                _ => {
                    if let Some((open, close)) = parens {
                        if c == open {
                            depth += 1;
                        } else if c == close && depth > 0 {
                            depth -= 1;
                        }
                    }
                }
            }
            i += 1;
        }
        lit.push_str(&self.s[start..i]);
        if !lit.is_empty() {
            parts.push(Value::Literal(lit));
        }
        Ok((Value::from_parts(parts), i))
    }

    /// Parses the inside of `$(...)` or `${...}` starting right after the
    /// opening bracket. Returns the offset just past the closing bracket.
    fn parse_dollar_paren(&self, i: usize, open: u8) -> Result<(Value, usize), ValueError> {
        let close = if open == b'(' { b')' } else { b'}' };
        let parens = Some((open, close));

        let name_end = i + self.b[i..]
            .iter()
            .take_while(|c| c.is_ascii_lowercase() || **c == b'-')
            .count();
        if name_end > i && matches!(self.b.get(name_end), Some(b' ') | Some(b'\t')) {
            if let Some(func) = func::lookup(&self.s[i..name_end]) {
                return self.parse_func(func, name_end, close, parens);
            }
        }

        let (name, j) = self.parse_seq(i, &|c| c == close || c == b':', parens)?;
        match self.b.get(j) {
            Some(&c) if c == close => Ok((Value::VarRef(Box::new(name)), j + 1)),
            Some(b':') => {
                let (pat, k) = self.parse_seq(j + 1, &|c| c == close || c == b'=', parens)?;
                match self.b.get(k) {
                    Some(b'=') => {
                        let (subst, l) = self.parse_seq(k + 1, &|c| c == close, parens)?;
                        if l >= self.b.len() {
                            return Err(ValueError::Unterminated);
                        }
                        let v = Value::SubstRef {
                            name: Box::new(name),
                            pat: Box::new(pat),
                            subst: Box::new(subst),
                        };
                        Ok((v, l + 1))
                    }
                    Some(_) => {
                        let full = Value::from_parts(vec![name, Value::Literal(":".to_string()), pat]);
                        Ok((Value::VarRef(Box::new(full)), k + 1))
                    }
                    None => Err(ValueError::Unterminated),
                }
            }
            _ => Err(ValueError::Unterminated),
        }
    }

    fn parse_func(
        &self,
        func: &'static FuncInfo,
        mut i: usize,
        close: u8,
        parens: Option<(u8, u8)>,
    ) -> Result<(Value, usize), ValueError> {
        while matches!(self.b.get(i), Some(b' ') | Some(b'\t')) {
            i += 1;
        }
        let mut args = Vec::new();
        loop {
            let last = args.len() + 1 >= func.max_args;
            let (arg, j) = self.parse_seq(i, &|c| c == close || (!last && c == b','), parens)?;
            args.push(arg);
            match self.b.get(j) {
                Some(b',') if !last => i = j + 1,
                Some(&c) if c == close => {
                    i = j + 1;
                    break;
                }
                _ => return Err(ValueError::Unterminated),
            }
        }
        if args.len() < func.min_args {
            return Err(ValueError::InsufficientArgs {
                name: func.name,
                given: args.len(),
            });
        }
        Ok((Value::Func { func, args }, i))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn var(name: &str) -> Value {
        Value::VarRef(Box::new(Value::Literal(name.to_string())))
    }

    #[test]
    fn plain_text_is_literal() {
        assert_eq!(Value::parse("echo hi").unwrap(), Value::Literal("echo hi".into()));
        assert_eq!(Value::parse("a$$b").unwrap(), Value::Literal("a$b".into()));
    }

    #[test]
    fn single_char_and_paren_refs() {
        let v = Value::parse("cc -o $@ $(<D)").unwrap();
        assert_eq!(
            v,
            Value::List(vec![
                Value::Literal("cc -o ".into()),
                var("@"),
                Value::Literal(" ".into()),
                var("<D"),
            ])
        );
        assert_eq!(v.literal_lead(), "cc -o ");
    }

    #[test]
    fn subst_ref() {
        let v = Value::parse("${SRCS:.c=.o}").unwrap();
        assert!(matches!(v, Value::SubstRef { .. }));
    }

    #[test]
    fn function_args_split_on_commas() {
        let v = Value::parse("$(subst a,b,x,y)").unwrap();
        match v {
            Value::Func { func, args } => {
                assert_eq!(func.name, "subst");
                assert_eq!(args.len(), 3);
                assert_eq!(args[2], Value::Literal("x,y".into()));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn nested_parens_stay_in_args() {
        let v = Value::parse("$(info (a,b))").unwrap();
        match v {
            Value::Func { args, .. } => assert_eq!(args[0], Value::Literal("(a,b)".into())),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn unterminated_reference() {
        assert_eq!(Value::parse("$(foo"), Err(ValueError::Unterminated));
        assert!(matches!(
            Value::parse("$(subst a,b)"),
            Err(ValueError::InsufficientArgs { name: "subst", given: 2 })
        ));
    }
}
