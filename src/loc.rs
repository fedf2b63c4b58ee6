use std::fmt;
use std::rc::Rc;

/// A position in a Makefile, used for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Loc {
    pub filename: Rc<str>,
    pub lineno: usize,
}

impl Loc {
    pub fn new(filename: &str, lineno: usize) -> Self {
        Self {
            filename: Rc::from(filename),
            lineno,
        }
    }
}

impl fmt::Display for Loc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.filename.is_empty() {
            write!(f, "<unknown>:{}", self.lineno)
        } else {
            write!(f, "{}:{}", self.filename, self.lineno)
        }
    }
}
