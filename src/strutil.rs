//! Byte-level string helpers shared by the evaluator and the command splitter.
//!
//! Every delimiter these functions look for is ASCII, so slicing at the
//! returned offsets always lands on a char boundary.

pub fn is_space(c: u8) -> bool {
    (9..=13).contains(&c) || c == b' '
}

/// Iterates over the whitespace separated words of `s`.
pub fn words(s: &str) -> impl Iterator<Item = &str> {
    s.split(|c: char| c.is_ascii() && is_space(c as u8))
        .filter(|w| !w.is_empty())
}

/// Appends words to a buffer, separating them with a single space.
pub struct WordWriter<'a> {
    out: &'a mut String,
    needs_space: bool,
}

impl<'a> WordWriter<'a> {
    pub fn new(out: &'a mut String) -> Self {
        Self {
            out,
            needs_space: false,
        }
    }

    pub fn maybe_add_whitespace(&mut self) {
        if self.needs_space {
            self.out.push(' ');
        } else {
            self.needs_space = true;
        }
    }

    pub fn write(&mut self, s: &str) {
        self.maybe_add_whitespace();
        self.out.push_str(s);
    }
}

/// Strips leading whitespace, also skipping escaped line breaks.
pub fn trim_left_space(s: &str) -> &str {
    let b = s.as_bytes();
    let mut i = 0;
    while i < b.len() {
        if is_space(b[i]) {
            i += 1;
            continue;
        }
        if b[i] == b'\\' && matches!(b.get(i + 1), Some(b'\r') | Some(b'\n')) {
            i += 2;
            continue;
        }
        break;
    }
    &s[i..]
}

pub fn trim_right_space(s: &str) -> &str {
    let b = s.as_bytes();
    let mut end = b.len();
    while end > 0 {
        let c = b[end - 1];
        if !is_space(c) {
            break;
        }
        end -= 1;
        if (c == b'\r' || c == b'\n') && end > 0 && b[end - 1] == b'\\' {
            end -= 1;
        }
    }
    &s[..end]
}

pub fn trim_space(s: &str) -> &str {
    trim_right_space(trim_left_space(s))
}

/// Returns the offset of the first unescaped newline at or after `e`, or
/// `s.len()` when there is none. Every line terminator consumed on the way,
/// escaped or not, bumps `lf_cnt`.
pub fn find_end_of_line(s: &str, mut e: usize, lf_cnt: &mut usize) -> usize {
    let b = s.as_bytes();
    while e < b.len() {
        match b[e..].iter().position(|&c| c == b'\n' || c == b'\\') {
            Some(off) => e += off,
            None => return b.len(),
        }
        if b[e] == b'\n' {
            *lf_cnt += 1;
            return e;
        }
        match (b.get(e + 1), b.get(e + 2)) {
            (Some(b'\n'), _) => {
                e += 2;
                *lf_cnt += 1;
            }
            (Some(b'\r'), Some(b'\n')) => {
                e += 3;
                *lf_cnt += 1;
            }
            (Some(b'\\'), _) => e += 2,
            _ => e += 1,
        }
    }
    e.min(b.len())
}

pub fn dirname(s: &str) -> &str {
    match s.rfind('/') {
        None => ".",
        Some(0) => "",
        Some(found) => &s[..found],
    }
}

pub fn basename(s: &str) -> &str {
    match s.rfind('/') {
        None | Some(0) => s,
        Some(found) => &s[found + 1..],
    }
}

/// Escapes text so that `echo -e "..."` reproduces it.
pub fn echo_escape(s: &str) -> String {
    let mut buf = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '\\' => buf.push_str("\\\\\\\\"),
            '\n' => buf.push_str("\\n"),
            '"' => buf.push_str("\\\""),
            c => buf.push(c),
        }
    }
    buf
}

/// A make pattern with at most one `%` wildcard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    pat: String,
    percent_index: Option<usize>,
}

impl Pattern {
    pub fn new(pat: &str) -> Self {
        Self {
            pat: pat.to_string(),
            percent_index: pat.find('%'),
        }
    }

    pub fn has_wildcard(&self) -> bool {
        self.percent_index.is_some()
    }

    pub fn matches(&self, s: &str) -> bool {
        match self.percent_index {
            None => s == self.pat,
            Some(i) => self.match_wildcard(s, i),
        }
    }

    fn match_wildcard(&self, s: &str, i: usize) -> bool {
        let (prefix, suffix) = (&self.pat[..i], &self.pat[i + 1..]);
        s.len() >= prefix.len() + suffix.len() && s.starts_with(prefix) && s.ends_with(suffix)
    }

    /// The part of `s` matched by `%`, or "" when `s` doesn't match.
    pub fn stem<'a>(&self, s: &'a str) -> &'a str {
        match self.percent_index {
            Some(i) if self.match_wildcard(s, i) => &s[i..s.len() + 1 - self.pat.len() + i],
            _ => "",
        }
    }

    pub fn append_subst(&self, s: &str, subst: &str, out: &mut String) {
        match self.percent_index {
            None if s == self.pat => out.push_str(subst),
            Some(i) if self.match_wildcard(s, i) => {
                let stem = &s[i..s.len() + 1 - self.pat.len() + i];
                out.push_str(&subst.replace('%', stem));
            }
            _ => out.push_str(s),
        }
    }

    /// `$(VAR:pat=subst)`: without a `%`, a plain suffix replacement.
    pub fn append_subst_ref(&self, s: &str, subst: &str, out: &mut String) {
        if self.percent_index.is_some() && subst.contains('%') {
            self.append_subst(s, subst, out);
            return;
        }
        match s.strip_suffix(self.pat.as_str()) {
            Some(stem) => {
                out.push_str(stem);
                out.push_str(subst);
            }
            None => out.push_str(s),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn words_collapse_whitespace() {
        let w: Vec<&str> = words("  a\t\tb \n c  ").collect();
        assert_eq!(w, vec!["a", "b", "c"]);
        assert_eq!(words("   ").count(), 0);
    }

    #[test]
    fn word_writer_separates_with_one_space() {
        let mut s = String::new();
        let mut ww = WordWriter::new(&mut s);
        ww.write("a");
        ww.write("b");
        assert_eq!(s, "a b");
    }

    #[test]
    fn trim_left_skips_escaped_newlines() {
        assert_eq!(trim_left_space(" \\\n\t x"), "x");
        assert_eq!(trim_left_space("\\x"), "\\x");
        assert_eq!(trim_right_space("x \\\n"), "x");
    }

    #[test]
    fn end_of_line_skips_continuations() {
        let mut lf = 0;
        assert_eq!(find_end_of_line("a\\\nb\nc", 0, &mut lf), 4);
        assert_eq!(lf, 2);

        let mut lf = 0;
        assert_eq!(find_end_of_line("abc", 0, &mut lf), 3);
        assert_eq!(lf, 0);

        let mut lf = 0;
        assert_eq!(find_end_of_line("a\\\\\nb", 0, &mut lf), 3);
        assert_eq!(lf, 1);
    }

    #[test]
    fn dir_and_base() {
        assert_eq!(dirname("a/b/c.o"), "a/b");
        assert_eq!(basename("a/b/c.o"), "c.o");
        assert_eq!(dirname("c.o"), ".");
        assert_eq!(basename("c.o"), "c.o");
        assert_eq!(dirname("/c.o"), "");
        assert_eq!(basename("/c.o"), "/c.o");
    }

    #[test]
    fn pattern_stem() {
        let p = Pattern::new("out/%.o");
        assert_eq!(p.stem("out/foo.o"), "foo");
        assert_eq!(p.stem("src/foo.o"), "");
        assert!(!Pattern::new("a%a").matches("a"));
        assert_eq!(Pattern::new("%").stem("x/y"), "x/y");
    }

    #[test]
    fn pattern_substitution() {
        let mut out = String::new();
        Pattern::new("%.c").append_subst("foo.c", "%.o", &mut out);
        assert_eq!(out, "foo.o");

        let mut out = String::new();
        Pattern::new(".c").append_subst_ref("bar.c", ".o", &mut out);
        assert_eq!(out, "bar.o");

        let mut out = String::new();
        Pattern::new(".c").append_subst_ref("bar.h", ".o", &mut out);
        assert_eq!(out, "bar.h");
    }

    #[test]
    fn echo_escape_quotes_and_newlines() {
        assert_eq!(echo_escape("a\"b\nc"), "a\\\"b\\nc");
    }
}
