#![forbid(unsafe_code)]

//! A small CSS selector engine for the in-memory document.
//!
//! Supported grammar (enough for every built-in profile and strategy):
//!
//! ```text
//! list      := complex ("," complex)*
//! complex   := compound ((" " | ">") compound)*
//! compound  := (tag | "*")? ("#" id | "." class | "[" attr "]")*
//! attr      := name (("=" | "*=" | "^=" | "~=") value)?
//! ```
//!
//! Pseudo-classes and sibling combinators are rejected with
//! [`SelectorError::Unsupported`], which mirrors how a real engine throws on
//! selectors it cannot parse.

/// Why a selector was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorError {
    Empty,
    Unexpected { ch: char, at: usize },
    Unsupported(String),
}

impl core::fmt::Display for SelectorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Empty => f.write_str("empty selector"),
            Self::Unexpected { ch, at } => write!(f, "unexpected '{ch}' at {at}"),
            Self::Unsupported(what) => write!(f, "unsupported selector syntax: {what}"),
        }
    }
}

impl std::error::Error for SelectorError {}

/// Read access the matcher needs from a tree.
pub trait SelectorTree {
    type Node: Copy;

    fn tag(&self, node: Self::Node) -> &str;
    fn attr(&self, node: Self::Node, name: &str) -> Option<&str>;
    fn parent(&self, node: Self::Node) -> Option<Self::Node>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Equals,
    Contains,
    Prefix,
    Word,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrSelector {
    name: String,
    test: Option<(AttrOp, String)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSelector>,
}

/// One comma-separated branch, stored right-to-left for matching.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    /// `(compound, combinator to the compound on its left)`.
    parts: Vec<(Compound, Option<Combinator>)>,
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorList {
    branches: Vec<Complex>,
}

impl SelectorList {
    /// Parse a selector list.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let chars: Vec<char> = input.chars().collect();
        let mut parser = Parser { chars, pos: 0 };
        let mut branches = Vec::new();
        loop {
            branches.push(parser.complex()?);
            parser.skip_ws();
            match parser.peek() {
                None => break,
                Some(',') => parser.pos += 1,
                Some(ch) => return Err(SelectorError::Unexpected { ch, at: parser.pos }),
            }
        }
        Ok(Self { branches })
    }

    /// Whether `node` matches any branch.
    pub fn matches<T: SelectorTree>(&self, tree: &T, node: T::Node) -> bool {
        self.branches
            .iter()
            .any(|branch| match_from(tree, node, &branch.parts))
    }
}

fn match_from<T: SelectorTree>(
    tree: &T,
    node: T::Node,
    parts: &[(Compound, Option<Combinator>)],
) -> bool {
    let Some(((compound, combinator), rest)) = parts.split_first() else {
        return true;
    };
    if !compound_matches(tree, node, compound) {
        return false;
    }
    match combinator {
        None => true,
        Some(Combinator::Child) => tree
            .parent(node)
            .is_some_and(|parent| match_from(tree, parent, rest)),
        Some(Combinator::Descendant) => {
            let mut cursor = tree.parent(node);
            while let Some(ancestor) = cursor {
                if match_from(tree, ancestor, rest) {
                    return true;
                }
                cursor = tree.parent(ancestor);
            }
            false
        }
    }
}

fn compound_matches<T: SelectorTree>(tree: &T, node: T::Node, c: &Compound) -> bool {
    if let Some(tag) = &c.tag
        && !tree.tag(node).eq_ignore_ascii_case(tag)
    {
        return false;
    }
    if let Some(id) = &c.id
        && tree.attr(node, "id") != Some(id.as_str())
    {
        return false;
    }
    if !c.classes.is_empty() {
        let class_attr = tree.attr(node, "class").unwrap_or("");
        if !c
            .classes
            .iter()
            .all(|class| class_attr.split_whitespace().any(|have| have == class))
        {
            return false;
        }
    }
    c.attrs.iter().all(|a| {
        let Some(value) = tree.attr(node, &a.name) else {
            return false;
        };
        match &a.test {
            None => true,
            Some((AttrOp::Equals, want)) => value == want,
            Some((AttrOp::Contains, want)) => value.contains(want.as_str()),
            Some((AttrOp::Prefix, want)) => value.starts_with(want.as_str()),
            Some((AttrOp::Word, want)) => value.split_whitespace().any(|w| w == want),
        }
    })
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn skip_ws(&mut self) -> bool {
        let start = self.pos;
        while self.peek().is_some_and(char::is_whitespace) {
            self.pos += 1;
        }
        self.pos > start
    }

    fn complex(&mut self) -> Result<Complex, SelectorError> {
        self.skip_ws();
        let mut left_to_right: Vec<(Option<Combinator>, Compound)> = Vec::new();
        let mut pending: Option<Combinator> = None;
        loop {
            let compound = self.compound()?;
            left_to_right.push((pending.take(), compound));

            let had_ws = self.skip_ws();
            match self.peek() {
                Some('>') => {
                    self.pos += 1;
                    self.skip_ws();
                    pending = Some(Combinator::Child);
                }
                Some('+') | Some('~') => {
                    return Err(SelectorError::Unsupported("sibling combinator".into()));
                }
                Some(',') | None => break,
                Some(_) if had_ws => pending = Some(Combinator::Descendant),
                Some(ch) => return Err(SelectorError::Unexpected { ch, at: self.pos }),
            }
        }
        if left_to_right.is_empty() {
            return Err(SelectorError::Empty);
        }
        // Re-key: each compound carries the combinator linking it to its left neighbour.
        let mut parts = Vec::with_capacity(left_to_right.len());
        for i in (0..left_to_right.len()).rev() {
            let combinator = if i == 0 {
                None
            } else {
                left_to_right[i].0
            };
            parts.push((left_to_right[i].1.clone(), combinator));
        }
        Ok(Complex { parts })
    }

    fn compound(&mut self) -> Result<Compound, SelectorError> {
        let mut compound = Compound::default();
        let start = self.pos;
        match self.peek() {
            Some('*') => self.pos += 1,
            Some(c) if is_ident_char(c) => compound.tag = Some(self.ident()?.to_ascii_lowercase()),
            _ => {}
        }
        loop {
            match self.peek() {
                Some('#') => {
                    self.pos += 1;
                    compound.id = Some(self.ident()?);
                }
                Some('.') => {
                    self.pos += 1;
                    compound.classes.push(self.ident()?);
                }
                Some('[') => {
                    self.pos += 1;
                    compound.attrs.push(self.attr()?);
                }
                Some(':') => {
                    let rest: String = self.chars[self.pos..].iter().collect();
                    return Err(SelectorError::Unsupported(rest));
                }
                _ => break,
            }
        }
        if self.pos == start {
            return match self.peek() {
                Some(ch) => Err(SelectorError::Unexpected { ch, at: self.pos }),
                None => Err(SelectorError::Empty),
            };
        }
        Ok(compound)
    }

    fn ident(&mut self) -> Result<String, SelectorError> {
        let start = self.pos;
        while self.peek().is_some_and(is_ident_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return match self.peek() {
                Some(ch) => Err(SelectorError::Unexpected { ch, at: self.pos }),
                None => Err(SelectorError::Empty),
            };
        }
        Ok(self.chars[start..self.pos].iter().collect())
    }

    fn attr(&mut self) -> Result<AttrSelector, SelectorError> {
        self.skip_ws();
        let name = self.ident()?;
        self.skip_ws();
        let op = match self.peek() {
            Some(']') => {
                self.pos += 1;
                return Ok(AttrSelector { name, test: None });
            }
            Some('=') => {
                self.pos += 1;
                AttrOp::Equals
            }
            Some(c @ ('*' | '^' | '~')) if self.chars.get(self.pos + 1) == Some(&'=') => {
                self.pos += 2;
                match c {
                    '*' => AttrOp::Contains,
                    '^' => AttrOp::Prefix,
                    _ => AttrOp::Word,
                }
            }
            Some(ch) => return Err(SelectorError::Unexpected { ch, at: self.pos }),
            None => return Err(SelectorError::Empty),
        };
        self.skip_ws();
        let value = match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.pos += 1;
                let start = self.pos;
                while self.peek().is_some_and(|c| c != q) {
                    self.pos += 1;
                }
                if self.peek().is_none() {
                    return Err(SelectorError::Empty);
                }
                let value: String = self.chars[start..self.pos].iter().collect();
                self.pos += 1;
                value
            }
            _ => self.ident()?,
        };
        self.skip_ws();
        match self.peek() {
            Some(']') => {
                self.pos += 1;
                Ok(AttrSelector {
                    name,
                    test: Some((op, value)),
                })
            }
            Some(ch) => Err(SelectorError::Unexpected { ch, at: self.pos }),
            None => Err(SelectorError::Empty),
        }
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `(tag, attrs, parent)` triples.
    struct Tree(Vec<(&'static str, Vec<(&'static str, &'static str)>, Option<usize>)>);

    impl SelectorTree for Tree {
        type Node = usize;

        fn tag(&self, node: usize) -> &str {
            self.0[node].0
        }

        fn attr(&self, node: usize, name: &str) -> Option<&str> {
            self.0[node]
                .1
                .iter()
                .find(|(k, _)| *k == name)
                .map(|(_, v)| *v)
        }

        fn parent(&self, node: usize) -> Option<usize> {
            self.0[node].2
        }
    }

    fn tree() -> Tree {
        Tree(vec![
            ("body", vec![], None),
            ("form", vec![("id", "composer"), ("class", "chat box")], Some(0)),
            ("div", vec![("class", "ProseMirror"), ("contenteditable", "true")], Some(1)),
            ("textarea", vec![("data-testid", "prompt-textarea")], Some(0)),
        ])
    }

    fn m(sel: &str, node: usize) -> bool {
        SelectorList::parse(sel).unwrap().matches(&tree(), node)
    }

    #[test]
    fn compound_parts() {
        assert!(m("div.ProseMirror[contenteditable='true']", 2));
        assert!(m("form#composer.chat.box", 1));
        assert!(!m("form.missing", 1));
        assert!(m("*[data-testid^=prompt]", 3));
        assert!(m("[class~=box]", 1));
        assert!(m("[data-testid*=\"textarea\"]", 3));
    }

    #[test]
    fn combinators() {
        assert!(m("body div", 2));
        assert!(m("form > div", 2));
        assert!(!m("body > div", 2));
        assert!(m("#composer [contenteditable]", 2));
    }

    #[test]
    fn lists_match_any_branch() {
        assert!(m("textarea, div.nope", 3));
        assert!(m("span, div.ProseMirror", 2));
    }

    #[test]
    fn rejects_unsupported_and_malformed() {
        assert!(matches!(
            SelectorList::parse("div:has(textarea)"),
            Err(SelectorError::Unsupported(_))
        ));
        assert!(matches!(
            SelectorList::parse("a + b"),
            Err(SelectorError::Unsupported(_))
        ));
        assert!(SelectorList::parse("").is_err());
        assert!(SelectorList::parse("div[").is_err());
        assert!(SelectorList::parse("div,,span").is_err());
    }
}
