//! Compound CSS-like selectors.
//!
//! Supported grammar (a practical subset of CSS level 3):
//!
//! ```text
//! list      := complex ("," complex)*
//! complex   := compound (combinator compound)*
//! combinator:= whitespace (descendant) | ">" (child)
//! compound  := (tag | "*")? (".class" | "#id" | "[attr]" | "[attr OP value]")*
//! OP        := "=" | "^=" | "$=" | "*=" | "~="
//! ```

use std::iter::Peekable;
use std::str::Chars;

use crate::document::Document;
use crate::error::{DomError, Result};
use crate::node::ElementData;
use crate::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    compounds: Vec<Compound>,
    /// `combinators[i]` joins `compounds[i]` and `compounds[i + 1]`.
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrSelector>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrSelector {
    name: String,
    test: Option<(AttrOp, String)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrOp {
    Equals,
    Prefix,
    Suffix,
    Substring,
    Word,
}

impl Selector {
    pub fn parse(source: &str) -> Result<Self> {
        let mut alternatives = Vec::new();
        for part in split_top_level(source) {
            let trimmed = part.trim();
            if trimmed.is_empty() {
                return Err(DomError::invalid_selector(source, "empty selector in list"));
            }
            alternatives.push(parse_complex(source, trimmed)?);
        }
        if alternatives.is_empty() {
            return Err(DomError::invalid_selector(source, "empty selector"));
        }
        Ok(Self {
            source: source.to_string(),
            alternatives,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub(crate) fn matches(&self, doc: &Document, node: NodeId) -> bool {
        self.alternatives
            .iter()
            .any(|complex| complex.matches_at(doc, complex.compounds.len() - 1, node))
    }
}

impl std::str::FromStr for Selector {
    type Err = DomError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Complex {
    fn matches_at(&self, doc: &Document, idx: usize, node: NodeId) -> bool {
        let Some(element) = doc.element_data(node) else {
            return false;
        };
        if !self.compounds[idx].matches(element) {
            return false;
        }
        if idx == 0 {
            return true;
        }
        match self.combinators[idx - 1] {
            Combinator::Child => doc
                .parent(node)
                .is_some_and(|parent| self.matches_at(doc, idx - 1, parent)),
            Combinator::Descendant => {
                let mut cursor = doc.parent(node);
                while let Some(ancestor) = cursor {
                    if self.matches_at(doc, idx - 1, ancestor) {
                        return true;
                    }
                    cursor = doc.parent(ancestor);
                }
                false
            }
        }
    }
}

impl Compound {
    fn matches(&self, element: &ElementData) -> bool {
        if let Some(tag) = &self.tag {
            if element.tag != *tag {
                return false;
            }
        }
        if let Some(id) = &self.id {
            if element.attrs.get("id") != Some(id) {
                return false;
            }
        }
        if !self.classes.iter().all(|class| element.has_class(class)) {
            return false;
        }
        self.attrs.iter().all(|attr| attr.matches(element))
    }

    fn is_empty(&self) -> bool {
        self.tag.is_none() && self.id.is_none() && self.classes.is_empty() && self.attrs.is_empty()
    }
}

impl AttrSelector {
    fn matches(&self, element: &ElementData) -> bool {
        let Some(value) = element.attrs.get(&self.name) else {
            return false;
        };
        match &self.test {
            None => true,
            Some((AttrOp::Equals, expected)) => value == expected,
            Some((AttrOp::Prefix, expected)) => !expected.is_empty() && value.starts_with(expected),
            Some((AttrOp::Suffix, expected)) => !expected.is_empty() && value.ends_with(expected),
            Some((AttrOp::Substring, expected)) => {
                !expected.is_empty() && value.contains(expected.as_str())
            }
            Some((AttrOp::Word, expected)) => value.split_ascii_whitespace().any(|w| w == expected),
        }
    }
}

/// Splits on commas that are not inside brackets or quotes.
fn split_top_level(source: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0usize;
    for (idx, ch) in source.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&source[start..idx]);
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(&source[start..]);
    parts
}

fn parse_complex(full: &str, input: &str) -> Result<Complex> {
    let mut chars = input.chars().peekable();
    let mut compounds = Vec::new();
    let mut combinators = Vec::new();
    let mut pending: Option<Combinator> = None;

    loop {
        let saw_space = skip_whitespace(&mut chars);
        match chars.peek().copied() {
            None => break,
            Some('>') => {
                chars.next();
                if compounds.is_empty() {
                    return Err(DomError::invalid_selector(full, "leading `>` combinator"));
                }
                pending = Some(Combinator::Child);
                continue;
            }
            Some(_) => {
                if !compounds.is_empty() {
                    let combinator = match pending.take() {
                        Some(c) => c,
                        None if saw_space => Combinator::Descendant,
                        None => {
                            return Err(DomError::invalid_selector(full, "unexpected character"))
                        }
                    };
                    combinators.push(combinator);
                }
                compounds.push(parse_compound(full, &mut chars)?);
            }
        }
    }

    if pending.is_some() {
        return Err(DomError::invalid_selector(full, "dangling `>` combinator"));
    }
    if compounds.is_empty() {
        return Err(DomError::invalid_selector(full, "empty selector"));
    }
    Ok(Complex {
        compounds,
        combinators,
    })
}

fn parse_compound(full: &str, chars: &mut Peekable<Chars<'_>>) -> Result<Compound> {
    let mut compound = Compound::default();
    let mut universal = false;

    if chars.peek() == Some(&'*') {
        chars.next();
        universal = true;
    } else if chars.peek().is_some_and(|c| is_ident_char(*c)) {
        compound.tag = Some(read_ident(chars).to_ascii_lowercase());
    }

    loop {
        match chars.peek().copied() {
            Some('.') => {
                chars.next();
                let class = read_ident(chars);
                if class.is_empty() {
                    return Err(DomError::invalid_selector(full, "empty class name"));
                }
                compound.classes.push(class);
            }
            Some('#') => {
                chars.next();
                let id = read_ident(chars);
                if id.is_empty() {
                    return Err(DomError::invalid_selector(full, "empty id"));
                }
                compound.id = Some(id);
            }
            Some('[') => {
                chars.next();
                compound.attrs.push(parse_attr(full, chars)?);
            }
            _ => break,
        }
    }

    if compound.is_empty() && !universal {
        return Err(DomError::invalid_selector(full, "expected a selector"));
    }
    Ok(compound)
}

fn parse_attr(full: &str, chars: &mut Peekable<Chars<'_>>) -> Result<AttrSelector> {
    skip_whitespace(chars);
    let name = read_ident(chars);
    if name.is_empty() {
        return Err(DomError::invalid_selector(full, "empty attribute name"));
    }
    skip_whitespace(chars);

    let op = match chars.next() {
        Some(']') => return Ok(AttrSelector { name, test: None }),
        Some('=') => AttrOp::Equals,
        Some(c @ ('^' | '$' | '*' | '~')) => {
            if chars.next() != Some('=') {
                return Err(DomError::invalid_selector(full, "expected `=` after operator"));
            }
            match c {
                '^' => AttrOp::Prefix,
                '$' => AttrOp::Suffix,
                '*' => AttrOp::Substring,
                _ => AttrOp::Word,
            }
        }
        _ => return Err(DomError::invalid_selector(full, "malformed attribute selector")),
    };

    skip_whitespace(chars);
    let value = match chars.peek().copied() {
        Some(q @ ('"' | '\'')) => {
            chars.next();
            let mut value = String::new();
            loop {
                match chars.next() {
                    Some(c) if c == q => break,
                    Some(c) => value.push(c),
                    None => return Err(DomError::invalid_selector(full, "unterminated string")),
                }
            }
            value
        }
        _ => read_ident(chars),
    };
    skip_whitespace(chars);
    if chars.next() != Some(']') {
        return Err(DomError::invalid_selector(full, "expected `]`"));
    }
    Ok(AttrSelector {
        name,
        test: Some((op, value)),
    })
}

fn skip_whitespace(chars: &mut Peekable<Chars<'_>>) -> bool {
    let mut skipped = false;
    while chars.peek().is_some_and(|c| c.is_whitespace()) {
        chars.next();
        skipped = true;
    }
    skipped
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '-' || c == '_'
}

fn read_ident(chars: &mut Peekable<Chars<'_>>) -> String {
    let mut out = String::new();
    while let Some(&c) = chars.peek() {
        if c == '\\' {
            chars.next();
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
            continue;
        }
        if !is_ident_char(c) {
            break;
        }
        out.push(c);
        chars.next();
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_compound_with_attributes() {
        let selector = Selector::parse("div.group[data-role='user'][data-id]").expect("parse");
        assert_eq!(selector.alternatives.len(), 1);
        let compound = &selector.alternatives[0].compounds[0];
        assert_eq!(compound.tag.as_deref(), Some("div"));
        assert_eq!(compound.classes, vec!["group".to_string()]);
        assert_eq!(compound.attrs.len(), 2);
        assert_eq!(
            compound.attrs[0].test,
            Some((AttrOp::Equals, "user".to_string()))
        );
    }

    #[test]
    fn parses_combinators_and_lists() {
        let selector = Selector::parse("main > div .msg, user-query").expect("parse");
        assert_eq!(selector.alternatives.len(), 2);
        assert_eq!(
            selector.alternatives[0].combinators,
            vec![Combinator::Child, Combinator::Descendant]
        );
        assert_eq!(
            selector.alternatives[1].compounds[0].tag.as_deref(),
            Some("user-query")
        );
    }

    #[test]
    fn keeps_commas_inside_quoted_values() {
        let selector = Selector::parse("[aria-label=\"Stop, now\"]").expect("parse");
        assert_eq!(selector.alternatives.len(), 1);
    }

    #[test]
    fn parses_escaped_class_names() {
        let selector = Selector::parse(".md\\:flex").expect("parse");
        assert_eq!(
            selector.alternatives[0].compounds[0].classes,
            vec!["md:flex".to_string()]
        );
    }

    #[test]
    fn rejects_malformed_selectors() {
        for bad in ["", "div,", "> div", "div >", "[", "[=x]", "[a^x]", ".", "#", "div!"] {
            let err = Selector::parse(bad).unwrap_err();
            assert!(
                matches!(err, DomError::InvalidSelector { .. }),
                "expected invalid selector for {bad:?}, got {err:?}"
            );
        }
    }
}
