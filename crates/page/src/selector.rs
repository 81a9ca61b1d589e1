//! Small CSS selector subset: type, `*`, `#id`, `.class`, `[attr]`,
//! `[attr=value]`, compound selectors, descendant and `>` combinators, and
//! comma-separated groups.

use std::{iter::Peekable, str::Chars, str::FromStr};

use shared::{
    domain::NodeId,
    error::{ErrorCode, FrameworkError, FrameworkResult},
};

use crate::{NodeData, Tree};

#[derive(Debug, Clone, PartialEq)]
pub struct SelectorList {
    selectors: Vec<Complex>,
}

#[derive(Debug, Clone, PartialEq)]
struct Complex {
    compounds: Vec<Compound>,
    // combinators[i] sits between compounds[i] and compounds[i + 1]
    combinators: Vec<Combinator>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

#[derive(Debug, Clone, Default, PartialEq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attrs: Vec<AttrTest>,
}

#[derive(Debug, Clone, PartialEq)]
struct AttrTest {
    name: String,
    value: Option<String>,
}

/// Selectors of the form `name`, `#name` or `.name`, which are matched
/// directly against a node without a query pass.
pub fn is_basic(selector: &str) -> bool {
    let body = selector
        .strip_prefix('#')
        .or_else(|| selector.strip_prefix('.'))
        .unwrap_or(selector);
    !body.is_empty() && body.chars().all(is_ident_char)
}

/// Fast-path test for a basic selector.
pub(crate) fn matches_basic(selector: &str, data: &NodeData) -> bool {
    if let Some(id) = selector.strip_prefix('#') {
        return data.id.as_deref() == Some(id);
    }
    if let Some(class) = selector.strip_prefix('.') {
        return data.classes.iter().any(|c| c == class);
    }
    data.is_element() && data.tag.eq_ignore_ascii_case(selector)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_'
}

fn invalid(input: &str, reason: impl std::fmt::Display) -> FrameworkError {
    FrameworkError::configuration(
        ErrorCode::InvalidSelector,
        "selector",
        format!("'{input}': {reason}"),
    )
}

struct Parser<'a> {
    input: &'a str,
    chars: Peekable<Chars<'a>>,
}

impl<'a> Parser<'a> {
    fn new(input: &'a str) -> Self {
        Self {
            input,
            chars: input.chars().peekable(),
        }
    }

    fn skip_whitespace(&mut self) -> bool {
        let mut skipped = false;
        while self.chars.peek().is_some_and(|c| c.is_whitespace()) {
            self.chars.next();
            skipped = true;
        }
        skipped
    }

    fn list(&mut self) -> FrameworkResult<SelectorList> {
        let mut selectors = Vec::new();
        loop {
            selectors.push(self.complex()?);
            match self.chars.next() {
                None => break,
                Some(',') => continue,
                Some(other) => return Err(invalid(self.input, format!("unexpected '{other}'"))),
            }
        }
        Ok(SelectorList { selectors })
    }

    fn complex(&mut self) -> FrameworkResult<Complex> {
        let mut compounds = Vec::new();
        let mut combinators = Vec::new();
        let mut pending: Option<Combinator> = None;

        loop {
            self.skip_whitespace();
            match self.chars.peek().copied() {
                None | Some(',') => break,
                Some('>') => {
                    self.chars.next();
                    if compounds.is_empty() || pending.is_some() {
                        return Err(invalid(self.input, "misplaced '>'"));
                    }
                    pending = Some(Combinator::Child);
                }
                Some(_) => {
                    if !compounds.is_empty() {
                        combinators.push(pending.take().unwrap_or(Combinator::Descendant));
                    }
                    compounds.push(self.compound()?);
                }
            }
        }

        if compounds.is_empty() {
            return Err(invalid(self.input, "empty selector"));
        }
        if pending.is_some() {
            return Err(invalid(self.input, "dangling combinator"));
        }
        Ok(Complex {
            compounds,
            combinators,
        })
    }

    fn compound(&mut self) -> FrameworkResult<Compound> {
        let mut compound = Compound::default();
        let mut consumed = false;
        loop {
            match self.chars.peek().copied() {
                Some('*') if !consumed => {
                    self.chars.next();
                }
                Some('#') => {
                    self.chars.next();
                    compound.id = Some(self.ident()?);
                }
                Some('.') => {
                    self.chars.next();
                    compound.classes.push(self.ident()?);
                }
                Some('[') => {
                    self.chars.next();
                    compound.attrs.push(self.attr()?);
                }
                Some(c) if is_ident_char(c) && !consumed => {
                    compound.tag = Some(self.ident()?.to_ascii_lowercase());
                }
                Some(c) if !consumed => {
                    return Err(invalid(self.input, format!("unexpected '{c}'")));
                }
                _ => break,
            }
            consumed = true;
        }
        Ok(compound)
    }

    fn ident(&mut self) -> FrameworkResult<String> {
        let mut ident = String::new();
        while let Some(c) = self.chars.peek().copied().filter(|c| is_ident_char(*c)) {
            ident.push(c);
            self.chars.next();
        }
        if ident.is_empty() {
            return Err(invalid(self.input, "expected a name"));
        }
        Ok(ident)
    }

    fn attr(&mut self) -> FrameworkResult<AttrTest> {
        self.skip_whitespace();
        let name = self.ident()?;
        self.skip_whitespace();
        let value = match self.chars.next() {
            Some(']') => return Ok(AttrTest { name, value: None }),
            Some('=') => {
                self.skip_whitespace();
                self.attr_value()?
            }
            _ => return Err(invalid(self.input, "malformed attribute test")),
        };
        self.skip_whitespace();
        match self.chars.next() {
            Some(']') => Ok(AttrTest {
                name,
                value: Some(value),
            }),
            _ => Err(invalid(self.input, "unterminated attribute test")),
        }
    }

    fn attr_value(&mut self) -> FrameworkResult<String> {
        match self.chars.peek().copied() {
            Some(quote @ ('"' | '\'')) => {
                self.chars.next();
                let mut value = String::new();
                loop {
                    match self.chars.next() {
                        Some(c) if c == quote => return Ok(value),
                        Some(c) => value.push(c),
                        None => return Err(invalid(self.input, "unterminated string")),
                    }
                }
            }
            _ => self.ident(),
        }
    }
}

impl FromStr for SelectorList {
    type Err = FrameworkError;

    fn from_str(input: &str) -> Result<Self, Self::Err> {
        Parser::new(input).list()
    }
}

pub fn parse(input: &str) -> FrameworkResult<SelectorList> {
    input.parse()
}

impl SelectorList {
    pub(crate) fn matches(&self, tree: &Tree, node: NodeId) -> bool {
        self.selectors
            .iter()
            .any(|complex| complex.matches_from(tree, node, complex.compounds.len() - 1))
    }
}

impl Complex {
    fn matches_from(&self, tree: &Tree, node: NodeId, index: usize) -> bool {
        let Some(data) = tree.node(node) else {
            return false;
        };
        if !self.compounds[index].matches(data) {
            return false;
        }
        if index == 0 {
            return true;
        }

        match self.combinators[index - 1] {
            Combinator::Child => data
                .parent
                .is_some_and(|parent| self.matches_from(tree, parent, index - 1)),
            Combinator::Descendant => {
                let mut cursor = data.parent;
                while let Some(ancestor) = cursor {
                    if self.matches_from(tree, ancestor, index - 1) {
                        return true;
                    }
                    cursor = tree.node(ancestor).and_then(|n| n.parent);
                }
                false
            }
        }
    }
}

impl Compound {
    fn matches(&self, data: &NodeData) -> bool {
        if !data.is_element() {
            return false;
        }
        if self.tag.as_ref().is_some_and(|tag| *tag != data.tag) {
            return false;
        }
        if self.id.is_some() && self.id != data.id {
            return false;
        }
        if !self
            .classes
            .iter()
            .all(|class| data.classes.iter().any(|c| c == class))
        {
            return false;
        }
        self.attrs.iter().all(|test| match data.attribute(&test.name) {
            None => false,
            Some(actual) => test.value.as_ref().map_or(true, |v| *v == actual),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_groups_and_combinators() {
        let list = parse("ul.menu > li a[href], #footer").expect("parse");
        assert_eq!(list.selectors.len(), 2);
        let first = &list.selectors[0];
        assert_eq!(first.compounds.len(), 3);
        assert_eq!(
            first.combinators,
            vec![Combinator::Child, Combinator::Descendant]
        );
        assert_eq!(first.compounds[0].tag.as_deref(), Some("ul"));
        assert_eq!(first.compounds[0].classes, vec!["menu".to_string()]);
        assert_eq!(first.compounds[2].attrs[0].name, "href");
        assert_eq!(list.selectors[1].compounds[0].id.as_deref(), Some("footer"));
    }

    #[test]
    fn quoted_attribute_values_may_contain_commas() {
        let list = parse(r#"[title="a, b"]"#).expect("parse");
        assert_eq!(list.selectors.len(), 1);
        assert_eq!(
            list.selectors[0].compounds[0].attrs[0].value.as_deref(),
            Some("a, b")
        );
    }

    #[test]
    fn rejects_malformed_selectors() {
        for bad in ["", "div >", "> div", "a,,b", "div + p", "[x", "#"] {
            let err = parse(bad).expect_err(bad);
            assert_eq!(err.code(), ErrorCode::InvalidSelector, "{bad}");
        }
    }

    #[test]
    fn basic_selectors_are_detected() {
        assert!(is_basic("#menu"));
        assert!(is_basic(".item"));
        assert!(is_basic("li"));
        assert!(!is_basic("li.item"));
        assert!(!is_basic("#a b"));
        assert!(!is_basic("#"));
    }
}
