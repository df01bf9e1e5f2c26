use std::fmt;

use crate::error::{Error, Result};

/// A syntactic annotation on a node: a dotted chain of components, each
/// either a bare `name` or a `name(arg, arg, ...)` call whose arguments are
/// themselves tag-trees (`spec.md` §4.1, e.g. `!array(array(int))`).
/// Operator components always begin with `!`; annotation components
/// (`!sparsearray`, schema markers, ...) may not.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub components: Vec<TagComponent>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagComponent {
    pub name: String,
    pub args: Vec<Tag>,
}

use serde::{Deserialize, Serialize};

impl Tag {
    pub fn single(name: impl Into<String>) -> Self {
        Tag { components: vec![TagComponent { name: name.into(), args: Vec::new() }] }
    }

    pub fn with_arg(name: impl Into<String>, arg: Tag) -> Self {
        Tag { components: vec![TagComponent { name: name.into(), args: vec![arg] }] }
    }

    /// The first (outermost) component — the one that decides which patch
    /// operator, if any, this tag selects.
    pub fn head(&self) -> Option<&TagComponent> {
        self.components.first()
    }

    /// `true` if the head component's name starts with `!`, i.e. this tag
    /// selects a patch operator rather than a plain annotation.
    pub fn is_operator(&self) -> bool {
        self.head().map(|c| c.name.starts_with('!')).unwrap_or(false)
    }

    /// The operator name with its leading `!` stripped, e.g. `"insert"`.
    pub fn operator_name(&self) -> Option<&str> {
        self.head().and_then(|c| c.name.strip_prefix('!'))
    }

    pub fn parse(input: &str) -> Result<Tag> {
        let mut parser = TagParser { chars: input.chars().collect(), pos: 0 };
        let tag = parser.parse_tag()?;
        parser.skip_ws();
        if parser.pos != parser.chars.len() {
            return Err(Error::TagParse(format!("trailing input in tag {input:?}")));
        }
        Ok(tag)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, c) in self.components.iter().enumerate() {
            if i > 0 {
                write!(f, ".")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

impl fmt::Display for TagComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if !self.args.is_empty() {
            write!(f, "(")?;
            for (i, a) in self.args.iter().enumerate() {
                if i > 0 {
                    write!(f, ", ")?;
                }
                write!(f, "{a}")?;
            }
            write!(f, ")")?;
        }
        Ok(())
    }
}

struct TagParser {
    chars: Vec<char>,
    pos: usize,
}

impl TagParser {
    fn skip_ws(&mut self) {
        while self.peek().is_some_and(|c| c.is_whitespace()) {
            self.pos += 1;
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek();
        if c.is_some() {
            self.pos += 1;
        }
        c
    }

    fn parse_tag(&mut self) -> Result<Tag> {
        let mut components = vec![self.parse_component()?];
        loop {
            self.skip_ws();
            if self.peek() == Some('.') {
                self.bump();
                components.push(self.parse_component()?);
            } else {
                break;
            }
        }
        Ok(Tag { components })
    }

    fn parse_component(&mut self) -> Result<TagComponent> {
        self.skip_ws();
        let mut name = String::new();
        if self.peek() == Some('!') {
            name.push(self.bump().unwrap());
        }
        let start = self.pos;
        while self.peek().is_some_and(|c| c.is_alphanumeric() || c == '_') {
            name.push(self.bump().unwrap());
        }
        if self.pos == start {
            return Err(Error::TagParse(format!(
                "expected tag component name at position {}",
                self.pos
            )));
        }

        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some('(') {
            self.bump();
            self.skip_ws();
            if self.peek() != Some(')') {
                loop {
                    args.push(self.parse_tag()?);
                    self.skip_ws();
                    match self.peek() {
                        Some(',') => {
                            self.bump();
                        }
                        Some(')') => break,
                        other => {
                            return Err(Error::TagParse(format!(
                                "expected ',' or ')' in tag arguments, found {other:?}"
                            )));
                        }
                    }
                }
            }
            self.skip_ws();
            if self.bump() != Some(')') {
                return Err(Error::TagParse("unterminated tag argument list".to_string()));
            }
        }

        Ok(TagComponent { name, args })
    }
}
