//! Selector compiler
//!
//! Turns a CSS-like selector string into a structured [`Query`]:
//!
//! ```text
//! SELECTOR := GROUP (',' GROUP)*
//! GROUP    := ( '.' NAME ATTR* | '*' ATTR* | ':' NAME ATTR* | '#' NAME )+
//! ATTR     := '[' NAME '="' VALUE (',' VALUE)* '"]'
//! ```
//!
//! Input is lower-cased and stripped of whitespace first. The whole-string
//! tokens `none` (or an empty string) and `all` / `any` are reserved.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;

use crate::error::{ChordError, Result};

/// What a group entry is matched against
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum TargetKey {
    /// Device-level properties (name, type, joint, os)
    Wildcard,
    /// A named capability
    Capability(String),
}

impl TargetKey {
    pub fn capability(name: &str) -> Self {
        Self::Capability(name.to_string())
    }
}

impl std::fmt::Display for TargetKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Wildcard => f.write_str("*"),
            Self::Capability(name) => f.write_str(name),
        }
    }
}

impl Serialize for TargetKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// A constraint on one attribute or property
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Constraint {
    /// The stored value must equal every listed value
    And(Vec<String>),
    /// The stored value must equal at least one listed value
    Or(Vec<String>),
    /// Scalar equality, produced by `#name`
    #[serde(untagged)]
    Exact(String),
}

impl Constraint {
    pub fn and(value: &str) -> Self {
        Self::And(vec![value.to_string()])
    }

    pub fn or(values: &[&str]) -> Self {
        Self::Or(values.iter().map(|v| v.to_string()).collect())
    }
}

/// Attribute name to constraint
pub type Constraints = BTreeMap<String, Constraint>;

/// One AND/OR operand: every target key must be satisfied
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Group {
    targets: BTreeMap<TargetKey, Constraints>,
}

impl Group {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder form of [`Group::merge`]
    pub fn with(mut self, key: TargetKey, constraints: Constraints) -> Self {
        self.merge(key, constraints);
        self
    }

    /// Merge constraints into a target key; later attributes overwrite earlier ones
    pub fn merge(&mut self, key: TargetKey, constraints: Constraints) {
        self.targets.entry(key).or_default().extend(constraints);
    }

    pub fn get(&self, key: &TargetKey) -> Option<&Constraints> {
        self.targets.get(key)
    }

    pub fn targets(&self) -> impl Iterator<Item = (&TargetKey, &Constraints)> {
        self.targets.iter()
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

/// Compiled selector body
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Query {
    And(Vec<Group>),
    Or(Vec<Group>),
}

impl Query {
    pub fn groups(&self) -> &[Group] {
        match self {
            Self::And(groups) | Self::Or(groups) => groups,
        }
    }
}

/// Result of compiling a selector string
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Selector {
    /// Matches no device
    Nothing,
    Query(Query),
}

impl Selector {
    /// Compile a selector string
    pub fn compile(input: &str) -> Result<Self> {
        let normalized: String = input
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_lowercase();

        match normalized.as_str() {
            "" | "none" => Ok(Self::Nothing),
            "all" | "any" => Ok(Self::everything()),
            _ => Parser::new(&normalized).parse().map(Self::Query),
        }
    }

    /// A query made of one empty wildcard group
    pub fn everything() -> Self {
        Self::Query(Query::And(vec![
            Group::new().with(TargetKey::Wildcard, Constraints::new())
        ]))
    }

    pub fn query(&self) -> Option<&Query> {
        match self {
            Self::Nothing => None,
            Self::Query(query) => Some(query),
        }
    }

    /// Capability names referenced anywhere in the selector
    pub fn capability_names(&self) -> Vec<&str> {
        let mut names = Vec::new();
        for group in self.query().map(Query::groups).unwrap_or_default() {
            for (key, _) in group.targets() {
                if let TargetKey::Capability(name) = key {
                    if !names.contains(&name.as_str()) {
                        names.push(name.as_str());
                    }
                }
            }
        }
        names
    }
}

impl std::str::FromStr for Selector {
    type Err = ChordError;

    fn from_str(s: &str) -> Result<Self> {
        Self::compile(s)
    }
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn is_value_char(c: char) -> bool {
    is_name_char(c) || c == '.'
}

/// Recursive-descent parser over a normalized selector string
struct Parser<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            chars: source.chars().collect(),
            pos: 0,
        }
    }

    fn parse(mut self) -> Result<Query> {
        let mut groups = vec![self.parse_group()?];
        while self.peek() == Some(',') {
            self.pos += 1;
            groups.push(self.parse_group()?);
        }
        if let Some(c) = self.peek() {
            return Err(self.error(format!("unexpected character '{}'", c)));
        }

        if groups.len() > 1 {
            Ok(Query::Or(groups))
        } else {
            Ok(Query::And(groups))
        }
    }

    fn parse_group(&mut self) -> Result<Group> {
        let mut group = Group::new();
        let mut parts = 0;

        loop {
            match self.peek() {
                Some('.') => {
                    self.pos += 1;
                    let name = self.parse_name("capability name")?;
                    let constraints = self.parse_attributes()?;
                    group.merge(TargetKey::Capability(name), constraints);
                }
                Some('*') => {
                    self.pos += 1;
                    let constraints = self.parse_attributes()?;
                    group.merge(TargetKey::Wildcard, constraints);
                }
                Some(':') => {
                    self.pos += 1;
                    let device_type = self.parse_name("device type")?;
                    let mut constraints = self.parse_attributes()?;
                    constraints.insert("type".to_string(), Constraint::And(vec![device_type]));
                    group.merge(TargetKey::Wildcard, constraints);
                }
                Some('#') => {
                    self.pos += 1;
                    let name = self.parse_name("device name")?;
                    let mut constraints = Constraints::new();
                    constraints.insert("name".to_string(), Constraint::Exact(name));
                    group.merge(TargetKey::Wildcard, constraints);
                }
                // A bare word opening the selector names a capability
                Some(c) if self.pos == 0 && is_name_char(c) => {
                    let name = self.parse_name("capability name")?;
                    let constraints = self.parse_attributes()?;
                    group.merge(TargetKey::Capability(name), constraints);
                }
                _ => break,
            }
            parts += 1;
        }

        if parts == 0 {
            return Err(self.error("expected '.', '*', '#' or ':'"));
        }
        Ok(group)
    }

    fn parse_attributes(&mut self) -> Result<Constraints> {
        let mut constraints = Constraints::new();
        while self.peek() == Some('[') {
            self.pos += 1;
            let key = self.parse_name("attribute name")?;
            self.expect('=')?;
            self.expect('"')?;
            let mut values = vec![self.parse_value()?];
            while self.peek() == Some(',') {
                self.pos += 1;
                values.push(self.parse_value()?);
            }
            self.expect('"')?;
            self.expect(']')?;

            let constraint = if values.len() > 1 {
                Constraint::Or(values)
            } else {
                Constraint::And(values)
            };
            constraints.insert(key, constraint);
        }
        Ok(constraints)
    }

    fn parse_name(&mut self, what: &str) -> Result<String> {
        let name = self.take_while(is_name_char);
        if name.is_empty() {
            return Err(self.error(format!("expected {}", what)));
        }
        Ok(name)
    }

    fn parse_value(&mut self) -> Result<String> {
        let value = self.take_while(is_value_char);
        if value.is_empty() {
            return Err(self.error("empty attribute value"));
        }
        Ok(value)
    }

    fn take_while(&mut self, pred: fn(char) -> bool) -> String {
        let start = self.pos;
        while self.peek().is_some_and(pred) {
            self.pos += 1;
        }
        self.chars[start..self.pos].iter().collect()
    }

    fn expect(&mut self, expected: char) -> Result<()> {
        match self.peek() {
            Some(c) if c == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(c) => Err(self.error(format!("expected '{}', found '{}'", expected, c))),
            None => Err(self.error(format!("expected '{}', found end of selector", expected))),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn error(&self, reason: impl Into<String>) -> ChordError {
        ChordError::invalid_selector(self.source, self.pos, reason)
    }
}
