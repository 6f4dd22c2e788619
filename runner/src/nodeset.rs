use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::{btree_set, BTreeMap, BTreeSet},
    fmt,
    str::FromStr,
};
use thiserror::Error;

#[cfg(test)]
mod nodeset_test;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NodeSetError {
    #[error("Unbalanced brackets in node list `{0}`")]
    UnbalancedBrackets(String),
    #[error("Invalid range `{0}` in node list")]
    InvalidRange(String),
}

/// Ordered set of node names
///
/// The compact (hostlist) form is used for parsing and display, e.g. `node[1-3,7],login1`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeSet {
    nodes: BTreeSet<String>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: impl Into<String>) -> bool {
        self.nodes.insert(node.into())
    }

    pub fn contains(&self, node: &str) -> bool {
        self.nodes.contains(node)
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn iter(&self) -> btree_set::Iter<'_, String> {
        self.nodes.iter()
    }

    /// nodes in `self` that are not in `other`
    pub fn difference(&self, other: &NodeSet) -> NodeSet {
        self.nodes.difference(&other.nodes).cloned().collect()
    }

    pub fn union(&self, other: &NodeSet) -> NodeSet {
        self.nodes.union(&other.nodes).cloned().collect()
    }

    pub fn intersection(&self, other: &NodeSet) -> NodeSet {
        self.nodes.intersection(&other.nodes).cloned().collect()
    }

    /// space separated list of all nodes, as expected by tools that don't understand ranges
    pub fn spaced(&self) -> String {
        self.nodes.iter().join(" ")
    }
}

impl<S: Into<String>> FromIterator<S> for NodeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            nodes: iter.into_iter().map(Into::into).collect(),
        }
    }
}

impl<'a> IntoIterator for &'a NodeSet {
    type Item = &'a String;
    type IntoIter = btree_set::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.iter()
    }
}

impl FromStr for NodeSet {
    type Err = NodeSetError;

    /// expand a compact node list into its members
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let mut nodes = BTreeSet::new();

        for token in split_top_level(input)? {
            let token = token.trim();

            if token.is_empty() {
                continue;
            }

            match token.find('[') {
                None => {
                    if token.contains(']') {
                        return Err(NodeSetError::UnbalancedBrackets(token.to_string()));
                    }
                    nodes.insert(token.to_string());
                }
                Some(open) => {
                    let close = token
                        .rfind(']')
                        .filter(|close| *close > open)
                        .ok_or_else(|| NodeSetError::UnbalancedBrackets(token.to_string()))?;
                    let prefix = &token[..open];
                    let suffix = &token[close + 1..];

                    for range in token[open + 1..close].split(',') {
                        for index in expand_range(range.trim())? {
                            nodes.insert(format!("{prefix}{index}{suffix}"));
                        }
                    }
                }
            }
        }

        Ok(Self { nodes })
    }
}

impl TryFrom<String> for NodeSet {
    type Error = NodeSetError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeSet> for String {
    fn from(set: NodeSet) -> Self {
        set.to_string()
    }
}

impl fmt::Display for NodeSet {
    /// compress the set into its compact form
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // prefix -> (number, original digits); names without a numeric suffix stay as they are
        let mut numbered: BTreeMap<&str, Vec<(u64, &str)>> = BTreeMap::new();
        let mut plain = Vec::new();

        for node in &self.nodes {
            let digits = node.len()
                - node
                    .chars()
                    .rev()
                    .take_while(char::is_ascii_digit)
                    .count();

            match node[digits..].parse::<u64>() {
                Ok(number) if digits < node.len() => numbered
                    .entry(&node[..digits])
                    .or_default()
                    .push((number, &node[digits..])),
                _ => plain.push(node.clone()),
            }
        }

        let mut groups = plain;

        for (prefix, mut members) in numbered {
            members.sort_unstable();

            if let [(_, digits)] = members.as_slice() {
                groups.push(format!("{prefix}{digits}"));
                continue;
            }

            let ranges = collapse_ranges(&members)
                .into_iter()
                .map(|(first, last)| {
                    if first == last {
                        first.to_string()
                    } else {
                        format!("{first}-{last}")
                    }
                })
                .join(",");

            groups.push(format!("{prefix}[{ranges}]"));
        }

        groups.sort();
        write!(f, "{}", groups.join(","))
    }
}

/// split on commas that are not enclosed in brackets
fn split_top_level(input: &str) -> Result<Vec<&str>, NodeSetError> {
    let mut tokens = Vec::new();
    let mut depth = 0usize;
    let mut start = 0;

    for (position, character) in input.char_indices() {
        match character {
            '[' => depth += 1,
            ']' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| NodeSetError::UnbalancedBrackets(input.to_string()))?
            }
            ',' | ' ' | '\n' | '\t' if depth == 0 => {
                tokens.push(&input[start..position]);
                start = position + character.len_utf8();
            }
            _ => {}
        }
    }

    if depth != 0 {
        return Err(NodeSetError::UnbalancedBrackets(input.to_string()));
    }

    tokens.push(&input[start..]);

    Ok(tokens)
}

/// expand `7`, `1-3` or zero padded `01-03` into the formatted indices
fn expand_range(range: &str) -> Result<Vec<String>, NodeSetError> {
    let invalid = || NodeSetError::InvalidRange(range.to_string());
    let (low, high) = range.split_once('-').unwrap_or((range, range));

    if low.is_empty() || !low.bytes().chain(high.bytes()).all(|b| b.is_ascii_digit()) {
        return Err(invalid());
    }

    let width = padding(low);
    let first: u64 = low.parse().map_err(|_| invalid())?;
    let last: u64 = high.parse().map_err(|_| invalid())?;

    if first > last {
        return Err(invalid());
    }

    Ok((first..=last)
        .map(|index| format!("{index:0width$}"))
        .collect())
}

fn padding(digits: &str) -> usize {
    if digits.len() > 1 && digits.starts_with('0') {
        digits.len()
    } else {
        0
    }
}

/// merge sorted indices into (first, last) ranges which expand back to the same names
fn collapse_ranges<'a>(members: &[(u64, &'a str)]) -> Vec<(&'a str, &'a str)> {
    let mut ranges: Vec<(&str, &str, u64, usize)> = Vec::new();

    for &(number, digits) in members {
        match ranges.last_mut() {
            Some((_, last, previous, width))
                if number == *previous + 1 && format!("{number:0width$}", width = *width) == digits =>
            {
                *last = digits;
                *previous = number;
            }
            _ => ranges.push((digits, digits, number, padding(digits))),
        }
    }

    ranges
        .into_iter()
        .map(|(first, last, _, _)| (first, last))
        .collect()
}
