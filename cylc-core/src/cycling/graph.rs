//! Graph string parser: a newline-separated set of expressions built from
//! `=>`, `&`, `|`, parenthesization, `:suffix` output qualifiers, and
//! family shorthand (`FAM:succeed-all`, `FAM:succeed-any`, `FAM:finish-all`,
//! `FAM:finish-any`). Produces, per successor task name, the set of
//! prerequisite clauses contributed by each `=>` edge group.

use std::collections::BTreeMap;

use crate::error::GraphParseError;

/// The trigger qualifier on one side of an edge, e.g. the `:fail` in `a:fail => b`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Trigger {
    /// No suffix: the task's default output (`succeed`).
    Default,
    Succeed,
    Fail,
    /// Satisfied by either `succeed` or `fail`.
    Finish,
    Custom(String),
}

impl Trigger {
    fn parse(suffix: Option<&str>) -> Self {
        match suffix {
            None => Trigger::Default,
            Some("succeed") => Trigger::Succeed,
            Some("fail") => Trigger::Fail,
            Some("finish") => Trigger::Finish,
            Some(other) => Trigger::Custom(other.to_string()),
        }
    }

    pub fn output_message(&self) -> &str {
        match self {
            Trigger::Default | Trigger::Succeed => "succeeded",
            Trigger::Fail => "failed",
            Trigger::Finish => "finished",
            Trigger::Custom(m) => m,
        }
    }
}

/// One atomic prerequisite: a reference to an upstream task's output.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct AtomicPrereq {
    pub upstream_name: String,
    pub trigger: Trigger,
}

/// A boolean expression over atomic prerequisites, already simplified
/// (`a|a = a`, `a&a = a`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    Atom(AtomicPrereq),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    fn simplify(self) -> Expr {
        match self {
            Expr::And(mut parts) => {
                parts = parts.into_iter().map(Expr::simplify).collect();
                dedup_flatten(parts, true)
            }
            Expr::Or(mut parts) => {
                parts = parts.into_iter().map(Expr::simplify).collect();
                dedup_flatten(parts, false)
            }
            atom => atom,
        }
    }

    /// Every leaf atomic prerequisite this expression touches, for
    /// successor-side edges where only the leaf *names* matter.
    fn leaves(&self) -> Vec<&AtomicPrereq> {
        match self {
            Expr::Atom(a) => vec![a],
            Expr::And(parts) | Expr::Or(parts) => parts.iter().flat_map(Expr::leaves).collect(),
        }
    }
}

fn dedup_flatten(parts: Vec<Expr>, is_and: bool) -> Expr {
    let mut flat = Vec::new();
    for part in parts {
        match (&part, is_and) {
            (Expr::And(inner), true) => flat.extend(inner.clone()),
            (Expr::Or(inner), false) => flat.extend(inner.clone()),
            _ => flat.push(part),
        }
    }
    let mut seen = Vec::new();
    for part in flat {
        if !seen.contains(&part) {
            seen.push(part);
        }
    }
    if seen.len() == 1 {
        seen.into_iter().next().unwrap()
    } else if is_and {
        Expr::And(seen)
    } else {
        Expr::Or(seen)
    }
}

/// A single successor task's accumulated prerequisite clauses: one clause
/// per `=>` edge group that named it, to be ANDed together by the pool
/// (spec.md §3: "a set of satisfiable clauses").
#[derive(Debug, Clone, Default)]
pub struct TaskGraphEntry {
    pub clauses: Vec<Expr>,
}

/// The parsed result: for every task name mentioned as a successor, its
/// prerequisite clauses; plus the set of task names that appeared only as
/// a source (no incoming edge) and are therefore startup-eligible.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub entries: BTreeMap<String, TaskGraphEntry>,
    pub all_names: Vec<String>,
}

/// A family name to its member task names, for `FAM:succeed-all` style expansion.
pub type Families = BTreeMap<String, Vec<String>>;

pub fn parse_graph(text: &str, families: &Families) -> Result<Graph, GraphParseError> {
    let mut graph = Graph::default();
    let mut seen_names = Vec::new();
    for raw_line in text.lines() {
        let line = strip_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }
        let tokens = tokenize(line)?;
        let stages = split_on_arrows(&tokens, line)?;
        let mut parsed_stages = Vec::with_capacity(stages.len());
        for stage in &stages {
            let mut pos = 0;
            let expr = parse_or(stage, &mut pos, families, line)?;
            if pos != stage.len() {
                return Err(GraphParseError::new("unbalanced operators", line, 0));
            }
            parsed_stages.push(expr.simplify());
        }

        for expr in &parsed_stages {
            for leaf in expr.leaves() {
                if !seen_names.contains(&leaf.upstream_name) {
                    seen_names.push(leaf.upstream_name.clone());
                }
            }
        }

        for window in parsed_stages.windows(2) {
            let (lhs, rhs) = (&window[0], &window[1]);
            for leaf in rhs.leaves() {
                if !seen_names.contains(&leaf.upstream_name) {
                    seen_names.push(leaf.upstream_name.clone());
                }
                graph
                    .entries
                    .entry(leaf.upstream_name.clone())
                    .or_default()
                    .clauses
                    .push(lhs.clone());
            }
        }
    }
    graph.all_names = seen_names;
    Ok(graph)
}

fn strip_comment(line: &str) -> &str {
    match line.find('#') {
        Some(idx) => &line[..idx],
        None => line,
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    LParen,
    RParen,
    And,
    Or,
    Arrow,
    Name(String),
}

fn tokenize(line: &str) -> Result<Vec<Token>, GraphParseError> {
    let mut tokens = Vec::new();
    let bytes: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        match c {
            ' ' | '\t' => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            '&' => {
                tokens.push(Token::And);
                i += 1;
            }
            '|' => {
                tokens.push(Token::Or);
                i += 1;
            }
            '=' if bytes.get(i + 1) == Some(&'>') => {
                tokens.push(Token::Arrow);
                i += 2;
            }
            _ => {
                let start = i;
                while i < bytes.len() && !" \t()&|".contains(bytes[i]) && !(bytes[i] == '=' && bytes.get(i + 1) == Some(&'>')) {
                    i += 1;
                }
                let word: String = bytes[start..i].iter().collect();
                if word.contains(' ') {
                    return Err(GraphParseError::new("spaces are not permitted in task names", line, start));
                }
                tokens.push(Token::Name(word));
            }
        }
    }
    Ok(tokens)
}

fn split_on_arrows(tokens: &[Token], line: &str) -> Result<Vec<Vec<Token>>, GraphParseError> {
    if tokens.is_empty() {
        return Err(GraphParseError::new("empty expression", line, 0));
    }
    let mut stages = Vec::new();
    let mut current = Vec::new();
    for token in tokens {
        if *token == Token::Arrow {
            if current.is_empty() {
                return Err(GraphParseError::new("'=>' with nothing on one side", line, 0));
            }
            stages.push(std::mem::take(&mut current));
        } else {
            current.push(token.clone());
        }
    }
    if current.is_empty() {
        return Err(GraphParseError::new("'=>' with nothing on one side", line, 0));
    }
    stages.push(current);
    Ok(stages)
}

fn parse_or(tokens: &[Token], pos: &mut usize, families: &Families, line: &str) -> Result<Expr, GraphParseError> {
    let mut parts = vec![parse_and(tokens, pos, families, line)?];
    while matches!(tokens.get(*pos), Some(Token::Or)) {
        *pos += 1;
        parts.push(parse_and(tokens, pos, families, line)?);
    }
    Ok(if parts.len() == 1 { parts.pop().unwrap() } else { Expr::Or(parts) })
}

fn parse_and(tokens: &[Token], pos: &mut usize, families: &Families, line: &str) -> Result<Expr, GraphParseError> {
    let mut parts = vec![parse_atom(tokens, pos, families, line)?];
    while matches!(tokens.get(*pos), Some(Token::And)) {
        *pos += 1;
        parts.push(parse_atom(tokens, pos, families, line)?);
    }
    Ok(if parts.len() == 1 { parts.pop().unwrap() } else { Expr::And(parts) })
}

fn parse_atom(tokens: &[Token], pos: &mut usize, families: &Families, line: &str) -> Result<Expr, GraphParseError> {
    match tokens.get(*pos) {
        Some(Token::LParen) => {
            *pos += 1;
            let inner = parse_or(tokens, pos, families, line)?;
            match tokens.get(*pos) {
                Some(Token::RParen) => {
                    *pos += 1;
                    Ok(inner)
                }
                _ => Err(GraphParseError::new("unbalanced parentheses", line, *pos)),
            }
        }
        Some(Token::Name(word)) => {
            *pos += 1;
            parse_name(word, families, line)
        }
        _ => Err(GraphParseError::new("expected a task name or '('", line, *pos)),
    }
}

fn parse_name(word: &str, families: &Families, line: &str) -> Result<Expr, GraphParseError> {
    let (name, suffix) = match word.split_once(':') {
        Some((n, s)) => (n, Some(s)),
        None => (word, None),
    };
    if name.is_empty() {
        return Err(GraphParseError::new("empty task name", line, 0));
    }

    if let Some(members) = families.get(name) {
        let (qualifier, is_all) = match suffix {
            Some("succeed-all") => (Trigger::Succeed, true),
            Some("succeed-any") => (Trigger::Succeed, false),
            Some("finish-all") => (Trigger::Finish, true),
            Some("finish-any") => (Trigger::Finish, false),
            None => (Trigger::Succeed, true),
            Some(other) => return Err(GraphParseError::new(format!("unknown family qualifier {other:?}"), line, 0)),
        };
        let member_exprs: Vec<Expr> = members
            .iter()
            .map(|m| {
                Expr::Atom(AtomicPrereq {
                    upstream_name: m.clone(),
                    trigger: qualifier.clone(),
                })
            })
            .collect();
        return Ok(if is_all { Expr::And(member_exprs) } else { Expr::Or(member_exprs) });
    }

    Ok(Expr::Atom(AtomicPrereq {
        upstream_name: name.to_string(),
        trigger: Trigger::parse(suffix),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn no_families() -> Families {
        Families::new()
    }

    #[test]
    fn linear_edge_produces_single_clause() {
        let graph = parse_graph("a => b", &no_families()).unwrap();
        let entry = graph.entries.get("b").unwrap();
        assert_eq!(entry.clauses.len(), 1);
        assert_eq!(
            entry.clauses[0],
            Expr::Atom(AtomicPrereq {
                upstream_name: "a".to_string(),
                trigger: Trigger::Default
            })
        );
    }

    #[test]
    fn chained_arrows_produce_two_edges() {
        let graph = parse_graph("a => b => c", &no_families()).unwrap();
        assert!(graph.entries.contains_key("b"));
        assert!(graph.entries.contains_key("c"));
    }

    #[test]
    fn and_or_simplify_duplicates() {
        let graph = parse_graph("a | a => b", &no_families()).unwrap();
        assert_eq!(
            graph.entries["b"].clauses[0],
            Expr::Atom(AtomicPrereq {
                upstream_name: "a".to_string(),
                trigger: Trigger::Default
            })
        );
    }

    #[test]
    fn family_succeed_any_becomes_or() {
        let mut families = no_families();
        families.insert("FAM".to_string(), vec!["m1".to_string(), "m2".to_string()]);
        let graph = parse_graph("FAM:succeed-any => post", &families).unwrap();
        match &graph.entries["post"].clauses[0] {
            Expr::Or(parts) => assert_eq!(parts.len(), 2),
            other => panic!("expected Or, got {other:?}"),
        }
    }

    #[test]
    fn unbalanced_parens_is_an_error() {
        let result = parse_graph("(a & b => c", &no_families());
        assert!(result.is_err());
    }
}
