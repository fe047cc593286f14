//! Host pattern grammar.
//!
//! A pattern is split into terms, each term is parsed once into a [`Term`]
//! (operator prefix, name expression, optional subscript) and the terms are
//! reordered so that unions come first, then intersections, then exclusions.
//!
//! ```text
//! pattern   := term (("," | ":") term)*
//! term      := ("&" | "!")? expr subscript?
//! expr      := "~" regex | glob | name
//! subscript := "[" index "]" | "[" start? ":" end? "]" | "[" start "-" end "]"
//! ```
//!
//! Subscript positions are 1-based and inclusive; an end of `-1` (or an empty
//! end) means the last matched host.

use std::fmt;

use globset::{GlobBuilder, GlobMatcher};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::warn;

use super::address::parse_address;
use crate::error::{Error, Result};

static COMMA_SPLIT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*,\s*").expect("Invalid comma split regex"));
static COLON_TERM: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:[^\s:\[\]]|\[[^\]]*\])+").expect("Invalid colon term regex")
});
static SUBSCRIPT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(.+)\[([0-9:-]*)\]$").expect("Invalid subscript regex"));
static SUBSCRIPT_RANGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([0-9]*)([:-])(-?[0-9]*)$").expect("Invalid subscript range regex")
});

/// Caller-supplied pattern: a single string or a list of strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PatternInput {
    /// Comma/colon separated text
    Text(String),
    /// Pre-split list; each element may itself contain commas
    List(Vec<String>),
}

impl PatternInput {
    /// Flatten into individual terms.
    pub fn split(&self) -> Vec<String> {
        match self {
            PatternInput::Text(text) => split_host_pattern(text),
            PatternInput::List(items) => items.iter().flat_map(|p| split_host_pattern(p)).collect(),
        }
    }
}

impl From<&str> for PatternInput {
    fn from(value: &str) -> Self {
        PatternInput::Text(value.to_string())
    }
}

impl From<String> for PatternInput {
    fn from(value: String) -> Self {
        PatternInput::Text(value)
    }
}

impl From<&String> for PatternInput {
    fn from(value: &String) -> Self {
        PatternInput::Text(value.clone())
    }
}

impl From<Vec<String>> for PatternInput {
    fn from(value: Vec<String>) -> Self {
        PatternInput::List(value)
    }
}

impl From<&[String]> for PatternInput {
    fn from(value: &[String]) -> Self {
        PatternInput::List(value.to_vec())
    }
}

impl From<&[&str]> for PatternInput {
    fn from(value: &[&str]) -> Self {
        PatternInput::List(value.iter().map(|s| s.to_string()).collect())
    }
}

impl fmt::Display for PatternInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PatternInput::Text(text) => write!(f, "{text}"),
            PatternInput::List(items) => write!(f, "{}", items.join(",")),
        }
    }
}

/// Split a pattern string into terms.
///
/// Commas are authoritative. Without a comma, text that parses as a single
/// address (ranges allowed) is one term; anything else falls back to the
/// legacy colon-separated form, which mis-splits bare IPv6 literals.
pub fn split_host_pattern(pattern: &str) -> Vec<String> {
    let pattern = pattern.trim();
    if pattern.is_empty() {
        return Vec::new();
    }

    if pattern.contains(',') {
        return COMMA_SPLIT
            .split(pattern)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(String::from)
            .collect();
    }

    if parse_address(pattern, true).is_ok() {
        return vec![pattern.to_string()];
    }

    COLON_TERM
        .find_iter(pattern)
        .map(|m| m.as_str().trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

/// How a term combines with the running result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternOp {
    /// Unprefixed: union into the result
    Union,
    /// `&`: intersect the result
    Intersect,
    /// `!`: subtract from the result
    Exclude,
}

/// Upper bound of a subscript range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptEnd {
    /// Inclusive 1-based position
    At(usize),
    /// Through the last matched host
    Last,
}

/// Parsed `[..]` suffix of a term.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Subscript {
    /// `[n]`
    Index(usize),
    /// `[a:b]`, `[a:]`, `[:b]`
    Range {
        /// Inclusive 1-based start
        start: usize,
        /// Inclusive end
        end: SubscriptEnd,
    },
}

impl Subscript {
    /// Select from an ordered host list, failing when the subscript starts
    /// past the end of the list.
    pub fn apply(&self, term: &str, hosts: Vec<String>) -> Result<Vec<String>> {
        match *self {
            Subscript::Index(i) => hosts
                .into_iter()
                .nth(i - 1)
                .map(|h| vec![h])
                .ok_or_else(|| Error::SubscriptOutOfRange(term.to_string())),
            Subscript::Range { start, end } => {
                if start > hosts.len() {
                    return Err(Error::SubscriptOutOfRange(term.to_string()));
                }
                let stop = match end {
                    SubscriptEnd::At(e) => e.min(hosts.len()),
                    SubscriptEnd::Last => hosts.len(),
                };
                Ok(hosts[start - 1..stop].to_vec())
            }
        }
    }
}

/// Name expression of a term.
#[derive(Debug, Clone)]
pub enum TermExpr {
    /// Plain name
    Literal(String),
    /// Shell glob (`*`, `?`, `[seq]`, `[!seq]`)
    Glob(String, GlobMatcher),
    /// `~`-prefixed regex, matched at the start of the name
    Regex(String, Regex),
}

impl TermExpr {
    /// Compile an expression.
    pub fn compile(expr: &str) -> Result<Self> {
        if let Some(source) = expr.strip_prefix('~') {
            let regex = Regex::new(&format!("^(?:{source})"))
                .map_err(|e| Error::parse(expr, format!("invalid regex: {e}")))?;
            return Ok(TermExpr::Regex(expr.to_string(), regex));
        }
        if expr.contains(['*', '?', '[']) {
            let glob = GlobBuilder::new(expr)
                .literal_separator(false)
                .build()
                .map_err(|e| Error::parse(expr, format!("invalid glob: {e}")))?;
            return Ok(TermExpr::Glob(expr.to_string(), glob.compile_matcher()));
        }
        Ok(TermExpr::Literal(expr.to_string()))
    }

    /// Source text of the expression
    pub fn source(&self) -> &str {
        match self {
            TermExpr::Literal(s) | TermExpr::Glob(s, _) | TermExpr::Regex(s, _) => s,
        }
    }

    /// Whether a name matches
    pub fn matches(&self, name: &str) -> bool {
        match self {
            TermExpr::Literal(s) => s == name,
            TermExpr::Glob(_, glob) => glob.is_match(name),
            TermExpr::Regex(_, regex) => regex.is_match(name),
        }
    }

    /// Globs, regexes, and dotted names also match host names after a group match.
    pub fn also_matches_hosts(&self) -> bool {
        match self {
            TermExpr::Literal(s) => s.contains('.'),
            TermExpr::Glob(..) | TermExpr::Regex(..) => true,
        }
    }
}

/// One parsed pattern term.
#[derive(Debug, Clone)]
pub struct Term {
    /// Combination operator
    pub op: PatternOp,
    /// Term text without the operator prefix, subscript included
    pub key: String,
    /// Name expression
    pub expr: TermExpr,
    /// Optional positional selection
    pub subscript: Option<Subscript>,
}

impl Term {
    /// Parse a single term.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (op, body) = if let Some(rest) = raw.strip_prefix('&') {
            (PatternOp::Intersect, rest)
        } else if let Some(rest) = raw.strip_prefix('!') {
            (PatternOp::Exclude, rest)
        } else {
            (PatternOp::Union, raw)
        };
        if body.is_empty() {
            return Err(Error::parse(raw, "empty pattern term"));
        }

        let (expr, subscript) = split_subscript(body)?;
        Ok(Self {
            op,
            key: body.to_string(),
            expr: TermExpr::compile(expr)?,
            subscript,
        })
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            PatternOp::Union => write!(f, "{}", self.key),
            PatternOp::Intersect => write!(f, "&{}", self.key),
            PatternOp::Exclude => write!(f, "!{}", self.key),
        }
    }
}

fn parse_position(term: &str, text: &str) -> Result<usize> {
    let value: usize = text
        .parse()
        .map_err(|_| Error::parse(term, "subscript positions must be positive integers"))?;
    if value == 0 {
        return Err(Error::parse(term, "subscript positions start at 1"));
    }
    Ok(value)
}

/// Separate a trailing numeric subscript from a term body.
///
/// Regex terms never carry a subscript. Bracket content made only of digits,
/// `:` and `-` must be a well-formed subscript; anything else is left to the
/// glob matcher as a character class.
pub fn split_subscript(body: &str) -> Result<(&str, Option<Subscript>)> {
    if body.starts_with('~') {
        return Ok((body, None));
    }
    let Some(caps) = SUBSCRIPT.captures(body) else {
        return Ok((body, None));
    };
    let name_end = caps.get(1).map_or(body.len(), |m| m.end());
    let name = &body[..name_end];
    let inner = caps.get(2).map_or("", |m| m.as_str());

    if inner.is_empty() {
        return Err(Error::parse(body, "empty subscript"));
    }

    if inner.starts_with('-') && !inner[1..].contains([':', '-']) {
        return Err(Error::parse(body, "negative subscript indexes are not supported"));
    }

    if inner.chars().all(|c| c.is_ascii_digit()) {
        return Ok((name, Some(Subscript::Index(parse_position(body, inner)?))));
    }

    let Some(range) = SUBSCRIPT_RANGE.captures(inner) else {
        return Err(Error::parse(body, "malformed subscript"));
    };
    let start_text = &range[1];
    let separator = &range[2];
    let end_text = &range[3];

    if separator == "-" {
        if start_text.is_empty() || end_text.is_empty() || end_text.starts_with('-') {
            return Err(Error::parse(body, "malformed subscript"));
        }
        warn!(
            "Use [x:y] inclusive subscripts instead of [x-y] which has been removed: {}",
            body
        );
    }

    let start = if start_text.is_empty() {
        1
    } else {
        parse_position(body, start_text)?
    };
    let end = match end_text {
        "" | "-1" => SubscriptEnd::Last,
        text if text.starts_with('-') => {
            return Err(Error::parse(body, "only -1 is supported as a negative subscript end"));
        }
        text => {
            let end = parse_position(body, text)?;
            if end < start {
                return Err(Error::parse(body, "subscript range ends before it starts"));
            }
            SubscriptEnd::At(end)
        }
    };

    Ok((name, Some(Subscript::Range { start, end })))
}

/// Parse and reorder terms: unions, then intersections, then exclusions.
///
/// With no union term, `all` is synthesized as the base set.
pub fn order_patterns(terms: &[String]) -> Result<Vec<Term>> {
    let mut regular = Vec::new();
    let mut intersect = Vec::new();
    let mut exclude = Vec::new();

    for raw in terms {
        let term = Term::parse(raw)?;
        match term.op {
            PatternOp::Union => regular.push(term),
            PatternOp::Intersect => intersect.push(term),
            PatternOp::Exclude => exclude.push(term),
        }
    }

    if regular.is_empty() {
        regular.push(Term::parse(super::group::ALL)?);
    }

    regular.extend(intersect);
    regular.extend(exclude);
    Ok(regular)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(terms: &[Term]) -> Vec<String> {
        terms.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_split_on_commas() {
        assert_eq!(
            split_host_pattern("web , db,!staging"),
            vec!["web", "db", "!staging"]
        );
    }

    #[test]
    fn test_split_single_address() {
        assert_eq!(split_host_pattern("web1:22"), vec!["web1:22"]);
        assert_eq!(split_host_pattern("db[1:3]"), vec!["db[1:3]"]);
    }

    #[test]
    fn test_split_legacy_colons() {
        assert_eq!(
            split_host_pattern("webservers:&staging:!db[2:3]"),
            vec!["webservers", "&staging", "!db[2:3]"]
        );
    }

    #[test]
    fn test_list_input_flattens() {
        let input = PatternInput::from(vec!["web,db".to_string(), "cache".to_string()]);
        assert_eq!(input.split(), vec!["web", "db", "cache"]);
    }

    #[test]
    fn test_order_patterns_reorders() {
        let raw: Vec<String> = ["!db", "&prod", "web", "cache"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let ordered = order_patterns(&raw).unwrap();
        assert_eq!(keys(&ordered), vec!["web", "cache", "&prod", "!db"]);
    }

    #[test]
    fn test_order_patterns_synthesizes_all() {
        let ordered = order_patterns(&["!db".to_string()]).unwrap();
        assert_eq!(keys(&ordered), vec!["all", "!db"]);
    }

    #[test]
    fn test_subscript_forms() {
        assert_eq!(split_subscript("db[2]").unwrap(), ("db", Some(Subscript::Index(2))));
        assert_eq!(
            split_subscript("db[1:3]").unwrap(),
            (
                "db",
                Some(Subscript::Range {
                    start: 1,
                    end: SubscriptEnd::At(3)
                })
            )
        );
        assert_eq!(
            split_subscript("db[2:]").unwrap().1,
            Some(Subscript::Range {
                start: 2,
                end: SubscriptEnd::Last
            })
        );
        assert_eq!(
            split_subscript("db[:2]").unwrap().1,
            Some(Subscript::Range {
                start: 1,
                end: SubscriptEnd::At(2)
            })
        );
        assert_eq!(
            split_subscript("db[1:-1]").unwrap().1,
            Some(Subscript::Range {
                start: 1,
                end: SubscriptEnd::Last
            })
        );
        assert_eq!(
            split_subscript("db[1-2]").unwrap().1,
            Some(Subscript::Range {
                start: 1,
                end: SubscriptEnd::At(2)
            })
        );
    }

    #[test]
    fn test_subscript_rejections() {
        assert!(split_subscript("db[-1]").is_err());
        assert!(split_subscript("db[0]").is_err());
        assert!(split_subscript("db[1:-2]").is_err());
        assert!(split_subscript("db[3:1]").is_err());
        assert!(split_subscript("db[1:2:3]").is_err());
        assert!(split_subscript("db[]").is_err());
    }

    #[test]
    fn test_glob_class_is_not_subscript() {
        assert_eq!(split_subscript("web[abc]").unwrap(), ("web[abc]", None));
        assert_eq!(split_subscript("~web[0-9]").unwrap(), ("~web[0-9]", None));
    }

    #[test]
    fn test_apply_subscript() {
        let hosts: Vec<String> = ["db1", "db2", "db3", "db4"].iter().map(|s| s.to_string()).collect();
        let range = Subscript::Range {
            start: 1,
            end: SubscriptEnd::At(3),
        };
        assert_eq!(range.apply("db[1:3]", hosts.clone()).unwrap(), vec!["db1", "db2", "db3"]);
        assert_eq!(Subscript::Index(4).apply("db[4]", hosts.clone()).unwrap(), vec!["db4"]);
        assert!(Subscript::Index(5).apply("db[5]", hosts.clone()).is_err());
        let past_end = Subscript::Range {
            start: 5,
            end: SubscriptEnd::Last,
        };
        assert!(past_end.apply("db[5:]", hosts).is_err());
    }

    #[test]
    fn test_term_expr_matching() {
        assert!(TermExpr::compile("web*").unwrap().matches("web01"));
        assert!(!TermExpr::compile("web?").unwrap().matches("web01"));
        assert!(TermExpr::compile("web[!2]").unwrap().matches("web1"));
        assert!(TermExpr::compile("~(web|db)0").unwrap().matches("db01"));
        assert!(!TermExpr::compile("~db").unwrap().matches("mydb"));
        assert!(TermExpr::compile("~[").is_err());
    }
}
