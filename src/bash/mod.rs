// src/bash/mod.rs

//! Declaration bridge between bash recipe scripts and the data model
//!
//! Recipes are declarative bash scripts. To read one we do not interpret
//! bash ourselves: the script is run in a bash subprocess with two
//! introspection directives appended, and the `declare` output on stdout
//! is parsed back into typed [`Value`]s and raw function bodies. The
//! interpreter is the parsing oracle; everything downstream only ever sees
//! the structured result.
//!
//! Caller contract: the script itself must not write to stdout, or the
//! introspection output is corrupted. This is a documented limitation of
//! the bridge, not something it can detect or recover from.

mod lexer;
pub mod serialize;

use crate::error::Result;
use lexer::{Lexer, Token};
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::process::{Command, Stdio};
use thiserror::Error;
use tracing::debug;

/// Variables declared by a script, in name order.
pub type Variables = BTreeMap<String, Value>;

/// Function bodies declared by a script, keyed by function name. The body
/// is the raw text between the function's outer braces.
pub type Functions = BTreeMap<String, String>;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BashError {
    #[error("unexpected token {0:?} in declaration output")]
    UnexpectedToken(String),

    #[error("unexpected end of declaration output")]
    UnexpectedEof,

    #[error("unterminated quote in declaration output")]
    UnterminatedQuote,

    #[error("invalid array index {0:?} in declaration output")]
    InvalidIndex(String),
}

/// A value declared by a bash script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Scalar(String),
    /// Indexed arrays can be sparse; missing slots are `None`.
    IndexedArray(Vec<Option<String>>),
    AssociativeArray(BTreeMap<String, String>),
    /// Declared without a value, e.g. `declare -- name`.
    Unset,
}

/// The shape of a [`Value`], used in validation messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    Scalar,
    Indexed,
    Associative,
    Unset,
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Shape::Scalar => "string",
            Shape::Indexed => "indexed array",
            Shape::Associative => "associative array",
            Shape::Unset => "unset",
        })
    }
}

impl Value {
    pub fn shape(&self) -> Shape {
        match self {
            Value::Scalar(_) => Shape::Scalar,
            Value::IndexedArray(_) => Shape::Indexed,
            Value::AssociativeArray(_) => Shape::Associative,
            Value::Unset => Shape::Unset,
        }
    }

    pub fn as_scalar(&self) -> Option<&str> {
        match self {
            Value::Scalar(s) => Some(s),
            _ => None,
        }
    }

    /// The defined entries of an indexed array, unset slots skipped.
    pub fn as_list(&self) -> Option<Vec<&str>> {
        match self {
            Value::IndexedArray(items) => {
                Some(items.iter().flatten().map(String::as_str).collect())
            }
            _ => None,
        }
    }
}

/// Layered lookup over two maps: the override layer wins on collision.
///
/// This is how package-local declarations shadow recipe-level ones without
/// ever physically merging the maps.
pub struct Layered<'a, V> {
    over: &'a BTreeMap<String, V>,
    base: &'a BTreeMap<String, V>,
}

impl<'a, V> Clone for Layered<'a, V> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<'a, V> Copy for Layered<'a, V> {}

impl<'a, V> Layered<'a, V> {
    pub fn new(over: &'a BTreeMap<String, V>, base: &'a BTreeMap<String, V>) -> Self {
        Self { over, base }
    }

    pub fn get(&self, name: &str) -> Option<&'a V> {
        self.over.get(name).or_else(|| self.base.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.over.contains_key(name) || self.base.contains_key(name)
    }
}

/// Introspection directives appended to every script before execution.
const INTROSPECTION: &str = "\ndeclare -f\ndeclare -p\n";

/// Variables bash declares on its own in an empty environment; these are
/// noise for the data model and are filtered out of every extraction.
const DEFAULT_VARIABLES: &[&str] = &[
    "BASH",
    "BASHOPTS",
    "BASHPID",
    "BASH_ALIASES",
    "BASH_ARGC",
    "BASH_ARGV",
    "BASH_ARGV0",
    "BASH_CMDS",
    "BASH_COMMAND",
    "BASH_LINENO",
    "BASH_LOADABLES_PATH",
    "BASH_SOURCE",
    "BASH_SUBSHELL",
    "BASH_VERSINFO",
    "BASH_VERSION",
    "COLUMNS",
    "COMP_WORDBREAKS",
    "DIRSTACK",
    "EPOCHREALTIME",
    "EPOCHSECONDS",
    "EUID",
    "FUNCNAME",
    "GROUPS",
    "HISTCMD",
    "HOSTNAME",
    "HOSTTYPE",
    "IFS",
    "LINENO",
    "LINES",
    "MACHTYPE",
    "OLDPWD",
    "OPTERR",
    "OPTIND",
    "OSTYPE",
    "PATH",
    "PIPESTATUS",
    "PPID",
    "PS4",
    "PWD",
    "RANDOM",
    "SECONDS",
    "SHELL",
    "SHELLOPTS",
    "SHLVL",
    "SRANDOM",
    "TERM",
    "UID",
    "_",
];

/// Extract all variables and functions defined by a bash script.
///
/// When a variable or function is defined several times, only the final
/// value is seen. The script runs with an empty environment and only its
/// stdout is read.
pub fn extract(src: &str) -> Result<(Variables, Functions)> {
    let mut script = String::with_capacity(src.len() + INTROSPECTION.len());
    script.push_str(src);
    script.push_str(INTROSPECTION);

    let mut child = Command::new("/usr/bin/env")
        .arg("bash")
        .env_clear()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(mut stdin) = child.stdin.take() {
        stdin.write_all(script.as_bytes())?;
    }

    let output = child.wait_with_output()?;
    if !output.status.success() {
        debug!(status = ?output.status.code(), "bash exited with non-zero status");
    }

    let declarations = String::from_utf8_lossy(&output.stdout);
    let (mut variables, functions) = parse_declarations(&declarations)?;
    variables.retain(|name, _| !DEFAULT_VARIABLES.contains(&name.as_str()));

    Ok((variables, functions))
}

/// Parse `declare -f` / `declare -p` output into variables and functions.
///
/// The output is trusted to be well formed since it comes from bash
/// itself; anything else is an internal contract violation reported as a
/// [`BashError`].
fn parse_declarations(declarations: &str) -> Result<(Variables, Functions)> {
    let mut lexer = Lexer::new(declarations);
    let mut variables = Variables::new();
    let mut functions = Functions::new();

    while let Some(token) = lexer.get_token()? {
        let next = require(&mut lexer)?;

        if token.text == "declare" && next.text.starts_with('-') {
            lexer.push_token(next);
            let (name, value) = parse_variable(&mut lexer)?;
            variables.insert(name, value);
        } else {
            if next.text != "(" {
                return Err(BashError::UnexpectedToken(next.text).into());
            }
            expect(&mut lexer, ")")?;
            let (start, end) = function_span(&mut lexer)?;
            functions.insert(token.text, declarations[start..end].to_string());
        }
    }

    Ok((variables, functions))
}

fn require(lexer: &mut Lexer) -> Result<Token> {
    Ok(lexer.get_token()?.ok_or(BashError::UnexpectedEof)?)
}

fn expect(lexer: &mut Lexer, text: &str) -> Result<Token> {
    let token = require(lexer)?;
    if token.text != text {
        return Err(BashError::UnexpectedToken(token.text).into());
    }
    Ok(token)
}

/// Undo the escaping `declare -p` applies inside double quotes.
fn unescape(token: &str) -> String {
    token.replace("\\$", "$").replace("\\`", "`")
}

/// Parse one `declare <flags> name[=value]` statement, positioned on the
/// flags token.
fn parse_variable(lexer: &mut Lexer) -> Result<(String, Value)> {
    let flags_token = require(lexer)?;
    let flags = if flags_token.text == "--" {
        ""
    } else {
        &flags_token.text[1..]
    };
    let indexed = flags.contains('a');
    let associative = flags.contains('A');

    let name = require(lexer)?.text;

    let value = match lexer.get_token()? {
        Some(token) if token.text == "=" => {
            if indexed {
                Value::IndexedArray(parse_indexed_array(lexer)?)
            } else if associative {
                Value::AssociativeArray(parse_associative_array(lexer)?)
            } else {
                Value::Scalar(unescape(&require(lexer)?.text))
            }
        }
        Some(token) => {
            lexer.push_token(token);
            Value::Unset
        }
        None => Value::Unset,
    };

    Ok((name, value))
}

/// Parse `([0]="a" [2]="c")`, growing the result so that declared indices
/// exist and leaving skipped ones unset.
fn parse_indexed_array(lexer: &mut Lexer) -> Result<Vec<Option<String>>> {
    expect(lexer, "(")?;
    let mut result: Vec<Option<String>> = Vec::new();

    loop {
        let token = require(lexer)?;
        if token.text == ")" {
            break;
        }
        if token.text != "[" {
            return Err(BashError::UnexpectedToken(token.text).into());
        }

        let index_token = require(lexer)?;
        let index: usize = index_token
            .text
            .parse()
            .map_err(|_| BashError::InvalidIndex(index_token.text))?;
        expect(lexer, "]")?;
        expect(lexer, "=")?;
        let value = unescape(&require(lexer)?.text);

        if index >= result.len() {
            result.resize(index + 1, None);
        }
        result[index] = Some(value);
    }

    Ok(result)
}

/// Parse `([key]="value" ...)`.
fn parse_associative_array(lexer: &mut Lexer) -> Result<BTreeMap<String, String>> {
    expect(lexer, "(")?;
    let mut result = BTreeMap::new();

    loop {
        let token = require(lexer)?;
        if token.text == ")" {
            break;
        }
        if token.text != "[" {
            return Err(BashError::UnexpectedToken(token.text).into());
        }

        let key = require(lexer)?.text;
        expect(lexer, "]")?;
        expect(lexer, "=")?;
        let value = unescape(&require(lexer)?.text);
        result.insert(key, value);
    }

    Ok(result)
}

/// Find the byte span of a function body, positioned after `name ()`.
/// Braces are counted until the opening brace is balanced again; the span
/// excludes both outer braces.
fn function_span(lexer: &mut Lexer) -> Result<(usize, usize)> {
    let open = expect(lexer, "{")?;
    let mut depth = 1usize;

    loop {
        let token = require(lexer)?;
        match token.text.as_str() {
            "{" => depth += 1,
            "}" => {
                depth -= 1;
                if depth == 0 {
                    return Ok((open.end, token.start));
                }
            }
            _ => {}
        }
    }
}
