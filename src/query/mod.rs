//! The search query language.
//!
//! A query is a space-separated list of tokens, all of which must match:
//!
//! - `foo` matches rows whose command, hostname, or cwd contains `foo`;
//! - `field:value` is an atom on a built-in field (`user`, `host`/`hostname`,
//!   `cwd`, `exit_code`, `before`, `after`, `start_time`, `end_time`,
//!   `command`) or on a custom column;
//! - a leading `-` negates the rest of the token; a lone `-` is ignored;
//! - `\` escapes the next character, so `host\:name` is plain text.

pub mod predicate;
pub mod time;
pub mod tokenize;

pub use predicate::{Atom, Predicate, Term};
pub use tokenize::{contains_unescaped, split_escaped, tokenize, unescape};

/// Why a search query could not be compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// `field:value` where `field` is neither built in nor a known custom column.
    UnknownAtom(String),
    InvalidTimestamp {
        field: String,
        value: String,
        reason: String,
    },
    InvalidExitCode(String),
    /// The store could not list the custom column names it has seen.
    CustomColumnLookup(String),
}

impl std::fmt::Display for QueryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAtom(field) => write!(
                f,
                "search query contains unknown search atom '{field}' that doesn't match any column names"
            ),
            Self::InvalidTimestamp {
                field,
                value,
                reason,
            } => write!(f, "failed to parse {field}:{value} as a timestamp: {reason}"),
            Self::InvalidExitCode(value) => {
                write!(f, "failed to parse exit_code:{value} as an integer")
            }
            Self::CustomColumnLookup(msg) => {
                write!(f, "failed to get custom column names from the DB: {msg}")
            }
        }
    }
}

impl std::error::Error for QueryError {}

/// Compile `query` against a fixed list of known custom column names.
///
/// # Errors
///
/// See [`compile_with`].
pub fn compile(query: &str, known_custom_columns: &[String]) -> Result<Predicate, QueryError> {
    compile_with(query, || Ok(known_custom_columns.to_vec()))
}

/// Compile `query` into a [`Predicate`].
///
/// `custom_columns` lists every custom column name that may appear in an
/// atom. It is called at most once, and only when the query contains an atom
/// that is not a built-in field.
///
/// # Errors
///
/// Returns [`QueryError::UnknownAtom`] for an unrecognised field name,
/// [`QueryError::InvalidTimestamp`] / [`QueryError::InvalidExitCode`] for
/// unparseable values, and [`QueryError::CustomColumnLookup`] when
/// `custom_columns` fails.
pub fn compile_with<F>(query: &str, custom_columns: F) -> Result<Predicate, QueryError>
where
    F: FnOnce() -> anyhow::Result<Vec<String>>,
{
    let mut compiler = Compiler {
        lookup: Some(custom_columns),
        known: None,
    };
    let mut terms = Vec::new();
    for token in tokenize(query) {
        if let Some(term) = compiler.compile_token(&token)? {
            terms.push(term);
        }
    }
    Ok(Predicate::from_terms(terms))
}

struct Compiler<F> {
    lookup: Option<F>,
    known: Option<Vec<String>>,
}

impl<F> Compiler<F>
where
    F: FnOnce() -> anyhow::Result<Vec<String>>,
{
    fn compile_token(&mut self, token: &str) -> Result<Option<Term>, QueryError> {
        if token.is_empty() || token == "-" {
            return Ok(None);
        }
        if let Some(rest) = token.strip_prefix('-') {
            return Ok(self
                .compile_token(rest)?
                .map(|inner| Term::Not(Box::new(inner))));
        }
        let atom = if contains_unescaped(token, ':') {
            self.compile_atom(token)?
        } else {
            Atom::Text(unescape(token))
        };
        Ok(Some(Term::Atom(atom)))
    }

    fn compile_atom(&mut self, token: &str) -> Result<Atom, QueryError> {
        let mut parts = split_escaped(token, ':', Some(2)).into_iter();
        let field = unescape(&parts.next().unwrap_or_default());
        let value = unescape(&parts.next().unwrap_or_default());
        let atom = match field.as_str() {
            "user" => Atom::User(value),
            "host" | "hostname" => Atom::Hostname(value),
            "cwd" => Atom::Cwd(value.strip_suffix('/').unwrap_or(&value).to_string()),
            "exit_code" => Atom::ExitCode(
                value
                    .trim()
                    .parse()
                    .map_err(|_| QueryError::InvalidExitCode(value.clone()))?,
            ),
            "before" => Atom::Before(parse_secs(&field, &value)?),
            "after" => Atom::After(parse_secs(&field, &value)?),
            "start_time" => Atom::StartTime(parse_secs(&field, &value)?),
            "end_time" => Atom::EndTime(parse_secs(&field, &value)?),
            "command" => Atom::Command(value),
            _ => {
                if !self.known_columns()?.iter().any(|c| *c == field) {
                    return Err(QueryError::UnknownAtom(field));
                }
                Atom::Custom { name: field, value }
            }
        };
        Ok(atom)
    }

    fn known_columns(&mut self) -> Result<&[String], QueryError> {
        if self.known.is_none() {
            let names = match self.lookup.take() {
                Some(lookup) => {
                    lookup().map_err(|e| QueryError::CustomColumnLookup(format!("{e:#}")))?
                }
                None => Vec::new(),
            };
            self.known = Some(names);
        }
        Ok(self.known.as_deref().unwrap_or_default())
    }
}

fn parse_secs(field: &str, value: &str) -> Result<i64, QueryError> {
    time::parse_time_generously(value)
        .map(|t| t.timestamp())
        .map_err(|reason| QueryError::InvalidTimestamp {
            field: field.to_string(),
            value: value.to_string(),
            reason,
        })
}
