use rusqlite::types::Value;

/// One field comparison produced by the query compiler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Atom {
    /// Free text: command, hostname, or cwd contains the text.
    Text(String),
    /// Exact local username.
    User(String),
    /// Hostname contains.
    Hostname(String),
    /// Raw cwd, or cwd with a leading `~/` expanded to the home directory, contains.
    Cwd(String),
    ExitCode(i64),
    /// Start time strictly before, in Unix seconds.
    Before(i64),
    /// Start time strictly after, in Unix seconds.
    After(i64),
    /// Start time equal at one-second resolution.
    StartTime(i64),
    /// End time equal at one-second resolution.
    EndTime(i64),
    /// Command contains.
    Command(String),
    /// A custom column with this name exists and its value contains `value`.
    Custom { name: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    Atom(Atom),
    Not(Box<Term>),
}

/// A conjunction of terms. The empty predicate matches every row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Predicate {
    terms: Vec<Term>,
}

impl Predicate {
    /// The predicate that matches every row.
    pub const fn all() -> Self {
        Self { terms: Vec::new() }
    }

    pub(crate) const fn from_terms(terms: Vec<Term>) -> Self {
        Self { terms }
    }

    pub fn terms(&self) -> &[Term] {
        &self.terms
    }

    pub fn is_match_all(&self) -> bool {
        self.terms.is_empty()
    }

    /// Render as a SQL boolean expression over `history_entries` with `?`
    /// placeholders, plus the values bound to them in order.
    pub fn to_sql(&self) -> (String, Vec<Value>) {
        if self.terms.is_empty() {
            return ("1 = 1".to_string(), Vec::new());
        }
        let mut params = Vec::new();
        let clauses: Vec<String> = self
            .terms
            .iter()
            .map(|t| term_sql(t, &mut params))
            .collect();
        (clauses.join(" AND "), params)
    }
}

fn term_sql(term: &Term, params: &mut Vec<Value>) -> String {
    match term {
        Term::Atom(atom) => atom_sql(atom, params),
        Term::Not(inner) => format!("(NOT {})", term_sql(inner, params)),
    }
}

fn text(v: &str) -> Value {
    Value::Text(v.to_string())
}

/// Substring `LIKE` pattern with the LIKE metacharacters escaped by `\`.
fn like_pattern(needle: &str) -> String {
    let mut pattern = String::with_capacity(needle.len() + 2);
    pattern.push('%');
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            pattern.push('\\');
        }
        pattern.push(c);
    }
    pattern.push('%');
    pattern
}

const START_SECS: &str = "CAST(strftime('%s', start_time) AS INTEGER)";
const END_SECS: &str = "CAST(strftime('%s', end_time) AS INTEGER)";

fn atom_sql(atom: &Atom, params: &mut Vec<Value>) -> String {
    match atom {
        Atom::Text(v) => {
            let pattern = like_pattern(v);
            params.extend(std::iter::repeat_n(Value::Text(pattern), 3));
            "(command LIKE ? ESCAPE '\\' OR hostname LIKE ? ESCAPE '\\' \
             OR current_working_directory LIKE ? ESCAPE '\\')"
                .to_string()
        }
        Atom::User(v) => {
            params.push(text(v));
            "(local_username = ?)".to_string()
        }
        Atom::Hostname(v) => {
            params.push(text(v));
            "(instr(hostname, ?) > 0)".to_string()
        }
        Atom::Cwd(v) => {
            params.push(text(v));
            params.push(text(v));
            "(instr(current_working_directory, ?) > 0 OR instr(CASE \
             WHEN substr(current_working_directory, 1, 2) = '~/' \
             THEN rtrim(home_directory, '/') || substr(current_working_directory, 2) \
             ELSE current_working_directory END, ?) > 0)"
                .to_string()
        }
        Atom::ExitCode(code) => {
            params.push(Value::Integer(*code));
            "(exit_code = ?)".to_string()
        }
        Atom::Before(secs) => {
            params.push(Value::Integer(*secs));
            format!("({START_SECS} < ?)")
        }
        Atom::After(secs) => {
            params.push(Value::Integer(*secs));
            format!("({START_SECS} > ?)")
        }
        Atom::StartTime(secs) => {
            params.push(Value::Integer(*secs));
            format!("({START_SECS} = ?)")
        }
        Atom::EndTime(secs) => {
            params.push(Value::Integer(*secs));
            format!("({END_SECS} = ?)")
        }
        Atom::Command(v) => {
            params.push(text(v));
            "(instr(command, ?) > 0)".to_string()
        }
        Atom::Custom { name, value } => {
            params.push(text(name));
            params.push(text(value));
            "EXISTS (SELECT 1 FROM json_each(history_entries.custom_columns) \
             WHERE json_extract(value, '$.name') = ? \
             AND instr(json_extract(value, '$.value'), ?) > 0)"
                .to_string()
        }
    }
}
