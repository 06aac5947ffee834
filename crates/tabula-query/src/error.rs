use tabula_columnar::ColumnarError;

pub type QueryResult<T> = Result<T, QueryError>;

fn fmt_hint(hint: &Option<String>) -> String {
    match hint {
        Some(h) => format!(" ({h})"),
        None => String::new(),
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum QueryError {
    #[error(transparent)]
    Columnar(#[from] ColumnarError),

    #[error("parse error: {message} in {snippet:?}")]
    Parse { message: String, snippet: String },

    #[error("unsupported syntax: {construct} in {snippet:?}{}", fmt_hint(.hint))]
    UnsupportedSyntax {
        construct: String,
        snippet: String,
        hint: Option<String>,
    },

    #[error("invalid reference: {message} in {snippet:?}{}", fmt_hint(.hint))]
    InvalidReference {
        message: String,
        snippet: String,
        hint: Option<String>,
    },

    #[error("invalid call: {message} in {snippet:?}{}", fmt_hint(.hint))]
    InvalidCall {
        message: String,
        snippet: String,
        hint: Option<String>,
    },

    #[error("invalid member expression: {message} in {snippet:?}")]
    InvalidMember { message: String, snippet: String },

    #[error("unknown column: {0}")]
    UnknownColumn(String),

    #[error("placement accepts either `before` or `after`, not both")]
    ConflictingPlacement,

    #[error("join key count mismatch: {left} left keys vs {right} right keys")]
    JoinKeyMismatch { left: usize, right: usize },

    #[error("row {row} out of range for a table of {rows} row(s)")]
    RowOutOfRange { row: usize, rows: usize },
}

impl QueryError {
    pub(crate) fn parse(message: impl Into<String>, snippet: &str) -> Self {
        QueryError::Parse {
            message: message.into(),
            snippet: snippet.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn display_appends_hint_when_present() {
        let err = QueryError::InvalidReference {
            message: "unknown name 'limit'".into(),
            snippet: "limit".into(),
            hint: Some("declare it with params()".into()),
        };
        assert_eq!(
            err.to_string(),
            "invalid reference: unknown name 'limit' in \"limit\" (declare it with params())"
        );
        let bare = QueryError::UnsupportedSyntax {
            construct: "loops".into(),
            snippet: "for (;;) {}".into(),
            hint: None,
        };
        assert_eq!(bare.to_string(), "unsupported syntax: loops in \"for (;;) {}\"");
    }
}
