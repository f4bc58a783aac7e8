//! Lexical classes the statement splitter cares about.
//!
//! Only enough of SQL is recognised to find top-level `;`: quoted literals and
//! identifiers, comments and dollar-quoted bodies each lex as one token so a
//! semicolon inside them never splits.

use logos::Logos;

fn lex_block_comment(lex: &mut logos::Lexer<SqlToken>) -> bool {
    let mut depth = 1usize;
    let bytes = lex.remainder().as_bytes();
    let mut i = 0usize;

    while i + 1 < bytes.len() {
        if bytes[i] == b'/' && bytes[i + 1] == b'*' {
            depth += 1;
            i += 2;
            continue;
        }
        if bytes[i] == b'*' && bytes[i + 1] == b'/' {
            depth -= 1;
            i += 2;
            if depth == 0 {
                lex.bump(i);
                return true;
            }
            continue;
        }
        i += 1;
    }

    // Unterminated comments swallow the rest of the text.
    lex.bump(bytes.len());
    true
}

/// Doubled quotes stay inside the literal.
fn lex_quoted(lex: &mut logos::Lexer<SqlToken>, quote: u8) -> bool {
    let bytes = lex.remainder().as_bytes();
    let mut i = 0usize;

    while i < bytes.len() {
        if bytes[i] == quote {
            if bytes.get(i + 1) == Some(&quote) {
                i += 2;
                continue;
            }
            lex.bump(i + 1);
            return true;
        }
        i += 1;
    }

    lex.bump(bytes.len());
    true
}

/// The opener has been matched; the body runs to the same `$tag$`.
fn lex_dollar_body(lex: &mut logos::Lexer<SqlToken>) -> bool {
    let tag = lex.slice();
    let body = lex.remainder();
    let len = body.find(tag).map_or(body.len(), |offset| offset + tag.len());
    lex.bump(len);
    true
}

#[derive(Logos, Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SqlToken {
    #[regex(r"\s+")]
    Whitespace,

    #[regex(r"--[^\r\n]*")]
    LineComment,

    #[token("/*", lex_block_comment)]
    BlockComment,

    #[token("'", |lex| lex_quoted(lex, b'\''))]
    QuotedString,

    #[token("\"", |lex| lex_quoted(lex, b'"'))]
    QuotedIdent,

    #[regex(r"\$([A-Za-z_][A-Za-z0-9_]*)?\$", lex_dollar_body)]
    DollarQuoted,

    #[token(";")]
    Semicolon,

    /// A run of anything else up to the next character that could open one of
    /// the tokens above.
    #[regex(r#"[^\s;'"$/\-][^\s;'"/\-]*"#)]
    Word,

    #[token("$")]
    #[token("/")]
    #[token("-")]
    Other,
}

impl SqlToken {
    pub(crate) fn is_trivia(self) -> bool {
        matches!(
            self,
            SqlToken::Whitespace | SqlToken::LineComment | SqlToken::BlockComment
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(text: &str) -> Vec<(SqlToken, &str)> {
        let mut lexer = SqlToken::lexer(text);
        let mut tokens = Vec::new();
        while let Some(token) = lexer.next() {
            tokens.push((token.unwrap_or(SqlToken::Other), lexer.slice()));
        }
        tokens
    }

    #[test]
    fn nested_block_comment_is_one_token() {
        assert_eq!(
            kinds("/* a /* b; */ c */;"),
            vec![
                (SqlToken::BlockComment, "/* a /* b; */ c */"),
                (SqlToken::Semicolon, ";"),
            ]
        );
    }

    #[test]
    fn doubled_quotes_stay_inside_literals() {
        assert_eq!(
            kinds("'it''s;'\"a\"\"b\""),
            vec![
                (SqlToken::QuotedString, "'it''s;'"),
                (SqlToken::QuotedIdent, "\"a\"\"b\""),
            ]
        );
    }

    #[test]
    fn dollar_quotes_need_a_matching_tag() {
        assert_eq!(
            kinds("$f$ $$; $f$;"),
            vec![
                (SqlToken::DollarQuoted, "$f$ $$; $f$"),
                (SqlToken::Semicolon, ";"),
            ]
        );
        assert_eq!(
            kinds("$1-x"),
            vec![
                (SqlToken::Other, "$"),
                (SqlToken::Word, "1"),
                (SqlToken::Other, "-"),
                (SqlToken::Word, "x"),
            ]
        );
    }

    #[test]
    fn unterminated_constructs_run_to_the_end() {
        assert_eq!(
            kinds("SELECT 'a;b"),
            vec![
                (SqlToken::Word, "SELECT"),
                (SqlToken::Whitespace, " "),
                (SqlToken::QuotedString, "'a;b"),
            ]
        );
        assert_eq!(
            kinds("/* open; "),
            vec![(SqlToken::BlockComment, "/* open; ")]
        );
    }
}
