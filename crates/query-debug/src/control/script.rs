//! Units of work: statements split from SQL text, optionally nested into
//! procedure frames.

use logos::Logos;
use serde::Serialize;
use smol_str::SmolStr;

use super::tokens::SqlToken;

/// One statement of a unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Statement {
    /// 1-based ordinal across the flattened unit of work.
    pub query_id: u32,
    pub sql: String,
    /// 1-based line within the script or procedure body it came from.
    pub line: u32,
    /// Enclosing procedures, outermost first.
    pub call_path: Vec<SmolStr>,
}

impl Statement {
    /// Innermost enclosing procedure, `None` at top level.
    #[must_use]
    pub fn procedure_id(&self) -> Option<&SmolStr> {
        self.call_path.last()
    }

    /// Call depth, 0 at top level.
    #[must_use]
    pub fn depth(&self) -> u32 {
        u32::try_from(self.call_path.len()).unwrap_or(u32::MAX)
    }
}

/// An ordered list of statements to execute.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Script {
    statements: Vec<Statement>,
}

impl Script {
    /// Split top-level SQL text into statements.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        Self::builder().statements(text).build()
    }

    #[must_use]
    pub fn builder() -> ScriptBuilder {
        ScriptBuilder::default()
    }

    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

impl From<&str> for Script {
    fn from(text: &str) -> Self {
        Script::parse(text)
    }
}

impl From<String> for Script {
    fn from(text: String) -> Self {
        Script::parse(&text)
    }
}

/// Builds a script whose statements may run inside procedure frames.
///
/// ```
/// use query_debug::Script;
///
/// let script = Script::builder()
///     .statements("BEGIN;")
///     .call("audit", "INSERT INTO log VALUES (1);\nUPDATE stats SET n = n + 1;")
///     .statements("COMMIT;")
///     .build();
/// assert_eq!(script.len(), 4);
/// assert_eq!(script.statements()[2].depth(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    call_path: Vec<SmolStr>,
    statements: Vec<Statement>,
}

impl ScriptBuilder {
    /// Append the statements of `text` in the current frame.
    #[must_use]
    pub fn statements(mut self, text: &str) -> Self {
        for (sql, line) in split_statements(text) {
            self.statements.push(Statement {
                query_id: 0,
                sql,
                line,
                call_path: self.call_path.clone(),
            });
        }
        self
    }

    /// Append a call of `procedure_id` whose body is `body`.
    #[must_use]
    pub fn call(self, procedure_id: impl Into<SmolStr>, body: &str) -> Self {
        self.call_with(procedure_id, |frame| frame.statements(body))
    }

    /// Append a call whose body is built by `build`, which may nest further calls.
    #[must_use]
    pub fn call_with(
        mut self,
        procedure_id: impl Into<SmolStr>,
        build: impl FnOnce(ScriptBuilder) -> ScriptBuilder,
    ) -> Self {
        let mut call_path = self.call_path.clone();
        call_path.push(procedure_id.into());
        let frame = build(ScriptBuilder {
            call_path,
            statements: Vec::new(),
        });
        self.statements.extend(frame.statements);
        self
    }

    #[must_use]
    pub fn build(self) -> Script {
        let statements = self
            .statements
            .into_iter()
            .zip(1_u32..)
            .map(|(statement, query_id)| Statement {
                query_id,
                ..statement
            })
            .collect();
        Script { statements }
    }
}

/// Split SQL text on top-level `;`, returning each statement with the 1-based
/// line of its first significant character.
///
/// Quoted strings and identifiers, `--` and (nested) `/* */` comments and
/// `$tag$` dollar quotes never split. Comment-only fragments are dropped.
pub(crate) fn split_statements(text: &str) -> Vec<(String, u32)> {
    let mut lexer = SqlToken::lexer(text);
    let mut statements = Vec::new();
    let mut start: Option<(usize, u32)> = None;
    let mut line = 1_u32;

    while let Some(token) = lexer.next() {
        let token = token.unwrap_or(SqlToken::Other);
        let span = lexer.span();
        match token {
            SqlToken::Semicolon => {
                if let Some((begin, begin_line)) = start.take() {
                    push_statement(&mut statements, &text[begin..span.start], begin_line);
                }
            }
            token if token.is_trivia() => {}
            _ => {
                if start.is_none() {
                    start = Some((span.start, line));
                }
            }
        }
        let newlines = lexer.slice().bytes().filter(|byte| *byte == b'\n').count();
        line = line.saturating_add(u32::try_from(newlines).unwrap_or(u32::MAX));
    }
    if let Some((begin, begin_line)) = start {
        push_statement(&mut statements, &text[begin..], begin_line);
    }
    statements
}

fn push_statement(statements: &mut Vec<(String, u32)>, sql: &str, line: u32) {
    let sql = sql.trim();
    if !sql.is_empty() {
        statements.push((sql.to_string(), line));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(text: &str) -> Vec<(String, u32)> {
        split_statements(text)
    }

    #[test]
    fn splits_on_top_level_semicolons_with_lines() {
        let statements = split("SELECT 1;\n\nUPDATE t SET a = 'x;y';\nDELETE FROM t");
        assert_eq!(
            statements,
            vec![
                ("SELECT 1".to_string(), 1),
                ("UPDATE t SET a = 'x;y'".to_string(), 3),
                ("DELETE FROM t".to_string(), 4),
            ]
        );
    }

    #[test]
    fn comments_do_not_split_or_count() {
        let statements = split(
            "-- setup; not a statement\n/* outer /* inner; */ still; */\nSELECT 'it''s';\n;;",
        );
        assert_eq!(statements, vec![("SELECT 'it''s'".to_string(), 3)]);
    }

    #[test]
    fn dollar_quoted_bodies_stay_whole() {
        let text = "CREATE FUNCTION f() RETURNS int AS $body$\nBEGIN; RETURN 1; END;\n$body$ LANGUAGE plpgsql;\nSELECT $1, $$a;b$$;";
        let statements = split(text);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].0.ends_with("LANGUAGE plpgsql"));
        assert_eq!(statements[1], ("SELECT $1, $$a;b$$".to_string(), 4));
    }

    #[test]
    fn quoted_identifiers_may_contain_semicolons() {
        let statements = split("SELECT \"a;b\" FROM t; SELECT 2");
        assert_eq!(statements.len(), 2);
        assert_eq!(statements[0].0, "SELECT \"a;b\" FROM t");
        assert_eq!(statements[1].1, 1);
    }

    #[test]
    fn trailing_comment_stays_with_its_statement() {
        let statements = split("SELECT a - b -- diff\n;\n/* done */");
        assert_eq!(statements, vec![("SELECT a - b -- diff".to_string(), 1)]);
    }

    #[test]
    fn builder_numbers_statements_across_frames() {
        let script = Script::builder()
            .statements("SELECT 1;")
            .call_with("outer", |frame| {
                frame
                    .statements("SELECT 2;")
                    .call("inner", "\nSELECT 3;")
            })
            .statements("SELECT 4;")
            .build();
        let summary: Vec<(u32, u32, Option<&str>, u32)> = script
            .statements()
            .iter()
            .map(|statement| {
                (
                    statement.query_id,
                    statement.depth(),
                    statement.procedure_id().map(SmolStr::as_str),
                    statement.line,
                )
            })
            .collect();
        assert_eq!(
            summary,
            vec![
                (1, 0, None, 1),
                (2, 1, Some("outer"), 1),
                (3, 2, Some("inner"), 2),
                (4, 0, None, 1),
            ]
        );
    }
}
