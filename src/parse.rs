//! Shared parsing plumbing for the analyzers and the compiler.
//!
//! Scripts are parsed inside an anonymous async function wrapper so that a
//! bare top-level `return` (implicit-value scripts) and `await` are
//! syntactically legal. All spans reported to callers are mapped back to
//! positions in the unwrapped script text.

use oxc_span::SourceType;

pub const WRAP_PREFIX: &str = "(async function () {\n";
pub const WRAP_SUFFIX: &str = "\n})";

pub fn wrap_script(source: &str) -> String {
    let mut wrapped = String::with_capacity(source.len() + WRAP_PREFIX.len() + WRAP_SUFFIX.len());
    wrapped.push_str(WRAP_PREFIX);
    wrapped.push_str(source);
    wrapped.push_str(WRAP_SUFFIX);
    wrapped
}

/// Scripts are plain JavaScript; module mode keeps `import(...)` parseable so
/// the analyzer can reject it with a policy error instead of a syntax error.
pub fn script_source_type() -> SourceType {
    SourceType::default().with_module(true)
}

/// Map a byte offset in the wrapped source back to a 1-based line/column in
/// the script text. Offsets inside the wrapper clamp to the script edges.
pub fn script_position(script: &str, wrapped_offset: usize) -> (u32, u32) {
    let offset = wrapped_offset
        .saturating_sub(WRAP_PREFIX.len())
        .min(script.len());

    let mut line: u32 = 1;
    let mut line_start = 0usize;
    for (i, b) in script.as_bytes().iter().enumerate() {
        if i >= offset {
            break;
        }
        if *b == b'\n' {
            line += 1;
            line_start = i + 1;
        }
    }
    let column = (offset - line_start) as u32 + 1;
    (line, column)
}

/// One-line excerpt of the given 1-based script line, trimmed for display.
pub fn line_excerpt(script: &str, line: u32) -> String {
    let text = script
        .lines()
        .nth(line.saturating_sub(1) as usize)
        .unwrap_or("")
        .trim();
    if text.len() > 80 {
        format!("{}...", &text[..77])
    } else {
        text.to_string()
    }
}

/// Dig the wrapped function body out of a parsed program. Returns `None` only
/// if the program does not have the wrapper shape, which means the caller
/// parsed something other than [`wrap_script`] output.
pub fn unwrap_body<'a, 'b>(
    program: &'b oxc_ast::ast::Program<'a>,
) -> Option<&'b oxc_ast::ast::FunctionBody<'a>> {
    use oxc_ast::ast::{Expression, Statement};

    // Script text that closes the wrapper early (e.g. `1});(async function
    // () {...`) parses as extra top-level statements. Anything beyond the
    // single wrapped expression is not wrapper-shaped.
    if program.body.len() != 1 {
        return None;
    }
    let first = program.body.first()?;
    let Statement::ExpressionStatement(expr_stmt) = first else {
        return None;
    };
    let mut expr = &expr_stmt.expression;
    if let Expression::ParenthesizedExpression(paren) = expr {
        expr = &paren.expression;
    }
    let Expression::FunctionExpression(func) = expr else {
        return None;
    };
    func.body.as_deref()
}

#[cfg(test)]
mod tests {
    use super::*;
    use oxc_allocator::Allocator;
    use oxc_parser::Parser;

    #[test]
    fn wrapper_makes_top_level_return_legal() {
        let wrapped = wrap_script("return 1 + 1");
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &wrapped, script_source_type()).parse();
        assert!(ret.errors.is_empty(), "{:?}", ret.errors);
        let body = unwrap_body(&ret.program).expect("wrapper shape");
        assert_eq!(body.statements.len(), 1);
    }

    #[test]
    fn wrapper_escape_is_not_wrapper_shaped() {
        // A script that closes the wrapper and opens a second function would
        // smuggle statements past whoever only inspects the first body.
        let wrapped = wrap_script("1});(async function () {eval('x')");
        let allocator = Allocator::default();
        let ret = Parser::new(&allocator, &wrapped, script_source_type()).parse();
        assert!(ret.errors.is_empty(), "{:?}", ret.errors);
        assert!(unwrap_body(&ret.program).is_none());
    }

    #[test]
    fn positions_map_back_to_script_lines() {
        let script = "let a = 1;\nlet b = 2;";
        let wrapped = wrap_script(script);
        let idx = wrapped.find("let b").unwrap();
        assert_eq!(script_position(script, idx), (2, 1));
    }

    #[test]
    fn wrapper_offsets_clamp_to_script_start() {
        assert_eq!(script_position("x", 0), (1, 1));
    }

    #[test]
    fn excerpt_is_trimmed() {
        assert_eq!(line_excerpt("   eval('1')  ", 1), "eval('1')");
        assert_eq!(line_excerpt("a", 9), "");
    }
}
