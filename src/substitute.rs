//! Macro template rewriting.
//!
//! A user macro's body is a template: every identifier token naming a macro parameter is
//! replaced by the raw token supplied at the call site, recursively through nested lists.
//! Nothing is renamed, so the expansion can capture and be captured by names of the
//! caller's frame.
//!
//! The one refinement is that binding positions are left alone. The names introduced by
//! `let`, `lambda`, `function`, `macro` and `loop` inside a template are kept verbatim, and
//! a parameter they rebind is not substituted within the construct that rebinds it:
//!
//! ```text
//! (macro m (a) (let ((a 1)) a))
//! (m 99)   ; 1
//! ```
//!
//! This module is independent of the evaluator and only rewrites token trees.

use crate::ast::{Token, TokenKind};
use std::collections::HashMap;

/// Parameter name to the raw argument token replacing it
pub type Substitutions<'a> = HashMap<&'a str, &'a Token>;

/// Rewrite a sequence of template tokens
pub fn substitute(template: &[Token], substitutions: &Substitutions<'_>) -> Vec<Token> {
    template
        .iter()
        .map(|token| substitute_token(token, substitutions))
        .collect()
}

fn substitute_token(token: &Token, substitutions: &Substitutions<'_>) -> Token {
    match &token.kind {
        TokenKind::Identifier(name) => match substitutions.get(name.as_str()) {
            Some(replacement) => (*replacement).clone(),
            None => token.clone(),
        },
        TokenKind::List(items) => Token::new(
            TokenKind::List(substitute_list(items, substitutions)),
            token.span.clone(),
        ),
        TokenKind::Value(_) | TokenKind::Comment(_) => token.clone(),
    }
}

fn substitute_list(items: &[Token], substitutions: &Substitutions<'_>) -> Vec<Token> {
    if substitutions.is_empty() {
        return items.to_vec();
    }

    // A binder keyword that is itself a parameter is just another substitution
    let binder = items
        .first()
        .and_then(Token::identifier)
        .filter(|head| !substitutions.contains_key(head));

    let rewritten = match binder {
        Some("let") => substitute_let(items, substitutions),
        Some("lambda") => substitute_params_form(items, 1, substitutions),
        Some("function" | "macro") => substitute_params_form(items, 2, substitutions),
        Some("loop") => substitute_loop(items, substitutions),
        _ => None,
    };
    rewritten.unwrap_or_else(|| substitute(items, substitutions))
}

/// `(let ((name expr) ...) body...)`: every `expr` sees the outer substitutions, the body
/// does not see the bound names.
fn substitute_let(items: &[Token], substitutions: &Substitutions<'_>) -> Option<Vec<Token>> {
    let [head, declarations, body @ ..] = items else {
        return None;
    };

    let mut bound = Vec::new();
    let mut rewritten_declarations = Vec::new();
    for declaration in declarations.list()? {
        let Some([name, rest @ ..]) = declaration.list() else {
            rewritten_declarations.push(substitute_token(declaration, substitutions));
            continue;
        };
        let name = match name.identifier() {
            Some(identifier) => {
                bound.push(identifier);
                name.clone()
            }
            None => substitute_token(name, substitutions),
        };
        let mut declaration_items = vec![name];
        declaration_items.extend(substitute(rest, substitutions));
        rewritten_declarations.push(Token::new(
            TokenKind::List(declaration_items),
            declaration.span.clone(),
        ));
    }

    let inner = shadow(substitutions, &bound);
    let mut result = vec![
        head.clone(),
        Token::new(
            TokenKind::List(rewritten_declarations),
            declarations.span.clone(),
        ),
    ];
    result.extend(substitute(body, &inner));
    Some(result)
}

/// `(lambda (params) body...)` and `(function name (params) body...)`: the parameter list
/// stays verbatim and shadows substitutions in the body. Positions before it, such as the
/// defined name, are substituted.
fn substitute_params_form(
    items: &[Token],
    params_at: usize,
    substitutions: &Substitutions<'_>,
) -> Option<Vec<Token>> {
    let params = items.get(params_at)?;
    let names: Vec<&str> = params
        .list()?
        .iter()
        .filter_map(Token::identifier)
        .collect();

    let inner = shadow(substitutions, &names);
    let mut result = vec![items[0].clone()];
    result.extend(substitute(&items[1..params_at], substitutions));
    result.push(params.clone());
    result.extend(substitute(&items[params_at + 1..], &inner));
    Some(result)
}

/// `(loop (index start end step?) body...)`: the bounds see the outer substitutions, the
/// body does not see the index.
fn substitute_loop(items: &[Token], substitutions: &Substitutions<'_>) -> Option<Vec<Token>> {
    let [head, header, body @ ..] = items else {
        return None;
    };
    let [index, bounds @ ..] = header.list()? else {
        return None;
    };
    let name = index.identifier()?;

    let mut header_items = vec![index.clone()];
    header_items.extend(substitute(bounds, substitutions));

    let inner = shadow(substitutions, &[name]);
    let mut result = vec![
        head.clone(),
        Token::new(TokenKind::List(header_items), header.span.clone()),
    ];
    result.extend(substitute(body, &inner));
    Some(result)
}

fn shadow<'a>(substitutions: &Substitutions<'a>, names: &[&str]) -> Substitutions<'a> {
    substitutions
        .iter()
        .filter(|(name, _)| !names.contains(*name))
        .map(|(name, token)| (*name, *token))
        .collect()
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::reader::parse;

    fn render(tokens: &[Token]) -> String {
        tokens
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Expands `template` with parameters bound to the parsed `arguments`
    fn expand(params: &[&str], arguments: &str, template: &str) -> String {
        let arguments = parse(arguments).unwrap();
        let template = parse(template).unwrap();
        assert_eq!(params.len(), arguments.len(), "test setup");
        let substitutions: Substitutions<'_> = params.iter().copied().zip(&arguments).collect();
        render(&substitute(&template, &substitutions))
    }

    #[test]
    fn test_substitution_data_driven() {
        let test_cases = vec![
            // (params, arguments, template, expected)
            (vec!["a"], "99", "a", "99"),
            (vec!["a"], "99", "b", "b"),
            (vec!["a"], "(+ 1 2)", "(* a a)", "(* (+ 1 2) (+ 1 2))"),
            (vec!["a", "b"], "x \"s\"", "(list a (list b a))", "(list x (list \"s\" x))"),
            // Heads are substituted like any other position
            (vec!["f"], "print", "(f 1)", "(print 1)"),
            // Literals that look like parameters are untouched
            (vec!["a"], "1", "(list \"a\" 'a)", "(list \"a\" (quote 1))"),
            // Definition names are ordinary positions
            (vec!["name"], "total", "(var name 0)", "(var total 0)"),
            (vec!["name"], "x", "(assign name (+ name 1))", "(assign x (+ x 1))"),
            // Binders shadow within their scope only
            (vec!["a"], "99", "(let ((a 1)) a)", "(let ((a 1)) a)"),
            (vec!["a"], "99", "(let ((b a)) (+ a b))", "(let ((b 99)) (+ 99 b))"),
            (vec!["a"], "99", "(list (let ((a 1)) a) a)", "(list (let ((a 1)) a) 99)"),
            (vec!["a"], "99", "(lambda (a) a)", "(lambda (a) a)"),
            (vec!["a", "b"], "1 2", "(lambda (a) (+ a b))", "(lambda (a) (+ a 2))"),
            (
                vec!["name", "x"],
                "sq 5",
                "(function name (x) (* x x))",
                "(function sq (x) (* x x))",
            ),
            (vec!["i", "n"], "9 3", "(loop (i 1 n) i)", "(loop (i 1 3) i)"),
            // Malformed binders fall back to plain substitution
            (vec!["a"], "9", "(let a a)", "(let 9 9)"),
            (vec!["a"], "9", "(lambda a)", "(lambda 9)"),
            // A binder keyword that is a parameter is substituted
            (vec!["let"], "list", "(let ((a 1)) a)", "(list ((a 1)) a)"),
        ];

        for (i, (params, arguments, template, expected)) in test_cases.into_iter().enumerate() {
            assert_eq!(
                expand(&params, arguments, template),
                expected,
                "Test case {} failed: {template}",
                i + 1
            );
        }
    }

    #[test]
    fn test_replacements_keep_call_site_spans() {
        let arguments = parse("  (+ 1 2)").unwrap();
        let template = parse("(* a 10)").unwrap();
        let substitutions: Substitutions<'_> = [("a", &arguments[0])].into_iter().collect();

        let result = substitute(&template, &substitutions);
        let items = result[0].list().unwrap();
        assert_eq!(items[1].span, arguments[0].span);
        assert_eq!(items[1].raw(), "(+ 1 2)");
        // The rewritten list itself keeps the template's span
        assert_eq!(result[0].span, template[0].span);
    }

    #[test]
    fn test_empty_substitutions_is_identity() {
        let template = parse("(let ((a 1)) a) (f x)").unwrap();
        assert_eq!(substitute(&template, &Substitutions::new()), template);
    }
}
