//! Expression parser
//!
//! Nom-based parser for transition guards and actions.
//!
//! ```text
//! guard      := or
//! or         := and (("or" | "||") and)*
//! and        := unary (("and" | "&&") unary)*
//! unary      := ("not" | "!") unary | atom
//! atom       := "(" guard ")" | presence | comparison
//! presence   := IDENT "is" ["not"] ("present" | "absent")
//! comparison := operand [cmpop operand]
//!
//! action     := stmt (";" stmt)* [";"]
//! stmt       := "clear" IDENT | IDENT "=" operand ("+" operand)*
//! ```

use nom::{
    branch::alt,
    bytes::complete::{escaped_transform, tag, take_while},
    character::complete::{char, digit1, multispace0, none_of, satisfy},
    combinator::{all_consuming, cut, map, not, opt, recognize, value, verify},
    error::{context, ErrorKind, ParseError, VerboseError},
    multi::{many0, separated_list1},
    sequence::{delimited, pair, preceded, terminated, tuple},
    IResult,
};
use serde_json::Value;

use super::ast::*;

type Res<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

const KEYWORDS: &[&str] = &[
    "and", "or", "not", "is", "present", "absent", "true", "false", "null", "clear",
];

// ============================================================================
// Public API
// ============================================================================

/// Parse a transition guard.
pub fn parse_guard(input: &str) -> Result<Guard, String> {
    finish(input, guard_expr)
}

/// Parse a transition action.
pub fn parse_action(input: &str) -> Result<Action, String> {
    finish(input, action)
}

fn finish<'a, T>(input: &'a str, parser: impl FnMut(&'a str) -> Res<'a, T>) -> Result<T, String> {
    if input.trim().is_empty() {
        return Err("empty expression".to_string());
    }
    match all_consuming(terminated(parser, multispace0))(input) {
        Ok((_, parsed)) => Ok(parsed),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            Err(nom::error::convert_error(input, e))
        }
        Err(nom::Err::Incomplete(_)) => Err("Incomplete input".to_string()),
    }
}

// ============================================================================
// Tokens
// ============================================================================

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-' || c == '.'
}

fn keyword<'a>(kw: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    preceded(multispace0, terminated(tag(kw), not(satisfy(is_ident_char))))
}

fn sym<'a>(s: &'static str) -> impl FnMut(&'a str) -> Res<'a, &'a str> {
    preceded(multispace0, tag(s))
}

fn bang(input: &str) -> Res<&str> {
    preceded(multispace0, terminated(tag("!"), not(char('='))))(input)
}

fn identifier(input: &str) -> Res<String> {
    context(
        "attribute name",
        map(
            verify(
                preceded(
                    multispace0,
                    recognize(pair(
                        satisfy(|c: char| c.is_alphabetic() || c == '_'),
                        take_while(is_ident_char),
                    )),
                ),
                |s: &str| !KEYWORDS.contains(&s),
            ),
            String::from,
        ),
    )(input)
}

// ============================================================================
// Guards
// ============================================================================

fn guard_expr(input: &str) -> Res<Guard> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(alt((keyword("or"), sym("||"))), cut(and_expr)))(input)?;
    Ok((input, fold(first, rest, Guard::Or)))
}

fn and_expr(input: &str) -> Res<Guard> {
    let (input, first) = unary(input)?;
    let (input, rest) = many0(preceded(alt((keyword("and"), sym("&&"))), cut(unary)))(input)?;
    Ok((input, fold(first, rest, Guard::And)))
}

fn fold(first: Guard, rest: Vec<Guard>, combine: fn(Vec<Guard>) -> Guard) -> Guard {
    if rest.is_empty() {
        first
    } else {
        let mut items = Vec::with_capacity(rest.len() + 1);
        items.push(first);
        items.extend(rest);
        combine(items)
    }
}

fn unary(input: &str) -> Res<Guard> {
    alt((
        map(preceded(alt((keyword("not"), bang)), cut(unary)), |g| {
            Guard::Not(Box::new(g))
        }),
        atom,
    ))(input)
}

fn atom(input: &str) -> Res<Guard> {
    alt((
        delimited(
            sym("("),
            cut(guard_expr),
            cut(context("closing parenthesis", sym(")"))),
        ),
        presence,
        comparison,
    ))(input)
}

fn presence(input: &str) -> Res<Guard> {
    let (input, name) = identifier(input)?;
    let (input, _) = keyword("is")(input)?;
    let (input, negated) = opt(keyword("not"))(input)?;
    let (input, present) = cut(context(
        "'present' or 'absent'",
        alt((
            value(true, keyword("present")),
            value(false, keyword("absent")),
        )),
    ))(input)?;

    let guard = if present != negated.is_some() {
        Guard::Present(name)
    } else {
        Guard::Absent(name)
    };
    Ok((input, guard))
}

fn comparison(input: &str) -> Res<Guard> {
    let (input, lhs) = operand(input)?;
    let (input, rest) = opt(pair(
        cmp_op,
        cut(context("right-hand operand", operand)),
    ))(input)?;

    let guard = match rest {
        Some((op, rhs)) => Guard::Compare { lhs, op, rhs },
        None => Guard::Truthy(lhs),
    };
    Ok((input, guard))
}

fn cmp_op(input: &str) -> Res<CmpOp> {
    preceded(
        multispace0,
        alt((
            value(CmpOp::Eq, tag("==")),
            value(CmpOp::Ne, tag("!=")),
            value(CmpOp::Le, tag("<=")),
            value(CmpOp::Ge, tag(">=")),
            value(CmpOp::Lt, tag("<")),
            value(CmpOp::Gt, tag(">")),
        )),
    )(input)
}

// ============================================================================
// Operands
// ============================================================================

fn operand(input: &str) -> Res<Operand> {
    alt((
        map(literal, Operand::Literal),
        map(identifier, Operand::Attr),
    ))(input)
}

fn literal(input: &str) -> Res<Value> {
    alt((
        value(Value::Bool(true), keyword("true")),
        value(Value::Bool(false), keyword("false")),
        value(Value::Null, keyword("null")),
        map(preceded(multispace0, string_literal), Value::String),
        preceded(multispace0, number_literal),
    ))(input)
}

// String literals in double or single quotes, with escape sequences
fn string_literal(input: &str) -> Res<String> {
    alt((
        delimited(char('"'), quoted_body("\"\\"), char('"')),
        delimited(char('\''), quoted_body("'\\"), char('\'')),
    ))(input)
}

fn quoted_body<'a>(stop: &'static str) -> impl FnMut(&'a str) -> Res<'a, String> {
    map(
        opt(escaped_transform(
            none_of(stop),
            '\\',
            alt((
                value('\n', char('n')),
                value('\r', char('r')),
                value('\t', char('t')),
                value('\\', char('\\')),
                value('"', char('"')),
                value('\'', char('\'')),
            )),
        )),
        Option::unwrap_or_default,
    )
}

// Number literals (integer or decimal)
fn number_literal(input: &str) -> Res<Value> {
    let (remaining, text) = recognize(tuple((
        opt(char('-')),
        digit1,
        opt(pair(char('.'), digit1)),
    )))(input)?;

    if text.contains('.') {
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(|n| (remaining, Value::Number(n)))
            .ok_or_else(|| {
                nom::Err::Error(VerboseError::from_error_kind(input, ErrorKind::Float))
            })
    } else {
        text.parse::<i64>()
            .map(|n| (remaining, Value::from(n)))
            .map_err(|_| nom::Err::Error(VerboseError::from_error_kind(input, ErrorKind::Digit)))
    }
}

// ============================================================================
// Actions
// ============================================================================

fn action(input: &str) -> Res<Action> {
    let (input, statements) = separated_list1(sym(";"), statement)(input)?;
    let (input, _) = opt(sym(";"))(input)?;
    Ok((input, Action { statements }))
}

fn statement(input: &str) -> Res<Statement> {
    alt((
        map(preceded(keyword("clear"), cut(identifier)), Statement::Clear),
        map(
            pair(
                terminated(identifier, sym("=")),
                cut(context("assigned value", value_expr)),
            ),
            |(target, value)| Statement::Set { target, value },
        ),
    ))(input)
}

fn value_expr(input: &str) -> Res<ValueExpr> {
    map(separated_list1(sym("+"), operand), |terms| ValueExpr { terms })(input)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn attr(name: &str) -> Operand {
        Operand::Attr(name.to_string())
    }

    fn lit(v: Value) -> Operand {
        Operand::Literal(v)
    }

    #[test]
    fn test_presence() {
        assert_eq!(
            parse_guard("name is present").unwrap(),
            Guard::Present("name".into())
        );
        assert_eq!(
            parse_guard("  name is absent ").unwrap(),
            Guard::Absent("name".into())
        );
        assert_eq!(
            parse_guard("image.png is not present").unwrap(),
            Guard::Absent("image.png".into())
        );
        assert_eq!(
            parse_guard("name is not absent").unwrap(),
            Guard::Present("name".into())
        );
    }

    #[test]
    fn test_comparisons() {
        assert_eq!(
            parse_guard("price >= 10.5").unwrap(),
            Guard::Compare {
                lhs: attr("price"),
                op: CmpOp::Ge,
                rhs: lit(json!(10.5)),
            }
        );
        assert_eq!(
            parse_guard(r#"currency != "EUR""#).unwrap(),
            Guard::Compare {
                lhs: attr("currency"),
                op: CmpOp::Ne,
                rhs: lit(json!("EUR")),
            }
        );
        assert_eq!(
            parse_guard("edition_size<-1").unwrap(),
            Guard::Compare {
                lhs: attr("edition_size"),
                op: CmpOp::Lt,
                rhs: lit(json!(-1)),
            }
        );
        assert_eq!(
            parse_guard("min_price == max_price").unwrap(),
            Guard::Compare {
                lhs: attr("min_price"),
                op: CmpOp::Eq,
                rhs: attr("max_price"),
            }
        );
    }

    #[test]
    fn test_truthiness_and_constants() {
        assert_eq!(parse_guard("true").unwrap(), Guard::Truthy(lit(json!(true))));
        assert_eq!(parse_guard("approved").unwrap(), Guard::Truthy(attr("approved")));
        // Keywords only match as whole words
        assert_eq!(parse_guard("true_color").unwrap(), Guard::Truthy(attr("true_color")));
    }

    #[test]
    fn test_precedence() {
        let guard = parse_guard("a is present or b is present and not c").unwrap();
        assert_eq!(
            guard,
            Guard::Or(vec![
                Guard::Present("a".into()),
                Guard::And(vec![
                    Guard::Present("b".into()),
                    Guard::Not(Box::new(Guard::Truthy(attr("c")))),
                ]),
            ])
        );

        let grouped = parse_guard("(a is present || b is present) && !c").unwrap();
        assert_eq!(
            grouped,
            Guard::And(vec![
                Guard::Or(vec![Guard::Present("a".into()), Guard::Present("b".into())]),
                Guard::Not(Box::new(Guard::Truthy(attr("c")))),
            ])
        );
    }

    #[test]
    fn test_string_literals() {
        assert_eq!(
            parse_guard(r#"title == 'it\'s'"#).unwrap(),
            Guard::Compare {
                lhs: attr("title"),
                op: CmpOp::Eq,
                rhs: lit(json!("it's")),
            }
        );
        assert_eq!(
            parse_guard(r#"title != """#).unwrap(),
            Guard::Compare {
                lhs: attr("title"),
                op: CmpOp::Ne,
                rhs: lit(json!("")),
            }
        );
    }

    #[test]
    fn test_malformed_guards() {
        assert!(parse_guard("").is_err());
        assert!(parse_guard("name is").is_err());
        assert!(parse_guard("name is maybe").is_err());
        assert!(parse_guard("(a is present").is_err());
        assert!(parse_guard("price >").is_err());
        assert!(parse_guard("a and").is_err());
        assert!(parse_guard("a b").is_err());
        assert!(parse_guard(r#"title == "unterminated"#).is_err());
    }

    #[test]
    fn test_actions() {
        let action = parse_action(r##"title = name; clear draft_note; label = "#" + edition"##)
            .unwrap();
        assert_eq!(
            action.statements,
            vec![
                Statement::Set {
                    target: "title".into(),
                    value: ValueExpr {
                        terms: vec![attr("name")]
                    },
                },
                Statement::Clear("draft_note".into()),
                Statement::Set {
                    target: "label".into(),
                    value: ValueExpr {
                        terms: vec![lit(json!("#")), attr("edition")]
                    },
                },
            ]
        );

        // Trailing separator is accepted
        assert_eq!(parse_action("listed = true;").unwrap().statements.len(), 1);
    }

    #[test]
    fn test_malformed_actions() {
        assert!(parse_action("").is_err());
        assert!(parse_action("title =").is_err());
        assert!(parse_action("title == name").is_err());
        assert!(parse_action("clear").is_err());
        assert!(parse_action("and = 1").is_err());
    }

    #[test]
    fn test_referenced_attributes() {
        let guard = parse_guard("a is present and (b > 1 or c == d)").unwrap();
        assert_eq!(
            guard.attributes().into_iter().collect::<Vec<_>>(),
            vec!["a", "b", "c", "d"]
        );

        let action = parse_action("x = y + z; clear w").unwrap();
        assert_eq!(
            action.attributes().into_iter().collect::<Vec<_>>(),
            vec!["w", "x", "y", "z"]
        );
    }
}
