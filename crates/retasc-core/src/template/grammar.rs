use winnow::ascii::multispace0;
use winnow::combinator::{alt, cut_err, delimited, not, opt, preceded, repeat, separated, terminated};
use winnow::error::{ContextError, ErrMode, ModalResult, StrContext, StrContextValue};
use winnow::prelude::*;
use winnow::token::{any, one_of, take_while};

use super::ast::{BinOp, Expr, Node, UnaryOp};
use super::error::TemplateError;
use crate::value::Value;

// -- Whitespace & keywords --------------------------------------------------

fn ws(input: &mut &str) -> ModalResult<()> {
    multispace0.void().parse_next(input)
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn keyword<'i>(kw: &'static str) -> impl Parser<&'i str, &'i str, ErrMode<ContextError>> {
    terminated(kw, not(one_of(is_ident_char)))
}

fn ident<'i>(input: &mut &'i str) -> ModalResult<&'i str> {
    (
        one_of(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(0.., is_ident_char),
    )
        .take()
        .parse_next(input)
}

// -- Literals ---------------------------------------------------------------

fn string_literal(input: &mut &str) -> ModalResult<String> {
    let quote = one_of(['"', '\'']).parse_next(input)?;
    let mut s = String::new();
    loop {
        let ch = cut_err(any)
            .context(StrContext::Expected(StrContextValue::Description(
                "closing quote",
            )))
            .parse_next(input)?;
        match ch {
            c if c == quote => return Ok(s),
            '\\' => {
                let esc = cut_err(any).parse_next(input)?;
                match esc {
                    'n' => s.push('\n'),
                    't' => s.push('\t'),
                    'r' => s.push('\r'),
                    '\\' | '"' | '\'' => s.push(esc),
                    other => {
                        s.push('\\');
                        s.push(other);
                    }
                }
            }
            c => s.push(c),
        }
    }
}

fn number(input: &mut &str) -> ModalResult<Expr> {
    let text = (
        take_while(1.., |c: char| c.is_ascii_digit()),
        opt(('.', take_while(1.., |c: char| c.is_ascii_digit()))),
    )
        .take()
        .parse_next(input)?;
    let value = if text.contains('.') {
        text.parse::<f64>()
            .map(Value::Float)
            .map_err(|_| ErrMode::from_input(input).cut())?
    } else {
        text.parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ErrMode::from_input(input).cut())?
    };
    Ok(Expr::Literal(value))
}

fn name(input: &mut &str) -> ModalResult<Expr> {
    let id = ident.parse_next(input)?;
    Ok(match id {
        "true" | "True" => Expr::Literal(Value::Bool(true)),
        "false" | "False" => Expr::Literal(Value::Bool(false)),
        "none" | "None" => Expr::Literal(Value::Null),
        _ => Expr::Var(id.to_string()),
    })
}

fn list_literal(input: &mut &str) -> ModalResult<Expr> {
    '['.parse_next(input)?;
    let items: Vec<Expr> = separated(0.., expression, (ws, ',')).parse_next(input)?;
    (ws, opt(','), ws, cut_err(']')).void().parse_next(input)?;
    Ok(Expr::List(items))
}

fn map_entry(input: &mut &str) -> ModalResult<(Expr, Expr)> {
    let key = expression.parse_next(input)?;
    (ws, cut_err(':')).void().parse_next(input)?;
    let value = cut_err(expression).parse_next(input)?;
    Ok((key, value))
}

fn map_literal(input: &mut &str) -> ModalResult<Expr> {
    '{'.parse_next(input)?;
    let entries: Vec<(Expr, Expr)> = separated(0.., map_entry, (ws, ',')).parse_next(input)?;
    (ws, opt(','), ws, cut_err('}')).void().parse_next(input)?;
    Ok(Expr::Map(entries))
}

// -- Expressions ------------------------------------------------------------
//
// Precedence, lowest first: conditional, or, and, not, comparison/test,
// concatenation (~), additive, multiplicative, unary minus, filter, postfix.

fn primary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    alt((
        delimited('(', expression, (ws, cut_err(')'))),
        list_literal,
        map_literal,
        string_literal.map(|s| Expr::Literal(Value::String(s))),
        number,
        name,
    ))
    .context(StrContext::Expected(StrContextValue::Description(
        "expression",
    )))
    .parse_next(input)
}

fn call_args(input: &mut &str) -> ModalResult<Vec<Expr>> {
    let args: Vec<Expr> = separated(0.., expression, (ws, ',')).parse_next(input)?;
    (ws, opt(','), ws, cut_err(')')).void().parse_next(input)?;
    Ok(args)
}

fn postfix(input: &mut &str) -> ModalResult<Expr> {
    let mut expr = primary(input)?;
    loop {
        let checkpoint = input.checkpoint();
        ws.parse_next(input)?;
        if opt('.').parse_next(input)?.is_some() {
            let attr = cut_err(preceded(ws, ident))
                .context(StrContext::Expected(StrContextValue::Description(
                    "attribute name",
                )))
                .parse_next(input)?;
            expr = Expr::Attr(Box::new(expr), attr.to_string());
        } else if opt('[').parse_next(input)?.is_some() {
            let index = cut_err(expression).parse_next(input)?;
            (ws, cut_err(']')).void().parse_next(input)?;
            expr = Expr::Index(Box::new(expr), Box::new(index));
        } else if opt('(').parse_next(input)?.is_some() {
            let args = call_args(input)?;
            expr = Expr::Call {
                func: Box::new(expr),
                args,
            };
        } else {
            input.reset(&checkpoint);
            return Ok(expr);
        }
    }
}

fn filtered(input: &mut &str) -> ModalResult<Expr> {
    let mut expr = postfix(input)?;
    loop {
        let checkpoint = input.checkpoint();
        ws.parse_next(input)?;
        if opt('|').parse_next(input)?.is_none() {
            input.reset(&checkpoint);
            return Ok(expr);
        }
        ws.parse_next(input)?;
        let filter = cut_err(ident)
            .context(StrContext::Expected(StrContextValue::Description(
                "filter name",
            )))
            .parse_next(input)?;
        let after_name = input.checkpoint();
        ws.parse_next(input)?;
        let args = if opt('(').parse_next(input)?.is_some() {
            call_args(input)?
        } else {
            input.reset(&after_name);
            Vec::new()
        };
        expr = Expr::Filter {
            value: Box::new(expr),
            name: filter.to_string(),
            args,
        };
    }
}

fn unary(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    if opt('-').parse_next(input)?.is_some() {
        let inner = cut_err(unary).parse_next(input)?;
        return Ok(Expr::Unary(UnaryOp::Neg, Box::new(inner)));
    }
    if opt('+').parse_next(input)?.is_some() {
        return cut_err(unary).parse_next(input);
    }
    filtered(input)
}

fn fold(first: Expr, rest: Vec<(BinOp, Expr)>) -> Expr {
    rest.into_iter()
        .fold(first, |acc, (op, r)| Expr::Binary(op, Box::new(acc), Box::new(r)))
}

fn term(input: &mut &str) -> ModalResult<Expr> {
    let first = unary(input)?;
    let rest: Vec<(BinOp, Expr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt((
                    "//".value(BinOp::FloorDiv),
                    '*'.value(BinOp::Mul),
                    '/'.value(BinOp::Div),
                    '%'.value(BinOp::Mod),
                )),
            ),
            cut_err(unary),
        ),
    )
    .parse_next(input)?;
    Ok(fold(first, rest))
}

fn additive(input: &mut &str) -> ModalResult<Expr> {
    let first = term(input)?;
    let rest: Vec<(BinOp, Expr)> = repeat(
        0..,
        (
            preceded(
                ws,
                alt(('+'.value(BinOp::Add), '-'.value(BinOp::Sub))),
            ),
            cut_err(term),
        ),
    )
    .parse_next(input)?;
    Ok(fold(first, rest))
}

fn concat(input: &mut &str) -> ModalResult<Expr> {
    let first = additive(input)?;
    let rest: Vec<(BinOp, Expr)> = repeat(
        0..,
        (preceded(ws, '~'.value(BinOp::Concat)), cut_err(additive)),
    )
    .parse_next(input)?;
    Ok(fold(first, rest))
}

fn compare_op(input: &mut &str) -> ModalResult<BinOp> {
    alt((
        "==".value(BinOp::Eq),
        "!=".value(BinOp::Ne),
        ">=".value(BinOp::Ge),
        "<=".value(BinOp::Le),
        ">".value(BinOp::Gt),
        "<".value(BinOp::Lt),
        keyword("in").value(BinOp::In),
        (keyword("not"), ws, keyword("in")).value(BinOp::NotIn),
    ))
    .parse_next(input)
}

fn comparison(input: &mut &str) -> ModalResult<Expr> {
    let mut left = concat(input)?;
    loop {
        let checkpoint = input.checkpoint();
        ws.parse_next(input)?;
        if opt(keyword("is")).parse_next(input)?.is_some() {
            ws.parse_next(input)?;
            let negated = opt(keyword("not")).parse_next(input)?.is_some();
            ws.parse_next(input)?;
            let test = cut_err(ident)
                .context(StrContext::Expected(StrContextValue::Description(
                    "test name",
                )))
                .parse_next(input)?;
            left = Expr::Test {
                value: Box::new(left),
                name: test.to_string(),
                negated,
            };
            continue;
        }
        match opt(compare_op).parse_next(input)? {
            Some(op) => {
                let right = cut_err(concat).parse_next(input)?;
                left = Expr::Binary(op, Box::new(left), Box::new(right));
            }
            None => {
                input.reset(&checkpoint);
                return Ok(left);
            }
        }
    }
}

fn not_expr(input: &mut &str) -> ModalResult<Expr> {
    ws.parse_next(input)?;
    if opt(keyword("not")).parse_next(input)?.is_some() {
        let inner = cut_err(not_expr).parse_next(input)?;
        return Ok(Expr::Unary(UnaryOp::Not, Box::new(inner)));
    }
    comparison(input)
}

fn and_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = not_expr(input)?;
    let rest: Vec<Expr> =
        repeat(0.., preceded((ws, keyword("and")), cut_err(not_expr))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| Expr::Binary(BinOp::And, Box::new(acc), Box::new(r))))
}

fn or_expr(input: &mut &str) -> ModalResult<Expr> {
    let first = and_expr(input)?;
    let rest: Vec<Expr> =
        repeat(0.., preceded((ws, keyword("or")), cut_err(and_expr))).parse_next(input)?;
    Ok(rest
        .into_iter()
        .fold(first, |acc, r| Expr::Binary(BinOp::Or, Box::new(acc), Box::new(r))))
}

fn expression(input: &mut &str) -> ModalResult<Expr> {
    let then = or_expr(input)?;
    let checkpoint = input.checkpoint();
    ws.parse_next(input)?;
    if opt(keyword("if")).parse_next(input)?.is_none() {
        input.reset(&checkpoint);
        return Ok(then);
    }
    let condition = cut_err(or_expr).parse_next(input)?;
    let checkpoint = input.checkpoint();
    ws.parse_next(input)?;
    let otherwise = if opt(keyword("else")).parse_next(input)?.is_some() {
        Some(Box::new(cut_err(expression).parse_next(input)?))
    } else {
        input.reset(&checkpoint);
        None
    };
    Ok(Expr::Conditional {
        condition: Box::new(condition),
        then: Box::new(then),
        otherwise,
    })
}

fn for_header(input: &mut &str) -> ModalResult<(String, Expr)> {
    ws.parse_next(input)?;
    let var = cut_err(ident).parse_next(input)?;
    (ws, cut_err(keyword("in"))).void().parse_next(input)?;
    let iterable = cut_err(expression).parse_next(input)?;
    Ok((var.to_string(), iterable))
}

/// Parse a bare expression such as `start_date - 7|days`.
pub fn parse_expression(text: &str) -> Result<Expr, TemplateError> {
    terminated(expression, ws)
        .parse(text)
        .map_err(|e| TemplateError::Syntax(e.to_string()))
}

fn parse_for_header(text: &str) -> Result<(String, Expr), TemplateError> {
    terminated(for_header, ws)
        .parse(text)
        .map_err(|e| TemplateError::Syntax(e.to_string()))
}

// -- Template text ----------------------------------------------------------

enum Token {
    Text(String),
    Expr(String),
    Tag(String),
}

fn find_open(text: &str) -> Option<usize> {
    let bytes = text.as_bytes();
    (0..bytes.len().saturating_sub(1))
        .find(|&i| bytes[i] == b'{' && matches!(bytes[i + 1], b'{' | b'%' | b'#'))
}

/// Position of `close` outside of quoted strings.
fn find_close(body: &str, close: &str) -> Option<usize> {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in body.char_indices() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => quote = Some(c),
            None if body[i..].starts_with(close) => return Some(i),
            None => {}
        }
    }
    None
}

fn push_text(tokens: &mut Vec<Token>, text: &str, trim_start: bool, trim_end: bool) {
    let text = if trim_start { text.trim_start() } else { text };
    let text = if trim_end { text.trim_end() } else { text };
    if !text.is_empty() {
        tokens.push(Token::Text(text.to_string()));
    }
}

fn tokenize(text: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut rest = text;
    let mut trim_next = false;
    while let Some(start) = find_open(rest) {
        let (before, after) = rest.split_at(start);
        let open = &after[..2];
        let mut body = &after[2..];
        let trim_before = body.starts_with('-');
        push_text(&mut tokens, before, trim_next, trim_before);
        if trim_before {
            body = &body[1..];
        }
        let close = match open {
            "{{" => "}}",
            "{%" => "%}",
            _ => "#}",
        };
        let end = if open == "{#" {
            body.find(close)
        } else {
            find_close(body, close)
        }
        .ok_or_else(|| TemplateError::Syntax(format!("unclosed '{open}'")))?;
        let mut inner = &body[..end];
        trim_next = inner.ends_with('-');
        if trim_next {
            inner = &inner[..inner.len() - 1];
        }
        match open {
            "{{" => tokens.push(Token::Expr(inner.to_string())),
            "{%" => tokens.push(Token::Tag(inner.trim().to_string())),
            _ => {}
        }
        rest = &body[end + close.len()..];
    }
    push_text(&mut tokens, rest, trim_next, false);
    Ok(tokens)
}

fn split_tag(tag: &str) -> (&str, &str) {
    let len = tag
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(tag.len());
    tag.split_at(len)
}

fn parse_block(
    tokens: &mut std::vec::IntoIter<Token>,
    stop: &[&str],
) -> Result<(Vec<Node>, Option<String>), TemplateError> {
    let mut nodes = Vec::new();
    while let Some(token) = tokens.next() {
        match token {
            Token::Text(text) => nodes.push(Node::Text(text)),
            Token::Expr(src) => nodes.push(Node::Output(parse_expression(&src)?)),
            Token::Tag(tag) => {
                let (word, rest) = split_tag(&tag);
                if stop.contains(&word) {
                    return Ok((nodes, Some(tag)));
                }
                match word {
                    "if" => nodes.push(parse_if(rest, tokens)?),
                    "for" => nodes.push(parse_for(rest, tokens)?),
                    _ => {
                        return Err(TemplateError::Syntax(format!(
                            "unexpected tag '{{% {tag} %}}'"
                        )))
                    }
                }
            }
        }
    }
    Ok((nodes, None))
}

fn parse_if(
    condition: &str,
    tokens: &mut std::vec::IntoIter<Token>,
) -> Result<Node, TemplateError> {
    let mut branches = Vec::new();
    let mut condition = parse_expression(condition)?;
    loop {
        let (body, end) = parse_block(tokens, &["elif", "else", "endif"])?;
        let end = end.ok_or_else(|| TemplateError::Syntax("missing '{% endif %}'".into()))?;
        branches.push((condition, body));
        let (word, rest) = split_tag(&end);
        match word {
            "elif" => condition = parse_expression(rest)?,
            "else" => {
                let (otherwise, end) = parse_block(tokens, &["endif"])?;
                end.ok_or_else(|| TemplateError::Syntax("missing '{% endif %}'".into()))?;
                return Ok(Node::If {
                    branches,
                    otherwise,
                });
            }
            _ => {
                return Ok(Node::If {
                    branches,
                    otherwise: Vec::new(),
                })
            }
        }
    }
}

fn parse_for(header: &str, tokens: &mut std::vec::IntoIter<Token>) -> Result<Node, TemplateError> {
    let (var, iterable) = parse_for_header(header)?;
    let (body, end) = parse_block(tokens, &["endfor"])?;
    end.ok_or_else(|| TemplateError::Syntax("missing '{% endfor %}'".into()))?;
    Ok(Node::For {
        var,
        iterable,
        body,
    })
}

/// Parse template text containing `{{ }}`, `{% %}` and `{# #}` markup.
pub fn parse_template(text: &str) -> Result<Vec<Node>, TemplateError> {
    let mut tokens = tokenize(text)?.into_iter();
    let (nodes, end) = parse_block(&mut tokens, &[])?;
    match end {
        Some(tag) => Err(TemplateError::Syntax(format!(
            "unexpected tag '{{% {tag} %}}'"
        ))),
        None => Ok(nodes),
    }
}
