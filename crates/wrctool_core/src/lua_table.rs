//! Parser for Lua data modules of the form `return { ... }`.
//!
//! Only the data subset of Lua is accepted: string, number, boolean and nil
//! literals plus (nested) table constructors. Anything that would need an
//! interpreter (function calls, operators, local bindings) is rejected.

use anyhow::{Result, bail};
use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, take_until, take_while, take_while1},
    character::complete::{char, digit0, digit1, multispace1, one_of, satisfy},
    combinator::{all_consuming, cut, map, opt, recognize, value},
    error::{ContextError, ErrorKind, ParseError, VerboseError, context, convert_error},
    multi::many0,
    sequence::{delimited, pair, tuple},
};

#[derive(Debug, Clone, PartialEq)]
pub enum LuaValue {
    Nil,
    Boolean(bool),
    /// Raw numeral text as written in the source.
    Number(String),
    String(String),
    Table(LuaTable),
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LuaTable {
    pub fields: Vec<TableField>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableField {
    /// `None` for positional (array-part) entries.
    pub key: Option<FieldKey>,
    pub value: LuaValue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FieldKey {
    Name(String),
    Expr(LuaValue),
}

impl FieldKey {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Name(name) => Some(name),
            Self::Expr(LuaValue::String(text)) => Some(text),
            Self::Expr(_) => None,
        }
    }
}

impl LuaValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Table(_) => "table",
        }
    }

    pub fn as_table(&self) -> Option<&LuaTable> {
        match self {
            Self::Table(table) => Some(table),
            _ => None,
        }
    }

    /// Text form of a scalar literal; `None` for nil and tables.
    pub fn scalar_text(&self) -> Option<String> {
        match self {
            Self::Boolean(flag) => Some(flag.to_string()),
            Self::Number(raw) => Some(raw.clone()),
            Self::String(text) => Some(text.clone()),
            Self::Nil | Self::Table(_) => None,
        }
    }
}

impl LuaTable {
    pub fn positional(&self) -> impl Iterator<Item = &LuaValue> {
        self.fields
            .iter()
            .filter(|field| field.key.is_none())
            .map(|field| &field.value)
    }
}

/// Parse the source of a data module and return the value it returns.
pub fn parse_module(source: &str) -> Result<LuaValue> {
    match all_consuming(chunk::<VerboseError<&str>>)(source) {
        Ok((_, value)) => Ok(value),
        Err(nom::Err::Error(error)) | Err(nom::Err::Failure(error)) => {
            bail!(
                "failed to parse Lua data module:\n{}",
                convert_error(source, error)
            )
        }
        Err(nom::Err::Incomplete(_)) => bail!("failed to parse Lua data module: incomplete input"),
    }
}

fn chunk<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, LuaValue, E> {
    let input = input.strip_prefix('\u{feff}').unwrap_or(input);
    let (input, _) = ws(input)?;
    let (input, _) = context("return statement", tag("return"))(input)?;
    let (input, _) = ws(input)?;
    let (input, returned) = context("returned value", cut(lua_value))(input)?;
    let (input, _) = ws(input)?;
    let (input, _) = opt(char(';'))(input)?;
    let (input, _) = ws(input)?;
    Ok((input, returned))
}

fn lua_value<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, LuaValue, E> {
    context(
        "value",
        alt((
            map(quoted_string, LuaValue::String),
            map(long_bracket, LuaValue::String),
            map(table, LuaValue::Table),
            map(number, LuaValue::Number),
            keyword_literal,
        )),
    )(input)
}

fn table<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, LuaTable, E> {
    let (mut input, _) = pair(char('{'), ws)(input)?;
    let mut fields = Vec::new();
    loop {
        if let Ok((rest, _)) = char::<_, E>('}')(input) {
            return Ok((rest, LuaTable { fields }));
        }
        let (rest, field) = context("table field", cut(table_field))(input)?;
        fields.push(field);
        let (rest, _) = ws(rest)?;
        match one_of::<_, _, E>(",;")(rest) {
            Ok((rest, _)) => {
                let (rest, _) = ws(rest)?;
                input = rest;
            }
            Err(nom::Err::Error(_)) => {
                let (rest, _) = context("closing brace", cut(char('}')))(rest)?;
                return Ok((rest, LuaTable { fields }));
            }
            Err(error) => return Err(error),
        }
    }
}

fn table_field<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, TableField, E> {
    alt((bracketed_field, named_field, positional_field))(input)
}

fn bracketed_field<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, TableField, E> {
    let (input, key) = delimited(pair(char('['), ws), lua_value, pair(ws, char(']')))(input)?;
    let (input, _) = tuple((ws, char('='), ws))(input)?;
    let (input, value) = lua_value(input)?;
    Ok((
        input,
        TableField {
            key: Some(FieldKey::Expr(key)),
            value,
        },
    ))
}

fn named_field<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, TableField, E> {
    let (input, key) = name(input)?;
    let (input, _) = tuple((ws, char('='), ws))(input)?;
    let (input, value) = lua_value(input)?;
    Ok((
        input,
        TableField {
            key: Some(FieldKey::Name(key.to_string())),
            value,
        },
    ))
}

fn positional_field<'a, E: ParseError<&'a str> + ContextError<&'a str>>(
    input: &'a str,
) -> IResult<&'a str, TableField, E> {
    map(lua_value, |value| TableField { key: None, value })(input)
}

fn name<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, &'a str, E> {
    recognize(pair(
        satisfy(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(|c: char| c.is_ascii_alphanumeric() || c == '_'),
    ))(input)
}

fn keyword_literal<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, LuaValue, E> {
    let (rest, word) = name(input)?;
    match word {
        "true" => Ok((rest, LuaValue::Boolean(true))),
        "false" => Ok((rest, LuaValue::Boolean(false))),
        "nil" => Ok((rest, LuaValue::Nil)),
        _ => Err(nom::Err::Error(E::from_error_kind(input, ErrorKind::Tag))),
    }
}

fn number<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, String, E> {
    let hex = recognize(pair(
        alt((tag("0x"), tag("0X"))),
        take_while1(|c: char| c.is_ascii_hexdigit()),
    ));
    let mantissa = alt((
        recognize(pair(digit1, opt(pair(char('.'), digit0)))),
        recognize(pair(char('.'), digit1)),
    ));
    let exponent = tuple((one_of("eE"), opt(one_of("+-")), digit1));
    let decimal = recognize(pair(mantissa, opt(exponent)));
    map(
        recognize(pair(opt(char('-')), alt((hex, decimal)))),
        |raw: &str| raw.to_string(),
    )(input)
}

/// `[[...]]` / `[==[...]==]`; a newline directly after the opener is dropped.
fn long_bracket<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, String, E> {
    let (rest, level) = delimited(char('['), take_while(|c: char| c == '='), char('['))(input)?;
    let close = format!("]{level}]");
    let (rest, body) = take_until(close.as_str())(rest)?;
    let rest = &rest[close.len()..];
    let body = body
        .strip_prefix("\r\n")
        .or_else(|| body.strip_prefix('\n'))
        .unwrap_or(body);
    Ok((rest, body.to_string()))
}

fn quoted_string<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, String, E> {
    let quote = match input.chars().next() {
        Some(ch @ ('\'' | '"')) => ch,
        _ => return Err(nom::Err::Error(E::from_error_kind(input, ErrorKind::Char))),
    };

    // Lua strings are byte strings; `\ddd` and `\xhh` may produce partial UTF-8.
    let mut bytes = Vec::new();
    let mut chars = input.char_indices().skip(1).peekable();
    while let Some((index, ch)) = chars.next() {
        if ch == quote {
            let text = String::from_utf8(bytes).map_err(|_| failure(input, ErrorKind::Verify))?;
            return Ok((&input[index + ch.len_utf8()..], text));
        }
        match ch {
            '\n' | '\r' => return Err(failure(&input[index..], ErrorKind::Char)),
            '\\' => {
                let Some((escape_index, escape)) = chars.next() else {
                    break;
                };
                let at = &input[escape_index..];
                match escape {
                    'a' => bytes.push(0x07),
                    'b' => bytes.push(0x08),
                    'f' => bytes.push(0x0c),
                    'n' => bytes.push(b'\n'),
                    'r' => bytes.push(b'\r'),
                    't' => bytes.push(b'\t'),
                    'v' => bytes.push(0x0b),
                    '\\' | '"' | '\'' => push_char(&mut bytes, escape),
                    '\n' => bytes.push(b'\n'),
                    'z' => {
                        while let Some(&(_, next)) = chars.peek() {
                            if !next.is_whitespace() {
                                break;
                            }
                            chars.next();
                        }
                    }
                    'x' => {
                        let mut code = 0u32;
                        for _ in 0..2 {
                            let digit = chars
                                .next()
                                .and_then(|(_, digit)| digit.to_digit(16))
                                .ok_or_else(|| failure(at, ErrorKind::HexDigit))?;
                            code = code * 16 + digit;
                        }
                        bytes.push(u8::try_from(code).map_err(|_| failure(at, ErrorKind::HexDigit))?);
                    }
                    'u' => {
                        if !matches!(chars.next(), Some((_, '{'))) {
                            return Err(failure(at, ErrorKind::Char));
                        }
                        let mut code = 0u32;
                        loop {
                            match chars.next() {
                                Some((_, '}')) => break,
                                Some((_, digit)) => {
                                    let digit = digit
                                        .to_digit(16)
                                        .ok_or_else(|| failure(at, ErrorKind::HexDigit))?;
                                    code = code
                                        .checked_mul(16)
                                        .and_then(|value| value.checked_add(digit))
                                        .ok_or_else(|| failure(at, ErrorKind::TooLarge))?;
                                }
                                None => return Err(failure(at, ErrorKind::Eof)),
                            }
                        }
                        let decoded =
                            char::from_u32(code).ok_or_else(|| failure(at, ErrorKind::Verify))?;
                        push_char(&mut bytes, decoded);
                    }
                    digit if digit.is_ascii_digit() => {
                        let mut code = digit.to_digit(10).unwrap_or_default();
                        for _ in 0..2 {
                            match chars.peek().and_then(|&(_, next)| next.to_digit(10)) {
                                Some(value) => {
                                    code = code * 10 + value;
                                    chars.next();
                                }
                                None => break,
                            }
                        }
                        bytes.push(u8::try_from(code).map_err(|_| failure(at, ErrorKind::TooLarge))?);
                    }
                    _ => return Err(failure(at, ErrorKind::Escaped)),
                }
            }
            other => push_char(&mut bytes, other),
        }
    }
    Err(failure(input, ErrorKind::Eof))
}

fn ws<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, (), E> {
    value((), many0(alt((value((), multispace1), comment))))(input)
}

fn comment<'a, E: ParseError<&'a str>>(input: &'a str) -> IResult<&'a str, (), E> {
    let (input, _) = tag("--")(input)?;
    if let Ok((rest, _)) = long_bracket::<E>(input) {
        return Ok((rest, ()));
    }
    value((), take_while(|c: char| c != '\n'))(input)
}

fn push_char(bytes: &mut Vec<u8>, ch: char) {
    let mut buffer = [0u8; 4];
    bytes.extend_from_slice(ch.encode_utf8(&mut buffer).as_bytes());
}

fn failure<'a, E: ParseError<&'a str>>(input: &'a str, kind: ErrorKind) -> nom::Err<E> {
    nom::Err::Failure(E::from_error_kind(input, kind))
}
