//! Numeric literal scanning: decimal/hex integers and floats (spec.md §4.1).

use super::token::{Literal, Token, TokenKind};
use super::{LexError, Lexer};

pub(super) fn read_number(lx: &mut Lexer<'_>, line: u32, column: u32) -> Result<Token, LexError> {
    let start = lx.pos;
    let is_hex = lx.peek() == Some(b'0')
        && matches!(lx.peek_at(1), Some(b'x') | Some(b'X'));

    if is_hex {
        lx.advance();
        lx.advance();
        read_hex_digits(lx);
        let mut is_float = false;
        if lx.peek() == Some(b'.') {
            is_float = true;
            lx.advance();
            read_hex_digits(lx);
        }
        if matches!(lx.peek(), Some(b'p') | Some(b'P')) {
            is_float = true;
            lx.advance();
            if matches!(lx.peek(), Some(b'+') | Some(b'-')) {
                lx.advance();
            }
            if !lx.peek().map_or(false, |c| c.is_ascii_digit()) {
                return Err(malformed(lx, start));
            }
            while lx.peek().map_or(false, |c| c.is_ascii_digit()) {
                lx.advance();
            }
        }
        let text = &lx_src(lx)[start..lx.pos];
        let lexeme = String::from_utf8_lossy(text).into_owned();
        let literal = if is_float {
            Literal::Float(parse_hex_float(&lexeme).ok_or_else(|| malformed(lx, start))?)
        } else {
            // Hex integer: wraps around on overflow per Lua 5.4 (up to 16
            // hex digits fits i64/u64; beyond that we wrap like the
            // reference implementation's unsigned accumulation).
            Literal::Integer(parse_hex_integer(&lexeme[2..]))
        };
        return Ok(Token {
            kind: TokenKind::Number,
            lexeme,
            literal: Some(literal),
            line,
            column,
        });
    }

    let mut is_float = false;
    while lx.peek().map_or(false, |c| c.is_ascii_digit()) {
        lx.advance();
    }
    if lx.peek() == Some(b'.') {
        is_float = true;
        lx.advance();
        while lx.peek().map_or(false, |c| c.is_ascii_digit()) {
            lx.advance();
        }
    }
    if matches!(lx.peek(), Some(b'e') | Some(b'E')) {
        is_float = true;
        lx.advance();
        if matches!(lx.peek(), Some(b'+') | Some(b'-')) {
            lx.advance();
        }
        if !lx.peek().map_or(false, |c| c.is_ascii_digit()) {
            return Err(malformed(lx, start));
        }
        while lx.peek().map_or(false, |c| c.is_ascii_digit()) {
            lx.advance();
        }
    }
    // A name character directly following a number is malformed, e.g. `1x`.
    if lx.peek().map_or(false, |c| c == b'_' || c.is_ascii_alphabetic()) {
        return Err(malformed(lx, start));
    }

    let text = &lx_src(lx)[start..lx.pos];
    let lexeme = String::from_utf8_lossy(text).into_owned();
    let literal = if is_float {
        Literal::Float(lexeme.parse::<f64>().map_err(|_| malformed(lx, start))?)
    } else {
        match lexeme.parse::<i64>() {
            Ok(i) => Literal::Integer(i),
            // Decimal integer overflow promotes to float (spec.md §4.1).
            Err(_) => Literal::Float(lexeme.parse::<f64>().map_err(|_| malformed(lx, start))?),
        }
    };
    Ok(Token {
        kind: TokenKind::Number,
        lexeme,
        literal: Some(literal),
        line,
        column,
    })
}

fn read_hex_digits(lx: &mut Lexer<'_>) {
    while lx.peek().map_or(false, |c| c.is_ascii_hexdigit()) {
        lx.advance();
    }
}

fn malformed(lx: &Lexer<'_>, start: usize) -> LexError {
    let text = &lx_src(lx)[start..lx.pos];
    lx.err(format!(
        "malformed number near '{}'",
        String::from_utf8_lossy(text)
    ))
}

/// Parses the hex-digit run after `0x`/`0X` as a wrapping 64-bit integer
/// (matches Lua's `lua_Integer` accumulation: `a = a*16 + digit`).
fn parse_hex_integer(digits: &str) -> i64 {
    let mut acc: u64 = 0;
    for c in digits.chars() {
        let d = c.to_digit(16).unwrap_or(0) as u64;
        acc = acc.wrapping_mul(16).wrapping_add(d);
    }
    acc as i64
}

/// Parses `0x<hex>.<hex>p<dec exp>` hex floats.
fn parse_hex_float(s: &str) -> Option<f64> {
    let s = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X"))?;
    let (mantissa_part, exp_part) = match s.find(['p', 'P']) {
        Some(i) => (&s[..i], Some(&s[i + 1..])),
        None => (s, None),
    };
    let (int_part, frac_part) = match mantissa_part.find('.') {
        Some(i) => (&mantissa_part[..i], &mantissa_part[i + 1..]),
        None => (mantissa_part, ""),
    };
    let mut value = 0f64;
    for c in int_part.chars() {
        value = value * 16.0 + c.to_digit(16)? as f64;
    }
    let mut scale = 1.0 / 16.0;
    for c in frac_part.chars() {
        value += c.to_digit(16)? as f64 * scale;
        scale /= 16.0;
    }
    let exp: i32 = match exp_part {
        Some(e) if !e.is_empty() => e.parse().ok()?,
        _ => 0,
    };
    Some(value * 2f64.powi(exp))
}

fn lx_src<'a>(lx: &'a Lexer<'_>) -> &'a [u8] {
    // SAFETY-free helper: Lexer keeps `src` private; expose it read-only
    // through this crate-local accessor to keep the field private to callers
    // outside the lexer module.
    lx.source_bytes()
}
