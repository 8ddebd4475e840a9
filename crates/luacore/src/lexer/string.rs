//! Short string literal scanning with the full Lua 5.4 escape set
//! (spec.md §4.1).

use super::token::{Literal, Token, TokenKind};
use super::{LexError, Lexer};

pub(super) fn read_short_string(
    lx: &mut Lexer<'_>,
    line: u32,
    column: u32,
) -> Result<Token, LexError> {
    let quote = lx.advance().unwrap(); // consume opening quote
    let mut out = Vec::new();
    loop {
        match lx.peek() {
            None => return Err(lx.err("unfinished string")),
            Some(b'\n') | Some(b'\r') => return Err(lx.err("unfinished string")),
            Some(c) if c == quote => {
                lx.advance();
                break;
            }
            Some(b'\\') => {
                lx.advance();
                read_escape(lx, &mut out)?;
            }
            Some(c) => {
                out.push(c);
                lx.advance();
            }
        }
    }
    let lexeme = String::from_utf8_lossy(&out).into_owned();
    Ok(Token {
        kind: TokenKind::String,
        lexeme,
        literal: Some(Literal::Str(out)),
        line,
        column,
    })
}

fn read_escape(lx: &mut Lexer<'_>, out: &mut Vec<u8>) -> Result<(), LexError> {
    let Some(c) = lx.peek() else {
        return Err(lx.err("unfinished string"));
    };
    match c {
        b'a' => {
            out.push(0x07);
            lx.advance();
        }
        b'b' => {
            out.push(0x08);
            lx.advance();
        }
        b'f' => {
            out.push(0x0C);
            lx.advance();
        }
        b'n' => {
            out.push(b'\n');
            lx.advance();
        }
        b'r' => {
            out.push(b'\r');
            lx.advance();
        }
        b't' => {
            out.push(b'\t');
            lx.advance();
        }
        b'v' => {
            out.push(0x0B);
            lx.advance();
        }
        b'\\' => {
            out.push(b'\\');
            lx.advance();
        }
        b'"' => {
            out.push(b'"');
            lx.advance();
        }
        b'\'' => {
            out.push(b'\'');
            lx.advance();
        }
        b'\n' | b'\r' => {
            out.push(b'\n');
            lx.advance();
        }
        b'x' => {
            lx.advance();
            let mut v: u32 = 0;
            for _ in 0..2 {
                let Some(d) = lx.peek().and_then(|c| (c as char).to_digit(16)) else {
                    return Err(lx.err("hexadecimal digit expected"));
                };
                v = v * 16 + d;
                lx.advance();
            }
            out.push(v as u8);
        }
        b'z' => {
            lx.advance();
            loop {
                match lx.peek() {
                    Some(b' ') | Some(b'\t') | Some(0x0B) | Some(0x0C) => {
                        lx.advance();
                    }
                    Some(b'\n') | Some(b'\r') => {
                        lx.advance();
                    }
                    _ => break,
                }
            }
        }
        b'u' => {
            lx.advance();
            if lx.peek() != Some(b'{') {
                return Err(lx.err("missing '{' in \\u{xxxx}"));
            }
            lx.advance();
            let mut v: u32 = 0;
            let mut any = false;
            while let Some(d) = lx.peek().and_then(|c| (c as char).to_digit(16)) {
                v = v
                    .checked_mul(16)
                    .and_then(|v| v.checked_add(d))
                    .ok_or_else(|| lx.err("UTF-8 value too large"))?;
                any = true;
                lx.advance();
            }
            if !any {
                return Err(lx.err("hexadecimal digit expected"));
            }
            if lx.peek() != Some(b'}') {
                return Err(lx.err("missing '}' in \\u{xxxx}"));
            }
            lx.advance();
            push_utf8(out, v);
        }
        d if d.is_ascii_digit() => {
            let mut v: u32 = 0;
            for _ in 0..3 {
                let Some(c) = lx.peek() else { break };
                if !c.is_ascii_digit() {
                    break;
                }
                v = v * 10 + (c - b'0') as u32;
                lx.advance();
            }
            if v > 255 {
                return Err(lx.err("decimal escape too large"));
            }
            out.push(v as u8);
        }
        other => {
            return Err(lx.err(format!("invalid escape sequence '\\{}'", other as char)));
        }
    }
    Ok(())
}

/// Encodes a code point as UTF-8, extended to allow values up to 0x7FFFFFFF
/// as Lua's `\u{}` escape does (not limited to valid Unicode scalar values).
fn push_utf8(out: &mut Vec<u8>, code: u32) {
    if let Some(c) = char::from_u32(code) {
        let mut buf = [0u8; 4];
        out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
        return;
    }
    // Extended range beyond char::MAX: encode manually (6-byte form cap).
    if code < 0x80 {
        out.push(code as u8);
    } else if code < 0x800 {
        out.push(0xC0 | (code >> 6) as u8);
        out.push(0x80 | (code & 0x3F) as u8);
    } else if code < 0x10000 {
        out.push(0xE0 | (code >> 12) as u8);
        out.push(0x80 | ((code >> 6) & 0x3F) as u8);
        out.push(0x80 | (code & 0x3F) as u8);
    } else if code < 0x200000 {
        out.push(0xF0 | (code >> 18) as u8);
        out.push(0x80 | ((code >> 12) & 0x3F) as u8);
        out.push(0x80 | ((code >> 6) & 0x3F) as u8);
        out.push(0x80 | (code & 0x3F) as u8);
    } else if code < 0x4000000 {
        out.push(0xF8 | (code >> 24) as u8);
        out.push(0x80 | ((code >> 18) & 0x3F) as u8);
        out.push(0x80 | ((code >> 12) & 0x3F) as u8);
        out.push(0x80 | ((code >> 6) & 0x3F) as u8);
        out.push(0x80 | (code & 0x3F) as u8);
    } else {
        out.push(0xFC | (code >> 30) as u8);
        out.push(0x80 | ((code >> 24) & 0x3F) as u8);
        out.push(0x80 | ((code >> 18) & 0x3F) as u8);
        out.push(0x80 | ((code >> 12) & 0x3F) as u8);
        out.push(0x80 | ((code >> 6) & 0x3F) as u8);
        out.push(0x80 | (code & 0x3F) as u8);
    }
}
