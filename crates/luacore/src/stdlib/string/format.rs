//! `string.format` (SPEC_FULL.md §7): `%d %i %u %s %q %f %g %e %x %X %o %c
//! %%` directives with the usual flag/width/precision syntax, grounded on
//! the teacher's `crates/luars/src/stdlib/string/string_format.rs`.

use crate::value::lua_value::LuaValue;
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

struct Spec {
    flags: String,
    width: Option<usize>,
    precision: Option<usize>,
    conv: u8,
}

fn parse_spec(fmt: &[u8], i: &mut usize) -> LResult<Spec> {
    let mut flags = String::new();
    while let Some(&c) = fmt.get(*i) {
        if matches!(c, b'-' | b'+' | b' ' | b'#' | b'0') {
            flags.push(c as char);
            *i += 1;
        } else {
            break;
        }
    }
    let mut width = None;
    let start = *i;
    while fmt.get(*i).is_some_and(|c| c.is_ascii_digit()) {
        *i += 1;
    }
    if *i > start {
        width = std::str::from_utf8(&fmt[start..*i]).ok().and_then(|s| s.parse().ok());
    }
    let mut precision = None;
    if fmt.get(*i) == Some(&b'.') {
        *i += 1;
        let start = *i;
        while fmt.get(*i).is_some_and(|c| c.is_ascii_digit()) {
            *i += 1;
        }
        precision = Some(std::str::from_utf8(&fmt[start..*i]).ok().and_then(|s| s.parse().ok()).unwrap_or(0));
    }
    let Some(&conv) = fmt.get(*i) else {
        return Err(LuaError::msg("invalid conversion to 'format'"));
    };
    *i += 1;
    Ok(Spec { flags, width, precision, conv })
}

fn pad(s: String, spec: &Spec) -> String {
    let Some(w) = spec.width else { return s };
    if s.len() >= w {
        return s;
    }
    let fill = w - s.len();
    if spec.flags.contains('-') {
        format!("{s}{}", " ".repeat(fill))
    } else if spec.flags.contains('0') && !spec.flags.contains('-') && matches!(spec.conv, b'd' | b'i' | b'u' | b'x' | b'X' | b'o' | b'f' | b'g' | b'e' | b'G' | b'E') {
        let (sign, rest) = if s.starts_with('-') || s.starts_with('+') { (&s[..1], &s[1..]) } else { ("", s.as_str()) };
        format!("{sign}{}{rest}", "0".repeat(fill))
    } else {
        format!("{}{s}", " ".repeat(fill))
    }
}

fn sign_prefix(spec: &Spec, negative: bool) -> &'static str {
    if negative {
        ""
    } else if spec.flags.contains('+') {
        "+"
    } else if spec.flags.contains(' ') {
        " "
    } else {
        ""
    }
}

pub fn format(vm: &mut Vm, fmt: &[u8], args: &[LuaValue]) -> LResult<Vec<u8>> {
    let mut out = Vec::new();
    let mut argn = 0usize;
    let mut i = 0usize;
    while i < fmt.len() {
        if fmt[i] != b'%' {
            out.push(fmt[i]);
            i += 1;
            continue;
        }
        i += 1;
        if fmt.get(i) == Some(&b'%') {
            out.push(b'%');
            i += 1;
            continue;
        }
        let spec = parse_spec(fmt, &mut i)?;
        let mut next_arg = || {
            let v = args.get(argn).cloned().unwrap_or(LuaValue::Nil);
            argn += 1;
            v
        };
        let piece = match spec.conv {
            b'd' | b'i' | b'u' => {
                let v = next_arg();
                let n = v
                    .coerce_to_number()
                    .and_then(|n| n.as_integer())
                    .ok_or_else(|| LuaError::msg(format!("bad argument #{argn} to 'format' (number expected, got {})", v.type_name())))?;
                let digits = n.unsigned_abs().to_string();
                let digits = if let Some(p) = spec.precision {
                    format!("{:0>width$}", digits, width = p)
                } else {
                    digits
                };
                format!("{}{}{digits}", if n < 0 { "-" } else { "" }, sign_prefix(&spec, n < 0))
            }
            b'x' | b'X' => {
                let v = next_arg();
                let n = v.coerce_to_number().and_then(|n| n.as_integer()).unwrap_or(0) as u64;
                let mut digits = if spec.conv == b'x' { format!("{n:x}") } else { format!("{n:X}") };
                if let Some(p) = spec.precision {
                    digits = format!("{:0>width$}", digits, width = p);
                }
                if spec.flags.contains('#') && n != 0 {
                    digits = format!("{}{digits}", if spec.conv == b'x' { "0x" } else { "0X" });
                }
                digits
            }
            b'o' => {
                let v = next_arg();
                let n = v.coerce_to_number().and_then(|n| n.as_integer()).unwrap_or(0) as u64;
                format!("{n:o}")
            }
            b'c' => {
                let v = next_arg();
                let n = v.coerce_to_number().and_then(|n| n.as_integer()).unwrap_or(0);
                (n as u8 as char).to_string()
            }
            b'f' | b'F' => {
                let v = next_arg();
                let f = v.coerce_to_number().and_then(|n| n.as_float()).unwrap_or(0.0);
                let prec = spec.precision.unwrap_or(6);
                format!("{}{:.*}", sign_prefix(&spec, f < 0.0), prec, f)
            }
            b'e' | b'E' => {
                let v = next_arg();
                let f = v.coerce_to_number().and_then(|n| n.as_float()).unwrap_or(0.0);
                let prec = spec.precision.unwrap_or(6);
                let s = format!("{:.*e}", prec, f);
                let s = fixup_exponent(&s, spec.conv == b'E');
                format!("{}{s}", sign_prefix(&spec, f < 0.0))
            }
            b'g' | b'G' => {
                let v = next_arg();
                let f = v.coerce_to_number().and_then(|n| n.as_float()).unwrap_or(0.0);
                let prec = spec.precision.unwrap_or(6).max(1);
                format_g(f, prec, spec.conv == b'G')
            }
            b's' => {
                let v = next_arg();
                let s = vm.tostring(&v)?.to_str_lossy().into_owned();
                if let Some(p) = spec.precision {
                    s.chars().take(p).collect()
                } else {
                    s
                }
            }
            b'q' => {
                let v = next_arg();
                quote(&v)
            }
            other => return Err(LuaError::msg(format!("invalid conversion '%{}' to 'format'", other as char))),
        };
        out.extend_from_slice(pad(piece, &spec).as_bytes());
    }
    Ok(out)
}

fn fixup_exponent(s: &str, upper: bool) -> String {
    // Rust renders "1.5e2"; C wants "1.5e+02" (two-digit minimum exponent).
    let Some(epos) = s.find('e') else { return s.to_string() };
    let (mantissa, exp) = s.split_at(epos);
    let exp = &exp[1..];
    let (sign, digits) = match exp.strip_prefix('-') {
        Some(d) => ("-", d),
        None => ("+", exp),
    };
    let digits = if digits.len() < 2 { format!("0{digits}") } else { digits.to_string() };
    format!("{mantissa}{}{sign}{digits}", if upper { "E" } else { "e" })
}

fn format_g(f: f64, prec: usize, upper: bool) -> String {
    if f == 0.0 {
        return "0".to_string();
    }
    let exp = f.abs().log10().floor() as i32;
    if exp < -4 || exp >= prec as i32 {
        let s = format!("{:.*e}", prec.saturating_sub(1), f);
        let s = fixup_exponent(&s, upper);
        trim_g(&s)
    } else {
        let decimals = (prec as i32 - 1 - exp).max(0) as usize;
        trim_g(&format!("{:.*}", decimals, f))
    }
}

fn trim_g(s: &str) -> String {
    if let Some(epos) = s.find(['e', 'E']) {
        let (mantissa, exp) = s.split_at(epos);
        let mantissa = if mantissa.contains('.') {
            mantissa.trim_end_matches('0').trim_end_matches('.')
        } else {
            mantissa
        };
        format!("{mantissa}{exp}")
    } else if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

/// `%q`: a quoted literal readable back by the Lua lexer (spec.md §4.1
/// string literal rules, applied in reverse).
fn quote(v: &LuaValue) -> String {
    match v {
        LuaValue::Str(s) => {
            let mut out = String::from("\"");
            for &b in s.as_bytes() {
                match b {
                    b'"' => out.push_str("\\\""),
                    b'\\' => out.push_str("\\\\"),
                    b'\n' => out.push_str("\\n"),
                    b'\r' => out.push_str("\\r"),
                    0 => out.push_str("\\0"),
                    c if c < 32 || c == 127 => out.push_str(&format!("\\{c}")),
                    c => out.push(c as char),
                }
            }
            out.push('"');
            out
        }
        LuaValue::Integer(i) => i.to_string(),
        LuaValue::Float(f) if f.is_finite() => format!("{:?}", f),
        LuaValue::Float(f) if f.is_nan() => "(0/0)".to_string(),
        LuaValue::Float(f) => if *f > 0.0 { "1e9999".to_string() } else { "-1e9999".to_string() },
        LuaValue::Nil => "nil".to_string(),
        LuaValue::Boolean(b) => b.to_string(),
        other => format!("{other}"),
    }
}
