//! `utf8` library (spec.md §6, SPEC_FULL.md §7). Grounded on the teacher's
//! `crates/luars/src/stdlib/utf8.rs` (byte-position arithmetic for
//! `len`/`codepoint`/`offset`, state-table-driven `codes` iterator),
//! generalized to this crate's `LuaStr`/`check_str` helpers in place of the
//! teacher's string-id lookups.

use crate::stdlib::{arg, bad_arg, check_integer, check_str, new_lib_table, opt_integer, set_native, TableExt};
use crate::value::lua_value::LuaValue;
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

pub fn install(vm: &mut Vm) {
    let t = new_lib_table(vm, "utf8");
    set_native(vm, &t, "len", utf8_len);
    set_native(vm, &t, "char", utf8_char);
    set_native(vm, &t, "codes", utf8_codes);
    set_native(vm, &t, "codepoint", utf8_codepoint);
    set_native(vm, &t, "offset", utf8_offset);
    let pattern = "[\0-\u{7F}\u{C2}-\u{F4}][\u{80}-\u{BF}]*";
    t.set_string_key(vm, "charpattern", vm.new_string(pattern));
}

fn utf8_len(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "len")?;
    let bytes = s.as_bytes();
    let i = opt_integer(args, 2, "len", 1)?;
    let j = opt_integer(args, 3, "len", -1)?;
    let lax = matches!(arg(args, 4), LuaValue::Boolean(true));

    let len = bytes.len() as i64;
    let start = byte_index(i, len);
    let end = byte_index(j, len) + 1;
    let start_byte = start.max(0) as usize;
    let end_byte = (end.max(0) as usize).min(bytes.len());

    if start_byte > end_byte || start_byte > bytes.len() {
        return Ok(vec![LuaValue::Nil, LuaValue::Integer(start_byte as i64 + 1)]);
    }

    let slice = &bytes[start_byte..end_byte];
    match std::str::from_utf8(slice) {
        Ok(valid) => Ok(vec![LuaValue::Integer(valid.chars().count() as i64)]),
        Err(e) if lax => {
            let _ = e;
            Ok(vec![LuaValue::Nil])
        }
        Err(e) => Ok(vec![LuaValue::Nil, LuaValue::Integer((start_byte + e.valid_up_to() + 1) as i64)]),
    }
}

/// Converts a Lua 1-based (possibly negative, counting from the end) index
/// into a 0-based byte offset (spec.md §6 "string indices").
fn byte_index(i: i64, len: i64) -> i64 {
    if i >= 0 {
        i - 1
    } else {
        (len + i).max(-1)
    }
}

fn utf8_char(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let mut result = String::new();
    for (idx, v) in args.iter().enumerate() {
        let code = v.as_integer().ok_or_else(|| bad_arg(idx + 1, "char", "number", v))?;
        if !(0..=0x10FFFF).contains(&code) {
            return Err(LuaError::msg(format!("bad argument #{} to 'char' (value out of range)", idx + 1)));
        }
        match char::from_u32(code as u32) {
            Some(ch) => result.push(ch),
            None => return Err(LuaError::msg(format!("bad argument #{} to 'char' (value out of range)", idx + 1))),
        }
    }
    Ok(vec![vm.new_string(&result)])
}

fn utf8_codepoint(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "codepoint")?;
    let bytes = s.as_bytes();
    let i = opt_integer(args, 2, "codepoint", 1)?;
    let j = opt_integer(args, 3, "codepoint", i)?;
    let len = bytes.len() as i64;
    let start = byte_index(i, len).max(0) as usize;
    let end = (byte_index(j, len) + 1).max(0) as usize;
    if start >= bytes.len() {
        return Err(LuaError::msg("bad argument #2 to 'codepoint' (out of bounds)"));
    }
    let text = std::str::from_utf8(&bytes[start..end.min(bytes.len())]).map_err(|_| LuaError::msg("invalid UTF-8 code"))?;
    Ok(text.chars().map(|c| LuaValue::Integer(c as i64)).collect())
}

fn utf8_offset(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "offset")?;
    let bytes = s.as_bytes();
    let n = check_integer(args, 2, "offset")?;
    let default_i = if n >= 0 { 1 } else { bytes.len() as i64 + 1 };
    let i = opt_integer(args, 3, "offset", default_i)?;
    let start = byte_index(i, bytes.len() as i64).max(0) as usize;
    if start > bytes.len() {
        return Ok(vec![LuaValue::Nil]);
    }

    let mut pos = start;
    let mut count = n;
    if n > 0 {
        count -= 1;
        while count > 0 && pos < bytes.len() {
            pos += 1;
            while pos < bytes.len() && (bytes[pos] & 0xC0) == 0x80 {
                pos += 1;
            }
            count -= 1;
        }
        if count != 0 {
            return Ok(vec![LuaValue::Nil]);
        }
    } else if n < 0 {
        while count < 0 && pos > 0 {
            pos -= 1;
            while pos > 0 && (bytes[pos] & 0xC0) == 0x80 {
                pos -= 1;
            }
            count += 1;
        }
        if count != 0 {
            return Ok(vec![LuaValue::Nil]);
        }
    }
    Ok(vec![LuaValue::Integer(pos as i64 + 1)])
}

fn utf8_codes(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "codes")?;
    let captures = vec![LuaValue::Str(s)];
    let iter = crate::value::closure::LuaFunction::native_closure("utf8.codes iterator", captures, utf8_codes_iterator);
    Ok(vec![LuaValue::Function(iter), arg(args, 1), LuaValue::Integer(0)])
}

fn utf8_codes_iterator(_vm: &mut Vm, captures: &[LuaValue], args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = match &captures[0] {
        LuaValue::Str(s) => s.clone(),
        _ => unreachable!("utf8.codes always captures a string"),
    };
    let bytes = s.as_bytes();
    let prev_one_based = arg(args, 2).as_integer().unwrap_or(0).max(0) as usize;
    let pos = if prev_one_based == 0 {
        0
    } else {
        let start0 = prev_one_based - 1;
        let char_len = std::str::from_utf8(&bytes[start0..]).ok().and_then(|s| s.chars().next()).map(|c| c.len_utf8()).unwrap_or(1);
        start0 + char_len
    };
    if pos >= bytes.len() {
        return Ok(vec![LuaValue::Nil]);
    }
    let text = std::str::from_utf8(&bytes[pos..]).map_err(|_| LuaError::msg("invalid UTF-8 code"))?;
    let ch = text.chars().next().expect("pos < len, non-empty remainder");
    Ok(vec![LuaValue::Integer(pos as i64 + 1), LuaValue::Integer(ch as i64)])
}

