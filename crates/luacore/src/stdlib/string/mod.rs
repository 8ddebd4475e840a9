//! `string` library (spec.md §6, SPEC_FULL.md §7): byte-oriented string
//! operations plus the pattern-matching functions and `string.format`.
//!
//! Grounded on the teacher's `crates/luars/src/stdlib/string/mod.rs`, which
//! registers the same function set on a `string` table later installed as
//! the string metatable's `__index` so `("x"):upper()` dispatches here too.

mod format;
mod pattern;

use crate::stdlib::{arg, check_integer, check_str, new_lib_table, opt_integer, opt_str, set_native};
use crate::value::lua_table::LuaTable;
use crate::value::lua_value::LuaValue;
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

pub fn install(vm: &mut Vm) -> LuaTable {
    let t = new_lib_table(vm, "string");
    set_native(vm, &t, "len", s_len);
    set_native(vm, &t, "byte", s_byte);
    set_native(vm, &t, "char", s_char);
    set_native(vm, &t, "sub", s_sub);
    set_native(vm, &t, "upper", s_upper);
    set_native(vm, &t, "lower", s_lower);
    set_native(vm, &t, "rep", s_rep);
    set_native(vm, &t, "reverse", s_reverse);
    set_native(vm, &t, "format", s_format);
    set_native(vm, &t, "find", s_find);
    set_native(vm, &t, "match", s_match);
    set_native(vm, &t, "gmatch", s_gmatch);
    set_native(vm, &t, "gsub", s_gsub);
    set_native(vm, &t, "dump", s_dump);
    t
}

/// `string.dump(f [, strip])` (spec.md §4.6): serializes a Lua closure's
/// `Proto` to this crate's binary chunk format. Only Lua closures can be
/// dumped — there is no `Proto` to serialize for a native function.
fn s_dump(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let strip = match arg(args, 2) {
        LuaValue::Nil => false,
        other => other.is_truthy(),
    };
    match arg(args, 1) {
        LuaValue::Function(crate::value::closure::LuaFunction::Lua(closure)) => {
            let bytes = crate::vm::load::dump(&closure.0.proto, strip);
            Ok(vec![LuaValue::new_string_owned(bytes)])
        }
        other => Err(crate::stdlib::bad_arg(1, "dump", "Lua function", &other)),
    }
}

/// Lua string indices are 1-based and negative-from-end; this normalizes
/// `(i, j)` to a 0-based, end-exclusive, in-bounds `[start, end)` range over
/// a string of length `len` (spec.md §6 `string.sub` semantics, shared by
/// every function that takes an index pair).
fn abs_range(len: usize, i: i64, j: i64) -> (usize, usize) {
    let norm = |x: i64| -> i64 {
        if x >= 0 {
            x
        } else {
            (len as i64 + x + 1).max(0)
        }
    };
    let mut start = norm(i);
    if start < 1 {
        start = 1;
    }
    let mut end = norm(j);
    if end > len as i64 {
        end = len as i64;
    }
    if start > end {
        return (0, 0);
    }
    ((start - 1) as usize, end as usize)
}

fn s_len(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "len")?;
    Ok(vec![LuaValue::Integer(s.len() as i64)])
}

fn s_sub(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "sub")?;
    let i = opt_integer(args, 2, "sub", 1)?;
    let j = opt_integer(args, 3, "sub", -1)?;
    let (start, end) = abs_range(s.len(), i, j);
    Ok(vec![LuaValue::Str(vm.intern(&s.as_bytes()[start..end]))])
}

fn s_upper(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "upper")?;
    let upper: Vec<u8> = s.as_bytes().iter().map(|b| b.to_ascii_uppercase()).collect();
    Ok(vec![LuaValue::Str(vm.intern(&upper))])
}

fn s_lower(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "lower")?;
    let lower: Vec<u8> = s.as_bytes().iter().map(|b| b.to_ascii_lowercase()).collect();
    Ok(vec![LuaValue::Str(vm.intern(&lower))])
}

fn s_rep(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "rep")?;
    let n = check_integer(args, 2, "rep")?;
    let sep = opt_str(args, 3, "rep", "")?;
    if n <= 0 {
        return Ok(vec![LuaValue::Str(vm.intern(b""))]);
    }
    let mut out = Vec::with_capacity(s.len() * n as usize);
    for i in 0..n {
        if i > 0 {
            out.extend_from_slice(sep.as_bytes());
        }
        out.extend_from_slice(s.as_bytes());
    }
    Ok(vec![LuaValue::Str(vm.intern(&out))])
}

fn s_reverse(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "reverse")?;
    let mut bytes = s.as_bytes().to_vec();
    bytes.reverse();
    Ok(vec![LuaValue::Str(vm.intern(&bytes))])
}

fn s_byte(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "byte")?;
    let i = opt_integer(args, 2, "byte", 1)?;
    let j = opt_integer(args, 3, "byte", i)?;
    let _ = vm;
    let (start, end) = abs_range(s.len(), i, j);
    Ok(s.as_bytes()[start..end].iter().map(|&b| LuaValue::Integer(b as i64)).collect())
}

fn s_char(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let mut bytes = Vec::with_capacity(args.len());
    for i in 1..=args.len() {
        let n = check_integer(args, i, "char")?;
        if !(0..=255).contains(&n) {
            return Err(LuaError::msg(format!("bad argument #{i} to 'char' (value out of range)")));
        }
        bytes.push(n as u8);
    }
    Ok(vec![LuaValue::Str(vm.intern(&bytes))])
}

fn s_format(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let fmt = check_str(args, 1, "format")?;
    let rest: Vec<LuaValue> = args.iter().skip(1).cloned().collect();
    let out = format::format(vm, fmt.as_bytes(), &rest)?;
    Ok(vec![LuaValue::Str(vm.intern(&out))])
}

fn pattern_err(e: pattern::PatternError) -> LuaError {
    LuaError::msg(e.0)
}

/// Builds the capture result list for a match, substituting the whole match
/// when the pattern had no explicit captures (shared by `find`/`match`/
/// `gmatch`/`gsub`, spec.md §6 "captures").
fn captures_to_values(vm: &mut Vm, src: &[u8], caps: &[(isize, usize, usize)]) -> Vec<LuaValue> {
    caps.iter()
        .map(|&(kind, start, end)| {
            if kind == 1 {
                LuaValue::Integer(start as i64 + 1)
            } else {
                LuaValue::Str(vm.intern(&src[start..end]))
            }
        })
        .collect()
}

fn s_find(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "find")?;
    let pat = check_str(args, 2, "find")?;
    let init = opt_integer(args, 3, "find", 1)?;
    let plain = matches!(arg(args, 4), LuaValue::Boolean(true));
    let len = s.len();
    let init_idx = {
        let n = if init >= 0 { init } else { (len as i64 + init + 1).max(1) };
        ((n.max(1) - 1) as usize).min(len)
    };
    if plain || !pat.as_bytes().iter().any(|b| matches!(b, b'^' | b'$' | b'*' | b'+' | b'?' | b'.' | b'(' | b'[' | b'%' | b'-')) {
        let hay = &s.as_bytes()[init_idx.min(len)..];
        return Ok(match find_plain(hay, pat.as_bytes()) {
            Some(off) => vec![LuaValue::Integer((init_idx + off + 1) as i64), LuaValue::Integer((init_idx + off + pat.len()) as i64)],
            None => vec![LuaValue::Nil],
        });
    }
    match pattern::find(s.as_bytes(), pat.as_bytes(), init_idx).map_err(pattern_err)? {
        None => Ok(vec![LuaValue::Nil]),
        Some((start, end, caps)) => {
            let mut out = vec![LuaValue::Integer(start as i64 + 1), LuaValue::Integer(end as i64)];
            if !(caps.len() == 1 && caps[0].1 == start && caps[0].2 == end && pat_has_no_captures(pat.as_bytes())) {
                out.extend(captures_to_values(vm, s.as_bytes(), &caps));
            }
            Ok(out)
        }
    }
}

fn pat_has_no_captures(pat: &[u8]) -> bool {
    !pat.contains(&b'(')
}

fn find_plain(hay: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() {
        return Some(0);
    }
    hay.windows(needle.len()).position(|w| w == needle)
}

fn s_match(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "match")?;
    let pat = check_str(args, 2, "match")?;
    let init = opt_integer(args, 3, "match", 1)?;
    let len = s.len();
    let init_idx = {
        let n = if init >= 0 { init } else { (len as i64 + init + 1).max(1) };
        ((n.max(1) - 1) as usize).min(len)
    };
    match pattern::find(s.as_bytes(), pat.as_bytes(), init_idx).map_err(pattern_err)? {
        None => Ok(vec![LuaValue::Nil]),
        Some((_, _, caps)) => Ok(captures_to_values(vm, s.as_bytes(), &caps)),
    }
}

/// `string.gmatch` returns an iterator native closure carrying the subject,
/// pattern, and scan position as captured upvalues (grounded on the
/// teacher's `create_c_closure` pattern, same as `coroutine.wrap`). The
/// closure's capture vector is fixed at creation time, so the mutable scan
/// position lives in a one-field private table (itself `Rc<RefCell<_>>`)
/// rather than in a `LuaValue::Integer` capture.
fn s_gmatch(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "gmatch")?;
    let pat = check_str(args, 2, "gmatch")?;
    let pos_cell = LuaTable::new();
    let _ = pos_cell.raw_set(LuaValue::Integer(1), LuaValue::Integer(0));
    let captures = vec![LuaValue::Str(s), LuaValue::Str(pat), LuaValue::Table(pos_cell)];
    Ok(vec![LuaValue::Function(crate::value::closure::LuaFunction::native_closure("gmatch_iterator", captures, gmatch_iterator))])
}

fn gmatch_iterator(vm: &mut Vm, captures: &[LuaValue], _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let LuaValue::Str(s) = &captures[0] else { unreachable!() };
    let LuaValue::Str(pat) = &captures[1] else { unreachable!() };
    let LuaValue::Table(pos_cell) = &captures[2] else { unreachable!() };
    let start = match pos_cell.raw_get(&LuaValue::Integer(1)) {
        LuaValue::Integer(n) => n as usize,
        _ => 0,
    };
    if start > s.len() {
        return Ok(vec![LuaValue::Nil]);
    }
    match pattern::find(s.as_bytes(), pat.as_bytes(), start).map_err(pattern_err)? {
        None => Ok(vec![LuaValue::Nil]),
        Some((ms, me, caps)) => {
            let next = if me > start { me } else { start + 1 };
            let _ = pos_cell.raw_set(LuaValue::Integer(1), LuaValue::Integer(next as i64));
            Ok(captures_to_values(vm, s.as_bytes(), &caps))
        }
    }
}

fn s_gsub(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let s = check_str(args, 1, "gsub")?;
    let pat = check_str(args, 2, "gsub")?;
    let repl = arg(args, 3);
    let max_n = opt_integer(args, 4, "gsub", i64::MAX)?;
    let src = s.as_bytes();
    let mut out = Vec::with_capacity(src.len());
    let mut pos = 0usize;
    let mut count = 0i64;
    let anchored = pat.as_bytes().first() == Some(&b'^');
    while pos <= src.len() && count < max_n {
        match pattern::find(src, pat.as_bytes(), pos).map_err(pattern_err)? {
            None => break,
            Some((ms, me, caps)) => {
                out.extend_from_slice(&src[pos..ms]);
                let cap_values = captures_to_values(vm, src, &caps);
                let whole = &src[ms..me];
                let replaced = apply_gsub_replacement(vm, &repl, whole, &cap_values)?;
                match replaced {
                    Some(bytes) => out.extend_from_slice(&bytes),
                    None => out.extend_from_slice(whole),
                }
                count += 1;
                if me > ms {
                    pos = me;
                } else {
                    if ms < src.len() {
                        out.push(src[ms]);
                    }
                    pos = ms + 1;
                }
                if anchored {
                    break;
                }
            }
        }
    }
    out.extend_from_slice(&src[pos.min(src.len())..]);
    Ok(vec![LuaValue::Str(vm.intern(&out)), LuaValue::Integer(count)])
}

/// Expands one `gsub` replacement per spec.md §6: a string (with `%0`-`%9`
/// and `%%` substitutions), a table (indexed by the first capture), or a
/// function (called with the captures, keeping the original text when it
/// returns `nil`/`false`).
fn apply_gsub_replacement(vm: &mut Vm, repl: &LuaValue, whole: &[u8], caps: &[LuaValue]) -> LResult<Option<Vec<u8>>> {
    match repl {
        LuaValue::Str(r) => {
            let rb = r.as_bytes();
            let mut out = Vec::with_capacity(rb.len());
            let mut i = 0;
            while i < rb.len() {
                if rb[i] == b'%' && i + 1 < rb.len() {
                    let c = rb[i + 1];
                    if c == b'%' {
                        out.push(b'%');
                    } else if c == b'0' {
                        out.extend_from_slice(whole);
                    } else if c.is_ascii_digit() {
                        let idx = (c - b'1') as usize;
                        match caps.get(idx) {
                            Some(LuaValue::Str(s)) => out.extend_from_slice(s.as_bytes()),
                            Some(LuaValue::Integer(n)) => out.extend_from_slice(n.to_string().as_bytes()),
                            _ => return Err(LuaError::msg("invalid capture index in replacement string")),
                        }
                    } else {
                        return Err(LuaError::msg("invalid use of '%' in replacement string"));
                    }
                    i += 2;
                } else {
                    out.push(rb[i]);
                    i += 1;
                }
            }
            Ok(Some(out))
        }
        LuaValue::Table(t) => {
            let key = caps.first().cloned().unwrap_or(LuaValue::Nil);
            let v = t.raw_get(&key);
            value_to_gsub_piece(vm, &v)
        }
        LuaValue::Function(_) => {
            let results = vm.call(repl.clone(), caps.to_vec())?;
            value_to_gsub_piece(vm, results.first().unwrap_or(&LuaValue::Nil))
        }
        LuaValue::Integer(_) | LuaValue::Float(_) => {
            let s = vm.tostring(repl)?;
            Ok(Some(s.as_bytes().to_vec()))
        }
        _ => Err(LuaError::msg("bad argument #3 to 'gsub' (string/function/table expected)")),
    }
}

fn value_to_gsub_piece(vm: &mut Vm, v: &LuaValue) -> LResult<Option<Vec<u8>>> {
    match v {
        LuaValue::Nil | LuaValue::Boolean(false) => Ok(None),
        LuaValue::Str(s) => Ok(Some(s.as_bytes().to_vec())),
        LuaValue::Integer(_) | LuaValue::Float(_) => Ok(Some(vm.tostring(v)?.as_bytes().to_vec())),
        _ => Err(LuaError::msg("invalid replacement value (a table)")),
    }
}
