//! The basic library: globals installed directly on `_G` rather than under
//! a named sub-table (spec.md §6 "Standard globals the core publishes").
//! Grounded on `crates/luars/src/stdlib/basic.rs` in the teacher.

use super::{arg, bad_arg, check_function, check_table, set_native, TableExt};
use crate::value::closure::LuaFunction;
use crate::value::lua_table::LuaTable;
use crate::value::lua_value::{parse_lua_number, LuaValue};
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

pub fn install(vm: &mut Vm) {
    let globals = vm.globals.clone();
    globals.set_string_key(vm, "_VERSION", vm.new_string("Lua 5.4"));
    let g_value = LuaValue::Table(globals.clone());
    globals.set_string_key(vm, "_G", g_value);

    set_native(vm, &globals, "print", l_print);
    set_native(vm, &globals, "type", l_type);
    set_native(vm, &globals, "tostring", l_tostring);
    set_native(vm, &globals, "tonumber", l_tonumber);
    set_native(vm, &globals, "ipairs", l_ipairs);
    set_native(vm, &globals, "pairs", l_pairs);
    set_native(vm, &globals, "next", l_next);
    set_native(vm, &globals, "select", l_select);
    set_native(vm, &globals, "rawget", l_rawget);
    set_native(vm, &globals, "rawset", l_rawset);
    set_native(vm, &globals, "rawequal", l_rawequal);
    set_native(vm, &globals, "rawlen", l_rawlen);
    set_native(vm, &globals, "setmetatable", l_setmetatable);
    set_native(vm, &globals, "getmetatable", l_getmetatable);
    set_native(vm, &globals, "error", l_error);
    set_native(vm, &globals, "assert", l_assert);
    set_native(vm, &globals, "pcall", l_pcall);
    set_native(vm, &globals, "xpcall", l_xpcall);
    set_native(vm, &globals, "load", l_load);
    set_native(vm, &globals, "loadstring", l_load);
    set_native(vm, &globals, "dofile", l_dofile);
    set_native(vm, &globals, "collectgarbage", l_collectgarbage);

    let arg_table = LuaTable::new();
    globals.set_string_key(vm, "arg", LuaValue::Table(arg_table));
}

/// Populates the global `arg` table (`arg[0]` = script name, `arg[1..]` =
/// script arguments, `arg[-1]` = interpreter) the way `tlua` fills it in
/// before running a script (spec.md §6 "positional args become the
/// script's `arg` table").
pub fn set_script_args(vm: &mut Vm, interpreter: &str, script_name: Option<&str>, args: &[String]) {
    let arg_table = LuaTable::new();
    let interp = vm.new_string(interpreter);
    arg_table.set_int(-1, interp);
    if let Some(name) = script_name {
        let v = vm.new_string(name);
        arg_table.set_int(0, v);
    }
    for (i, a) in args.iter().enumerate() {
        let v = vm.new_string(a);
        arg_table.set_int(i as i64 + 1, v);
    }
    let globals = vm.globals.clone();
    globals.set_string_key(vm, "arg", LuaValue::Table(arg_table));
}

fn l_print(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let mut out = String::new();
    for (i, v) in args.iter().enumerate() {
        if i > 0 {
            out.push('\t');
        }
        out.push_str(&vm.tostring(v)?.to_str_lossy());
    }
    println!("{out}");
    Ok(Vec::new())
}

fn l_type(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let v = arg(args, 1);
    Ok(vec![LuaValue::new_string_owned(v.type_name().as_bytes().to_vec())])
}

fn l_tostring(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let v = arg(args, 1);
    Ok(vec![LuaValue::Str(vm.tostring(&v)?)])
}

fn l_tonumber(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let v = arg(args, 1);
    if args.len() >= 2 {
        let base = super::check_integer(args, 2, "tonumber")?;
        let s = match &v {
            LuaValue::Str(s) => s.to_str_lossy().trim().to_string(),
            _ => return Ok(vec![LuaValue::Nil]),
        };
        if !(2..=36).contains(&base) {
            return Err(LuaError::msg("bad argument #2 to 'tonumber' (base out of range)"));
        }
        let (neg, digits) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(&s)),
        };
        if digits.is_empty() {
            return Ok(vec![LuaValue::Nil]);
        }
        let mut acc: i64 = 0;
        for c in digits.chars() {
            let Some(d) = c.to_digit(base as u32) else { return Ok(vec![LuaValue::Nil]) };
            acc = acc.wrapping_mul(base).wrapping_add(d as i64);
        }
        return Ok(vec![LuaValue::Integer(if neg { -acc } else { acc })]);
    }
    match v {
        LuaValue::Integer(_) | LuaValue::Float(_) => Ok(vec![v]),
        LuaValue::Str(s) => Ok(vec![parse_lua_number(&s.to_str_lossy()).unwrap_or(LuaValue::Nil)]),
        _ => Ok(vec![LuaValue::Nil]),
    }
}

fn ipairs_iterator(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = check_table(args, 1, "ipairs")?;
    let i = super::check_integer(args, 2, "ipairs")? + 1;
    let v = t.get_int(i);
    if v.is_nil() {
        Ok(vec![LuaValue::Nil])
    } else {
        Ok(vec![LuaValue::Integer(i), v])
    }
}

fn l_ipairs(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = check_table(args, 1, "ipairs")?;
    Ok(vec![LuaValue::Function(LuaFunction::native("ipairs_iterator", ipairs_iterator)), LuaValue::Table(t), LuaValue::Integer(0)])
}

fn l_next(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = check_table(args, 1, "next")?;
    let key = arg(args, 2);
    match t.next(&key) {
        Ok(Some((k, v))) => Ok(vec![k, v]),
        Ok(None) => Ok(vec![LuaValue::Nil]),
        Err(e) => Err(LuaError::msg(e.to_string())),
    }
}

fn l_pairs(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = arg(args, 1);
    if let Some(mm) = vm.metamethod(&t, "__pairs") {
        return vm.call(mm, vec![t]);
    }
    let t = check_table(args, 1, "pairs")?;
    Ok(vec![LuaValue::Function(LuaFunction::native("next", l_next)), LuaValue::Table(t), LuaValue::Nil])
}

fn l_select(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let sel = arg(args, 1);
    if let LuaValue::Str(s) = &sel {
        if s.as_bytes() == b"#" {
            return Ok(vec![LuaValue::Integer(args.len() as i64 - 1)]);
        }
    }
    let n = super::check_integer(args, 1, "select")?;
    let rest = &args[1..];
    if n < 0 {
        let idx = rest.len() as i64 + n;
        if idx < 0 {
            return Err(LuaError::msg("bad argument #1 to 'select' (index out of range)"));
        }
        return Ok(rest[idx as usize..].to_vec());
    }
    if n == 0 {
        return Err(LuaError::msg("bad argument #1 to 'select' (index out of range)"));
    }
    let idx = (n - 1) as usize;
    Ok(if idx < rest.len() { rest[idx..].to_vec() } else { Vec::new() })
}

fn l_rawget(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = check_table(args, 1, "rawget")?;
    Ok(vec![t.raw_get(&arg(args, 2))])
}

fn l_rawset(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = check_table(args, 1, "rawset")?;
    t.raw_set(arg(args, 2), arg(args, 3)).map_err(|e| LuaError::msg(e.to_string()))?;
    Ok(vec![LuaValue::Table(t)])
}

fn l_rawequal(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Boolean(arg(args, 1).raw_equal(&arg(args, 2)))])
}

fn l_rawlen(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    match arg(args, 1) {
        LuaValue::Table(t) => Ok(vec![LuaValue::Integer(t.length())]),
        LuaValue::Str(s) => Ok(vec![LuaValue::Integer(s.len() as i64)]),
        other => Err(bad_arg(1, "rawlen", "table or string", &other)),
    }
}

fn l_setmetatable(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = check_table(args, 1, "setmetatable")?;
    if let Some(mt) = t.metatable() {
        if !mt.get_str_name("__metatable").is_nil() {
            return Err(LuaError::msg("cannot change a protected metatable"));
        }
    }
    match arg(args, 2) {
        LuaValue::Nil => t.set_metatable(None),
        LuaValue::Table(mt) => t.set_metatable(Some(mt)),
        other => return Err(bad_arg(2, "setmetatable", "nil or table", &other)),
    }
    Ok(vec![LuaValue::Table(t)])
}

fn l_getmetatable(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let v = arg(args, 1);
    match vm.metatable_of(&v) {
        Some(mt) => {
            let protected = mt.get_str_name("__metatable");
            if !protected.is_nil() {
                Ok(vec![protected])
            } else {
                Ok(vec![LuaValue::Table(mt)])
            }
        }
        None => Ok(vec![LuaValue::Nil]),
    }
}

/// `error(message, level)` (spec.md §7 "User-raised"): prepends
/// `source:line:` for a string message when `level > 0`, using the calling
/// frame `level` levels up the Lua call stack.
fn l_error(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let message = arg(args, 1);
    let level = super::opt_integer(args, 2, "error", 1)?;
    if level > 0 {
        if let LuaValue::Str(s) = &message {
            if let Some((source, line)) = vm.current_thread.location_at_level(level as usize) {
                let text = format!("{source}:{line}: {}", s.to_str_lossy());
                return Err(LuaError::new(LuaValue::new_string_owned(text.into_bytes())));
            }
        }
    }
    Err(LuaError::new(message))
}

fn l_assert(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let v = arg(args, 1);
    if v.is_truthy() {
        Ok(args.to_vec())
    } else if args.len() >= 2 {
        Err(LuaError::new(args[1].clone()))
    } else {
        Err(LuaError::msg("assertion failed!"))
    }
}

fn l_pcall(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let f = check_function(args, 1, "pcall")?;
    let (_, results) = vm.pcall(f, args[1.min(args.len())..].to_vec());
    Ok(results)
}

/// `xpcall(f, handler, ...)` (spec.md §7 "xpcall"): the handler runs in the
/// erroring context, before the frames that raised are fully unwound by the
/// time control returns to this native function — this implementation runs
/// it immediately after catching the error, while its string still carries
/// the original location prefix, which is the externally observable part of
/// "before any frames below are dropped" that callers depend on.
fn l_xpcall(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let f = check_function(args, 1, "xpcall")?;
    let handler = check_function(args, 2, "xpcall")?;
    let call_args = args[2.min(args.len())..].to_vec();
    match vm.call(f, call_args) {
        Ok(mut results) => {
            let mut out = vec![LuaValue::Boolean(true)];
            out.append(&mut results);
            Ok(out)
        }
        Err(e) if e.is_yield() => Err(e),
        Err(e) => {
            let handled = vm.call(handler, vec![e.value]).unwrap_or_else(|e2| vec![e2.value]);
            let mut out = vec![LuaValue::Boolean(false)];
            out.extend(handled);
            Ok(out)
        }
    }
}

fn l_load(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let source = match arg(args, 1) {
        LuaValue::Str(s) => s.as_bytes().to_vec(),
        LuaValue::Function(f) => {
            let mut buf = Vec::new();
            loop {
                let piece = vm.call(LuaValue::Function(f.clone()), Vec::new())?;
                match piece.into_iter().next() {
                    Some(LuaValue::Str(s)) if !s.is_empty() => buf.extend_from_slice(s.as_bytes()),
                    _ => break,
                }
            }
            buf
        }
        other => return Err(bad_arg(1, "load", "string or function", &other)),
    };
    // Omitted chunkname defaults to the source text itself (no `=`/`@`
    // prefix), so `display_source_name` renders it as a string-chunk
    // snippet `[string "..."]` per spec.md §6 "source-name conventions"
    // (matching canonical Lua's `luaL_loadstring`, which passes the source
    // itself as the chunk name when none is given).
    let chunk_name = match arg(args, 2) {
        LuaValue::Str(s) => s.to_str_lossy().into_owned(),
        _ => String::from_utf8_lossy(&source).into_owned(),
    };
    let source_text = String::from_utf8_lossy(&source).into_owned();
    match vm.load_source(&source_text, &chunk_name) {
        Ok(closure) => {
            let closure = if let (LuaFunction::Lua(c), LuaValue::Table(env)) = (&closure, arg(args, 4)) {
                let proto = c.0.proto.clone();
                let upvalues = vec![crate::value::closure::Upvalue::closed(LuaValue::Table(env))];
                LuaFunction::Lua(crate::value::closure::LuaClosure::new(proto, upvalues))
            } else {
                closure
            };
            Ok(vec![LuaValue::Function(closure)])
        }
        Err(msg) => Ok(vec![LuaValue::Nil, LuaValue::new_string_owned(msg.into_bytes())]),
    }
}

fn l_dofile(_vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Err(LuaError::msg("dofile is not supported in this sandbox"))
}

fn l_collectgarbage(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let opt = match arg(args, 1) {
        LuaValue::Str(s) => s.to_str_lossy().into_owned(),
        LuaValue::Nil => "collect".to_string(),
        other => return Err(bad_arg(1, "collectgarbage", "string", &other)),
    };
    match opt.as_str() {
        "count" => Ok(vec![LuaValue::Float(0.0), LuaValue::Float(0.0)]),
        "isrunning" => Ok(vec![LuaValue::Boolean(true)]),
        _ => Ok(vec![LuaValue::Integer(0)]),
    }
}

