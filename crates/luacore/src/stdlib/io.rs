//! `io` library (SPEC_FULL.md §7): restricted to the stdio surface — `write`
//! and `read` against the process's own stdout/stdin, plus stubs for the
//! file-handle entries canonical Lua exposes. Grounded on the teacher's
//! `crates/luars/src/stdlib/io/mod.rs` (`io_write`/`io_read`'s format
//! handling), trimmed of `LuaFile`/userdata file-handle plumbing since
//! SPEC_FULL.md's Non-goals exclude a real filesystem surface.

use std::io::{self, BufRead, Read, Write};

use crate::stdlib::{arg, new_lib_table, set_native};
use crate::value::lua_value::LuaValue;
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

pub fn install(vm: &mut Vm) {
    let t = new_lib_table(vm, "io");
    set_native(vm, &t, "write", io_write);
    set_native(vm, &t, "read", io_read);
    set_native(vm, &t, "flush", io_flush);
    set_native(vm, &t, "open", io_open);
    set_native(vm, &t, "lines", io_lines);
    set_native(vm, &t, "input", io_input);
    set_native(vm, &t, "output", io_output);
    set_native(vm, &t, "type", io_type);
    set_native(vm, &t, "close", io_close);
}

fn io_write(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    for (i, v) in args.iter().enumerate() {
        match v {
            LuaValue::Str(s) => handle.write_all(s.as_bytes()).map_err(|e| LuaError::msg(e.to_string()))?,
            other if other.is_number() => {
                let text = vm.tostring(other)?;
                handle.write_all(text.as_bytes()).map_err(|e| LuaError::msg(e.to_string()))?;
            }
            other => return Err(crate::stdlib::bad_arg(i + 1, "write", "string", other)),
        }
    }
    Ok(Vec::new())
}

fn io_flush(_vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    io::stdout().flush().ok();
    Ok(Vec::new())
}

/// `io.read` (spec.md §6): `"l"`/`"*l"` (default) a line sans newline,
/// `"L"`/`"*L"` a line with its newline, `"a"`/`"*a"` the rest of stdin,
/// `"n"`/`"*n"` a number, or a byte count.
fn io_read(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let fmt = match arg(args, 1) {
        LuaValue::Nil => "l".to_string(),
        LuaValue::Str(s) => s.to_str_lossy().trim_start_matches('*').to_string(),
        other if other.is_number() => {
            let n = other.as_integer().unwrap_or(0).max(0) as usize;
            return read_bytes(vm, n);
        }
        other => return Err(crate::stdlib::bad_arg(1, "read", "string", &other)),
    };

    let stdin = io::stdin();
    let mut handle = stdin.lock();
    match fmt.as_str() {
        "l" | "L" => {
            let mut line = String::new();
            match handle.read_line(&mut line) {
                Ok(0) => Ok(vec![LuaValue::Nil]),
                Ok(_) => {
                    if fmt == "l" && line.ends_with('\n') {
                        line.pop();
                        if line.ends_with('\r') {
                            line.pop();
                        }
                    }
                    Ok(vec![vm.new_string(&line)])
                }
                Err(e) => Err(LuaError::msg(e.to_string())),
            }
        }
        "a" => {
            let mut content = String::new();
            handle.read_to_string(&mut content).map_err(|e| LuaError::msg(e.to_string()))?;
            Ok(vec![vm.new_string(&content)])
        }
        "n" => {
            let mut line = String::new();
            match handle.read_line(&mut line) {
                Ok(0) => Ok(vec![LuaValue::Nil]),
                Ok(_) => match crate::value::lua_value::parse_lua_number(line.trim()) {
                    Some(v) => Ok(vec![v]),
                    None => Ok(vec![LuaValue::Nil]),
                },
                Err(e) => Err(LuaError::msg(e.to_string())),
            }
        }
        other => Err(LuaError::msg(format!("invalid format '{other}' to 'read'"))),
    }
}

fn read_bytes(vm: &mut Vm, n: usize) -> LResult<Vec<LuaValue>> {
    if n == 0 {
        return Ok(vec![vm.new_string("")]);
    }
    let mut buf = vec![0u8; n];
    let read = io::stdin().lock().read(&mut buf).map_err(|e| LuaError::msg(e.to_string()))?;
    if read == 0 {
        return Ok(vec![LuaValue::Nil]);
    }
    buf.truncate(read);
    let key = vm.intern(&buf);
    Ok(vec![LuaValue::Str(key)])
}

fn io_open(vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Nil, vm.new_string("io.open not supported")])
}

fn io_lines(_vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Err(LuaError::msg("io.lines not supported"))
}

fn io_input(vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![vm.new_string("io.input not supported")])
}

fn io_output(vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![vm.new_string("io.output not supported")])
}

fn io_type(_vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Nil])
}

fn io_close(_vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Boolean(true)])
}
