//! `os` library (spec.md §6, SPEC_FULL.md §7): wall-clock time, environment,
//! and process control. Grounded on the teacher's
//! `crates/luars/src/stdlib/os.rs` for the function list and on
//! `Fivesplate-Lua-skyla/src/loslib.rs` for the `chrono`-based `date`/`time`
//! bodies (SPEC_FULL.md §1 keeps `chrono` in the dependency stack
//! specifically for this module).
//!
//! File-touching entries (`remove`, `rename`, `tmpname`, `execute`) are
//! sandboxed stubs: they return `nil, "<op> not supported"` rather than
//! touching the host filesystem or spawning a shell, since SPEC_FULL.md's
//! Non-goals exclude a real OS surface from this implementation.

use chrono::{Datelike, Local, TimeZone, Timelike, Utc};

use crate::stdlib::{arg, check_str, new_lib_table, opt_str, set_native, TableExt};
use crate::value::lua_table::LuaTable;
use crate::value::lua_value::LuaValue;
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

pub fn install(vm: &mut Vm) {
    let t = new_lib_table(vm, "os");
    set_native(vm, &t, "clock", os_clock);
    set_native(vm, &t, "date", os_date);
    set_native(vm, &t, "difftime", os_difftime);
    set_native(vm, &t, "execute", os_execute);
    set_native(vm, &t, "exit", os_exit);
    set_native(vm, &t, "getenv", os_getenv);
    set_native(vm, &t, "remove", os_remove);
    set_native(vm, &t, "rename", os_rename);
    set_native(vm, &t, "setlocale", os_setlocale);
    set_native(vm, &t, "time", os_time);
    set_native(vm, &t, "tmpname", os_tmpname);
}

fn os_clock(_vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let secs = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(vec![LuaValue::Float(secs)])
}

fn os_time(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    if let LuaValue::Table(t) = arg(args, 1) {
        let year = field_int(vm, &t, "year")?.ok_or_else(|| LuaError::msg("field 'year' missing in date table"))?;
        let month = field_int(vm, &t, "month")?.ok_or_else(|| LuaError::msg("field 'month' missing in date table"))?;
        let day = field_int(vm, &t, "day")?.ok_or_else(|| LuaError::msg("field 'day' missing in date table"))?;
        let hour = field_int(vm, &t, "hour")?.unwrap_or(12);
        let min = field_int(vm, &t, "min")?.unwrap_or(0);
        let sec = field_int(vm, &t, "sec")?.unwrap_or(0);
        let date = chrono::NaiveDate::from_ymd_opt(year as i32, month as u32, day as u32)
            .and_then(|d| d.and_hms_opt(hour as u32, min as u32, sec as u32))
            .ok_or_else(|| LuaError::msg("field 'day' is out of bound"))?;
        let local = Local.from_local_datetime(&date).single().ok_or_else(|| LuaError::msg("invalid local time"))?;
        return Ok(vec![LuaValue::Integer(local.timestamp())]);
    }
    Ok(vec![LuaValue::Integer(Local::now().timestamp())])
}

fn field_int(vm: &mut Vm, t: &LuaTable, name: &str) -> LResult<Option<i64>> {
    let key = vm.new_string(name);
    match t.raw_get(&key) {
        LuaValue::Nil => Ok(None),
        other => other.as_integer().map(Some).ok_or_else(|| LuaError::msg(format!("field '{name}' is not an integer"))),
    }
}

/// `os.date` (spec.md §6): `"*t"`/`"!*t"` build a table of fields, anything
/// else is a `strftime`-style format string rendered through `chrono`.
fn os_date(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let fmt = opt_str(args, 1, "date", "%c")?.to_str_lossy().into_owned();
    let time = match arg(args, 2) {
        LuaValue::Nil => Local::now().timestamp(),
        other => other.as_integer().ok_or_else(|| LuaError::msg("bad argument #2 to 'date' (number expected)"))?,
    };

    let (fmt, utc) = match fmt.strip_prefix('!') {
        Some(rest) => (rest.to_string(), true),
        None => (fmt, false),
    };

    if fmt == "*t" {
        let table = LuaTable::new();
        if utc {
            let dt = Utc.timestamp_opt(time, 0).single().ok_or_else(|| LuaError::msg("time result cannot be represented"))?;
            fill_date_table(vm, &table, dt.year(), dt.month(), dt.day(), dt.hour(), dt.minute(), dt.second(), dt.weekday().number_from_sunday(), dt.ordinal());
        } else {
            let dt = Local.timestamp_opt(time, 0).single().ok_or_else(|| LuaError::msg("time result cannot be represented"))?;
            fill_date_table(vm, &table, dt.year(), dt.month(), dt.day(), dt.hour(), dt.minute(), dt.second(), dt.weekday().number_from_sunday(), dt.ordinal());
        }
        return Ok(vec![LuaValue::Table(table)]);
    }

    let rendered = if utc {
        let dt = Utc.timestamp_opt(time, 0).single().ok_or_else(|| LuaError::msg("time result cannot be represented"))?;
        dt.format(&fmt).to_string()
    } else {
        let dt = Local.timestamp_opt(time, 0).single().ok_or_else(|| LuaError::msg("time result cannot be represented"))?;
        dt.format(&fmt).to_string()
    };
    Ok(vec![vm.new_string(&rendered)])
}

#[allow(clippy::too_many_arguments)]
fn fill_date_table(vm: &mut Vm, table: &LuaTable, year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32, wday: u32, yday: u32) {
    table.set_string_key(vm, "year", LuaValue::Integer(year as i64));
    table.set_string_key(vm, "month", LuaValue::Integer(month as i64));
    table.set_string_key(vm, "day", LuaValue::Integer(day as i64));
    table.set_string_key(vm, "hour", LuaValue::Integer(hour as i64));
    table.set_string_key(vm, "min", LuaValue::Integer(min as i64));
    table.set_string_key(vm, "sec", LuaValue::Integer(sec as i64));
    table.set_string_key(vm, "wday", LuaValue::Integer(wday as i64));
    table.set_string_key(vm, "yday", LuaValue::Integer(yday as i64));
    table.set_string_key(vm, "isdst", LuaValue::Boolean(false));
}

fn os_difftime(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t2 = crate::stdlib::check_number(args, 1, "difftime")?;
    let t1 = crate::stdlib::check_number(args, 2, "difftime")?;
    Ok(vec![LuaValue::Float(t2 - t1)])
}

fn os_getenv(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let name = check_str(args, 1, "getenv")?;
    match std::env::var(name.to_str_lossy().as_ref()) {
        Ok(v) => Ok(vec![vm.new_string(&v)]),
        Err(_) => Ok(vec![LuaValue::Nil]),
    }
}

fn os_exit(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let code = match arg(args, 1) {
        LuaValue::Nil => 0,
        LuaValue::Boolean(true) => 0,
        LuaValue::Boolean(false) => 1,
        other => other.as_integer().unwrap_or(0) as i32,
    };
    std::process::exit(code);
}

fn os_setlocale(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let locale = opt_str(args, 1, "setlocale", "C")?;
    if locale.to_str_lossy() == "C" || locale.is_empty() {
        Ok(vec![vm.new_string("C")])
    } else {
        Ok(vec![LuaValue::Nil])
    }
}

fn os_remove(vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Nil, vm.new_string("os.remove not supported")])
}

fn os_rename(vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Nil, vm.new_string("os.rename not supported")])
}

fn os_tmpname(vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![vm.new_string("os.tmpname not supported")])
}

fn os_execute(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    if arg(args, 1).is_nil() {
        return Ok(vec![LuaValue::Boolean(false)]);
    }
    Ok(vec![LuaValue::Nil, vm.new_string("exit"), LuaValue::Integer(-1)])
}
