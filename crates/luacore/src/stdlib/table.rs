//! `table` library (spec.md §6, SPEC_FULL.md §7): `insert remove concat sort
//! unpack pack move`, grounded on the teacher's
//! `crates/luars/src/stdlib/table.rs`.

use crate::stdlib::{arg, check_integer, check_table, new_lib_table, opt_integer, opt_str, set_native};
use crate::value::lua_table::LuaTable;
use crate::value::lua_value::LuaValue;
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

pub fn install(vm: &mut Vm) {
    let t = new_lib_table(vm, "table");
    set_native(vm, &t, "insert", t_insert);
    set_native(vm, &t, "remove", t_remove);
    set_native(vm, &t, "concat", t_concat);
    set_native(vm, &t, "sort", t_sort);
    set_native(vm, &t, "unpack", t_unpack);
    set_native(vm, &t, "pack", t_pack);
    set_native(vm, &t, "move", t_move);
}

fn t_insert(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = check_table(args, 1, "insert")?;
    let len = t.length();
    match args.len() {
        2 => {
            t.set_int(len + 1, arg(args, 2));
        }
        3 => {
            let pos = check_integer(args, 2, "insert")?;
            if pos < 1 || pos > len + 1 {
                return Err(LuaError::msg("bad argument #2 to 'insert' (position out of bounds)"));
            }
            let mut i = len + 1;
            while i > pos {
                t.set_int(i, t.get_int(i - 1));
                i -= 1;
            }
            t.set_int(pos, arg(args, 3));
        }
        _ => return Err(LuaError::msg("wrong number of arguments to 'insert'")),
    }
    Ok(vec![])
}

fn t_remove(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = check_table(args, 1, "remove")?;
    let len = t.length();
    let pos = opt_integer(args, 2, "remove", len)?;
    if len == 0 && args.len() < 2 {
        return Ok(vec![LuaValue::Nil]);
    }
    if args.len() >= 2 && !(1..=len + 1).contains(&pos) && len > 0 {
        return Err(LuaError::msg("bad argument #2 to 'remove' (position out of bounds)"));
    }
    let removed = t.get_int(pos);
    let mut i = pos;
    while i < len {
        t.set_int(i, t.get_int(i + 1));
        i += 1;
    }
    if pos <= len {
        t.set_int(len, LuaValue::Nil);
    }
    Ok(vec![removed])
}

fn t_concat(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = check_table(args, 1, "concat")?;
    let sep = opt_str(args, 2, "concat", "")?;
    let i = opt_integer(args, 3, "concat", 1)?;
    let j = opt_integer(args, 4, "concat", t.length())?;
    let mut out = Vec::new();
    let mut n = i;
    while n <= j {
        if n > i {
            out.extend_from_slice(sep.as_bytes());
        }
        match t.get_int(n) {
            LuaValue::Str(s) => out.extend_from_slice(s.as_bytes()),
            v @ (LuaValue::Integer(_) | LuaValue::Float(_)) => out.extend_from_slice(format!("{v}").as_bytes()),
            other => {
                return Err(LuaError::msg(format!(
                    "invalid value ({}) at index {n} in table for 'concat'",
                    other.type_name()
                )))
            }
        }
        n += 1;
    }
    Ok(vec![LuaValue::Str(vm.intern(&out))])
}

fn t_pack(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = LuaTable::new();
    for (i, v) in args.iter().enumerate() {
        t.set_int(i as i64 + 1, v.clone());
    }
    t.set_string_key_raw(vm, "n", LuaValue::Integer(args.len() as i64));
    Ok(vec![LuaValue::Table(t)])
}

fn t_unpack(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = check_table(args, 1, "unpack")?;
    let i = opt_integer(args, 2, "unpack", 1)?;
    let j = opt_integer(args, 3, "unpack", t.length())?;
    if i > j {
        return Ok(vec![]);
    }
    if (j - i) >= 1_000_000 {
        return Err(LuaError::msg("too many results to unpack"));
    }
    let mut out = Vec::with_capacity((j - i + 1) as usize);
    let mut n = i;
    while n <= j {
        out.push(t.get_int(n));
        n += 1;
    }
    Ok(out)
}

fn t_move(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let a1 = check_table(args, 1, "move")?;
    let f = check_integer(args, 2, "move")?;
    let e = check_integer(args, 3, "move")?;
    let t = check_integer(args, 4, "move")?;
    let a2 = if arg(args, 5).is_nil() { a1.clone() } else { check_table(args, 5, "move")? };
    if e >= f {
        if t > f || t > e || !a1.ptr_eq(&a2) {
            let mut i = f;
            while i <= e {
                a2.set_int(t + (i - f), a1.get_int(i));
                i += 1;
            }
        } else {
            let mut i = e;
            while i >= f {
                a2.set_int(t + (i - f), a1.get_int(i));
                i -= 1;
            }
        }
    }
    Ok(vec![LuaValue::Table(a2)])
}

/// Default (`<`) ordering comparator when `table.sort` is called without an
/// explicit comparator function (spec.md §6 "default order uses the `<`
/// relational operator, including its metamethod dispatch").
fn default_less(vm: &mut Vm, a: &LuaValue, b: &LuaValue) -> LResult<bool> {
    match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => Ok(x < y),
        (LuaValue::Str(x), LuaValue::Str(y)) => Ok(x.as_bytes() < y.as_bytes()),
        _ if a.is_number() && b.is_number() => {
            Ok(a.as_float().unwrap_or(f64::NAN) < b.as_float().unwrap_or(f64::NAN))
        }
        _ => {
            if let Some(mm) = vm.metamethod(a, "__lt") {
                let r = vm.call(mm, vec![a.clone(), b.clone()])?;
                return Ok(r.first().is_some_and(|v| v.is_truthy()));
            }
            Err(LuaError::msg(format!("attempt to compare two {} values", a.type_name())))
        }
    }
}

fn t_sort(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let t = check_table(args, 1, "sort")?;
    let cmp = arg(args, 2);
    let len = t.length();
    let mut items: Vec<LuaValue> = (1..=len).map(|i| t.get_int(i)).collect();

    // Simple insertion-free merge sort (stable, and lets the comparator
    // raise a Lua error mid-sort without leaving the table half-shuffled
    // in a way that panics, spec.md §6 "sort may error from the
    // comparator"). Fine for the sizes this interpreter actually sorts;
    // no attempt at an in-place introsort like canonical Lua's `lstrlib.c`.
    let result = merge_sort(vm, items.drain(..).collect(), &cmp);
    let sorted = result?;
    for (i, v) in sorted.into_iter().enumerate() {
        t.set_int(i as i64 + 1, v);
    }
    Ok(vec![])
}

fn merge_sort(vm: &mut Vm, items: Vec<LuaValue>, cmp: &LuaValue) -> LResult<Vec<LuaValue>> {
    if items.len() <= 1 {
        return Ok(items);
    }
    let mid = items.len() / 2;
    let mut items = items;
    let right = items.split_off(mid);
    let left = merge_sort(vm, items, cmp)?;
    let right = merge_sort(vm, right, cmp)?;
    let mut out = Vec::with_capacity(left.len() + right.len());
    let (mut i, mut j) = (0, 0);
    while i < left.len() && j < right.len() {
        let b_less_a = if cmp.is_nil() {
            default_less(vm, &right[j], &left[i])?
        } else {
            vm.call(cmp.clone(), vec![right[j].clone(), left[i].clone()])?.first().is_some_and(|v| v.is_truthy())
        };
        if b_less_a {
            out.push(right[j].clone());
            j += 1;
        } else {
            out.push(left[i].clone());
            i += 1;
        }
    }
    out.extend_from_slice(&left[i..]);
    out.extend_from_slice(&right[j..]);
    Ok(out)
}

trait TableRawExt {
    fn set_string_key_raw(&self, vm: &mut Vm, key: &str, value: LuaValue);
}

impl TableRawExt for LuaTable {
    fn set_string_key_raw(&self, vm: &mut Vm, key: &str, value: LuaValue) {
        let k = vm.new_string(key);
        let _ = self.raw_set(k, value);
    }
}
