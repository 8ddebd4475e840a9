//! `math` library (spec.md §6, SPEC_FULL.md §7): the full constant/function
//! set, grounded on the teacher's `crates/luars/src/stdlib/math.rs`.
//!
//! `random`/`randomseed` use a self-contained xoshiro256** generator
//! (SPEC_FULL.md §1) instead of the teacher's own RNG or an external `rand`
//! dependency, seeded per-`Vm` from `std::time` rather than through any
//! process-wide state (spec.md §9 "no process-wide mutable globals").

use crate::stdlib::{arg, bad_arg, check_integer, check_number, new_lib_table, opt_number, set_native, TableExt};
use crate::value::lua_value::{LuaValue, LuaValueKind};
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

pub fn install(vm: &mut Vm) {
    let t = new_lib_table(vm, "math");
    set_native(vm, &t, "abs", m_abs);
    set_native(vm, &t, "acos", m_acos);
    set_native(vm, &t, "asin", m_asin);
    set_native(vm, &t, "atan", m_atan);
    set_native(vm, &t, "ceil", m_ceil);
    set_native(vm, &t, "cos", m_cos);
    set_native(vm, &t, "deg", m_deg);
    set_native(vm, &t, "exp", m_exp);
    set_native(vm, &t, "floor", m_floor);
    set_native(vm, &t, "fmod", m_fmod);
    set_native(vm, &t, "frexp", m_frexp);
    set_native(vm, &t, "ldexp", m_ldexp);
    set_native(vm, &t, "log", m_log);
    set_native(vm, &t, "max", m_max);
    set_native(vm, &t, "min", m_min);
    set_native(vm, &t, "modf", m_modf);
    set_native(vm, &t, "rad", m_rad);
    set_native(vm, &t, "random", m_random);
    set_native(vm, &t, "randomseed", m_randomseed);
    set_native(vm, &t, "sin", m_sin);
    set_native(vm, &t, "sqrt", m_sqrt);
    set_native(vm, &t, "tan", m_tan);
    set_native(vm, &t, "tointeger", m_tointeger);
    set_native(vm, &t, "type", m_type);
    set_native(vm, &t, "ult", m_ult);
    t.set_string_key(vm, "pi", LuaValue::Float(std::f64::consts::PI));
    t.set_string_key(vm, "huge", LuaValue::Float(f64::INFINITY));
    t.set_string_key(vm, "maxinteger", LuaValue::Integer(i64::MAX));
    t.set_string_key(vm, "mininteger", LuaValue::Integer(i64::MIN));
}

fn m_abs(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    match arg(args, 1) {
        LuaValue::Integer(i) => Ok(vec![LuaValue::Integer(i.wrapping_abs())]),
        other if other.is_number() => Ok(vec![LuaValue::Float(other.as_float().unwrap().abs())]),
        other => Err(bad_arg(1, "abs", "number", &other)),
    }
}

fn m_acos(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> { Ok(vec![LuaValue::Float(check_number(args, 1, "acos")?.acos())]) }
fn m_asin(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> { Ok(vec![LuaValue::Float(check_number(args, 1, "asin")?.asin())]) }

fn m_atan(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let y = check_number(args, 1, "atan")?;
    let x = opt_number(args, 2, "atan", 1.0)?;
    Ok(vec![LuaValue::Float(y.atan2(x))])
}

/// Rounds a float result back to integer when it fits (spec.md §4.4
/// integer/float subtype rules applied to `ceil`/`floor`'s mathematically
/// integral results).
fn float_to_int_if_exact(f: f64) -> LuaValue {
    if f.is_finite() && f >= i64::MIN as f64 && f < -(i64::MIN as f64) {
        LuaValue::Integer(f as i64)
    } else {
        LuaValue::Float(f)
    }
}

fn m_ceil(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    match arg(args, 1) {
        LuaValue::Integer(i) => Ok(vec![LuaValue::Integer(i)]),
        other if other.is_number() => Ok(vec![float_to_int_if_exact(other.as_float().unwrap().ceil())]),
        other => Err(bad_arg(1, "ceil", "number", &other)),
    }
}

fn m_floor(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    match arg(args, 1) {
        LuaValue::Integer(i) => Ok(vec![LuaValue::Integer(i)]),
        other if other.is_number() => Ok(vec![float_to_int_if_exact(other.as_float().unwrap().floor())]),
        other => Err(bad_arg(1, "floor", "number", &other)),
    }
}

fn m_cos(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> { Ok(vec![LuaValue::Float(check_number(args, 1, "cos")?.cos())]) }
fn m_sin(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> { Ok(vec![LuaValue::Float(check_number(args, 1, "sin")?.sin())]) }
fn m_tan(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> { Ok(vec![LuaValue::Float(check_number(args, 1, "tan")?.tan())]) }
fn m_deg(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> { Ok(vec![LuaValue::Float(check_number(args, 1, "deg")?.to_degrees())]) }
fn m_rad(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> { Ok(vec![LuaValue::Float(check_number(args, 1, "rad")?.to_radians())]) }
fn m_exp(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> { Ok(vec![LuaValue::Float(check_number(args, 1, "exp")?.exp())]) }
fn m_sqrt(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> { Ok(vec![LuaValue::Float(check_number(args, 1, "sqrt")?.sqrt())]) }

fn m_log(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let x = check_number(args, 1, "log")?;
    if arg(args, 2).is_nil() {
        return Ok(vec![LuaValue::Float(x.ln())]);
    }
    let base = check_number(args, 2, "log")?;
    let result = if base == 2.0 {
        x.log2()
    } else if base == 10.0 {
        x.log10()
    } else {
        x.log(base)
    };
    Ok(vec![LuaValue::Float(result)])
}

/// `math.fmod` (spec.md §4.4 "%" is math-floor, but `fmod` follows C's
/// truncated-division remainder instead — the two differ for mixed-sign
/// operands, which is why `math.fmod` exists as a distinct function).
fn m_fmod(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let a = arg(args, 1);
    let b = arg(args, 2);
    if let (LuaValue::Integer(x), LuaValue::Integer(y)) = (&a, &b) {
        if *y == 0 {
            return Err(LuaError::msg("bad argument #2 to 'fmod' (zero)"));
        }
        let r = if *y == -1 { 0 } else { x % y };
        return Ok(vec![LuaValue::Integer(r)]);
    }
    let x = check_number(args, 1, "fmod")?;
    let y = check_number(args, 2, "fmod")?;
    Ok(vec![LuaValue::Float(x % y)])
}

fn lua_num_lt(a: &LuaValue, b: &LuaValue) -> bool {
    match (a, b) {
        (LuaValue::Integer(x), LuaValue::Integer(y)) => x < y,
        _ => a.as_float().unwrap_or(f64::NAN) < b.as_float().unwrap_or(f64::NAN),
    }
}

fn m_max(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    if args.is_empty() {
        return Err(LuaError::msg("bad argument #1 to 'max' (value expected)"));
    }
    let mut best = args[0].clone();
    for (i, v) in args.iter().enumerate().skip(1) {
        if !v.is_number() {
            return Err(bad_arg(i + 1, "max", "number", v));
        }
        if lua_num_lt(&best, v) {
            best = v.clone();
        }
    }
    if !best.is_number() {
        return Err(bad_arg(1, "max", "number", &best));
    }
    Ok(vec![best])
}

fn m_min(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    if args.is_empty() {
        return Err(LuaError::msg("bad argument #1 to 'min' (value expected)"));
    }
    let mut best = args[0].clone();
    for (i, v) in args.iter().enumerate().skip(1) {
        if !v.is_number() {
            return Err(bad_arg(i + 1, "min", "number", v));
        }
        if lua_num_lt(v, &best) {
            best = v.clone();
        }
    }
    if !best.is_number() {
        return Err(bad_arg(1, "min", "number", &best));
    }
    Ok(vec![best])
}

fn m_modf(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let x = check_number(args, 1, "modf")?;
    let ip = x.trunc();
    let fp = if x.is_infinite() { 0.0 } else { x - ip };
    Ok(vec![float_to_int_if_exact(ip), LuaValue::Float(fp)])
}

fn m_tointeger(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    match arg(args, 1).as_integer() {
        Some(i) => Ok(vec![LuaValue::Integer(i)]),
        None => Ok(vec![LuaValue::Nil]),
    }
}

fn m_type(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    match arg(args, 1).kind() {
        LuaValueKind::Integer => Ok(vec![LuaValue::new_string_owned(b"integer".to_vec())]),
        LuaValueKind::Float => Ok(vec![LuaValue::new_string_owned(b"float".to_vec())]),
        _ => Ok(vec![LuaValue::Nil]),
    }
}

fn m_ult(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let m = check_integer(args, 1, "ult")? as u64;
    let n = check_integer(args, 2, "ult")? as u64;
    Ok(vec![LuaValue::Boolean(m < n)])
}

fn m_frexp(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let x = check_number(args, 1, "frexp")?;
    if x == 0.0 || !x.is_finite() {
        return Ok(vec![LuaValue::Float(x), LuaValue::Integer(0)]);
    }
    let bits = x.to_bits();
    let sign = if (bits >> 63) != 0 { -1.0 } else { 1.0 };
    let mut exp = ((bits >> 52) & 0x7FF) as i64 - 1022;
    let mut mantissa = sign * f64::from_bits((x.abs().to_bits() & 0x000F_FFFF_FFFF_FFFF) | 0x3FE0_0000_0000_0000);
    if ((bits >> 52) & 0x7FF) == 0 {
        let norm = x.abs() * 2f64.powi(53);
        let norm_bits = norm.to_bits();
        exp = ((norm_bits >> 52) & 0x7FF) as i64 - 1022 - 53;
        mantissa = sign * f64::from_bits((norm_bits & 0x000F_FFFF_FFFF_FFFF) | 0x3FE0_0000_0000_0000);
    }
    Ok(vec![LuaValue::Float(mantissa), LuaValue::Integer(exp)])
}

fn m_ldexp(_vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let m = check_number(args, 1, "ldexp")?;
    let e = check_integer(args, 2, "ldexp")?;
    Ok(vec![LuaValue::Float(m * 2f64.powi(e.clamp(i32::MIN as i64, i32::MAX as i64) as i32))])
}

// ---------------------------------------------------------------------
// xoshiro256** PRNG (SPEC_FULL.md §1)
// ---------------------------------------------------------------------

/// Seeds the generator state from `std::time`, for `Vm::new` (no argument
/// was given to `randomseed`, matching canonical Lua's own startup seed).
pub fn seed_from_time() -> [u64; 4] {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0x9E3779B97F4A7C15);
    seed_state(nanos, nanos ^ 0xBF58476D1CE4E5B9)
}

fn splitmix64(seed: &mut u64) -> u64 {
    *seed = seed.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *seed;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn seed_state(a: u64, b: u64) -> [u64; 4] {
    let mut s = a ^ b.rotate_left(17);
    [splitmix64(&mut s), splitmix64(&mut s), splitmix64(&mut s), splitmix64(&mut s)]
}

fn next_u64(state: &mut [u64; 4]) -> u64 {
    let result = state[1].wrapping_mul(5).rotate_left(7).wrapping_mul(9);
    let t = state[1] << 17;
    state[2] ^= state[0];
    state[3] ^= state[1];
    state[1] ^= state[2];
    state[0] ^= state[3];
    state[2] ^= t;
    state[3] = state[3].rotate_left(45);
    result
}

fn project(rv: u64, low: i64, up: i64) -> i64 {
    let range = (up as u64).wrapping_sub(low as u64);
    if range == u64::MAX {
        return low.wrapping_add(rv as i64);
    }
    let span = range.wrapping_add(1);
    low.wrapping_add((rv % span) as i64)
}

fn m_random(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    if args.len() > 2 {
        return Err(LuaError::msg("wrong number of arguments to 'random'"));
    }
    let mut state = vm.rng_state.get();
    let rv = next_u64(&mut state);
    vm.rng_state.set(state);
    match args.len() {
        0 => Ok(vec![LuaValue::Float((rv >> 11) as f64 * (1.0 / (1u64 << 53) as f64))]),
        1 => {
            let up = check_integer(args, 1, "random")?;
            if up == 0 {
                return Ok(vec![LuaValue::Integer(rv as i64)]);
            }
            if up < 1 {
                return Err(LuaError::msg("bad argument #1 to 'random' (interval is empty)"));
            }
            Ok(vec![LuaValue::Integer(project(rv, 1, up))])
        }
        _ => {
            let low = check_integer(args, 1, "random")?;
            let up = check_integer(args, 2, "random")?;
            if low > up {
                return Err(LuaError::msg("bad argument #2 to 'random' (interval is empty)"));
            }
            Ok(vec![LuaValue::Integer(project(rv, low, up))])
        }
    }
}

fn m_randomseed(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let (n1, n2) = if args.is_empty() || arg(args, 1).is_nil() {
        let nanos = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).map(|d| d.as_nanos() as u64).unwrap_or(0);
        (nanos as i64, 0i64)
    } else {
        (check_integer(args, 1, "randomseed")?, super::opt_integer(args, 2, "randomseed", 0)?)
    };
    vm.rng_state.set(seed_state(n1 as u64, n2 as u64));
    Ok(vec![LuaValue::Integer(n1), LuaValue::Integer(n2)])
}
