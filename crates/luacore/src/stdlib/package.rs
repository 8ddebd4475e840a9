//! `package` library and the `require` global (spec.md §6, SPEC_FULL.md §7).
//!
//! Grounded on the teacher's `crates/luars/src/stdlib/package.rs`: the same
//! `package.loaded`/`preload`/`path`/`cpath`/`config`/`searchers` fields and
//! the same two-searcher pipeline (`package.preload` lookup, then a
//! `package.path` file search with `?` substitution). `LUA_PATH`
//! (SPEC_FULL.md §4) is consulted ahead of the built-in default the way
//! canonical Lua's own `package.path` initialization does.

use crate::stdlib::{check_str, new_lib_table, set_native, TableExt};
use crate::value::closure::LuaFunction;
use crate::value::lua_table::LuaTable;
use crate::value::lua_value::LuaValue;
use crate::vm::error::{LResult, LuaError};
use crate::vm::Vm;

const DEFAULT_PATH: &str = "./?.lua;./?/init.lua";

pub fn install(vm: &mut Vm) {
    let t = new_lib_table(vm, "package");
    let loaded = LuaTable::new();
    let preload = LuaTable::new();
    t.set_string_key(vm, "loaded", LuaValue::Table(loaded));
    t.set_string_key(vm, "preload", LuaValue::Table(preload));

    let path = std::env::var("LUA_PATH").unwrap_or_else(|_| DEFAULT_PATH.to_string());
    t.set_string_key(vm, "path", vm.new_string(&path));
    t.set_string_key(vm, "cpath", vm.new_string(""));
    #[cfg(windows)]
    let config = "\\\n;\n?\n!\n-\n";
    #[cfg(not(windows))]
    let config = "/\n;\n?\n!\n-\n";
    t.set_string_key(vm, "config", vm.new_string(config));

    let searchers = LuaTable::new();
    let preload_fn = LuaFunction::native("preload searcher", searcher_preload);
    let lua_fn = LuaFunction::native("Lua searcher", searcher_lua);
    let _ = searchers.raw_set(LuaValue::Integer(1), LuaValue::Function(preload_fn));
    let _ = searchers.raw_set(LuaValue::Integer(2), LuaValue::Function(lua_fn));
    t.set_string_key(vm, "searchers", LuaValue::Table(searchers));

    set_native(vm, &t, "loadlib", package_loadlib);
    set_native(vm, &t, "searchpath", package_searchpath);

    let globals = vm.globals.clone();
    set_native(vm, &globals, "require", l_require);
}

fn package_table(vm: &Vm) -> LResult<LuaTable> {
    match vm.globals.get_str_name("package") {
        LuaValue::Table(t) => Ok(t),
        _ => Err(LuaError::msg("package table not found")),
    }
}

/// `require(modname)` (spec.md §6): checks `package.loaded` first, then
/// walks `package.searchers` in order, calling the first one that returns a
/// loader function; the loader is called as `loader(modname, extra)` and its
/// first result (or `true` if it returned nothing) becomes the cached module.
fn l_require(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let name = check_str(args, 1, "require")?;
    let pkg = package_table(vm)?;
    let loaded = match pkg.get_str_name("loaded") {
        LuaValue::Table(t) => t,
        _ => return Err(LuaError::msg("package.loaded is not a table")),
    };

    let name_val = LuaValue::Str(name.clone());
    let cached = loaded.raw_get(&name_val);
    if !cached.is_nil() {
        return Ok(vec![cached]);
    }

    let searchers = match pkg.get_str_name("searchers") {
        LuaValue::Table(t) => t,
        _ => return Err(LuaError::msg("package.searchers is not a table")),
    };

    let mut errors = Vec::new();
    let mut found: Option<(LuaValue, LuaValue)> = None;
    let mut i = 1i64;
    loop {
        let searcher = searchers.raw_get(&LuaValue::Integer(i));
        if searcher.is_nil() {
            break;
        }
        let result = vm.call(searcher, vec![name_val.clone()])?;
        match result.into_iter().next() {
            Some(LuaValue::Function(f)) => {
                let extra = LuaValue::Nil;
                found = Some((LuaValue::Function(f), extra));
                break;
            }
            Some(LuaValue::Str(msg)) => errors.push(msg.to_str_lossy().into_owned()),
            _ => {}
        }
        i += 1;
    }

    let (loader, extra) = found.ok_or_else(|| {
        LuaError::msg(format!("module '{}' not found:{}", name.to_str_lossy(), errors.join("")))
    })?;

    let results = vm.call(loader, vec![name_val.clone(), extra])?;
    let module = results.into_iter().next().unwrap_or(LuaValue::Boolean(true));
    let module = if module.is_nil() { LuaValue::Boolean(true) } else { module };
    let _ = loaded.raw_set(name_val, module.clone());
    Ok(vec![module])
}

fn searcher_preload(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let name = check_str(args, 1, "preload searcher")?;
    let pkg = package_table(vm)?;
    let preload = match pkg.get_str_name("preload") {
        LuaValue::Table(t) => t,
        _ => return Ok(vec![vm.new_string("\n\tno field package.preload")]),
    };
    let loader = preload.raw_get(&LuaValue::Str(name));
    if loader.is_nil() {
        Ok(vec![vm.new_string("\n\tno field package.preload")])
    } else {
        Ok(vec![loader])
    }
}

fn searcher_lua(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let name = check_str(args, 1, "Lua searcher")?.to_str_lossy().into_owned();
    let pkg = package_table(vm)?;
    let path = match pkg.get_str_name("path") {
        LuaValue::Str(s) => s.to_str_lossy().into_owned(),
        _ => DEFAULT_PATH.to_string(),
    };

    match search_path(&name, &path, ".", "/") {
        Some(filepath) => {
            let source = std::fs::read_to_string(&filepath).map_err(|e| LuaError::msg(format!("cannot open '{filepath}': {e}")))?;
            let chunk_name = format!("@{filepath}");
            let closure = vm.load_source(&source, &chunk_name).map_err(LuaError::msg)?;
            Ok(vec![LuaValue::Function(closure), vm.new_string(&filepath)])
        }
        None => {
            let msg = path
                .split(';')
                .map(|template| format!("\n\tno file '{}'", template.replace('?', &name.replace('.', "/"))))
                .collect::<String>();
            Ok(vec![vm.new_string(&msg)])
        }
    }
}

/// Substitutes `?` in each `;`-separated template with `name` (its `sep`
/// occurrences rewritten to `rep`, e.g. `.` to `/`) and returns the first
/// template whose file exists (spec.md §6 `package.searchpath`).
fn search_path(name: &str, path: &str, sep: &str, rep: &str) -> Option<String> {
    let searchname = name.replace(sep, rep);
    path.split(';').map(|template| template.replace('?', &searchname)).find(|candidate| std::path::Path::new(candidate).exists())
}

fn package_loadlib(vm: &mut Vm, _args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    Ok(vec![LuaValue::Nil, vm.new_string("loadlib not supported")])
}

fn package_searchpath(vm: &mut Vm, args: &[LuaValue]) -> LResult<Vec<LuaValue>> {
    let name = check_str(args, 1, "searchpath")?.to_str_lossy().into_owned();
    let path = check_str(args, 2, "searchpath")?.to_str_lossy().into_owned();
    let sep = crate::stdlib::opt_str(args, 3, "searchpath", ".")?.to_str_lossy().into_owned();
    let rep = crate::stdlib::opt_str(args, 4, "searchpath", "/")?.to_str_lossy().into_owned();

    match search_path(&name, &path, &sep, &rep) {
        Some(filepath) => Ok(vec![vm.new_string(&filepath)]),
        None => {
            let searchname = name.replace(&sep, &rep);
            let msg = path.split(';').map(|template| format!("\n\tno file '{}'", template.replace('?', &searchname))).collect::<String>();
            Ok(vec![LuaValue::Nil, vm.new_string(&msg)])
        }
    }
}
