//! `tlua`: the command-line launcher for `luacore` (spec.md §6 "CLI
//! surface"). An external collaborator of the core by design: it only
//! drives `luacore::Vm` through its public API (load/execute/pcall),
//! exactly the extension points spec.md §1 says the core must expose.
//!
//! Grounded on the teacher's `src/bin/main.rs` option-parsing shape
//! (`-e`, `-l`, `-i`, `-v`, `-E`, `--`, `-`), generalized to the subset
//! spec.md §6 actually specifies.

use luacore::value::lua_value::LuaValue;
use luacore::vm::error::LuaError;
use luacore::Vm;
use mimalloc::MiMalloc;
use std::env;
use std::fs;
use std::io::{self, BufRead, Read, Write};
use std::process::ExitCode;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const PROGNAME: &str = "tlua";

struct Options {
    execute_strings: Vec<String>,
    require_modules: Vec<String>,
    interactive: bool,
    show_version: bool,
    ignore_env: bool,
    script: Option<String>,
    script_args: Vec<String>,
    read_stdin: bool,
}

impl Default for Options {
    fn default() -> Self {
        Options {
            execute_strings: Vec::new(),
            require_modules: Vec::new(),
            interactive: false,
            show_version: false,
            ignore_env: false,
            script: None,
            script_args: Vec::new(),
            read_stdin: false,
        }
    }
}

fn usage() {
    eprintln!("usage: {PROGNAME} [options] [script [args]]");
    eprintln!("Available options are:");
    eprintln!("  -e stat   execute string 'stat'");
    eprintln!("  -i        enter interactive mode after executing 'script'");
    eprintln!("  -l name   require library 'name' into global 'name'");
    eprintln!("  -v        show version information");
    eprintln!("  -E        ignore environment variables (LUA_PATH, LUA_INIT)");
    eprintln!("  --        stop handling options");
    eprintln!("  -         stop handling options and execute stdin");
}

fn parse_args(raw: &[String]) -> Result<Options, String> {
    let mut opts = Options::default();
    let mut i = 0;
    let mut stop = false;
    while i < raw.len() {
        let a = &raw[i];
        if !stop && a == "-" {
            opts.read_stdin = true;
            stop = true;
        } else if !stop && a == "--" {
            stop = true;
        } else if !stop && a.starts_with('-') && a.len() > 1 {
            match a.as_str() {
                "-e" => {
                    i += 1;
                    let s = raw.get(i).ok_or("'-e' needs argument")?;
                    opts.execute_strings.push(s.clone());
                }
                "-l" => {
                    i += 1;
                    let s = raw.get(i).ok_or("'-l' needs argument")?;
                    opts.require_modules.push(s.clone());
                }
                "-i" => opts.interactive = true,
                "-v" => opts.show_version = true,
                "-E" => opts.ignore_env = true,
                other => return Err(format!("unrecognized option '{other}'")),
            }
        } else {
            opts.script = Some(a.clone());
            opts.script_args = raw[i + 1..].to_vec();
            break;
        }
        i += 1;
    }
    Ok(opts)
}

fn report(vm: &mut Vm, err: &LuaError) {
    let msg = vm
        .tostring(&err.value)
        .map(|s| s.to_str_lossy().into_owned())
        .unwrap_or_else(|_| err.to_string());
    eprintln!("{PROGNAME}: {msg}");
}

fn run_source(vm: &mut Vm, source: &str, chunk_name: &str) -> Result<(), LuaError> {
    let closure = vm
        .load_source(source, chunk_name)
        .map_err(LuaError::msg)?;
    vm.call(LuaValue::Function(closure), Vec::new())?;
    Ok(())
}

fn run_repl(vm: &mut Vm) {
    println!("{} -- {}", PROGNAME, luacore::LUA_VERSION);
    let stdin = io::stdin();
    let mut pending = String::new();
    loop {
        print!("{}", if pending.is_empty() { "> " } else { ">> " });
        let _ = io::stdout().flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            println!();
            break;
        }
        if !pending.is_empty() {
            pending.push('\n');
        }
        pending.push_str(line.trim_end_matches('\n'));

        let as_expr = format!("return {pending}");
        let chunk_name = "=stdin";
        let (source_to_run, is_expr) = match vm.load_source(&as_expr, chunk_name) {
            Ok(_) => (as_expr, true),
            Err(_) => (pending.clone(), false),
        };
        match vm.load_source(&source_to_run, chunk_name) {
            Ok(closure) => match vm.call(LuaValue::Function(closure), Vec::new()) {
                Ok(results) => {
                    if is_expr {
                        for r in &results {
                            if let Ok(s) = vm.tostring(r) {
                                println!("{}", s.to_str_lossy());
                            }
                        }
                    }
                }
                Err(e) => report(vm, &e),
            },
            Err(e) => {
                if e.contains("<eof>") {
                    continue;
                }
                eprintln!("{PROGNAME}: {e}");
            }
        }
        pending.clear();
    }
}

fn main() -> ExitCode {
    let args: Vec<String> = env::args().skip(1).collect();
    let opts = match parse_args(&args) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("{PROGNAME}: {e}");
            usage();
            return ExitCode::FAILURE;
        }
    };

    if opts.show_version {
        println!("{}", luacore::LUA_VERSION);
        if opts.execute_strings.is_empty()
            && opts.script.is_none()
            && !opts.read_stdin
            && !opts.interactive
        {
            return ExitCode::SUCCESS;
        }
    }

    let mut vm = Vm::new();

    if !opts.ignore_env {
        if let Ok(init) = env::var("LUA_INIT") {
            let (chunk, name): (String, &str) = if let Some(path) = init.strip_prefix('@') {
                match fs::read_to_string(path) {
                    Ok(s) => (s, "LUA_INIT"),
                    Err(e) => {
                        eprintln!("{PROGNAME}: cannot open {path}: {e}");
                        return ExitCode::FAILURE;
                    }
                }
            } else {
                (init.clone(), "=LUA_INIT")
            };
            if let Err(e) = run_source(&mut vm, &chunk, name) {
                report(&mut vm, &e);
                return ExitCode::FAILURE;
            }
        }
    }

    luacore::stdlib::basic::set_script_args(
        &mut vm,
        PROGNAME,
        opts.script.as_deref(),
        &opts.script_args,
    );

    for module in &opts.require_modules {
        let code = format!("{module} = require('{module}')");
        if let Err(e) = run_source(&mut vm, &code, "=(command line)") {
            report(&mut vm, &e);
            return ExitCode::FAILURE;
        }
    }

    for stat in &opts.execute_strings {
        if let Err(e) = run_source(&mut vm, stat, "=(command line)") {
            report(&mut vm, &e);
            return ExitCode::FAILURE;
        }
    }

    if let Some(path) = &opts.script {
        let source = match fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("{PROGNAME}: cannot open {path}: {e}");
                return ExitCode::FAILURE;
            }
        };
        let chunk_name = format!("@{path}");
        if let Err(e) = run_source(&mut vm, &source, &chunk_name) {
            report(&mut vm, &e);
            return ExitCode::FAILURE;
        }
    } else if opts.read_stdin {
        let mut source = String::new();
        if let Err(e) = io::stdin().read_to_string(&mut source) {
            eprintln!("{PROGNAME}: cannot read stdin: {e}");
            return ExitCode::FAILURE;
        }
        if let Err(e) = run_source(&mut vm, &source, "=stdin") {
            report(&mut vm, &e);
            return ExitCode::FAILURE;
        }
    }

    if opts.interactive
        || (opts.execute_strings.is_empty() && opts.script.is_none() && !opts.read_stdin)
    {
        run_repl(&mut vm);
    }

    ExitCode::SUCCESS
}
