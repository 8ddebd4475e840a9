//! `tluac`: offline compiler producing `luacore`'s binary chunk format
//! (spec.md §6 "tluac [-o out] [-s strip] src..."). Exercises the same
//! lexer/parser/compiler pipeline as `load`, then serializes the resulting
//! root `Proto` with [`luacore::vm::load::dump`].

use luacore::vm::load::dump;
use mimalloc::MiMalloc;
use std::env;
use std::fs;
use std::io::Write;
use std::process::ExitCode;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

const PROGNAME: &str = "tluac";
const DEFAULT_OUTPUT: &str = "luac.out";

struct Options {
    output: String,
    strip: bool,
    sources: Vec<String>,
}

fn usage() {
    eprintln!("usage: {PROGNAME} [-o output] [-s] [-l] [-v] input...");
    eprintln!("  -o output  output to file 'output' (default: \"{DEFAULT_OUTPUT}\")");
    eprintln!("  -s         strip debug information");
    eprintln!("  -v         show version information");
}

fn parse_args(raw: &[String]) -> Result<Options, String> {
    let mut opts = Options { output: DEFAULT_OUTPUT.to_string(), strip: false, sources: Vec::new() };
    let mut i = 0;
    while i < raw.len() {
        match raw[i].as_str() {
            "-o" => {
                i += 1;
                opts.output = raw.get(i).ok_or("'-o' needs argument")?.clone();
            }
            "-s" => opts.strip = true,
            "-v" => {
                println!("{}", luacore::LUA_VERSION);
            }
            "--" => {
                opts.sources.extend(raw[i + 1..].iter().cloned());
                break;
            }
            other if other.starts_with('-') && other.len() > 1 => {
                return Err(format!("unrecognized option '{other}'"));
            }
            other => opts.sources.push(other.to_string()),
        }
        i += 1;
    }
    Ok(opts)
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

    if opts.sources.is_empty() {
        eprintln!("{PROGNAME}: no input files given");
        usage();
        return ExitCode::FAILURE;
    }

    // Concatenate every source into one main chunk, the way canonical
    // `luac` combines multiple inputs into a single compiled unit whose
    // first file's name becomes the chunk name.
    let mut combined = String::new();
    for path in &opts.sources {
        match fs::read_to_string(path) {
            Ok(src) => {
                combined.push_str(&src);
                combined.push('\n');
            }
            Err(e) => {
                eprintln!("{PROGNAME}: cannot open {path}: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    let chunk_name = format!("@{}", opts.sources[0]);

    let tokens = match luacore::lexer::Lexer::new(combined.as_bytes(), chunk_name.clone()).tokenize() {
        Ok(t) => t,
        Err(e) => {
            eprintln!("{PROGNAME}: {e}");
            return ExitCode::FAILURE;
        }
    };
    let chunk = match luacore::parser::parse(&tokens, chunk_name.clone()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{PROGNAME}: {e}");
            return ExitCode::FAILURE;
        }
    };
    let proto = match luacore::compiler::compile(&chunk, chunk_name) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("{PROGNAME}: {e}");
            return ExitCode::FAILURE;
        }
    };

    let bytes = dump(&proto, opts.strip);
    let mut f = match fs::File::create(&opts.output) {
        Ok(f) => f,
        Err(e) => {
            eprintln!("{PROGNAME}: cannot create {}: {e}", opts.output);
            return ExitCode::FAILURE;
        }
    };
    if let Err(e) = f.write_all(&bytes) {
        eprintln!("{PROGNAME}: cannot write {}: {e}", opts.output);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
