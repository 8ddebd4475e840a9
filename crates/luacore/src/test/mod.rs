//! Test module organization (teacher convention: `crates/luars/src/test/
//! mod.rs` declares one module per concern rather than scattering `#[cfg(
//! test)]` blocks through every source file).

mod test_arithmetic;
mod test_closures;
mod test_close;
mod test_coroutine;
mod test_errors;
mod test_goto;
mod test_load;
mod test_math;
mod test_string;
mod test_syntax;
mod test_table;

/// Runs `source` as a chunk and asserts it succeeds, for tests whose Lua
/// body does its own `assert(...)` checking (teacher's
/// `assert!(result.is_ok())` pattern).
pub(crate) fn run_ok(source: &str) {
    match crate::execute(source, "=test") {
        Ok(_) => {}
        Err(e) => panic!("expected success, got error: {e}"),
    }
}

/// Runs `source` and returns its error message, for tests asserting on a
/// specific failure shape.
pub(crate) fn run_err(source: &str) -> String {
    match crate::execute(source, "=test") {
        Ok(v) => panic!("expected an error, got success: {v:?}"),
        Err(e) => e.message_string(),
    }
}
