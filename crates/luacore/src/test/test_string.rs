//! `string` library: byte-oriented operations, `string.format`, and the
//! pattern-matching functions (`find`/`match`/`gmatch`/`gsub`).

use super::run_ok;

#[test]
fn basic_length_and_indexing() {
    run_ok(
        r#"
        assert(string.len("hello") == 5)
        assert(#"hello" == 5)
        assert(string.byte("A") == 65)
        assert(string.char(65, 66, 67) == "ABC")
        "#,
    );
}

#[test]
fn sub_handles_negative_and_out_of_range_indices() {
    run_ok(
        r#"
        local s = "hello world"
        assert(string.sub(s, 1, 5) == "hello")
        assert(string.sub(s, -5) == "world")
        assert(string.sub(s, 7) == "world")
        assert(string.sub(s, 1, -7) == "hello")
        assert(string.sub(s, 100) == "")
        assert(string.sub(s, 5, 2) == "")
        "#,
    );
}

#[test]
fn case_conversion_is_ascii_only() {
    run_ok(
        r#"
        assert(string.upper("MixedCase123") == "MIXEDCASE123")
        assert(string.lower("MixedCase123") == "mixedcase123")
        "#,
    );
}

#[test]
fn rep_with_and_without_separator() {
    run_ok(
        r#"
        assert(string.rep("ab", 3) == "ababab")
        assert(string.rep("ab", 3, "-") == "ab-ab-ab")
        assert(string.rep("x", 0) == "")
        "#,
    );
}

#[test]
fn reverse_round_trips() {
    run_ok(
        r#"
        assert(string.reverse("hello") == "olleh")
        assert(string.reverse(string.reverse("hello")) == "hello")
        "#,
    );
}

#[test]
fn method_call_syntax_dispatches_through_string_metatable() {
    run_ok(
        r#"
        assert(("hello"):upper() == "HELLO")
        assert(("  hi  "):len() == 6)
        "#,
    );
}

#[test]
fn format_handles_the_common_directives() {
    run_ok(
        r#"
        assert(string.format("%d", 42) == "42")
        assert(string.format("%5d", 42) == "   42")
        assert(string.format("%-5d|", 42) == "42   |")
        assert(string.format("%s", "hi") == "hi")
        assert(string.format("%.2f", 3.14159) == "3.14")
        assert(string.format("%x", 255) == "ff")
        assert(string.format("%%") == "%")
        "#,
    );
}

#[test]
fn find_returns_indices_and_captures() {
    run_ok(
        r#"
        local s, e = string.find("hello world", "world")
        assert(s == 7 and e == 11)
        local s2 = string.find("hello", "xyz")
        assert(s2 == nil)

        local a, b, cap = string.find("key=value", "(%a+)=")
        assert(a == 1 and cap == "key")
        "#,
    );
}

#[test]
fn plain_find_disables_pattern_interpretation() {
    run_ok(
        r#"
        local s, e = string.find("a.b.c", ".", 1, true)
        assert(s == 2 and e == 2)
        "#,
    );
}

#[test]
fn match_extracts_single_or_multiple_captures() {
    run_ok(
        r#"
        assert(string.match("hello123", "%a+") == "hello")
        assert(string.match("hello123", "%d+") == "123")
        local k, v = string.match("name=value", "(%a+)=(%a+)")
        assert(k == "name" and v == "value")
        assert(string.match("abc", "%d+") == nil)
        "#,
    );
}

#[test]
fn gmatch_iterates_every_match() {
    run_ok(
        r#"
        local words = {}
        for w in string.gmatch("the quick brown fox", "%a+") do
            table.insert(words, w)
        end
        assert(#words == 4)
        assert(words[1] == "the" and words[4] == "fox")
        "#,
    );
}

#[test]
fn gsub_replaces_with_string_table_and_function() {
    run_ok(
        r#"
        local s, n = string.gsub("hello world", "o", "0")
        assert(s == "hell0 w0rld" and n == 2)

        local s2 = string.gsub("hello world", "%w+", {hello = "hi", world = "earth"})
        assert(s2 == "hi earth")

        local s3, n3 = string.gsub("abc", "%a", function(c) return c:upper() end)
        assert(s3 == "ABC" and n3 == 3)
        "#,
    );
}

#[test]
fn gsub_respects_replacement_count_limit() {
    run_ok(
        r#"
        local s, n = string.gsub("aaaa", "a", "b", 2)
        assert(s == "bbaa" and n == 2)
        "#,
    );
}

#[test]
fn anchored_pattern_only_matches_at_start() {
    run_ok(
        r#"
        assert(string.match("hello", "^he") == "he")
        assert(string.match("xhello", "^he") == nil)
        "#,
    );
}

#[test]
fn tostring_and_format_agree_on_scientific_notation() {
    run_ok(
        r#"
        assert(tostring(1e14) == "1e+14")
        assert(tostring(1e14) == string.format("%.14g", 1e14))
        assert(tostring(1e15) == string.format("%.14g", 1e15))
        assert(tostring(1e-5) == string.format("%.14g", 1e-5))
        assert(tostring(2^53) == string.format("%.14g", 2^53))
        "#,
    );
}
