//! Lua pattern matching (spec.md §6/SPEC_FULL.md §7 "string" library):
//! classes, sets, captures, anchors, `%b`, `%f`, and the `*+-?` quantifiers.
//!
//! Grounded on the teacher's `crates/luars/src/stdlib/string/pattern/*`,
//! which itself follows canonical Lua's `lstrlib.c` `match` function
//! byte-for-byte in spirit. This implementation keeps that single
//! recursive-descent matcher shape (no separate AST/parse phase — the
//! pattern is interpreted directly during matching) rather than the
//! teacher's separate parser/engine/matcher split, since the whole
//! matcher is small enough to read as one function family.

pub const MAX_CAPTURES: usize = 32;
const CAP_POSITION: isize = -2;
const CAP_UNFINISHED: isize = -1;

#[derive(Clone, Copy)]
pub struct Capture {
    pub start: usize,
    pub len: isize,
}

pub struct MatchState<'a> {
    pub src: &'a [u8],
    pub pat: &'a [u8],
    pub captures: Vec<Capture>,
    depth: u32,
}

#[derive(Debug)]
pub struct PatternError(pub String);

impl std::fmt::Display for PatternError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

type PResult<T> = Result<T, PatternError>;

const MAX_DEPTH: u32 = 220;

impl<'a> MatchState<'a> {
    pub fn new(src: &'a [u8], pat: &'a [u8]) -> Self {
        MatchState { src, pat, captures: Vec::new(), depth: 0 }
    }

    /// Finds the end of the single pattern item starting at `p` (a literal
    /// byte, a `%x` class, or a `[...]` set) — mirrors canonical Lua's
    /// `classend` exactly, including the quirk that a `]` immediately after
    /// `[` or `[^` is a literal set member rather than the terminator.
    fn class_end(&self, p: usize) -> PResult<usize> {
        let mut p = p;
        let c = self.pat[p];
        p += 1;
        if c == b'%' {
            if p >= self.pat.len() {
                return Err(PatternError("malformed pattern (ends with '%')".into()));
            }
            return Ok(p + 1);
        }
        if c == b'[' {
            if self.pat.get(p) == Some(&b'^') {
                p += 1;
            }
            loop {
                if p >= self.pat.len() {
                    return Err(PatternError("malformed pattern (missing ']')".into()));
                }
                let pc = self.pat[p];
                p += 1;
                if pc == b'%' && p < self.pat.len() {
                    p += 1;
                }
                if p < self.pat.len() && self.pat[p] == b']' {
                    break;
                }
                if p >= self.pat.len() {
                    return Err(PatternError("malformed pattern (missing ']')".into()));
                }
            }
            return Ok(p + 1);
        }
        Ok(p)
    }

    fn match_class(c: u8, cl: u8) -> bool {
        let res = match cl.to_ascii_lowercase() {
            b'a' => c.is_ascii_alphabetic(),
            b'd' => c.is_ascii_digit(),
            b'l' => c.is_ascii_lowercase(),
            b's' => c.is_ascii_whitespace(),
            b'u' => c.is_ascii_uppercase(),
            b'w' => c.is_ascii_alphanumeric(),
            b'c' => c.is_ascii_control(),
            b'p' => c.is_ascii_punctuation(),
            b'x' => c.is_ascii_hexdigit(),
            b'g' => c.is_ascii_graphic(),
            _ => return c == cl,
        };
        if cl.is_ascii_uppercase() {
            !res
        } else {
            res
        }
    }

    fn match_set(&self, c: u8, mut p: usize, ep: usize) -> bool {
        let mut negate = false;
        p += 1; // skip '['
        if self.pat.get(p) == Some(&b'^') {
            negate = true;
            p += 1;
        }
        let mut found = false;
        while p < ep - 1 {
            if self.pat[p] == b'%' {
                p += 1;
                if Self::match_class(c, self.pat[p]) {
                    found = true;
                }
                p += 1;
            } else if p + 2 < ep - 1 && self.pat[p + 1] == b'-' {
                if self.pat[p] <= c && c <= self.pat[p + 2] {
                    found = true;
                }
                p += 3;
            } else {
                if self.pat[p] == c {
                    found = true;
                }
                p += 1;
            }
        }
        found != negate
    }

    fn single_match(&self, s: usize, p: usize, ep: usize) -> bool {
        let Some(&c) = self.src.get(s) else { return false };
        match self.pat[p] {
            b'.' => true,
            b'%' => Self::match_class(c, self.pat[p + 1]),
            b'[' => self.match_set(c, p, ep),
            pc => pc == c,
        }
    }

    /// Core matcher: attempts to match `pat[p..]` against `src[s..]`,
    /// returning the end position in `src` on success.
    pub fn do_match(&mut self, mut s: usize, mut p: usize) -> PResult<Option<usize>> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            self.depth -= 1;
            return Err(PatternError("pattern too complex".into()));
        }
        let result = self.do_match_inner(&mut s, &mut p);
        self.depth -= 1;
        result
    }

    fn do_match_inner(&mut self, s: &mut usize, p: &mut usize) -> PResult<Option<usize>> {
        loop {
            if *p >= self.pat.len() {
                return Ok(Some(*s));
            }
            match self.pat[*p] {
                b'(' => {
                    return if self.pat.get(*p + 1) == Some(&b')') {
                        self.start_capture(*s, *p + 2, CAP_POSITION)
                    } else {
                        self.start_capture(*s, *p + 1, CAP_UNFINISHED)
                    };
                }
                b')' => return self.end_capture(*s, *p + 1),
                b'$' if *p + 1 == self.pat.len() => {
                    return Ok(if *s == self.src.len() { Some(*s) } else { None });
                }
                b'%' => {
                    match self.pat.get(*p + 1) {
                        Some(b'b') => {
                            return match self.match_balance(*s, *p + 2)? {
                                Some(ns) => {
                                    *s = ns;
                                    *p += 4;
                                    continue;
                                }
                                None => Ok(None),
                            };
                        }
                        Some(b'f') => {
                            *p += 2;
                            if self.pat.get(*p) != Some(&b'[') {
                                return Err(PatternError("missing '[' after '%f' in pattern".into()));
                            }
                            let ep = self.class_end(*p)?;
                            let prev = if *s == 0 { 0u8 } else { self.src[*s - 1] };
                            let cur = self.src.get(*s).copied().unwrap_or(0);
                            if !self.match_set(prev, *p, ep) && self.match_set(cur, *p, ep) {
                                *p = ep;
                                continue;
                            }
                            return Ok(None);
                        }
                        Some(d) if d.is_ascii_digit() => {
                            return match self.match_capture(*s, (*d - b'0') as usize)? {
                                Some(ns) => {
                                    *s = ns;
                                    *p += 2;
                                    continue;
                                }
                                None => Ok(None),
                            };
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
            let ep = self.class_end(*p)?;
            let next_is_quant = self.pat.get(ep).copied();
            match next_is_quant {
                Some(b'?') => {
                    if self.single_match(*s, *p, ep) {
                        if let Some(r) = self.do_match(*s + 1, ep + 1)? {
                            return Ok(Some(r));
                        }
                    }
                    *p = ep + 1;
                    continue;
                }
                Some(b'*') => return self.max_expand(*s, *p, ep),
                Some(b'+') => {
                    return if self.single_match(*s, *p, ep) {
                        self.max_expand(*s + 1, *p, ep)
                    } else {
                        Ok(None)
                    };
                }
                Some(b'-') => return self.min_expand(*s, *p, ep),
                _ => {
                    if !self.single_match(*s, *p, ep) {
                        return Ok(None);
                    }
                    *s += 1;
                    *p = ep;
                    continue;
                }
            }
        }
    }

    fn max_expand(&mut self, s: usize, p: usize, ep: usize) -> PResult<Option<usize>> {
        let mut count = 0usize;
        while self.single_match(s + count, p, ep) {
            count += 1;
        }
        loop {
            if let Some(r) = self.do_match(s + count, ep + 1)? {
                return Ok(Some(r));
            }
            if count == 0 {
                return Ok(None);
            }
            count -= 1;
        }
    }

    fn min_expand(&mut self, mut s: usize, p: usize, ep: usize) -> PResult<Option<usize>> {
        loop {
            if let Some(r) = self.do_match(s, ep + 1)? {
                return Ok(Some(r));
            }
            if self.single_match(s, p, ep) {
                s += 1;
            } else {
                return Ok(None);
            }
        }
    }

    fn start_capture(&mut self, s: usize, p: usize, what: isize) -> PResult<Option<usize>> {
        if self.captures.len() >= MAX_CAPTURES {
            return Err(PatternError("too many captures".into()));
        }
        self.captures.push(Capture { start: s, len: what });
        let idx = self.captures.len() - 1;
        let res = self.do_match(s, p)?;
        if res.is_none() {
            self.captures.truncate(idx);
        }
        Ok(res)
    }

    fn end_capture(&mut self, s: usize, p: usize) -> PResult<Option<usize>> {
        let idx = self
            .captures
            .iter()
            .rposition(|c| c.len == CAP_UNFINISHED)
            .ok_or_else(|| PatternError("invalid pattern capture".into()))?;
        self.captures[idx].len = (s - self.captures[idx].start) as isize;
        let res = self.do_match(s, p)?;
        if res.is_none() {
            self.captures[idx].len = CAP_UNFINISHED;
        }
        Ok(res)
    }

    fn match_capture(&mut self, s: usize, idx: usize) -> PResult<Option<usize>> {
        if idx == 0 || idx > self.captures.len() {
            return Err(PatternError("invalid capture index".into()));
        }
        let cap = self.captures[idx - 1];
        if cap.len < 0 {
            return Err(PatternError("unfinished capture".into()));
        }
        let len = cap.len as usize;
        if self.src.len() - s >= len && self.src[cap.start..cap.start + len] == self.src[s..s + len] {
            Ok(Some(s + len))
        } else {
            Ok(None)
        }
    }

    fn match_balance(&self, s: usize, p: usize) -> PResult<Option<usize>> {
        if p + 1 >= self.pat.len() {
            return Err(PatternError("missing arguments to '%b'".into()));
        }
        let (b, e) = (self.pat[p], self.pat[p + 1]);
        if self.src.get(s) != Some(&b) {
            return Ok(None);
        }
        let mut cont = 1i32;
        let mut i = s + 1;
        while i < self.src.len() {
            if self.src[i] == e {
                cont -= 1;
                if cont == 0 {
                    return Ok(Some(i + 1));
                }
            } else if self.src[i] == b {
                cont += 1;
            }
            i += 1;
        }
        Ok(None)
    }

    /// Materializes captures as `(start, end)` byte ranges for the caller,
    /// substituting the whole match when the pattern declared none (Lua's
    /// "whole match is the default capture" rule).
    pub fn capture_ranges(&self, whole_start: usize, whole_end: usize) -> Vec<(isize, usize, usize)> {
        if self.captures.is_empty() {
            return vec![(0, whole_start, whole_end)];
        }
        self.captures
            .iter()
            .map(|c| {
                if c.len == CAP_POSITION {
                    (1, c.start, c.start)
                } else {
                    (0, c.start, c.start + c.len.max(0) as usize)
                }
            })
            .collect()
    }
}

/// Finds the first match of `pat` in `src` at or after `init` (0-based byte
/// offset), honoring a leading `^` anchor. Returns `(match_start, match_end,
/// captures)` where captures are `(is_position_capture, start, end)` pairs.
pub fn find(src: &[u8], pat: &[u8], init: usize) -> PResult<Option<(usize, usize, Vec<(isize, usize, usize)>)>> {
    let (anchored, pat) = if pat.first() == Some(&b'^') { (true, &pat[1..]) } else { (false, pat) };
    let mut s = init.min(src.len());
    loop {
        let mut ms = MatchState::new(src, pat);
        if let Some(end) = ms.do_match(s, 0)? {
            return Ok(Some((s, end, ms.capture_ranges(s, end))));
        }
        if anchored || s >= src.len() {
            return Ok(None);
        }
        s += 1;
    }
}
