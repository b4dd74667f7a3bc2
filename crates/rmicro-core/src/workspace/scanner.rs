//! Line-oriented matching of workspace allocate/free call sites
//!
//! The generated sources this runs on are regular: one call per line, the
//! allocation result bound with `=`, and the size passed as a (possibly cast)
//! constant. The scanner recognizes those call shapes without a full C parser.

/// Names and argument positions of the workspace allocator calls
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallPattern {
    /// Allocation function name
    pub alloc_fn: String,
    /// Zero-based index of the size argument of the allocation call
    pub size_arg: usize,
    /// Free function name
    pub free_fn: String,
    /// Zero-based index of the pointer argument of the free call
    pub ptr_arg: usize,
}

impl Default for CallPattern {
    fn default() -> Self {
        Self {
            alloc_fn: "TVMBackendAllocWorkspace".into(),
            size_arg: 2,
            free_fn: "TVMBackendFreeWorkspace".into(),
            ptr_arg: 2,
        }
    }
}

/// What a single line of source does to the workspace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent<'a> {
    /// Allocation bound to `token`, size expression as written
    Alloc {
        /// Identifier the result is assigned to, if any
        token: Option<&'a str>,
        /// Size argument, casts not yet removed
        size_expr: &'a str,
    },
    /// Free of `token`
    Free {
        /// Identifier passed to the free call
        token: &'a str,
    },
}

/// Strips comments from source while tracking `/* */` across lines
#[derive(Debug, Default)]
pub struct CommentStripper {
    in_block: bool,
}

impl CommentStripper {
    /// Create a stripper positioned outside any comment
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the code portion of `line`
    ///
    /// String and character literals are kept intact so comment markers inside
    /// them are not mistaken for comments.
    pub fn strip(&mut self, line: &str) -> String {
        let bytes = line.as_bytes();
        let mut out = String::with_capacity(line.len());
        let mut quote: Option<u8> = None;
        let mut i = 0;

        while i < bytes.len() {
            let c = bytes[i];
            let next = bytes.get(i + 1).copied();

            if self.in_block {
                if c == b'*' && next == Some(b'/') {
                    self.in_block = false;
                    out.push(' ');
                    i += 2;
                } else {
                    i += 1;
                }
                continue;
            }

            if let Some(q) = quote {
                if c == b'\\' {
                    out.push('\\');
                    i += 1;
                    if let Some(ch) = line[i..].chars().next() {
                        out.push(ch);
                        i += ch.len_utf8();
                    }
                    continue;
                }
                if c == q {
                    quote = None;
                }
            } else if c == b'"' || c == b'\'' {
                quote = Some(c);
            } else if c == b'/' && next == Some(b'/') {
                break;
            } else if c == b'/' && next == Some(b'*') {
                self.in_block = true;
                i += 2;
                continue;
            }

            // Push whole UTF-8 characters so slicing stays on boundaries
            let ch_len = line[i..].chars().next().map_or(1, char::len_utf8);
            out.push_str(&line[i..i + ch_len]);
            i += ch_len;
        }

        out
    }
}

/// Name of an allocator call that starts in `code` but whose parentheses
/// are not closed yet
///
/// Generated code sometimes wraps a long call over several lines; the caller
/// joins following lines onto `code` until this returns `None`.
pub fn unclosed_call<'p>(code: &str, pattern: &'p CallPattern) -> Option<&'p str> {
    [&pattern.alloc_fn, &pattern.free_fn]
        .into_iter()
        .find(|name| matches!(scan_call(code, name), CallScan::Unclosed))
        .map(String::as_str)
}

/// Classify one comment-free line
pub fn match_line<'a>(code: &'a str, pattern: &CallPattern) -> Option<LineEvent<'a>> {
    if let Some((lhs, args)) = find_call(code, &pattern.alloc_fn) {
        let size_expr = args.get(pattern.size_arg).copied().unwrap_or("");
        return Some(LineEvent::Alloc {
            token: assigned_identifier(lhs),
            size_expr,
        });
    }

    if let Some((_, args)) = find_call(code, &pattern.free_fn) {
        let arg = args.get(pattern.ptr_arg).copied().unwrap_or("");
        return Some(LineEvent::Free {
            token: strip_casts(arg),
        });
    }

    None
}

fn is_ident_byte(c: u8) -> bool {
    c.is_ascii_alphanumeric() || c == b'_'
}

enum CallScan<'a> {
    Absent,
    Unclosed,
    Closed(&'a str, Vec<&'a str>),
}

/// Find `name(` as a whole identifier and split its top-level arguments
///
/// Returns the text before the call and the trimmed arguments. `None` if the
/// call is absent or its parentheses do not close on this line.
fn find_call<'a>(code: &'a str, name: &str) -> Option<(&'a str, Vec<&'a str>)> {
    match scan_call(code, name) {
        CallScan::Closed(lhs, args) => Some((lhs, args)),
        CallScan::Absent | CallScan::Unclosed => None,
    }
}

fn scan_call<'a>(code: &'a str, name: &str) -> CallScan<'a> {
    let bytes = code.as_bytes();
    let mut search_from = 0;

    while let Some(pos) = code[search_from..].find(name) {
        let start = search_from + pos;
        let end = start + name.len();
        search_from = end;

        if start > 0 && is_ident_byte(bytes[start - 1]) {
            continue;
        }
        let rest = code[end..].trim_start();
        if !rest.starts_with('(') {
            continue;
        }
        let open = code.len() - rest.len();

        let mut depth = 0usize;
        let mut args = Vec::new();
        let mut arg_start = open + 1;
        for (i, c) in code[open..].char_indices() {
            let i = open + i;
            match c {
                '(' => depth += 1,
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        args.push(code[arg_start..i].trim());
                        return CallScan::Closed(&code[..start], args);
                    }
                }
                ',' if depth == 1 => {
                    args.push(code[arg_start..i].trim());
                    arg_start = i + 1;
                }
                _ => {}
            }
        }
        return CallScan::Unclosed;
    }

    CallScan::Absent
}

/// The identifier assigned by `lhs`, e.g. `void* buf = (void*)` gives `buf`
fn assigned_identifier(lhs: &str) -> Option<&str> {
    let bytes = lhs.as_bytes();
    let eq = (0..bytes.len()).rev().find(|&i| {
        bytes[i] == b'='
            && !matches!(bytes.get(i + 1), Some(b'='))
            && !matches!(i.checked_sub(1).map(|j| bytes[j]), Some(b'=' | b'!' | b'<' | b'>'))
    })?;

    let target = lhs[..eq].trim_end();
    let ident_start = target
        .bytes()
        .rposition(|c| !is_ident_byte(c))
        .map_or(0, |p| p + 1);
    let ident = &target[ident_start..];
    (!ident.is_empty() && !ident.as_bytes()[0].is_ascii_digit()).then_some(ident)
}

/// Remove leading C casts such as `(void*)` or `(uint64_t)` from an argument
pub fn strip_casts(mut expr: &str) -> &str {
    loop {
        expr = expr.trim();
        let Some(inner_end) = expr.strip_prefix('(').and_then(|r| r.find(')')) else {
            return expr;
        };
        let inner = &expr[1..inner_end + 1];
        let rest = &expr[inner_end + 2..];
        // A cast is a parenthesized type name followed by more expression
        let looks_like_type = !inner.trim().is_empty()
            && inner
                .bytes()
                .all(|c| is_ident_byte(c) || c == b'*' || c == b' ')
            && !inner.trim().bytes().all(|c| c.is_ascii_digit())
            && !rest.trim().is_empty();
        if !looks_like_type || (is_identifier_only(inner) && !is_type_name(inner.trim())) {
            return expr;
        }
        expr = rest;
    }
}

fn is_identifier_only(s: &str) -> bool {
    let s = s.trim();
    !s.is_empty() && s.bytes().all(is_ident_byte)
}

fn is_type_name(s: &str) -> bool {
    const TYPES: &[&str] = &[
        "void", "char", "short", "int", "long", "unsigned", "signed", "size_t", "int8_t",
        "int16_t", "int32_t", "int64_t", "uint8_t", "uint16_t", "uint32_t", "uint64_t",
        "float", "double",
    ];
    TYPES.contains(&s) || s.ends_with("_t")
}

/// Fold a constant integer expression
///
/// Supports decimal/hex/octal literals with `u`/`l` suffixes, casts, parentheses
/// and the binary operators `* / % + - << >>`. Returns `None` for anything that
/// references an identifier or would overflow.
pub fn fold_constant(expr: &str) -> Option<u64> {
    let tokens = tokenize(strip_casts(expr))?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.shift()?;
    (parser.pos == parser.tokens.len()).then_some(value)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Tok {
    Num(u64),
    Op(&'static str),
    Open,
    Close,
}

fn tokenize(expr: &str) -> Option<Vec<Tok>> {
    let bytes = expr.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        match c {
            b' ' | b'\t' => i += 1,
            b'0'..=b'9' => {
                let start = i;
                while i < bytes.len() && is_ident_byte(bytes[i]) {
                    i += 1;
                }
                tokens.push(Tok::Num(parse_literal(&expr[start..i])?));
            }
            b'(' => {
                // Drop casts nested inside the expression
                let close = expr[i..].find(')')? + i;
                let inner = expr[i + 1..close].trim();
                if !inner.is_empty()
                    && is_type_name(inner.trim_end_matches(['*', ' ']))
                    && inner.bytes().all(|c| is_ident_byte(c) || c == b'*' || c == b' ')
                {
                    i = close + 1;
                } else {
                    tokens.push(Tok::Open);
                    i += 1;
                }
            }
            b')' => {
                tokens.push(Tok::Close);
                i += 1;
            }
            b'<' | b'>' if bytes.get(i + 1) == Some(&c) => {
                tokens.push(Tok::Op(if c == b'<' { "<<" } else { ">>" }));
                i += 2;
            }
            b'*' => {
                tokens.push(Tok::Op("*"));
                i += 1;
            }
            b'/' => {
                tokens.push(Tok::Op("/"));
                i += 1;
            }
            b'%' => {
                tokens.push(Tok::Op("%"));
                i += 1;
            }
            b'+' => {
                tokens.push(Tok::Op("+"));
                i += 1;
            }
            b'-' => {
                tokens.push(Tok::Op("-"));
                i += 1;
            }
            _ => return None,
        }
    }

    Some(tokens)
}

fn parse_literal(lit: &str) -> Option<u64> {
    let digits = lit.trim_end_matches(['u', 'U', 'l', 'L']);
    if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        u64::from_str_radix(hex, 16).ok()
    } else if digits.len() > 1 && digits.starts_with('0') {
        u64::from_str_radix(&digits[1..], 8).ok()
    } else {
        digits.parse().ok()
    }
}

struct Parser {
    tokens: Vec<Tok>,
    pos: usize,
}

impl Parser {
    fn peek_op(&self, ops: &[&str]) -> Option<&'static str> {
        match self.tokens.get(self.pos) {
            Some(Tok::Op(op)) if ops.contains(op) => Some(*op),
            _ => None,
        }
    }

    fn shift(&mut self) -> Option<u64> {
        let mut value = self.additive()?;
        while let Some(op) = self.peek_op(&["<<", ">>"]) {
            self.pos += 1;
            let rhs = u32::try_from(self.additive()?).ok()?;
            value = match op {
                "<<" => value.checked_shl(rhs)?,
                _ => value.checked_shr(rhs)?,
            };
        }
        Some(value)
    }

    fn additive(&mut self) -> Option<u64> {
        let mut value = self.term()?;
        while let Some(op) = self.peek_op(&["+", "-"]) {
            self.pos += 1;
            let rhs = self.term()?;
            value = match op {
                "+" => value.checked_add(rhs)?,
                _ => value.checked_sub(rhs)?,
            };
        }
        Some(value)
    }

    fn term(&mut self) -> Option<u64> {
        let mut value = self.atom()?;
        while let Some(op) = self.peek_op(&["*", "/", "%"]) {
            self.pos += 1;
            let rhs = self.atom()?;
            value = match op {
                "*" => value.checked_mul(rhs)?,
                "/" => value.checked_div(rhs)?,
                _ => value.checked_rem(rhs)?,
            };
        }
        Some(value)
    }

    fn atom(&mut self) -> Option<u64> {
        match self.tokens.get(self.pos)?.clone() {
            Tok::Num(n) => {
                self.pos += 1;
                Some(n)
            }
            Tok::Open => {
                self.pos += 1;
                let value = self.shift()?;
                if self.tokens.get(self.pos) != Some(&Tok::Close) {
                    return None;
                }
                self.pos += 1;
                Some(value)
            }
            _ => None,
        }
    }
}
