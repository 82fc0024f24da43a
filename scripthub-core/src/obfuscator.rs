//! Lua Obfuscator
//!
//! Local, deterministic-shape transform used when the remote obfuscation
//! service is unavailable. It only raises the bar against casual reading;
//! it is not a security boundary.
//!
//! Techniques used:
//! - Local variable, local function, loop variable and parameter renaming
//!   (consistent within one run, reserved names and built-ins untouched)
//! - Comment removal
//! - Hex-encoded string literals ("\x67\x65\x74" -> "get" at parse time)
//! - Optional integrity/dump-check prologues
//! - Protected-call wrapping so runtime errors are reported, not propagated

use std::collections::{HashMap, HashSet};
use std::sync::OnceLock;

use rand::Rng;
use regex::Regex;
use serde::Deserialize;

use crate::types::TransformOptions;

/// Configuration for the local obfuscator
#[derive(Debug, Clone, Deserialize)]
pub struct ObfuscatorConfig {
    /// Rename locals and parameters
    #[serde(default = "default_true")]
    pub rename_locals: bool,
    /// Remove `--` and `--[[ ]]` comments
    #[serde(default = "default_true")]
    pub strip_comments: bool,
    /// String literals to encode as hex escapes
    #[serde(default = "default_encode_strings")]
    pub encode_strings: Vec<String>,
}

impl Default for ObfuscatorConfig {
    fn default() -> Self {
        Self {
            rename_locals: true,
            strip_comments: true,
            encode_strings: default_encode_strings(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_encode_strings() -> Vec<String> {
    vec![
        // Sensitive API names that might trigger detection
        "getfenv".to_string(),
        "setfenv".to_string(),
        "loadstring".to_string(),
        "HttpService".to_string(),
        "HttpGet".to_string(),
        "InsertService".to_string(),
    ]
}

/// Result of obfuscating a source
#[derive(Debug, Clone)]
pub struct ObfuscationResult {
    /// The transformed source code (not yet wrapped)
    pub source: String,
    /// Number of distinct identifiers renamed
    pub identifiers_renamed: usize,
    /// Number of comments removed
    pub comments_removed: usize,
    /// Number of string literals hex-encoded
    pub strings_encoded: usize,
    /// Number of protection prologues prepended
    pub prologues_added: usize,
}

impl ObfuscationResult {
    pub fn total_transforms(&self) -> usize {
        self.identifiers_renamed + self.comments_removed + self.strings_encoded + self.prologues_added
    }
}

/// Names that must never be renamed: Lua/Luau keywords and the globals
/// scripts rely on in the game client and executors.
const RESERVED: &[&str] = &[
    // Keywords
    "and", "break", "do", "else", "elseif", "end", "false", "for", "function",
    "if", "in", "local", "nil", "not", "or", "repeat", "return", "then", "true",
    "until", "while", "goto", "continue", "export", "self",
    // Lua built-ins
    "_G", "_ENV", "_VERSION", "assert", "collectgarbage", "error", "getmetatable",
    "ipairs", "next", "pairs", "pcall", "print", "rawequal", "rawget", "rawlen",
    "rawset", "require", "select", "setmetatable", "tonumber", "tostring", "type",
    "unpack", "xpcall", "string", "table", "math", "coroutine", "debug", "os",
    "utf8", "bit32", "buffer", "newproxy", "loadstring", "getfenv", "setfenv",
    // Roblox globals
    "game", "workspace", "script", "plugin", "shared", "wait", "spawn", "delay",
    "tick", "time", "typeof", "warn", "task", "Instance", "Vector3", "Vector2",
    "CFrame", "Color3", "BrickColor", "UDim", "UDim2", "Enum", "Ray", "Region3",
    "Rect", "TweenInfo", "NumberSequence", "ColorSequence", "NumberRange",
    // Executor globals
    "getgenv", "getrenv", "getsenv", "hookfunction", "syn", "identifyexecutor",
];

const NAME_ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Obfuscator instance with configuration
pub struct LocalObfuscator {
    config: ObfuscatorConfig,
}

impl LocalObfuscator {
    pub fn new(config: ObfuscatorConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ObfuscatorConfig::default())
    }

    pub fn config(&self) -> &ObfuscatorConfig {
        &self.config
    }

    /// Obfuscate a Lua source string. The result is not wrapped; see
    /// [`wrap_protected`].
    pub fn obfuscate(&self, source: &str, options: &TransformOptions) -> ObfuscationResult {
        let spans = lex(source);
        let view = code_view(source, &spans);

        let mut edits: Vec<Edit> = Vec::new();
        let mut comments_removed = 0;

        if self.config.strip_comments {
            for span in spans.iter().filter(|s| s.kind == SpanKind::Comment) {
                comments_removed += 1;
                edits.push(Edit {
                    start: span.start,
                    end: span.end,
                    replacement: " ".to_string(),
                });
            }
        }

        let mut identifiers_renamed = 0;
        if self.config.rename_locals {
            let mapping = build_mapping(&view);
            identifiers_renamed = mapping.len();
            edits.extend(rename_edits(&view, &mapping));
        }

        let string_edits = string_literal_edits(source, &spans, &self.config.encode_strings);
        let strings_encoded = string_edits.len();
        edits.extend(string_edits);

        let mut result = apply_edits(source, edits);

        let mut prologues = Vec::new();
        if options.anti_tamper {
            prologues.push(integrity_prologue());
        }
        if options.anti_dump {
            prologues.push(dump_prologue());
        }
        // anti_hook has no local prologue
        let prologues_added = prologues.len();
        if !prologues.is_empty() {
            prologues.push(result);
            result = prologues.join("\n");
        }

        ObfuscationResult {
            source: result,
            identifiers_renamed,
            comments_removed,
            strings_encoded,
            prologues_added,
        }
    }
}

/// Wrap code in a protected call that reports runtime errors instead of
/// propagating them.
pub fn wrap_protected(code: &str, brand: &str) -> String {
    let mut used = HashSet::new();
    let ok_var = generate_var_name(&mut used);
    let err_var = generate_var_name(&mut used);
    format!(
        "-- {brand} Protected\n\
         local {ok_var}, {err_var} = pcall(function()\n\
         {code}\n\
         end)\n\
         if not {ok_var} then\n  \
         warn(\"[{brand}] Error: \" .. tostring({err_var}))\n\
         end"
    )
}

fn integrity_prologue() -> String {
    let mut used = HashSet::new();
    let check = generate_var_name(&mut used);
    format!(
        "local {check} = function()\n  \
         local sum = 0\n  \
         for i = 1, 100 do sum = sum + i end\n  \
         return sum == 5050\n\
         end\n\
         if not {check}() then\n  \
         warn(\"Integrity check failed\")\n  \
         return\n\
         end"
    )
}

fn dump_prologue() -> String {
    let mut used = HashSet::new();
    let probe = generate_var_name(&mut used);
    format!(
        "local {probe} = function()\n  \
         local ok, present = pcall(function()\n    \
         return script ~= nil and script:IsA(\"LuaSourceContainer\") and #script.Source > 0\n  \
         end)\n  \
         return ok and present\n\
         end\n\
         if {probe}() then\n  \
         warn(\"Protected script\")\n\
         end"
    )
}

/// Generate `_` + letter + 6 letters, unique within `used`
fn generate_var_name(used: &mut HashSet<String>) -> String {
    let mut rng = rand::thread_rng();
    loop {
        let mut name = String::with_capacity(8);
        name.push('_');
        for _ in 0..7 {
            name.push(NAME_ALPHABET[rng.gen_range(0..NAME_ALPHABET.len())] as char);
        }
        if used.insert(name.clone()) {
            return name;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SpanKind {
    Code,
    Str,
    Comment,
}

#[derive(Debug, Clone, Copy)]
struct Span {
    kind: SpanKind,
    start: usize,
    end: usize,
}

/// Split source into code, string and comment spans.
///
/// Delimiters are all ASCII, so span boundaries never split a UTF-8 sequence.
fn lex(source: &str) -> Vec<Span> {
    let bytes = source.as_bytes();
    let mut spans = Vec::new();
    let mut code_start = 0;
    let mut i = 0;

    while i < bytes.len() {
        let opaque = match bytes[i] {
            b'-' if bytes.get(i + 1) == Some(&b'-') => {
                let end = match long_bracket_level(bytes, i + 2) {
                    Some(level) => find_long_close(bytes, i + 2 + level + 2, level),
                    None => find_line_end(bytes, i),
                };
                Some((SpanKind::Comment, end))
            }
            b'"' | b'\'' => Some((SpanKind::Str, find_quote_end(bytes, i))),
            b'[' => long_bracket_level(bytes, i)
                .map(|level| (SpanKind::Str, find_long_close(bytes, i + level + 2, level))),
            b'`' => {
                push_span(&mut spans, SpanKind::Code, code_start, i);
                i = lex_interpolated(bytes, i, &mut spans);
                code_start = i;
                continue;
            }
            _ => None,
        };

        match opaque {
            Some((kind, end)) => {
                push_span(&mut spans, SpanKind::Code, code_start, i);
                push_span(&mut spans, kind, i, end);
                i = end;
                code_start = end;
            }
            None => i += 1,
        }
    }
    push_span(&mut spans, SpanKind::Code, code_start, bytes.len());
    spans
}

fn push_span(spans: &mut Vec<Span>, kind: SpanKind, start: usize, end: usize) {
    if end > start {
        spans.push(Span { kind, start, end });
    }
}

/// Luau interpolated string: literal parts are opaque, `{expr}` parts are code
fn lex_interpolated(bytes: &[u8], start: usize, spans: &mut Vec<Span>) -> usize {
    let mut seg_start = start;
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'`' => {
                spans.push(Span { kind: SpanKind::Str, start: seg_start, end: j + 1 });
                return j + 1;
            }
            b'{' => {
                spans.push(Span { kind: SpanKind::Str, start: seg_start, end: j + 1 });
                let expr_start = j + 1;
                let mut depth = 1;
                j += 1;
                while j < bytes.len() && depth > 0 {
                    match bytes[j] {
                        b'{' => depth += 1,
                        b'}' => depth -= 1,
                        _ => {}
                    }
                    if depth > 0 {
                        j += 1;
                    }
                }
                let expr_end = j.min(bytes.len());
                if expr_end > expr_start {
                    spans.push(Span { kind: SpanKind::Code, start: expr_start, end: expr_end });
                }
                seg_start = expr_end;
                j = expr_end + 1;
            }
            _ => j += 1,
        }
    }
    let end = bytes.len();
    if end > seg_start {
        spans.push(Span { kind: SpanKind::Str, start: seg_start, end });
    }
    end
}

/// `[==[` at `pos` returns the number of `=` signs
fn long_bracket_level(bytes: &[u8], pos: usize) -> Option<usize> {
    if bytes.get(pos) != Some(&b'[') {
        return None;
    }
    let mut level = 0;
    while bytes.get(pos + 1 + level) == Some(&b'=') {
        level += 1;
    }
    (bytes.get(pos + 1 + level) == Some(&b'[')).then_some(level)
}

fn find_long_close(bytes: &[u8], from: usize, level: usize) -> usize {
    let mut j = from;
    while j < bytes.len() {
        if bytes[j] == b']'
            && bytes[j + 1..].iter().take(level).all(|&b| b == b'=')
            && bytes.len() > j + 1 + level
            && bytes[j + 1 + level] == b']'
        {
            return j + level + 2;
        }
        j += 1;
    }
    bytes.len()
}

fn find_line_end(bytes: &[u8], from: usize) -> usize {
    bytes[from..]
        .iter()
        .position(|&b| b == b'\n')
        .map(|p| from + p)
        .unwrap_or(bytes.len())
}

fn find_quote_end(bytes: &[u8], start: usize) -> usize {
    let quote = bytes[start];
    let mut j = start + 1;
    while j < bytes.len() {
        match bytes[j] {
            b'\\' => j += 2,
            b'\n' => return j,
            b if b == quote => return j + 1,
            _ => j += 1,
        }
    }
    bytes.len()
}

/// Source with every non-code character blanked to spaces, byte offsets kept
fn code_view(source: &str, spans: &[Span]) -> String {
    let mut view = String::with_capacity(source.len());
    for span in spans {
        let text = &source[span.start..span.end];
        if span.kind == SpanKind::Code {
            view.push_str(text);
        } else {
            for c in text.chars() {
                if c == '\n' {
                    view.push('\n');
                } else {
                    view.extend(std::iter::repeat(' ').take(c.len_utf8()));
                }
            }
        }
    }
    view
}

fn ident_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b[A-Za-z_][A-Za-z0-9_]*").expect("valid regex"))
}

fn local_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\blocal\s+([A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)").expect("valid regex")
    })
}

fn local_function_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\blocal\s+function\s+([A-Za-z_]\w*)").expect("valid regex"))
}

fn params_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\bfunction\b[^(\n]*\(([^)]*)\)").expect("valid regex"))
}

fn for_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\bfor\s+([A-Za-z_]\w*(?:\s*,\s*[A-Za-z_]\w*)*)\s*(?:=|\bin\b)")
            .expect("valid regex")
    })
}

/// Leading identifier of a declaration fragment such as `x: number`
fn leading_ident(fragment: &str) -> Option<&str> {
    let fragment = fragment.trim_start();
    let end = fragment
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(fragment.len());
    let ident = &fragment[..end];
    let first = ident.chars().next()?;
    (first.is_ascii_alphabetic() || first == '_').then_some(ident)
}

/// Declared names, in order of first appearance
fn collect_declarations(view: &str) -> Vec<String> {
    let mut found: Vec<(usize, String)> = Vec::new();

    for cap in local_re().captures_iter(view) {
        let Some(list) = cap.get(1) else { continue };
        if list.as_str().split(',').next().map(str::trim) == Some("function") {
            continue;
        }
        for name in list.as_str().split(',') {
            found.push((list.start(), name.trim().to_string()));
        }
    }
    for cap in local_function_re().captures_iter(view) {
        if let Some(name) = cap.get(1) {
            found.push((name.start(), name.as_str().to_string()));
        }
    }
    for cap in params_re().captures_iter(view) {
        let Some(params) = cap.get(1) else { continue };
        for param in params.as_str().split(',') {
            if let Some(name) = leading_ident(param) {
                found.push((params.start(), name.to_string()));
            }
        }
    }
    for cap in for_re().captures_iter(view) {
        let Some(list) = cap.get(1) else { continue };
        for name in list.as_str().split(',') {
            found.push((list.start(), name.trim().to_string()));
        }
    }

    found.sort_by_key(|(pos, _)| *pos);
    let mut seen = HashSet::new();
    found
        .into_iter()
        .map(|(_, name)| name)
        .filter(|name| !name.is_empty() && !RESERVED.contains(&name.as_str()))
        .filter(|name| seen.insert(name.clone()))
        .collect()
}

/// Map every declared name to a fresh token that collides with nothing in
/// the source
fn build_mapping(view: &str) -> HashMap<String, String> {
    let mut used: HashSet<String> = ident_re()
        .find_iter(view)
        .map(|m| m.as_str().to_string())
        .collect();
    collect_declarations(view)
        .into_iter()
        .map(|name| {
            let token = generate_var_name(&mut used);
            (name, token)
        })
        .collect()
}

struct Edit {
    start: usize,
    end: usize,
    replacement: String,
}

/// Rename every code occurrence of a mapped identifier, except member
/// accesses (`a.b`, `a:b`) and table constructor keys (`{ b = 1 }`)
fn rename_edits(view: &str, mapping: &HashMap<String, String>) -> Vec<Edit> {
    let bytes = view.as_bytes();
    let mut edits = Vec::new();
    let mut brackets: Vec<u8> = Vec::new();
    let mut cursor = 0;
    let mut last: Option<u8> = None;
    let mut before_last: Option<u8> = None;
    let mut in_local_decl = false;

    for m in ident_re().find_iter(view) {
        for &b in &bytes[cursor..m.start()] {
            match b {
                b'{' | b'(' | b'[' => brackets.push(b),
                b'}' | b')' | b']' => {
                    brackets.pop();
                }
                b'=' | b'\n' | b';' | b'(' | b'{' | b'[' => in_local_decl = false,
                _ => {}
            }
            if !b.is_ascii_whitespace() {
                before_last = last;
                last = Some(b);
            }
        }
        cursor = m.end();

        let word = m.as_str();
        let member = (last == Some(b'.') && before_last != Some(b'.')) || last == Some(b':');
        let table_key = !in_local_decl
            && brackets.last() == Some(&b'{')
            && matches!(last, Some(b'{') | Some(b',') | Some(b';'))
            && followed_by_single_equals(bytes, m.end());

        match word {
            "local" => in_local_decl = true,
            "function" => in_local_decl = false,
            _ => {}
        }
        before_last = last;
        last = Some(b'w');

        if member || table_key {
            continue;
        }
        if let Some(token) = mapping.get(word) {
            edits.push(Edit {
                start: m.start(),
                end: m.end(),
                replacement: token.clone(),
            });
        }
    }
    edits
}

fn followed_by_single_equals(bytes: &[u8], from: usize) -> bool {
    let mut j = from;
    while j < bytes.len() && bytes[j].is_ascii_whitespace() {
        j += 1;
    }
    bytes.get(j) == Some(&b'=') && bytes.get(j + 1) != Some(&b'=')
}

/// Apply non-overlapping edits to the original source
fn apply_edits(source: &str, mut edits: Vec<Edit>) -> String {
    edits.sort_by_key(|e| e.start);
    let mut out = String::with_capacity(source.len());
    let mut cursor = 0;
    for edit in edits {
        if edit.start < cursor {
            continue;
        }
        out.push_str(&source[cursor..edit.start]);
        out.push_str(&edit.replacement);
        cursor = edit.end;
    }
    out.push_str(&source[cursor..]);
    out
}

/// Convert a string to hex-escaped format
/// "get" -> "\x67\x65\x74"
fn to_hex_escaped(s: &str) -> String {
    s.bytes().map(|b| format!("\\x{:02x}", b)).collect()
}

/// Hex-encode quoted string literals whose contents equal one of `targets`.
/// Lua decodes the escapes at parse time, so behavior is unchanged. Long
/// strings (`[[...]]`) do not process escapes and are left alone.
fn string_literal_edits(source: &str, spans: &[Span], targets: &[String]) -> Vec<Edit> {
    spans
        .iter()
        .filter(|span| span.kind == SpanKind::Str)
        .filter_map(|span| {
            let text = &source[span.start..span.end];
            let quote = text.chars().next().filter(|&c| c == '"' || c == '\'')?;
            if text.len() < 2 || !text.ends_with(quote) {
                return None;
            }
            let inner = &text[1..text.len() - 1];
            targets.iter().any(|t| t == inner).then(|| Edit {
                start: span.start,
                end: span.end,
                replacement: format!("{quote}{}{quote}", to_hex_escaped(inner)),
            })
        })
        .collect()
}
