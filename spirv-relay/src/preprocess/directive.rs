//! Directive processing: conditional compilation, macro expansion and
//! `#include`.
//!
//! Shader compilers disagree on how much of the C preprocessor they
//! implement, so sources are expanded here before any front end sees them.
//! Directives the relay doesn't own (`#version`, `#extension`, `#pragma`,
//! `#line`, ...) are copied through untouched for the front end to handle.
//!
//! Macro invocations are expanded one logical line at a time; a
//! function-like invocation can't span multiple lines.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

const MAX_INCLUDE_DEPTH: usize = 64;

/// Text backing a resolved `#include`.
#[derive(Debug, Clone)]
pub struct Included {
    pub path: PathBuf,
    pub text: String,
}

/// Locates include files on behalf of the engine.
pub trait IncludeHandler {
    fn include(
        &mut self,
        token: &str,
        is_system: bool,
        includer: Option<&Path>,
    ) -> Result<Included>;
}

#[derive(Debug, Clone)]
struct Macro {
    /// `None` for object-like macros.
    params: Option<Vec<String>>,
    variadic: bool,
    body: String,
}

pub struct DirectiveEngine<'a> {
    includes: &'a mut dyn IncludeHandler,
    strip_comments: bool,
    line_offset: usize,
    macros: HashMap<String, Macro>,
}
impl<'a> DirectiveEngine<'a> {
    pub fn new(includes: &'a mut dyn IncludeHandler, strip_comments: bool) -> Self {
        DirectiveEngine {
            includes,
            strip_comments,
            line_offset: 0,
            macros: HashMap::new(),
        }
    }
    /// Lines reported for the top-level text are shifted back by `n`, so a
    /// prologue prepended by the caller doesn't skew error positions.
    pub fn with_line_offset(mut self, n: usize) -> Self {
        self.line_offset = n;
        self
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.macros.contains_key(name)
    }

    pub fn process(&mut self, text: &str, origin: Option<&Path>) -> Result<String> {
        let mut out = String::new();
        self.process_file(text, origin, 0, &mut out)?;
        Ok(out)
    }

    fn process_file(
        &mut self,
        text: &str,
        origin: Option<&Path>,
        depth: usize,
        out: &mut String,
    ) -> Result<()> {
        let file = origin
            .map(|x| x.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<memory>".to_owned());
        let line_offset = if depth == 0 { self.line_offset } else { 0 };
        let fail = |message: String, line: usize| {
            let message = if origin.is_some() {
                format!("{} (in {})", message, file)
            } else {
                message
            };
            Error::Preprocess { message, line: line.saturating_sub(line_offset) }
        };

        let mut conds: Vec<Cond> = Vec::new();
        for line in split_lines(text) {
            let at = Location { line: line.number, file: &file };
            let code = line.code();
            let directive = code.trim_start().strip_prefix('#').map(split_directive);
            let active = conds.last().map_or(true, |x| x.active);

            let (name, args) = match directive {
                Some(x) => x,
                None => {
                    if active {
                        let rendered = self.render(&line, &at, true)
                            .map_err(|e| fail(e, line.number))?;
                        out.push_str(&rendered);
                        out.push('\n');
                    }
                    continue;
                },
            };

            match name {
                "if" | "ifdef" | "ifndef" => {
                    let cond = if active {
                        match name {
                            "ifdef" => self.is_defined(macro_name(args).map_err(|e| fail(e, line.number))?),
                            "ifndef" => !self.is_defined(macro_name(args).map_err(|e| fail(e, line.number))?),
                            _ => self.eval_condition(args, &at).map_err(|e| fail(e, line.number))?,
                        }
                    } else {
                        false
                    };
                    conds.push(Cond {
                        active: active && cond,
                        taken: !active || cond,
                        seen_else: false,
                        parent: active,
                        line: line.number,
                    });
                },
                "elif" => {
                    let cond = conds.last()
                        .ok_or_else(|| fail("#elif without #if".to_owned(), line.number))?;
                    if cond.seen_else {
                        return Err(fail("#elif after #else".to_owned(), line.number));
                    }
                    let enter = if cond.parent && !cond.taken {
                        self.eval_condition(args, &at).map_err(|e| fail(e, line.number))?
                    } else {
                        false
                    };
                    if let Some(cond) = conds.last_mut() {
                        cond.active = enter;
                        cond.taken |= enter;
                    }
                },
                "else" => {
                    let cond = conds.last_mut()
                        .ok_or_else(|| fail("#else without #if".to_owned(), line.number))?;
                    if cond.seen_else {
                        return Err(fail("#else after #else".to_owned(), line.number));
                    }
                    cond.seen_else = true;
                    cond.active = cond.parent && !cond.taken;
                    cond.taken = true;
                },
                "endif" => {
                    if conds.pop().is_none() {
                        return Err(fail("#endif without #if".to_owned(), line.number));
                    }
                },
                _ if !active => {},
                "define" => {
                    let (name, m) = parse_define(args).map_err(|e| fail(e, line.number))?;
                    self.macros.insert(name, m);
                },
                "undef" => {
                    let name = macro_name(args).map_err(|e| fail(e, line.number))?;
                    self.macros.remove(name);
                },
                "include" => {
                    let (token, is_system) = match parse_include_token(args) {
                        Some(x) => x,
                        None => {
                            let expanded = self.expand(args, &at, &mut Vec::new())
                                .map_err(|e| fail(e, line.number))?;
                            parse_include_token(&expanded).ok_or_else(|| {
                                fail("#include expects \"FILENAME\" or <FILENAME>".to_owned(), line.number)
                            })?
                        },
                    };
                    if depth + 1 > MAX_INCLUDE_DEPTH {
                        return Err(fail(format!(
                            "#include nested too deeply while including `{}`", token), line.number));
                    }
                    let included = self.includes.include(&token, is_system, origin)?;
                    tracing::trace!(token = %token, path = %included.path.display(), "include resolved");
                    self.process_file(&included.text, Some(&included.path), depth + 1, out)?;
                },
                "error" => {
                    return Err(fail(format!("#error {}", args), line.number));
                },
                // Null directive.
                "" => {},
                // `#version`, `#extension`, `#pragma`, `#line` and anything
                // else belongs to the shader compiler.
                _ => {
                    let rendered = self.render(&line, &at, false)
                        .map_err(|e| fail(e, line.number))?;
                    out.push_str(&rendered);
                    out.push('\n');
                },
            }
        }
        if let Some(cond) = conds.last() {
            return Err(fail("unterminated conditional directive".to_owned(), cond.line));
        }
        Ok(())
    }

    fn render(&self, line: &Line, at: &Location, expand: bool) -> Result<String, String> {
        let mut rendered = String::new();
        let mut has_comment = false;
        if self.strip_comments && expand {
            // Comments are gone, so an invocation may run across them.
            let code = line.code();
            rendered.push_str(&self.expand(&code, at, &mut Vec::new())?);
            has_comment = line.pieces.iter().any(|x| matches!(x, Piece::Comment(_)));
        } else {
            for piece in line.pieces.iter() {
                match piece {
                    Piece::Code(code) if expand => {
                        rendered.push_str(&self.expand(code, at, &mut Vec::new())?);
                    },
                    Piece::Code(code) => rendered.push_str(code),
                    Piece::Comment(comment) => {
                        has_comment = true;
                        if self.strip_comments {
                            rendered.push(' ');
                        } else {
                            rendered.push_str(comment);
                        }
                    },
                }
            }
        }
        if self.strip_comments && has_comment {
            rendered.truncate(rendered.trim_end().len());
        }
        Ok(rendered)
    }

    fn expand(&self, text: &str, at: &Location, hidden: &mut Vec<String>) -> Result<String, String> {
        let toks = tokenize(text);
        let mut out = String::new();
        let mut i = 0;
        while i < toks.len() {
            let (kind, s) = toks[i];
            if kind == TokKind::Ident && !hidden.iter().any(|x| x == s) {
                if s == "__LINE__" {
                    out.push_str(&at.line.to_string());
                    i += 1;
                    continue;
                }
                if s == "__FILE__" {
                    out.push_str(&stringify(at.file));
                    i += 1;
                    continue;
                }
                if let Some(m) = self.macros.get(s) {
                    match &m.params {
                        None => {
                            hidden.push(s.to_owned());
                            let expanded = self.expand(&m.body, at, hidden);
                            hidden.pop();
                            let expanded = expanded?;
                            i += 1;
                            // A function-like macro name left at the end of the
                            // replacement takes its arguments from what follows.
                            if let Some((head, callee)) = self.trailing_callee(&expanded, s, hidden) {
                                let j = skip_space(&toks, i);
                                if j < toks.len() && toks[j].1 == "(" {
                                    out.push_str(head);
                                    i = self.invoke(callee, &toks, j, at, hidden, &mut out)?;
                                    continue;
                                }
                            }
                            out.push_str(&expanded);
                            continue;
                        },
                        Some(_) => {
                            let j = skip_space(&toks, i + 1);
                            if j < toks.len() && toks[j].1 == "(" {
                                i = self.invoke(s, &toks, j, at, hidden, &mut out)?;
                                continue;
                            }
                        },
                    }
                }
            }
            out.push_str(s);
            i += 1;
        }
        Ok(out)
    }

    /// Expands the invocation of function-like macro `name` whose argument
    /// list opens at `toks[open]`, returning the index past its `)`.
    fn invoke(
        &self,
        name: &str,
        toks: &[(TokKind, &str)],
        open: usize,
        at: &Location,
        hidden: &mut Vec<String>,
        out: &mut String,
    ) -> Result<usize, String> {
        let m = self.macros.get(name)
            .ok_or_else(|| format!("macro `{}` is not defined", name))?;
        let params = m.params.as_deref().unwrap_or_default();
        let (args, end) = collect_args(toks, open)
            .ok_or_else(|| format!("unterminated invocation of macro `{}`", name))?;
        let body = self.substitute(name, m, params, &args, at, hidden)?;
        hidden.push(name.to_owned());
        let expanded = self.expand(&body, at, hidden);
        hidden.pop();
        out.push_str(&expanded?);
        Ok(end)
    }

    /// Splits off a trailing function-like macro name that is still eligible
    /// for expansion.
    fn trailing_callee<'s>(&self, expanded: &'s str, outer: &str, hidden: &[String])
        -> Option<(&'s str, &'s str)>
    {
        let trimmed = expanded.trim_end();
        let (kind, last) = *tokenize(trimmed).last()?;
        if kind != TokKind::Ident || last == outer || hidden.iter().any(|x| x == last) {
            return None;
        }
        self.macros.get(last)?.params.as_ref()?;
        Some((&trimmed[..trimmed.len() - last.len()], last))
    }

    fn substitute(
        &self,
        name: &str,
        m: &Macro,
        params: &[String],
        args: &[String],
        at: &Location,
        hidden: &mut Vec<String>,
    ) -> Result<String, String> {
        let args: &[String] = if params.is_empty() && args.len() == 1 && args[0].is_empty() {
            &[]
        } else {
            args
        };
        let arity_ok = if m.variadic {
            args.len() >= params.len()
        } else {
            args.len() == params.len()
        };
        if !arity_ok {
            return Err(format!("macro `{}` expects {} argument(s), got {}",
                name, params.len(), args.len()));
        }
        let va_args = if m.variadic {
            args[params.len()..].join(", ")
        } else {
            String::new()
        };
        let mut bindings = params.iter()
            .map(String::as_str)
            .zip(args.iter().map(String::as_str))
            .collect::<HashMap<&str, &str>>();
        if m.variadic {
            bindings.insert("__VA_ARGS__", &va_args);
        }
        let lookup = |ident: &str| bindings.get(ident).copied();

        let toks = tokenize(&m.body);

        let mut out = String::new();
        let mut k = 0;
        while k < toks.len() {
            let (kind, s) = toks[k];
            if kind == TokKind::Punct && s == "#" {
                let mut n = k + 1;
                while n < toks.len() && toks[n].0 == TokKind::Space {
                    n += 1;
                }
                if let Some(raw) = toks.get(n).and_then(|x| lookup(x.1)) {
                    out.push_str(&stringify(raw));
                    k = n + 1;
                    continue;
                }
            }
            if kind == TokKind::Punct && s == "##" {
                out.truncate(out.trim_end().len());
                k += 1;
                while k < toks.len() && toks[k].0 == TokKind::Space {
                    k += 1;
                }
                continue;
            }
            if kind == TokKind::Ident {
                if let Some(raw) = lookup(s) {
                    let pasted = neighbour(&toks, k, false) == Some("##")
                        || neighbour(&toks, k, true) == Some("##");
                    if pasted {
                        out.push_str(raw);
                    } else {
                        out.push_str(&self.expand(raw, at, hidden)?);
                    }
                    k += 1;
                    continue;
                }
            }
            out.push_str(s);
            k += 1;
        }
        Ok(out)
    }

    fn eval_condition(&self, expr: &str, at: &Location) -> Result<bool, String> {
        // `defined` must be resolved before expansion so its operand is not
        // replaced.
        let toks = tokenize(expr);
        let mut resolved = String::new();
        let mut i = 0;
        let next_solid = |mut i: usize| {
            while i < toks.len() && toks[i].0 == TokKind::Space {
                i += 1;
            }
            i
        };
        while i < toks.len() {
            let (kind, s) = toks[i];
            if kind == TokKind::Ident && s == "defined" {
                let mut j = next_solid(i + 1);
                let paren = toks.get(j).map_or(false, |x| x.1 == "(");
                if paren {
                    j = next_solid(j + 1);
                }
                let name = match toks.get(j) {
                    Some((TokKind::Ident, name)) => *name,
                    _ => return Err("`defined` expects a macro name".to_owned()),
                };
                j += 1;
                if paren {
                    j = next_solid(j);
                    if toks.get(j).map_or(true, |x| x.1 != ")") {
                        return Err("missing `)` after `defined`".to_owned());
                    }
                    j += 1;
                }
                resolved.push_str(if self.is_defined(name) { " 1 " } else { " 0 " });
                i = j;
                continue;
            }
            resolved.push_str(s);
            i += 1;
        }

        let expanded = self.expand(&resolved, at, &mut Vec::new())?;
        let toks = tokenize(&expanded)
            .into_iter()
            .filter(|x| x.0 != TokKind::Space)
            .map(|x| x.1)
            .collect::<Vec<_>>();
        if toks.is_empty() {
            return Err("#if with no expression".to_owned());
        }
        let mut parser = ExprParser { toks: &toks, pos: 0 };
        let value = parser.ternary()?;
        if let Some(tok) = toks.get(parser.pos) {
            return Err(format!("unexpected token `{}` in #if expression", tok));
        }
        Ok(value != 0)
    }
}

struct Location<'a> {
    line: usize,
    file: &'a str,
}

struct Cond {
    /// Lines in the current branch are emitted.
    active: bool,
    /// Some branch of this conditional has already been entered.
    taken: bool,
    seen_else: bool,
    parent: bool,
    line: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Piece {
    Code(String),
    Comment(String),
}

#[derive(Debug)]
struct Line {
    number: usize,
    pieces: Vec<Piece>,
}
impl Line {
    /// The line with comments replaced by a space.
    fn code(&self) -> String {
        let mut out = String::new();
        for piece in self.pieces.iter() {
            match piece {
                Piece::Code(x) => out.push_str(x),
                Piece::Comment(_) => out.push(' '),
            }
        }
        out
    }
}

/// Split text into logical lines, joining backslash continuations and
/// separating comments from code. Comments inside string literals are not
/// recognised.
fn split_lines(text: &str) -> Vec<Line> {
    fn flush(code: &mut String, pieces: &mut Vec<Piece>) {
        if !code.is_empty() {
            pieces.push(Piece::Code(std::mem::take(code)));
        }
    }

    let mut lines = Vec::new();
    let mut pieces = Vec::new();
    let mut code = String::new();
    let mut comment: Option<String> = None;
    let mut physical = 1;
    let mut start = 1;
    let mut chars = text.chars().peekable();
    while let Some(c) = chars.next() {
        if let Some(block) = comment.as_mut() {
            if c == '*' && chars.peek() == Some(&'/') {
                chars.next();
                block.push_str("*/");
                pieces.push(Piece::Comment(std::mem::take(block)));
                comment = None;
            } else if c == '\n' {
                pieces.push(Piece::Comment(std::mem::take(block)));
                lines.push(Line { number: start, pieces: std::mem::take(&mut pieces) });
                physical += 1;
                start = physical;
            } else {
                block.push(c);
            }
            continue;
        }
        match c {
            '\\' if chars.peek() == Some(&'\n') => {
                chars.next();
                physical += 1;
            },
            '\n' => {
                flush(&mut code, &mut pieces);
                lines.push(Line { number: start, pieces: std::mem::take(&mut pieces) });
                physical += 1;
                start = physical;
            },
            '/' if chars.peek() == Some(&'/') => {
                flush(&mut code, &mut pieces);
                let mut line_comment = String::from("/");
                while let Some(&c) = chars.peek() {
                    if c == '\n' { break; }
                    line_comment.push(c);
                    chars.next();
                }
                pieces.push(Piece::Comment(line_comment));
            },
            '/' if chars.peek() == Some(&'*') => {
                flush(&mut code, &mut pieces);
                chars.next();
                comment = Some("/*".to_owned());
            },
            '"' => {
                code.push(c);
                while let Some(c) = chars.next() {
                    code.push(c);
                    if c == '\\' {
                        if let Some(&escaped) = chars.peek() {
                            if escaped != '\n' {
                                code.push(escaped);
                                chars.next();
                            }
                        }
                    } else if c == '"' {
                        break;
                    }
                    if chars.peek() == Some(&'\n') { break; }
                }
            },
            _ => code.push(c),
        }
    }
    if let Some(block) = comment {
        pieces.push(Piece::Comment(block));
    }
    flush(&mut code, &mut pieces);
    if !pieces.is_empty() {
        lines.push(Line { number: start, pieces });
    }
    lines
}

fn split_directive(rest: &str) -> (&str, &str) {
    let rest = rest.trim_start();
    let end = rest.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    (&rest[..end], rest[end..].trim())
}

fn is_ident(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {},
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn macro_name(args: &str) -> Result<&str, String> {
    let name = args.split_whitespace().next().unwrap_or("");
    if is_ident(name) {
        Ok(name)
    } else {
        Err(format!("macro name must be an identifier, found `{}`", name))
    }
}

fn parse_define(args: &str) -> Result<(String, Macro), String> {
    let end = args.find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(args.len());
    let name = &args[..end];
    if !is_ident(name) {
        return Err(format!("macro name must be an identifier, found `{}`", args));
    }
    let rest = &args[end..];
    if let Some(rest) = rest.strip_prefix('(') {
        let close = rest.find(')')
            .ok_or_else(|| format!("missing `)` in parameter list of macro `{}`", name))?;
        let mut params = Vec::new();
        let mut variadic = false;
        let list = rest[..close].trim();
        if !list.is_empty() {
            for param in list.split(',').map(str::trim) {
                if variadic {
                    return Err(format!("`...` must be the last parameter of macro `{}`", name));
                }
                if param == "..." {
                    variadic = true;
                } else if is_ident(param) {
                    params.push(param.to_owned());
                } else {
                    return Err(format!("invalid parameter `{}` of macro `{}`", param, name));
                }
            }
        }
        let m = Macro {
            params: Some(params),
            variadic,
            body: rest[close + 1..].trim().to_owned(),
        };
        Ok((name.to_owned(), m))
    } else {
        let m = Macro { params: None, variadic: false, body: rest.trim().to_owned() };
        Ok((name.to_owned(), m))
    }
}

/// The closest non-space token before or after `k`.
fn neighbour<'s>(toks: &[(TokKind, &'s str)], k: usize, forward: bool) -> Option<&'s str> {
    let mut k = k;
    loop {
        k = if forward { k.checked_add(1)? } else { k.checked_sub(1)? };
        match toks.get(k)? {
            (TokKind::Space, _) => continue,
            (_, s) => return Some(*s),
        }
    }
}

fn parse_include_token(args: &str) -> Option<(String, bool)> {
    let args = args.trim();
    if let Some(rest) = args.strip_prefix('"') {
        let end = rest.find('"')?;
        Some((rest[..end].to_owned(), false))
    } else if let Some(rest) = args.strip_prefix('<') {
        let end = rest.find('>')?;
        Some((rest[..end].to_owned(), true))
    } else {
        None
    }
}

fn skip_space(toks: &[(TokKind, &str)], mut i: usize) -> usize {
    while i < toks.len() && toks[i].0 == TokKind::Space {
        i += 1;
    }
    i
}

fn stringify(raw: &str) -> String {
    format!("\"{}\"", raw.trim().replace('\\', "\\\\").replace('"', "\\\""))
}

/// Split the arguments of an invocation whose `(` sits at `open`. Returns
/// the trimmed arguments and the index just past the closing `)`.
fn collect_args(toks: &[(TokKind, &str)], open: usize) -> Option<(Vec<String>, usize)> {
    let mut args = vec![String::new()];
    let mut depth = 0usize;
    for (i, (_, s)) in toks.iter().enumerate().skip(open) {
        match *s {
            "(" => {
                depth += 1;
                if depth == 1 { continue; }
            },
            ")" => {
                depth -= 1;
                if depth == 0 {
                    let args = args.into_iter().map(|x| x.trim().to_owned()).collect();
                    return Some((args, i + 1));
                }
            },
            "," if depth == 1 => {
                args.push(String::new());
                continue;
            },
            _ => {},
        }
        if let Some(last) = args.last_mut() {
            last.push_str(s);
        }
    }
    None
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokKind {
    Ident,
    Number,
    Str,
    Space,
    Punct,
}

const PUNCT2: [&str; 10] = ["##", "&&", "||", "==", "!=", "<=", ">=", "<<", ">>", "->"];

fn tokenize(s: &str) -> Vec<(TokKind, &str)> {
    let bytes = s.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        let kind = if c.is_ascii_alphabetic() || c == b'_' {
            while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                i += 1;
            }
            TokKind::Ident
        } else if c.is_ascii_digit()
            || (c == b'.' && bytes.get(i + 1).map_or(false, |x| x.is_ascii_digit()))
        {
            while i < bytes.len() {
                let b = bytes[i];
                if b.is_ascii_alphanumeric() || b == b'_' || b == b'.' {
                    i += 1;
                } else if (b == b'+' || b == b'-') && matches!(bytes[i - 1], b'e' | b'E') {
                    i += 1;
                } else {
                    break;
                }
            }
            TokKind::Number
        } else if c == b'"' || c == b'\'' {
            i += 1;
            while i < bytes.len() && bytes[i] != c {
                if bytes[i] == b'\\' { i += 1; }
                i += 1;
            }
            i = (i + 1).min(bytes.len());
            TokKind::Str
        } else if c.is_ascii_whitespace() {
            while i < bytes.len() && bytes[i].is_ascii_whitespace() {
                i += 1;
            }
            TokKind::Space
        } else if PUNCT2.iter().any(|x| s[i..].starts_with(x)) {
            i += 2;
            TokKind::Punct
        } else {
            // Advance a whole character so multi-byte text stays intact.
            i += s[i..].chars().next().map_or(1, char::len_utf8);
            TokKind::Punct
        };
        out.push((kind, &s[start..i]));
    }
    out
}

const BINARY_OPS: [&[&str]; 10] = [
    &["||"],
    &["&&"],
    &["|"],
    &["^"],
    &["&"],
    &["==", "!="],
    &["<", ">", "<=", ">="],
    &["<<", ">>"],
    &["+", "-"],
    &["*", "/", "%"],
];

struct ExprParser<'a, 's> {
    toks: &'a [&'s str],
    pos: usize,
}
impl<'a, 's> ExprParser<'a, 's> {
    fn peek(&self) -> Option<&'s str> {
        self.toks.get(self.pos).copied()
    }
    fn bump(&mut self) -> Option<&'s str> {
        let tok = self.peek();
        self.pos += 1;
        tok
    }
    fn expect(&mut self, tok: &str) -> Result<(), String> {
        match self.bump() {
            Some(x) if x == tok => Ok(()),
            Some(x) => Err(format!("expected `{}` in #if expression, found `{}`", tok, x)),
            None => Err(format!("expected `{}` at end of #if expression", tok)),
        }
    }

    fn ternary(&mut self) -> Result<i64, String> {
        let cond = self.binary(0)?;
        if self.peek() == Some("?") {
            self.bump();
            let a = self.ternary()?;
            self.expect(":")?;
            let b = self.ternary()?;
            return Ok(if cond != 0 { a } else { b });
        }
        Ok(cond)
    }

    fn binary(&mut self, level: usize) -> Result<i64, String> {
        if level == BINARY_OPS.len() {
            return self.unary();
        }
        let mut lhs = self.binary(level + 1)?;
        while let Some(op) = self.peek().filter(|x| BINARY_OPS[level].iter().any(|op| op == x)) {
            self.bump();
            let rhs = self.binary(level + 1)?;
            lhs = match op {
                "||" => ((lhs != 0) || (rhs != 0)) as i64,
                "&&" => ((lhs != 0) && (rhs != 0)) as i64,
                "|" => lhs | rhs,
                "^" => lhs ^ rhs,
                "&" => lhs & rhs,
                "==" => (lhs == rhs) as i64,
                "!=" => (lhs != rhs) as i64,
                "<" => (lhs < rhs) as i64,
                ">" => (lhs > rhs) as i64,
                "<=" => (lhs <= rhs) as i64,
                ">=" => (lhs >= rhs) as i64,
                "<<" => lhs.wrapping_shl(rhs as u32),
                ">>" => lhs.wrapping_shr(rhs as u32),
                "+" => lhs.wrapping_add(rhs),
                "-" => lhs.wrapping_sub(rhs),
                "*" => lhs.wrapping_mul(rhs),
                "/" | "%" if rhs == 0 => {
                    return Err("division by zero in #if expression".to_owned());
                },
                "/" => lhs.wrapping_div(rhs),
                _ => lhs.wrapping_rem(rhs),
            };
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<i64, String> {
        let tok = self.bump().ok_or("unexpected end of #if expression")?;
        match tok {
            "!" => Ok((self.unary()? == 0) as i64),
            "~" => Ok(!self.unary()?),
            "-" => Ok(self.unary()?.wrapping_neg()),
            "+" => self.unary(),
            "(" => {
                let value = self.ternary()?;
                self.expect(")")?;
                Ok(value)
            },
            x if x.starts_with(|c: char| c.is_ascii_digit()) => parse_int(x),
            // Identifiers left after expansion evaluate to zero.
            x if is_ident(x) => Ok(0),
            x => Err(format!("unexpected token `{}` in #if expression", x)),
        }
    }
}

fn parse_int(lit: &str) -> Result<i64, String> {
    let digits = lit.trim_end_matches(|c| matches!(c, 'u' | 'U' | 'l' | 'L'));
    let parsed = if let Some(hex) = digits.strip_prefix("0x").or_else(|| digits.strip_prefix("0X")) {
        i64::from_str_radix(hex, 16)
    } else if digits.len() > 1 && digits.starts_with('0') {
        i64::from_str_radix(&digits[1..], 8)
    } else {
        digits.parse::<i64>()
    };
    parsed.map_err(|_| format!("invalid integer `{}` in #if expression", lit))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct MapIncludes {
        files: HashMap<String, String>,
        requests: Vec<(String, bool)>,
    }
    impl IncludeHandler for MapIncludes {
        fn include(&mut self, token: &str, is_system: bool, _: Option<&Path>) -> Result<Included> {
            self.requests.push((token.to_owned(), is_system));
            let text = self.files.get(token)
                .cloned()
                .ok_or_else(|| Error::IncludeNotFound { token: token.to_owned() })?;
            Ok(Included { path: PathBuf::from(format!("/inc/{}", token)), text })
        }
    }

    fn run(text: &str) -> Result<String> {
        let mut includes = MapIncludes::default();
        DirectiveEngine::new(&mut includes, false).process(text, None)
    }
    fn lines(text: &str) -> Vec<String> {
        run(text).unwrap()
            .lines()
            .map(|x| x.trim().to_owned())
            .filter(|x| !x.is_empty())
            .collect()
    }

    #[test]
    fn object_macros_expand() {
        let out = lines("#define COUNT 4\n#define TWICE (COUNT * 2)\nint a[TWICE];\n");
        assert_eq!(out, vec!["int a[(4 * 2)];"]);
    }

    #[test]
    fn function_macros_expand() {
        let out = lines(concat!(
            "#define MUL(a, b) ((a) * (b))\n",
            "#define SQ(x) MUL(x, x)\n",
            "float y = SQ(MUL(2, 3));\n",
            "float z = MUL (1, 2);\n",
            "float MUL;\n",
        ));
        assert_eq!(out, vec![
            "float y = ((((2) * (3))) * (((2) * (3))));",
            "float z = ((1) * (2));",
            "float MUL;",
        ]);
    }

    #[test]
    fn stringify_paste_and_variadics() {
        let out = lines(concat!(
            "#define NAME(x) #x\n",
            "#define GLUE(a, b) a ## b\n",
            "#define CALL(f, ...) f(__VA_ARGS__)\n",
            "NAME(hello world)\n",
            "int GLUE(tex, 0);\n",
            "CALL(max, 1, 2);\n",
        ));
        assert_eq!(out, vec!["\"hello world\"", "int tex0;", "max(1, 2);"]);
    }

    #[test]
    fn object_macro_rescans_into_following_arguments() {
        let out = lines(concat!(
            "#define F G\n",
            "#define G(x) x\n",
            "#define H F\n",
            "int v = F(1);\n",
            "int w = H (2);\n",
            "int G;\n",
            "int u = F;\n",
        ));
        assert_eq!(out, vec!["int v = 1;", "int w = 2;", "int G;", "int u = G;"]);
    }

    #[test]
    fn self_reference_does_not_recurse() {
        let out = lines("#define x x + 1\nint y = x;\n");
        assert_eq!(out, vec!["int y = x + 1;"]);
    }

    #[test]
    fn wrong_arity_is_an_error() {
        let err = run("#define F(a, b) a\nF(1)\n").unwrap_err();
        match err {
            Error::Preprocess { line, message } => {
                assert_eq!(line, 2);
                assert!(message.contains("expects 2"));
            },
            e => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn conditionals_select_branches() {
        let out = lines(concat!(
            "#define LEVEL 2\n",
            "#if LEVEL > 3\n",
            "high\n",
            "#elif LEVEL == 2 && defined(LEVEL)\n",
            "two\n",
            "#else\n",
            "low\n",
            "#endif\n",
            "#ifdef MISSING\n",
            "  #if garbage (\n",
            "  #endif\n",
            "#else\n",
            "fallback\n",
            "#endif\n",
            "#ifndef MISSING\n",
            "absent\n",
            "#endif\n",
        ));
        assert_eq!(out, vec!["two", "fallback", "absent"]);
    }

    #[test]
    fn expressions_follow_c_precedence() {
        let out = lines(concat!(
            "#if 1 + 2 * 3 == 7 && (0x10 >> 2) == 4 && !0 && (1 ? 5 : 6) == 5 && -1 < 0\n",
            "ok\n",
            "#endif\n",
            "#if UNDEFINED_NAME || 010 != 8\n",
            "bad\n",
            "#endif\n",
        ));
        assert_eq!(out, vec!["ok"]);
    }

    #[test]
    fn malformed_conditionals_fail() {
        assert!(matches!(run("#endif\n"), Err(Error::Preprocess { line: 1, .. })));
        assert!(matches!(run("#if 1\nx\n"), Err(Error::Preprocess { line: 1, .. })));
        assert!(matches!(run("#if 1\n#else\n#else\n#endif\n"), Err(Error::Preprocess { line: 3, .. })));
        assert!(matches!(run("#if 1 / 0\n#endif\n"), Err(Error::Preprocess { .. })));
    }

    #[test]
    fn error_directive_reports_message() {
        let err = run("ok\n#error unsupported target\n").unwrap_err();
        match err {
            Error::Preprocess { message, line } => {
                assert_eq!(line, 2);
                assert_eq!(message, "#error unsupported target");
            },
            e => panic!("unexpected error: {}", e),
        }
        // Inactive branches don't trip it.
        assert!(run("#if 0\n#error nope\n#endif\n").is_ok());
    }

    #[test]
    fn compiler_directives_pass_through() {
        let out = lines("#version 450 core\n#extension GL_EXT_foo : enable\n#pragma optimize(on)\nvoid main() {}\n");
        assert_eq!(out, vec![
            "#version 450 core",
            "#extension GL_EXT_foo : enable",
            "#pragma optimize(on)",
            "void main() {}",
        ]);
    }

    #[test]
    fn includes_are_processed_recursively() {
        let mut includes = MapIncludes::default();
        includes.files.insert("common.h".to_owned(), "#include <math.h>\n#define SCALE 3\n".to_owned());
        includes.files.insert("math.h".to_owned(), "float pi = PI;\n".to_owned());
        let out = DirectiveEngine::new(&mut includes, false)
            .process("#define PI 3.14\n#include \"common.h\"\nfloat s = SCALE;\n", None)
            .unwrap();
        assert!(out.contains("float pi = 3.14;"));
        assert!(out.contains("float s = 3;"));
        assert_eq!(includes.requests, vec![
            ("common.h".to_owned(), false),
            ("math.h".to_owned(), true),
        ]);
    }

    #[test]
    fn macro_include_tokens_are_expanded() {
        let mut includes = MapIncludes::default();
        includes.files.insert("light.h".to_owned(), "lit\n".to_owned());
        let out = DirectiveEngine::new(&mut includes, false)
            .process("#define HEADER \"light.h\"\n#include HEADER\n", None)
            .unwrap();
        assert_eq!(out.trim(), "lit");
    }

    #[test]
    fn runaway_includes_are_cut_off() {
        let mut includes = MapIncludes::default();
        includes.files.insert("loop.h".to_owned(), "#include \"loop.h\"\n".to_owned());
        let err = DirectiveEngine::new(&mut includes, false)
            .process("#include \"loop.h\"\n", None)
            .unwrap_err();
        assert!(matches!(err, Error::Preprocess { .. }));
    }

    #[test]
    fn missing_include_propagates() {
        let err = run("#include \"nowhere.h\"\n").unwrap_err();
        assert!(matches!(err, Error::IncludeNotFound { token } if token == "nowhere.h"));
    }

    #[test]
    fn comments_are_kept_or_stripped() {
        let src = "int a; // trailing\n/* block\n#define HIDDEN 1\n*/ int b;\n#ifdef HIDDEN\nleak\n#endif\n";
        let kept = run(src).unwrap();
        assert!(kept.contains("// trailing"));
        assert!(kept.contains("#define HIDDEN 1"));
        assert!(!kept.contains("leak"));

        let mut includes = MapIncludes::default();
        let stripped = DirectiveEngine::new(&mut includes, true).process(src, None).unwrap();
        assert!(!stripped.contains("trailing"));
        assert!(!stripped.contains("HIDDEN"));
        assert!(stripped.contains("int a;\n"));
        assert!(stripped.contains("int b;"));
    }

    #[test]
    fn comment_markers_in_strings_are_code() {
        let out = lines("#include_path \"a//b.h\"\n");
        assert_eq!(out, vec!["#include_path \"a//b.h\""]);
    }

    #[test]
    fn continuations_join_lines() {
        let out = lines("#define LONG 1 + \\\n  2\nint x = LONG;\n");
        assert_eq!(out, vec!["int x = 1 +   2;"]);
    }

    #[test]
    fn builtins_expand() {
        let out = lines("\nint l = __LINE__;\n");
        assert_eq!(out, vec!["int l = 2;"]);
    }

    #[test]
    fn line_offset_hides_prologue() {
        let mut includes = MapIncludes::default();
        let err = DirectiveEngine::new(&mut includes, false)
            .with_line_offset(2)
            .process("#define A 1\n\n#error here\n", None)
            .unwrap_err();
        assert!(matches!(err, Error::Preprocess { line: 1, .. }));
    }
}
