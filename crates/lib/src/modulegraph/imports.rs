//! Static import discovery over module source text.
//!
//! The scanner tokenizes just enough of the language to find import
//! statements: strings and comments are skipped, bracketed and backslash
//! continuations are joined into logical lines, and indentation is tracked so
//! that imports nested inside `try`/`if`/`with`/function bodies are flagged as
//! conditional. Lines it cannot make sense of are skipped, never fatal.
//!
//! `__import__("m")` and `importlib.import_module("m")` calls with a literal
//! argument are reported as dynamic, conditional imports. Anything built at
//! run time is invisible here; hooks are the override for that.

use serde::Serialize;

/// One import found in a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportStatement {
  /// Dotted module after the leading dots; empty for `from . import x`.
  pub module: String,
  /// Names of a `from` import; empty for a plain `import`.
  pub names: Vec<String>,
  /// Number of leading dots of a relative import.
  pub level: u32,
  pub conditional: bool,
  /// Found through `__import__`/`import_module` rather than a statement.
  pub dynamic: bool,
  /// 1-based line the statement starts on.
  pub line: usize,
}

impl ImportStatement {
  pub fn absolute(module: impl Into<String>) -> Self {
    Self {
      module: module.into(),
      names: Vec::new(),
      level: 0,
      conditional: false,
      dynamic: false,
      line: 0,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
  Name(String),
  Str(String),
  Op(char),
  Other,
}

#[derive(Debug)]
struct LogicalLine {
  indent: usize,
  line: usize,
  tokens: Vec<Token>,
}

/// Compound statements that open a block whose body may not run at import.
const CONDITIONAL_BLOCKS: &[&str] = &[
  "if", "elif", "else", "try", "except", "finally", "with", "def", "for", "while", "match", "case", "async",
];

/// Scan `source` and return its imports in source order.
pub fn scan_imports(source: &str) -> Vec<ImportStatement> {
  let mut out = Vec::new();
  // (indent, conditional) of every open block
  let mut blocks: Vec<(usize, bool)> = Vec::new();

  for logical in tokenize(source) {
    while blocks.last().is_some_and(|(indent, _)| *indent >= logical.indent) {
      blocks.pop();
    }
    let enclosing = blocks.iter().any(|(_, conditional)| *conditional);

    for statement in logical.tokens.split(|t| *t == Token::Op(';')) {
      scan_statement(statement, logical.line, enclosing, &mut blocks, logical.indent, &mut out);
    }
  }
  out
}

fn scan_statement(
  tokens: &[Token],
  line: usize,
  enclosing: bool,
  blocks: &mut Vec<(usize, bool)>,
  indent: usize,
  out: &mut Vec<ImportStatement>,
) {
  let Some(Token::Name(first)) = tokens.first() else {
    find_dynamic(tokens, line, out);
    return;
  };

  let is_block = CONDITIONAL_BLOCKS.contains(&first.as_str()) || first == "class";
  if is_block && let Some(colon) = top_level_colon(tokens) {
    let conditional = first != "class";
    blocks.push((indent, conditional));
    find_dynamic(&tokens[..colon], line, out);
    // a one-line body such as `if x: import y`
    let body = &tokens[colon + 1..];
    if !body.is_empty() {
      scan_statement(body, line, enclosing || conditional, &mut Vec::new(), indent, out);
    }
    return;
  }

  match first.as_str() {
    "import" => parse_import(&tokens[1..], line, enclosing, out),
    "from" => parse_from(&tokens[1..], line, enclosing, out),
    _ => find_dynamic(tokens, line, out),
  }
}

fn top_level_colon(tokens: &[Token]) -> Option<usize> {
  let mut depth = 0i32;
  let mut lambdas = 0usize;
  for (i, token) in tokens.iter().enumerate() {
    match token {
      Token::Op('(' | '[' | '{') => depth += 1,
      Token::Op(')' | ']' | '}') => depth -= 1,
      Token::Name(n) if n == "lambda" && depth == 0 => lambdas += 1,
      Token::Op(':') if depth == 0 && lambdas > 0 => lambdas -= 1,
      Token::Op(':') if depth == 0 => return Some(i),
      _ => {}
    }
  }
  None
}

/// `import a.b as c, d`
fn parse_import(tokens: &[Token], line: usize, conditional: bool, out: &mut Vec<ImportStatement>) {
  for part in tokens.split(|t| *t == Token::Op(',')) {
    let Some((module, rest)) = dotted_name(part) else {
      continue;
    };
    if !is_alias_tail(rest) {
      continue;
    }
    out.push(ImportStatement {
      module,
      names: Vec::new(),
      level: 0,
      conditional,
      dynamic: false,
      line,
    });
  }
}

/// `from ..pkg import (a, b as c)` and `from x import *`
fn parse_from(tokens: &[Token], line: usize, conditional: bool, out: &mut Vec<ImportStatement>) {
  let mut level = 0u32;
  let mut rest = tokens;
  while let Some((Token::Op('.'), tail)) = rest.split_first() {
    level += 1;
    rest = tail;
  }

  let (module, rest) = match dotted_name(rest) {
    Some((module, rest)) => (module, rest),
    None if level > 0 => (String::new(), rest),
    None => return,
  };

  let Some((Token::Name(kw), rest)) = rest.split_first() else {
    return;
  };
  if kw != "import" {
    return;
  }

  let rest = match rest {
    [Token::Op('('), inner @ .., Token::Op(')')] => inner,
    _ => rest,
  };

  let mut names = Vec::new();
  for part in rest.split(|t| *t == Token::Op(',')) {
    match part {
      [] => {}
      [Token::Op('*')] => names.push("*".to_string()),
      [Token::Name(name), tail @ ..] if is_alias_tail(tail) => names.push(name.clone()),
      _ => return,
    }
  }
  if names.is_empty() {
    return;
  }

  out.push(ImportStatement {
    module,
    names,
    level,
    conditional,
    dynamic: false,
    line,
  });
}

fn dotted_name(tokens: &[Token]) -> Option<(String, &[Token])> {
  let (Token::Name(head), mut rest) = tokens.split_first()? else {
    return None;
  };
  if head == "import" {
    return None;
  }
  let mut name = head.clone();
  while let [Token::Op('.'), Token::Name(part), tail @ ..] = rest {
    name.push('.');
    name.push_str(part);
    rest = tail;
  }
  Some((name, rest))
}

fn is_alias_tail(tokens: &[Token]) -> bool {
  match tokens {
    [] => true,
    [Token::Name(kw), Token::Name(_)] => kw == "as",
    _ => false,
  }
}

/// `__import__("m")`, `importlib.import_module("m")`, `import_module(".m", ...)`
fn find_dynamic(tokens: &[Token], line: usize, out: &mut Vec<ImportStatement>) {
  for window in tokens.windows(3) {
    let [Token::Name(func), Token::Op('('), Token::Str(arg)] = window else {
      continue;
    };
    if func != "__import__" && func != "import_module" {
      continue;
    }
    let level = arg.chars().take_while(|c| *c == '.').count();
    let module = &arg[level..];
    if !is_valid_dotted(module) || (func == "__import__" && level > 0) {
      continue;
    }
    out.push(ImportStatement {
      module: module.to_string(),
      names: Vec::new(),
      level: level as u32,
      conditional: true,
      dynamic: true,
      line,
    });
  }
}

fn is_valid_dotted(name: &str) -> bool {
  !name.is_empty()
    && name.split('.').all(|part| {
      let mut chars = part.chars();
      chars.next().is_some_and(|c| c == '_' || c.is_alphabetic()) && chars.all(|c| c == '_' || c.is_alphanumeric())
    })
}

fn is_string_prefix(name: &str) -> bool {
  name.len() <= 2 && name.chars().all(|c| matches!(c.to_ascii_lowercase(), 'r' | 'b' | 'u' | 'f'))
}

/// Split source into logical lines of tokens.
fn tokenize(source: &str) -> Vec<LogicalLine> {
  let chars: Vec<char> = source.chars().collect();
  let mut lines = Vec::new();
  let mut i = 0;
  let mut line_no = 1;
  let mut depth = 0usize;
  let mut current: Option<LogicalLine> = None;
  let mut at_line_start = true;
  let mut indent = 0usize;

  while i < chars.len() {
    let c = chars[i];

    if at_line_start {
      indent = 0;
      while i < chars.len() && (chars[i] == ' ' || chars[i] == '\t' || chars[i] == '\x0c') {
        indent = if chars[i] == '\t' { (indent / 8 + 1) * 8 } else { indent + 1 };
        i += 1;
      }
      at_line_start = false;
      continue;
    }

    match c {
      '\n' => {
        line_no += 1;
        i += 1;
        if depth == 0 {
          if let Some(logical) = current.take()
            && !logical.tokens.is_empty()
          {
            lines.push(logical);
          }
          at_line_start = true;
        }
      }
      '\\' if chars.get(i + 1) == Some(&'\n') => {
        line_no += 1;
        i += 2;
      }
      '\\' if chars.get(i + 1) == Some(&'\r') && chars.get(i + 2) == Some(&'\n') => {
        line_no += 1;
        i += 3;
      }
      '#' => {
        while i < chars.len() && chars[i] != '\n' {
          i += 1;
        }
      }
      ' ' | '\t' | '\r' | '\x0c' => i += 1,
      '"' | '\'' => {
        let start_line = line_no;
        let (content, next, newlines) = read_string(&chars, i);
        line_no += newlines;
        i = next;
        push_token(&mut current, indent, start_line, Token::Str(content));
      }
      c if c == '_' || c.is_alphabetic() => {
        let start = i;
        while i < chars.len() && (chars[i] == '_' || chars[i].is_alphanumeric()) {
          i += 1;
        }
        let name: String = chars[start..i].iter().collect();
        if i < chars.len() && (chars[i] == '"' || chars[i] == '\'') && is_string_prefix(&name) {
          let start_line = line_no;
          let (content, next, newlines) = read_string(&chars, i);
          line_no += newlines;
          i = next;
          push_token(&mut current, indent, start_line, Token::Str(content));
        } else {
          push_token(&mut current, indent, line_no, Token::Name(name));
        }
      }
      c if c.is_ascii_digit() => {
        while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.') {
          i += 1;
        }
        push_token(&mut current, indent, line_no, Token::Other);
      }
      '(' | '[' | '{' => {
        depth += 1;
        i += 1;
        push_token(&mut current, indent, line_no, Token::Op(c));
      }
      ')' | ']' | '}' => {
        depth = depth.saturating_sub(1);
        i += 1;
        push_token(&mut current, indent, line_no, Token::Op(c));
      }
      _ => {
        i += 1;
        push_token(&mut current, indent, line_no, Token::Op(c));
      }
    }
  }

  if let Some(logical) = current
    && !logical.tokens.is_empty()
  {
    lines.push(logical);
  }
  lines
}

fn push_token(current: &mut Option<LogicalLine>, indent: usize, line: usize, token: Token) {
  current
    .get_or_insert_with(|| LogicalLine {
      indent,
      line,
      tokens: Vec::new(),
    })
    .tokens
    .push(token);
}

/// Read a string literal starting at the opening quote.
///
/// Returns the raw content, the index after the closing quote and the number
/// of newlines consumed. An unterminated literal runs to the end of the line
/// (or of the input, for triple quotes).
fn read_string(chars: &[char], start: usize) -> (String, usize, usize) {
  let quote = chars[start];
  let triple = chars.get(start + 1) == Some(&quote) && chars.get(start + 2) == Some(&quote);
  let mut i = if triple { start + 3 } else { start + 1 };
  let mut content = String::new();
  let mut newlines = 0;

  while i < chars.len() {
    let c = chars[i];
    if c == '\\' {
      if let Some(&escaped) = chars.get(i + 1) {
        if escaped == '\n' {
          newlines += 1;
        }
        content.push(c);
        content.push(escaped);
      }
      i += 2;
      continue;
    }
    if c == quote {
      if !triple {
        return (content, i + 1, newlines);
      }
      if chars.get(i + 1) == Some(&quote) && chars.get(i + 2) == Some(&quote) {
        return (content, i + 3, newlines);
      }
    }
    if c == '\n' {
      if !triple {
        return (content, i, newlines);
      }
      newlines += 1;
    }
    content.push(c);
    i += 1;
  }
  (content, i.min(chars.len()), newlines)
}
