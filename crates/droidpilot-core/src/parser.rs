//! Script text parser.
//!
//! Turns the line-oriented script format into a [`Script`]:
//!
//! ```text
//! case: TC-001
//! scriptName: 登录测试
//! details:
//!   package: com.example.app
//!   activity: .MainActivity
//! steps:
//!   启动应用
//!   点击 [{登录按钮}]
//!   输入 [{用户名}, "alice"]
//!   等待 [2s]
//!   断言 [{欢迎标题}, 存在]
//! ```
//!
//! Parsing never fails in lenient mode: lines with an unknown command word
//! are dropped and reported as [`ParseWarning`]s. [`parse_strict`] turns the
//! first such line into a [`ParseError`] instead.
//!
//! Every [`Step`] keeps the 1-based number of the line it came from, counted
//! over the original text including blank and comment lines.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::script::{CommandType, Direction, DurationUnit, Parameter, Script, Step};

static INTEGER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d+$").expect("static regex"));
static SECONDS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)s$").expect("static regex"));
static MILLIS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)ms$").expect("static regex"));
static BRACED_COORDINATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{\s*(\d+)\s*,\s*(\d+)\s*\}$").expect("static regex"));
static BARE_COORDINATE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+),(\d+)$").expect("static regex"));
static IMAGE_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^@\{(.+)\}$").expect("static regex"));
static ELEMENT_REFERENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\{(.+)\}$").expect("static regex"));

/// A line that was dropped because its command word is unknown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseWarning {
    pub line: usize,
    pub raw_text: String,
    pub word: String,
}

/// Strict-mode parse failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("line {line}: unknown command '{word}'")]
    UnknownCommand { line: usize, word: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Details,
    Steps,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Header {
    Case,
    Name,
    Details,
    Steps,
}

impl Header {
    fn from_key(key: &str) -> Option<Self> {
        match key.to_lowercase().as_str() {
            "case" | "caseid" | "case_id" | "用例" | "用例编号" => Some(Header::Case),
            "scriptname" | "script_name" | "name" | "脚本名" | "脚本名称" => {
                Some(Header::Name)
            }
            "details" | "详情" => Some(Header::Details),
            "steps" | "步骤" => Some(Header::Steps),
            _ => None,
        }
    }
}

/// Parse script text, dropping unknown commands with a logged warning.
pub fn parse(text: &str) -> Script {
    parse_with_warnings(text).0
}

/// Parse script text and report dropped lines alongside the script.
pub fn parse_with_warnings(text: &str) -> (Script, Vec<ParseWarning>) {
    let mut case_id = String::new();
    let mut script_name = String::new();
    let mut details = BTreeMap::new();
    let mut steps = Vec::new();
    let mut warnings = Vec::new();
    let mut section = Section::Preamble;

    for (index, original) in text.lines().enumerate() {
        let line_no = index + 1;
        let trimmed = original.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let indented = original.starts_with(char::is_whitespace);
        let key_value = split_key_value(trimmed);

        // Inside details, indented lines always belong to the block.
        let header = match key_value {
            Some((key, value)) if !(section == Section::Details && indented) => {
                Header::from_key(key).map(|h| (h, value))
            }
            _ => None,
        };

        if let Some((header, value)) = header {
            match header {
                Header::Case => case_id = value.to_string(),
                Header::Name => script_name = value.to_string(),
                Header::Details => section = Section::Details,
                Header::Steps => section = Section::Steps,
            }
            continue;
        }

        if section == Section::Details {
            match key_value {
                Some((key, value)) => {
                    details.insert(key.to_string(), value.to_string());
                }
                None => warn!("line {}: ignoring malformed detail '{}'", line_no, trimmed),
            }
            continue;
        }

        match parse_command_line(trimmed, line_no) {
            Ok(step) => steps.push(step),
            Err(warning) => {
                warn!(
                    "line {}: unknown command '{}', line dropped",
                    warning.line, warning.word
                );
                warnings.push(warning);
            }
        }
    }

    let script = Script {
        case_id,
        script_name,
        details,
        steps,
    };
    (script, warnings)
}

/// Parse script text, failing on the first unknown command.
pub fn parse_strict(text: &str) -> Result<Script, ParseError> {
    let (script, warnings) = parse_with_warnings(text);
    match warnings.into_iter().next() {
        Some(warning) => Err(ParseError::UnknownCommand {
            line: warning.line,
            word: warning.word,
        }),
        None => Ok(script),
    }
}

/// Parse a single command line.
///
/// Accepts `<Word> [p1, p2]`, `<Word> p1 p2` and a bare `<Word>`. A leading
/// `- ` list marker is ignored.
pub fn parse_command_line(line: &str, line_no: usize) -> Result<Step, ParseWarning> {
    let raw_text = line.trim();
    let body = raw_text
        .strip_prefix("- ")
        .map(str::trim_start)
        .unwrap_or(raw_text);

    let word_end = body
        .find(|c: char| c.is_whitespace() || c == '[')
        .unwrap_or(body.len());
    let (word, rest) = body.split_at(word_end);
    let rest = rest.trim();

    let Some(command) = CommandType::from_word(word) else {
        return Err(ParseWarning {
            line: line_no,
            raw_text: raw_text.to_string(),
            word: word.to_string(),
        });
    };

    let tokens = if rest.is_empty() {
        Vec::new()
    } else if let Some(inner) = rest.strip_prefix('[').and_then(|r| r.strip_suffix(']')) {
        tokenize(inner, false)
    } else {
        tokenize(rest, true)
    };

    Ok(Step {
        command,
        raw_text: raw_text.to_string(),
        line: line_no,
        parameters: tokens.iter().map(|t| parse_parameter(t)).collect(),
    })
}

/// Split a `key: value` line. Full-width colons are accepted.
///
/// The key must be a single word so command lines carrying a colon inside
/// a parameter are not mistaken for headers.
fn split_key_value(line: &str) -> Option<(&str, &str)> {
    let pos = line.find([':', '：'])?;
    let key = line[..pos].trim();
    if key.is_empty() || key.contains(|c: char| c.is_whitespace() || "[{\"'".contains(c)) {
        return None;
    }
    let sep_len = line[pos..].chars().next().map_or(1, char::len_utf8);
    Some((key, line[pos + sep_len..].trim()))
}

/// Split a parameter list into raw tokens.
///
/// Single left-to-right scan. Separators inside quotes or braces are kept.
/// A comma directly between two digits belongs to a coordinate (`200,400`).
/// With `split_on_whitespace` unset only commas separate tokens.
fn tokenize(input: &str, split_on_whitespace: bool) -> Vec<String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    let mut depth = 0usize;

    for (i, &c) in chars.iter().enumerate() {
        if let Some(q) = quote {
            current.push(c);
            if c == q {
                quote = None;
            }
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                current.push(c);
            }
            '{' => {
                depth += 1;
                current.push(c);
            }
            '}' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                let prev_digit = i > 0 && chars[i - 1].is_ascii_digit();
                let next_digit = chars.get(i + 1).is_some_and(|n| n.is_ascii_digit());
                if prev_digit && next_digit {
                    current.push(c);
                } else {
                    flush_token(&mut tokens, &mut current);
                }
            }
            c if c.is_whitespace() && depth == 0 && split_on_whitespace => {
                flush_token(&mut tokens, &mut current);
            }
            _ => current.push(c),
        }
    }
    flush_token(&mut tokens, &mut current);

    tokens
}

fn flush_token(tokens: &mut Vec<String>, current: &mut String) {
    let token = current.trim();
    if !token.is_empty() {
        tokens.push(token.to_string());
    }
    current.clear();
}

/// Type a raw token. First matching pattern wins.
pub fn parse_parameter(token: &str) -> Parameter {
    let token = token.trim();

    if let Some(inner) = strip_quotes(token) {
        return Parameter::Literal(inner.to_string());
    }

    if INTEGER.is_match(token) {
        if let Ok(n) = token.parse::<i64>() {
            return Parameter::Integer(n);
        }
    }

    if let Some(value) = SECONDS.captures(token).and_then(|c| c[1].parse().ok()) {
        return Parameter::Duration {
            value,
            unit: DurationUnit::Seconds,
        };
    }

    if let Some(value) = MILLIS.captures(token).and_then(|c| c[1].parse().ok()) {
        return Parameter::Duration {
            value,
            unit: DurationUnit::Milliseconds,
        };
    }

    let coordinate = BRACED_COORDINATE
        .captures(token)
        .or_else(|| BARE_COORDINATE.captures(token));
    if let Some(caps) = coordinate {
        if let (Ok(x), Ok(y)) = (caps[1].parse(), caps[2].parse()) {
            return Parameter::Coordinate { x, y };
        }
    }

    if let Some(caps) = IMAGE_REFERENCE.captures(token) {
        return Parameter::ImageReference {
            name: caps[1].trim().to_string(),
        };
    }

    if let Some(caps) = ELEMENT_REFERENCE.captures(token) {
        return Parameter::ElementReference(caps[1].trim().to_string());
    }

    if let Some(direction) = Direction::from_keyword(token) {
        return Parameter::Direction(direction);
    }

    if let Some(flag) = boolean_keyword(token) {
        return Parameter::Boolean(flag);
    }

    Parameter::Literal(token.to_string())
}

fn strip_quotes(token: &str) -> Option<&str> {
    ['"', '\''].iter().find_map(|&q| {
        if token.len() >= 2 {
            token.strip_prefix(q)?.strip_suffix(q)
        } else {
            None
        }
    })
}

fn boolean_keyword(token: &str) -> Option<bool> {
    match token.to_lowercase().as_str() {
        "exists" | "exist" | "存在" | "true" | "是" => Some(true),
        "not_exists" | "not-exists" | "notexists" | "not_exist" | "不存在" | "false" | "否" => {
            Some(false)
        }
        _ => None,
    }
}
