//! Parsed script model.
//!
//! A [`Script`] is produced once per parse and never mutated; editing a
//! script means reparsing its whole text.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The closed set of commands a script can contain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandType {
    LaunchApp,
    CloseApp,
    Click,
    LongPress,
    Swipe,
    DirectionalSwipe,
    InputText,
    ClearField,
    HideKeyboard,
    Back,
    Wait,
    Assert,
}

impl CommandType {
    pub const ALL: [CommandType; 12] = [
        CommandType::LaunchApp,
        CommandType::CloseApp,
        CommandType::Click,
        CommandType::LongPress,
        CommandType::Swipe,
        CommandType::DirectionalSwipe,
        CommandType::InputText,
        CommandType::ClearField,
        CommandType::HideKeyboard,
        CommandType::Back,
        CommandType::Wait,
        CommandType::Assert,
    ];

    /// Map a command word from a script line to its command type.
    ///
    /// English words are matched case-insensitively.
    pub fn from_word(word: &str) -> Option<Self> {
        let lower = word.to_lowercase();
        let command = match lower.as_str() {
            "启动应用" | "启动" | "launch" | "launch_app" => CommandType::LaunchApp,
            "关闭应用" | "关闭" | "close" | "close_app" => CommandType::CloseApp,
            "点击" | "click" | "tap" => CommandType::Click,
            "长按" | "long_press" | "longpress" => CommandType::LongPress,
            "滑动" | "swipe" => CommandType::Swipe,
            "方向滑动" | "滚动" | "scroll" | "swipe_direction" => CommandType::DirectionalSwipe,
            "输入" | "input" | "type" => CommandType::InputText,
            "清空" | "清除" | "clear" => CommandType::ClearField,
            "隐藏键盘" | "hide_keyboard" => CommandType::HideKeyboard,
            "返回" | "back" => CommandType::Back,
            "等待" | "wait" => CommandType::Wait,
            "断言" | "验证" | "assert" => CommandType::Assert,
            _ => return None,
        };
        Some(command)
    }

    /// Canonical English keyword, used in logs and error messages.
    pub fn keyword(self) -> &'static str {
        match self {
            CommandType::LaunchApp => "launch_app",
            CommandType::CloseApp => "close_app",
            CommandType::Click => "click",
            CommandType::LongPress => "long_press",
            CommandType::Swipe => "swipe",
            CommandType::DirectionalSwipe => "swipe_direction",
            CommandType::InputText => "input",
            CommandType::ClearField => "clear",
            CommandType::HideKeyboard => "hide_keyboard",
            CommandType::Back => "back",
            CommandType::Wait => "wait",
            CommandType::Assert => "assert",
        }
    }

    /// One-line usage shown in argument errors.
    pub fn usage(self) -> &'static str {
        match self {
            CommandType::LaunchApp => "启动应用 [package, activity]",
            CommandType::CloseApp => "关闭应用 [package]",
            CommandType::Click => "点击 [{element} | @{image} | x,y]",
            CommandType::LongPress => "长按 [{element}, 2s]",
            CommandType::Swipe => "滑动 [{from}, {to}, 300]",
            CommandType::DirectionalSwipe => "方向滑动 [up|down|left|right, {element}]",
            CommandType::InputText => "输入 [{element}, \"text\"]",
            CommandType::ClearField => "清空 [{element}]",
            CommandType::HideKeyboard => "隐藏键盘",
            CommandType::Back => "返回",
            CommandType::Wait => "等待 [5s] | 等待 [{element}]",
            CommandType::Assert => "断言 [{element}, 存在|不存在|\"text\"]",
        }
    }
}

impl fmt::Display for CommandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Swipe direction, named by where the finger travels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Up,
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_lowercase().as_str() {
            "up" | "上" | "向上" | "上滑" => Some(Direction::Up),
            "down" | "下" | "向下" | "下滑" => Some(Direction::Down),
            "left" | "左" | "向左" | "左滑" => Some(Direction::Left),
            "right" | "右" | "向右" | "右滑" => Some(Direction::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationUnit {
    Seconds,
    Milliseconds,
}

/// A typed script parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum Parameter {
    Literal(String),
    Integer(i64),
    Duration { value: u64, unit: DurationUnit },
    Coordinate { x: i32, y: i32 },
    ImageReference { name: String },
    ElementReference(String),
    Direction(Direction),
    Boolean(bool),
}

impl Parameter {
    /// Interpret the parameter as a span of time.
    ///
    /// Bare integers count as seconds.
    pub fn as_duration(&self) -> Option<std::time::Duration> {
        match self {
            Parameter::Duration {
                value,
                unit: DurationUnit::Seconds,
            } => Some(std::time::Duration::from_secs(*value)),
            Parameter::Duration {
                value,
                unit: DurationUnit::Milliseconds,
            } => Some(std::time::Duration::from_millis(*value)),
            Parameter::Integer(n) if *n >= 0 => Some(std::time::Duration::from_secs(*n as u64)),
            _ => None,
        }
    }

    /// Interpret the parameter as plain text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Parameter::Literal(s) | Parameter::ElementReference(s) => Some(s),
            _ => None,
        }
    }
}

impl fmt::Display for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Parameter::Literal(s) => write!(f, "\"{}\"", s),
            Parameter::Integer(n) => write!(f, "{}", n),
            Parameter::Duration {
                value,
                unit: DurationUnit::Seconds,
            } => write!(f, "{}s", value),
            Parameter::Duration {
                value,
                unit: DurationUnit::Milliseconds,
            } => write!(f, "{}ms", value),
            Parameter::Coordinate { x, y } => write!(f, "{{{},{}}}", x, y),
            Parameter::ImageReference { name } => write!(f, "@{{{}}}", name),
            Parameter::ElementReference(name) => write!(f, "{{{}}}", name),
            Parameter::Direction(d) => write!(f, "{:?}", d),
            Parameter::Boolean(b) => write!(f, "{}", b),
        }
    }
}

/// One parsed instruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    pub command: CommandType,
    /// The original line, trimmed.
    pub raw_text: String,
    /// 1-based line number in the unfiltered source text.
    pub line: usize,
    pub parameters: Vec<Parameter>,
}

impl Step {
    pub fn param(&self, index: usize) -> Option<&Parameter> {
        self.parameters.get(index)
    }
}

/// Parsed representation of one automation test file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Script {
    pub case_id: String,
    pub script_name: String,
    pub details: BTreeMap<String, String>,
    pub steps: Vec<Step>,
}

impl Script {
    /// Look up the first details entry present among `keys`.
    pub fn detail(&self, keys: &[&str]) -> Option<&str> {
        keys.iter()
            .find_map(|k| self.details.get(*k).filter(|v| !v.is_empty()))
            .map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_command_keyword_maps_back() {
        for command in CommandType::ALL {
            assert_eq!(CommandType::from_word(command.keyword()), Some(command));
        }
    }

    #[test]
    fn test_command_words_are_case_insensitive() {
        assert_eq!(CommandType::from_word("CLICK"), Some(CommandType::Click));
        assert_eq!(CommandType::from_word("点击"), Some(CommandType::Click));
        assert_eq!(CommandType::from_word("dance"), None);
    }

    #[test]
    fn test_direction_keywords() {
        assert_eq!(Direction::from_keyword("上"), Some(Direction::Up));
        assert_eq!(Direction::from_keyword("Left"), Some(Direction::Left));
        assert_eq!(Direction::from_keyword("sideways"), None);
    }

    #[test]
    fn test_as_duration() {
        let secs = Parameter::Duration {
            value: 3,
            unit: DurationUnit::Seconds,
        };
        let millis = Parameter::Duration {
            value: 250,
            unit: DurationUnit::Milliseconds,
        };
        assert_eq!(secs.as_duration(), Some(std::time::Duration::from_secs(3)));
        assert_eq!(
            millis.as_duration(),
            Some(std::time::Duration::from_millis(250))
        );
        assert_eq!(
            Parameter::Integer(2).as_duration(),
            Some(std::time::Duration::from_secs(2))
        );
        assert_eq!(Parameter::Integer(-1).as_duration(), None);
        assert_eq!(Parameter::Literal("x".into()).as_duration(), None);
    }

    #[test]
    fn test_parameter_json_shape() {
        let json = serde_json::to_string(&Parameter::Coordinate { x: 1, y: 2 }).unwrap();
        assert_eq!(json, r#"{"type":"coordinate","value":{"x":1,"y":2}}"#);
    }

    #[test]
    fn test_detail_skips_empty_values() {
        let mut script = Script::default();
        script.details.insert("package".into(), String::new());
        script
            .details
            .insert("appPackage".into(), "com.example".into());
        assert_eq!(script.detail(&["package", "appPackage"]), Some("com.example"));
    }
}
