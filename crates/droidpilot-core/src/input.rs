//! Device command encoding.
//!
//! Builds the shell command strings sent through the device channel
//! (`adb shell <command>`). Everything here is pure string construction so
//! it can be tested without a device.

use crate::script::Direction;
use crate::ui::{Bounds, ScreenSize};

/// Android key codes used by the executor.
pub const KEYCODE_BACK: &str = "KEYCODE_BACK";
pub const KEYCODE_DEL: &str = "KEYCODE_DEL";
pub const KEYCODE_MOVE_END: &str = "KEYCODE_MOVE_END";

/// Fraction of the swept extent a directional swipe travels.
const SWIPE_SPAN: f64 = 0.5;

/// Output fragments that mark a failed lifecycle command.
pub const FAILURE_MARKERS: &[&str] = &["Error", "Exception", "Failure", "失败", "错误"];

/// One device-side action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    Tap { x: i32, y: i32 },
    Swipe {
        from: (i32, i32),
        to: (i32, i32),
        duration_ms: u64,
    },
    Text(String),
    KeyEvents(Vec<String>),
    StartActivity { package: String, activity: String },
    ForceStop { package: String },
    DumpInputMethod,
    WindowSize,
}

impl DeviceCommand {
    /// A long press is a zero-length swipe held for `duration_ms`.
    pub fn long_press(x: i32, y: i32, duration_ms: u64) -> Self {
        DeviceCommand::Swipe {
            from: (x, y),
            to: (x, y),
            duration_ms,
        }
    }

    pub fn key(code: &str) -> Self {
        DeviceCommand::KeyEvents(vec![code.to_string()])
    }

    /// Render the command as a device shell string.
    pub fn to_shell(&self) -> String {
        match self {
            DeviceCommand::Tap { x, y } => format!("input tap {} {}", x, y),
            DeviceCommand::Swipe {
                from,
                to,
                duration_ms,
            } => format!(
                "input swipe {} {} {} {} {}",
                from.0, from.1, to.0, to.1, duration_ms
            ),
            DeviceCommand::Text(text) => encode_text(text),
            DeviceCommand::KeyEvents(codes) => format!("input keyevent {}", codes.join(" ")),
            DeviceCommand::StartActivity { package, activity } => {
                format!("am start -n {}", component_name(package, activity))
            }
            DeviceCommand::ForceStop { package } => format!("am force-stop {}", package),
            DeviceCommand::DumpInputMethod => "dumpsys input_method".to_string(),
            DeviceCommand::WindowSize => "wm size".to_string(),
        }
    }
}

/// Join package and activity into an `am start -n` component.
///
/// Activities starting with `.` are relative to the package; fully
/// qualified activities and ones already containing `/` pass through.
pub fn component_name(package: &str, activity: &str) -> String {
    if activity.contains('/') {
        activity.to_string()
    } else {
        format!("{}/{}", package, activity)
    }
}

/// Encode text entry for the device shell.
///
/// ASCII goes through `input text`, which cannot take spaces or unescaped
/// shell metacharacters: spaces become `%s` and metacharacters get a
/// backslash. Anything else goes through the ADB keyboard IME broadcast
/// with a base64 payload supplied by the caller via [`encode_ime_text`].
pub fn encode_text(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len() * 2);
    for c in text.chars() {
        match c {
            ' ' => escaped.push_str("%s"),
            '\\' | '"' | '\'' | '`' | '$' | '&' | '|' | ';' | '<' | '>' | '(' | ')' | '*'
            | '~' | '#' | '?' | '!' | '[' | ']' | '{' | '}' => {
                escaped.push('\\');
                escaped.push(c);
            }
            '%' => escaped.push_str("\\%"),
            _ => escaped.push(c),
        }
    }
    format!("input text {}", escaped)
}

/// Broadcast for the ADB keyboard IME, which accepts arbitrary Unicode.
pub fn encode_ime_text(base64_payload: &str) -> String {
    format!("am broadcast -a ADB_INPUT_B64 --es msg {}", base64_payload)
}

/// True when `input text` can carry `text` as-is.
pub fn is_plain_input(text: &str) -> bool {
    text.chars().all(|c| c.is_ascii() && !c.is_ascii_control())
}

/// Key events that erase a field's content.
///
/// Moves to the end, then deletes `count` characters (at least one).
pub fn clear_field_keys(count: usize) -> DeviceCommand {
    let mut codes = Vec::with_capacity(count.max(1) + 1);
    codes.push(KEYCODE_MOVE_END.to_string());
    codes.extend(std::iter::repeat(KEYCODE_DEL.to_string()).take(count.max(1)));
    DeviceCommand::KeyEvents(codes)
}

/// Swipe endpoints for a direction within `area`.
///
/// The gesture is centred in the area and spans half its extent along the
/// swipe axis. `Up` moves the finger upward, scrolling content down.
pub fn directional_swipe(area: Bounds, direction: Direction) -> ((i32, i32), (i32, i32)) {
    let (cx, cy) = area.center();
    let half_dx = (f64::from(area.width()) * SWIPE_SPAN / 2.0) as i32;
    let half_dy = (f64::from(area.height()) * SWIPE_SPAN / 2.0) as i32;
    match direction {
        Direction::Up => ((cx, cy + half_dy), (cx, cy - half_dy)),
        Direction::Down => ((cx, cy - half_dy), (cx, cy + half_dy)),
        Direction::Left => ((cx + half_dx, cy), (cx - half_dx, cy)),
        Direction::Right => ((cx - half_dx, cy), (cx + half_dx, cy)),
    }
}

/// Full-screen bounds for a screen size.
pub fn screen_bounds(size: ScreenSize) -> Bounds {
    Bounds::new(0, 0, size.width, size.height)
}

/// Parse `wm size` output, preferring the override size when present.
pub fn parse_window_size(output: &str) -> Option<ScreenSize> {
    let pick = |prefix: &str| {
        output.lines().find_map(|line| {
            let rest = line.trim().strip_prefix(prefix)?;
            let (w, h) = rest.trim().split_once('x')?;
            Some(ScreenSize {
                width: w.trim().parse().ok()?,
                height: h.trim().parse().ok()?,
            })
        })
    };
    pick("Override size:").or_else(|| pick("Physical size:"))
}

/// True when `output` carries one of the [`FAILURE_MARKERS`].
pub fn reports_failure(output: &str) -> bool {
    FAILURE_MARKERS.iter().any(|marker| output.contains(marker))
}

/// True when `dumpsys input_method` says the soft keyboard is showing.
pub fn keyboard_shown(dumpsys: &str) -> bool {
    dumpsys.contains("mInputShown=true") || dumpsys.contains("isInputViewShown=true")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tap_and_swipe_shell() {
        assert_eq!(DeviceCommand::Tap { x: 60, y: 40 }.to_shell(), "input tap 60 40");
        assert_eq!(
            DeviceCommand::long_press(5, 6, 1000).to_shell(),
            "input swipe 5 6 5 6 1000"
        );
    }

    #[test]
    fn test_encode_text_escapes_spaces_and_metacharacters() {
        assert_eq!(encode_text("hello world"), "input text hello%sworld");
        assert_eq!(encode_text("a&b"), "input text a\\&b");
        assert_eq!(encode_text("it's"), "input text it\\'s");
        assert_eq!(encode_text("100%"), "input text 100\\%");
    }

    #[test]
    fn test_is_plain_input() {
        assert!(is_plain_input("alice@example.com"));
        assert!(!is_plain_input("你好"));
        assert!(!is_plain_input("line\nbreak"));
    }

    #[test]
    fn test_component_name() {
        assert_eq!(
            component_name("com.example", ".MainActivity"),
            "com.example/.MainActivity"
        );
        assert_eq!(
            component_name("com.example", "com.example/.Main"),
            "com.example/.Main"
        );
    }

    #[test]
    fn test_start_activity_shell() {
        let cmd = DeviceCommand::StartActivity {
            package: "com.example".into(),
            activity: ".Main".into(),
        };
        assert_eq!(cmd.to_shell(), "am start -n com.example/.Main");
    }

    #[test]
    fn test_clear_field_keys() {
        let cmd = clear_field_keys(2);
        assert_eq!(
            cmd.to_shell(),
            "input keyevent KEYCODE_MOVE_END KEYCODE_DEL KEYCODE_DEL"
        );
        assert_eq!(
            clear_field_keys(0).to_shell(),
            "input keyevent KEYCODE_MOVE_END KEYCODE_DEL"
        );
    }

    #[test]
    fn test_directional_swipe_geometry() {
        let screen = Bounds::new(0, 0, 1000, 2000);
        assert_eq!(
            directional_swipe(screen, Direction::Up),
            ((500, 1500), (500, 500))
        );
        assert_eq!(
            directional_swipe(screen, Direction::Down),
            ((500, 500), (500, 1500))
        );
        assert_eq!(
            directional_swipe(screen, Direction::Left),
            ((750, 1000), (250, 1000))
        );
        assert_eq!(
            directional_swipe(screen, Direction::Right),
            ((250, 1000), (750, 1000))
        );
    }

    #[test]
    fn test_parse_window_size() {
        assert_eq!(
            parse_window_size("Physical size: 1080x2340\n"),
            Some(ScreenSize {
                width: 1080,
                height: 2340
            })
        );
        assert_eq!(
            parse_window_size("Physical size: 1080x2340\nOverride size: 720x1560"),
            Some(ScreenSize {
                width: 720,
                height: 1560
            })
        );
        assert_eq!(parse_window_size("error: no devices"), None);
    }

    #[test]
    fn test_failure_markers() {
        assert!(reports_failure(
            "Error: Activity class {com.x/.Main} does not exist."
        ));
        assert!(!reports_failure("Starting: Intent { cmp=com.x/.Main }"));
    }

    #[test]
    fn test_keyboard_shown() {
        assert!(keyboard_shown("  mInputShown=true mShowRequested=true"));
        assert!(!keyboard_shown("  mInputShown=false"));
    }
}
