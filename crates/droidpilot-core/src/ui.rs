//! Device UI hierarchy types and uiautomator dump parsing.
//!
//! A [`UiSnapshot`] is what one resync produces: the screenshot bytes and a
//! flat list of [`UiElement`]s in document order. Snapshots are never
//! patched; each refresh replaces the previous one wholesale.
//!
//! # Dump Format
//!
//! `uiautomator dump` emits nested `<node>` tags whose attributes carry
//! everything the resolver needs:
//!
//! ```text
//! <node index="0" text="Login" resource-id="app:id/login"
//!       class="android.widget.Button" content-desc="" clickable="true"
//!       bounds="[10,20][110,60]" ... />
//! ```
//!
//! Each element also gets an index-qualified `xpath` such as
//! `/hierarchy/android.widget.FrameLayout[1]/android.widget.Button[2]` so
//! locator definitions recorded with an xpath can match exactly.

use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

static TAG: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(/?)(node|hierarchy)\b((?:[^>\x22]|\x22[^\x22]*\x22)*?)(/?)>")
        .expect("static regex")
});
static ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"([\w:-]+)="([^"]*)""#).expect("static regex"));
static ANDROID_BOUNDS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\[(-?\d+),(-?\d+)\]\[(-?\d+),(-?\d+)\]$").expect("static regex")
});

/// Screen rectangle in device pixels, `left/top` inclusive.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl Bounds {
    pub fn new(left: i32, top: i32, right: i32, bottom: i32) -> Self {
        Self {
            left,
            top,
            right,
            bottom,
        }
    }

    /// Parse the uiautomator form `[l,t][r,b]`.
    pub fn parse_android(s: &str) -> Option<Self> {
        let caps = ANDROID_BOUNDS.captures(s.trim())?;
        Some(Self::new(
            caps[1].parse().ok()?,
            caps[2].parse().ok()?,
            caps[3].parse().ok()?,
            caps[4].parse().ok()?,
        ))
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    /// Center point, used as the tap target.
    pub fn center(&self) -> (i32, i32) {
        (
            self.left + self.width() / 2,
            self.top + self.height() / 2,
        )
    }

    pub fn is_empty(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }
}

impl fmt::Display for Bounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{},{}][{},{}]",
            self.left, self.top, self.right, self.bottom
        )
    }
}

/// Device screen dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenSize {
    pub width: i32,
    pub height: i32,
}

/// One node from a live UI hierarchy.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiElement {
    pub bounds: Bounds,
    pub center_x: i32,
    pub center_y: i32,
    pub class_name: String,
    pub text: String,
    pub content_desc: String,
    pub resource_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub hint: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub package: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub xpath: String,
    #[serde(default)]
    pub clickable: bool,
    #[serde(default)]
    pub long_clickable: bool,
    #[serde(default)]
    pub scrollable: bool,
    #[serde(default)]
    pub focusable: bool,
    #[serde(default)]
    pub focused: bool,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub checkable: bool,
    #[serde(default)]
    pub checked: bool,
    #[serde(default)]
    pub selected: bool,
    #[serde(default)]
    pub password: bool,
    /// Match confidence, set only on elements synthesized from an image match.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl UiElement {
    /// Build an element positioned at `bounds` with its center precomputed.
    pub fn with_bounds(bounds: Bounds) -> Self {
        let (center_x, center_y) = bounds.center();
        Self {
            bounds,
            center_x,
            center_y,
            enabled: true,
            ..Self::default()
        }
    }

    /// Short human-readable label for logs and error messages.
    pub fn label(&self) -> String {
        let name = [&self.text, &self.content_desc, &self.resource_id]
            .into_iter()
            .find(|s| !s.is_empty())
            .cloned()
            .unwrap_or_else(|| self.class_name.clone());
        format!("{} @ {}", name, self.bounds)
    }
}

/// Result of one UI resync.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UiSnapshot {
    pub screenshot: Vec<u8>,
    pub elements: Vec<UiElement>,
    pub screen_size: Option<ScreenSize>,
}

/// Parse a uiautomator XML dump into a flat element list.
///
/// Nodes without parseable bounds are skipped, but their children are kept.
/// Unknown tags and malformed attributes are ignored rather than rejected:
/// a partial hierarchy is more useful than none.
pub fn parse_hierarchy(xml: &str) -> Vec<UiElement> {
    let mut elements = Vec::new();
    // Per open node: its xpath and the per-class child counters.
    let mut stack: Vec<(String, HashMap<String, usize>)> = Vec::new();
    let mut root_counts: HashMap<String, usize> = HashMap::new();

    for caps in TAG.captures_iter(xml) {
        let closing = !caps[1].is_empty();
        let tag = &caps[2];
        let self_closing = !caps[4].is_empty();

        if tag == "hierarchy" {
            continue;
        }

        if closing {
            stack.pop();
            continue;
        }

        let attrs: HashMap<&str, String> = ATTRIBUTE
            .captures_iter(&caps[3])
            .map(|a| (a.get(1).map_or("", |m| m.as_str()), unescape_xml(&a[2])))
            .collect();

        let class_name = attrs.get("class").cloned().unwrap_or_default();
        let xpath_segment = if class_name.is_empty() {
            "node".to_string()
        } else {
            class_name.clone()
        };

        let (parent_path, counts) = match stack.last_mut() {
            Some((path, counts)) => (path.clone(), counts),
            None => ("/hierarchy".to_string(), &mut root_counts),
        };
        let ordinal = counts.entry(xpath_segment.clone()).or_insert(0);
        *ordinal += 1;
        let xpath = format!("{}/{}[{}]", parent_path, xpath_segment, ordinal);

        if let Some(bounds) = attrs.get("bounds").and_then(|b| Bounds::parse_android(b)) {
            let flag = |name: &str| attrs.get(name).is_some_and(|v| v == "true");
            let text_attr = |name: &str| attrs.get(name).cloned().unwrap_or_default();
            let (center_x, center_y) = bounds.center();
            elements.push(UiElement {
                bounds,
                center_x,
                center_y,
                class_name,
                text: text_attr("text"),
                content_desc: text_attr("content-desc"),
                resource_id: text_attr("resource-id"),
                hint: text_attr("hint"),
                package: text_attr("package"),
                xpath: xpath.clone(),
                clickable: flag("clickable"),
                long_clickable: flag("long-clickable"),
                scrollable: flag("scrollable"),
                focusable: flag("focusable"),
                focused: flag("focused"),
                enabled: flag("enabled"),
                checkable: flag("checkable"),
                checked: flag("checked"),
                selected: flag("selected"),
                password: flag("password"),
                confidence: None,
            });
        }

        if !self_closing {
            stack.push((xpath, HashMap::new()));
        }
    }

    elements
}

/// Screen size inferred from the widest element bounds.
pub fn infer_screen_size(elements: &[UiElement]) -> Option<ScreenSize> {
    let width = elements.iter().map(|e| e.bounds.right).max()?;
    let height = elements.iter().map(|e| e.bounds.bottom).max()?;
    (width > 0 && height > 0).then_some(ScreenSize { width, height })
}

fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(pos) = rest.find('&') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        let Some(end) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..end];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|d| d.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const DUMP: &str = r#"<?xml version='1.0' encoding='UTF-8' standalone='yes' ?><hierarchy rotation="0"><node index="0" text="" resource-id="" class="android.widget.FrameLayout" package="com.example" content-desc="" clickable="false" enabled="true" bounds="[0,0][1080,1920]"><node index="0" text="登录" resource-id="app:id/login" class="android.widget.Button" package="com.example" content-desc="login button" clickable="true" enabled="true" bounds="[10,20][110,60]" /><node index="1" text="Tom &amp; Jerry" resource-id="app:id/title" class="android.widget.TextView" package="com.example" content-desc="" clickable="false" enabled="true" bounds="[0,100][1080,200]" /><node index="2" text="" resource-id="app:id/other" class="android.widget.Button" package="com.example" content-desc="" clickable="true" enabled="false" bounds="[0,300][200,400]" /></node></hierarchy>"#;

    #[test]
    fn test_bounds_parse_android() {
        let b = Bounds::parse_android("[10,20][110,60]").unwrap();
        assert_eq!(b, Bounds::new(10, 20, 110, 60));
        assert_eq!(b.center(), (60, 40));
        assert!(Bounds::parse_android("10,20,110,60").is_none());
    }

    #[test]
    fn test_parse_hierarchy_flattens_in_document_order() {
        let elements = parse_hierarchy(DUMP);
        assert_eq!(elements.len(), 4);
        assert_eq!(elements[0].class_name, "android.widget.FrameLayout");
        assert_eq!(elements[1].resource_id, "app:id/login");
        assert_eq!(elements[1].text, "登录");
        assert_eq!((elements[1].center_x, elements[1].center_y), (60, 40));
        assert!(elements[1].clickable);
        assert!(!elements[3].enabled);
    }

    #[test]
    fn test_parse_hierarchy_unescapes_entities() {
        let elements = parse_hierarchy(DUMP);
        assert_eq!(elements[2].text, "Tom & Jerry");
    }

    #[test]
    fn test_parse_hierarchy_builds_indexed_xpaths() {
        let elements = parse_hierarchy(DUMP);
        assert_eq!(elements[0].xpath, "/hierarchy/android.widget.FrameLayout[1]");
        assert_eq!(
            elements[1].xpath,
            "/hierarchy/android.widget.FrameLayout[1]/android.widget.Button[1]"
        );
        assert_eq!(
            elements[3].xpath,
            "/hierarchy/android.widget.FrameLayout[1]/android.widget.Button[2]"
        );
    }

    #[test]
    fn test_parse_hierarchy_tolerates_garbage() {
        assert!(parse_hierarchy("").is_empty());
        assert!(parse_hierarchy("ERROR: could not get idle state.").is_empty());
    }

    #[test]
    fn test_infer_screen_size() {
        let elements = parse_hierarchy(DUMP);
        assert_eq!(
            infer_screen_size(&elements),
            Some(ScreenSize {
                width: 1080,
                height: 1920
            })
        );
        assert_eq!(infer_screen_size(&[]), None);
    }

    #[test]
    fn test_unescape_numeric_entities() {
        assert_eq!(unescape_xml("a&#65;&#x42;c"), "aABc");
        assert_eq!(unescape_xml("5 &lt; 6"), "5 < 6");
        assert_eq!(unescape_xml("broken &amp"), "broken &amp");
    }

    #[test]
    fn test_label_prefers_text() {
        let mut el = UiElement::with_bounds(Bounds::new(0, 0, 10, 10));
        el.class_name = "android.view.View".into();
        assert!(el.label().starts_with("android.view.View"));
        el.text = "OK".into();
        assert!(el.label().starts_with("OK"));
    }
}
