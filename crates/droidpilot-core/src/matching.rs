//! Attribute-based element matching against a UI snapshot.
//!
//! Selectors name elements by alias. An alias either has a
//! [`LocatorDefinition`] in the project store or is used bare, in which
//! case it is compared against visible text, descriptions and ids.
//!
//! For xml definitions the strategies run in a fixed order and the first
//! hit wins:
//!
//! | # | Strategy | Rule |
//! |---|----------|------|
//! | 1 | `Exact` | every attribute present on the definition matches exactly (needs more than a class name) |
//! | 2 | `ResourceId` | resource id substring, either direction |
//! | 3 | `ContentDesc` | content description substring |
//! | 4 | `Text` | text substring |
//! | 5 | `ClassPosition` | same class, nearest to recorded bounds |
//! | 6 | `ClassName` | class name exact or partial |
//!
//! Resource ids come first among the weak signals because they are the most
//! stable identifier Android exposes. The position strategy survives scrolls
//! and reflows where ids stay put but bounds move.
//!
//! Image definitions are not handled here; they need the image matcher.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::locator::{LocatorDefinition, XmlLocator};
use crate::script::Parameter;
use crate::ui::UiElement;

/// Default pixel tolerance for the class-plus-position strategy.
pub const DEFAULT_POSITION_TOLERANCE: i32 = 100;

/// What a script parameter points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Selector {
    /// Alias looked up in the locator store, falling back to a bare search.
    Alias { name: String },
    /// Template image, by alias or file stem.
    Image { name: String },
    /// Literal screen position.
    Point { x: i32, y: i32 },
}

impl Selector {
    /// Interpret a parameter as a selector.
    ///
    /// Literal text counts as a bare alias.
    pub fn from_parameter(param: &Parameter) -> Option<Self> {
        match param {
            Parameter::ElementReference(name) | Parameter::Literal(name) => Some(Selector::Alias {
                name: name.clone(),
            }),
            Parameter::ImageReference { name } => Some(Selector::Image { name: name.clone() }),
            Parameter::Coordinate { x, y } => Some(Selector::Point { x: *x, y: *y }),
            _ => None,
        }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selector::Alias { name } => write!(f, "{{{}}}", name),
            Selector::Image { name } => write!(f, "@{{{}}}", name),
            Selector::Point { x, y } => write!(f, "({}, {})", x, y),
        }
    }
}

/// Which strategy produced a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchStrategy {
    Exact,
    ResourceId,
    ContentDesc,
    Text,
    ClassPosition,
    ClassName,
    Bare,
    Image,
    Coordinate,
}

/// A successful resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub element: UiElement,
    pub strategy: MatchStrategy,
}

/// Run the ordered xml strategies over `elements`.
pub fn match_definition<'a>(
    def: &XmlLocator,
    elements: &'a [UiElement],
    tolerance: i32,
) -> Option<(&'a UiElement, MatchStrategy)> {
    if def.has_identity() {
        if let Some(el) = elements.iter().find(|el| matches_exactly(def, el)) {
            return Some((el, MatchStrategy::Exact));
        }
    }

    if let Some(id) = &def.resource_id {
        if let Some(el) = elements
            .iter()
            .find(|el| substring_either_way(id, &el.resource_id))
        {
            return Some((el, MatchStrategy::ResourceId));
        }
    }

    if let Some(desc) = &def.content_desc {
        if let Some(el) = elements
            .iter()
            .find(|el| substring_either_way(desc, &el.content_desc))
        {
            return Some((el, MatchStrategy::ContentDesc));
        }
    }

    if let Some(text) = &def.text {
        if let Some(el) = elements
            .iter()
            .find(|el| substring_either_way(text, &el.text))
        {
            return Some((el, MatchStrategy::Text));
        }
    }

    if let Some(class) = &def.class_name {
        if let Some(el) = match_class_position(class, def, elements, tolerance) {
            return Some((el, MatchStrategy::ClassPosition));
        }

        if let Some(el) = elements
            .iter()
            .find(|el| substring_either_way(class, &el.class_name))
        {
            return Some((el, MatchStrategy::ClassName));
        }
    }

    None
}

/// Search for an alias that has no definition.
///
/// Matches text, content description or hint exactly, or a resource id
/// containing the alias.
pub fn match_bare<'a>(name: &str, elements: &'a [UiElement]) -> Option<&'a UiElement> {
    if name.is_empty() {
        return None;
    }
    elements.iter().find(|el| {
        el.text == name
            || el.content_desc == name
            || el.hint == name
            || (!el.resource_id.is_empty() && el.resource_id.contains(name))
    })
}

/// Resolve an alias against an optional definition.
///
/// Image definitions return `None`; the caller routes them to the image
/// matcher.
pub fn match_alias(
    name: &str,
    definition: Option<&LocatorDefinition>,
    elements: &[UiElement],
    tolerance: i32,
) -> Option<Resolution> {
    match definition {
        Some(LocatorDefinition::Xml(def)) => {
            match_definition(def, elements, tolerance).map(|(el, strategy)| Resolution {
                element: el.clone(),
                strategy,
            })
        }
        Some(LocatorDefinition::Image { .. }) => None,
        None => match_bare(name, elements).map(|el| Resolution {
            element: el.clone(),
            strategy: MatchStrategy::Bare,
        }),
    }
}

fn matches_exactly(def: &XmlLocator, el: &UiElement) -> bool {
    let eq = |want: &Option<String>, have: &str| want.as_deref().map_or(true, |w| w == have);
    eq(&def.text, &el.text)
        && eq(&def.resource_id, &el.resource_id)
        && eq(&def.class_name, &el.class_name)
        && eq(&def.content_desc, &el.content_desc)
        && eq(&def.xpath, &el.xpath)
}

fn substring_either_way(want: &str, have: &str) -> bool {
    !want.is_empty() && !have.is_empty() && (have.contains(want) || want.contains(have))
}

fn match_class_position<'a>(
    class: &str,
    def: &XmlLocator,
    elements: &'a [UiElement],
    tolerance: i32,
) -> Option<&'a UiElement> {
    let candidates: Vec<&UiElement> = elements
        .iter()
        .filter(|el| el.class_name == class)
        .collect();

    if candidates.len() == 1 {
        return Some(candidates[0]);
    }

    let (cx, cy) = def.bounds?.center();
    candidates
        .into_iter()
        .map(|el| {
            let dx = i64::from(el.center_x) - i64::from(cx);
            let dy = i64::from(el.center_y) - i64::from(cy);
            (el, dx.saturating_mul(dx).saturating_add(dy.saturating_mul(dy)))
        })
        .filter(|(_, dist_sq)| *dist_sq <= i64::from(tolerance) * i64::from(tolerance))
        .min_by_key(|(_, dist_sq)| *dist_sq)
        .map(|(el, _)| el)
}

/// Format element labels for not-found messages.
///
/// Shows up to 10 elements that carry some identifying text.
pub fn format_visible_elements(elements: &[UiElement]) -> String {
    let labelled: Vec<&UiElement> = elements
        .iter()
        .filter(|el| !el.text.is_empty() || !el.content_desc.is_empty() || !el.resource_id.is_empty())
        .collect();

    if labelled.is_empty() {
        return "(none)".to_string();
    }

    let shown: Vec<String> = labelled
        .iter()
        .take(10)
        .map(|el| {
            let name = if !el.text.is_empty() {
                &el.text
            } else if !el.content_desc.is_empty() {
                &el.content_desc
            } else {
                &el.resource_id
            };
            let preview: String = name.chars().take(20).collect();
            if name.chars().count() > 20 {
                format!("\"{}...\"", preview)
            } else {
                format!("\"{}\"", preview)
            }
        })
        .collect();

    let result = shown.join(", ");
    if labelled.len() > 10 {
        format!("{}, ... and {} more", result, labelled.len() - 10)
    } else {
        result
    }
}
