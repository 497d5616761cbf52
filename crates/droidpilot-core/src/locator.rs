//! Locator definitions: named, project-persisted descriptions of how to
//! find a UI element.
//!
//! The store is a JSON object keyed by alias:
//!
//! ```json
//! {
//!   "登录按钮": { "type": "xml", "resourceId": "app:id/login", "bounds": "[10,20][110,60]" },
//!   "logo":     { "type": "image", "path": "images/logo.png" }
//! }
//! ```
//!
//! `type` may be omitted: an entry with only a `path` is an image
//! definition, anything else is an xml definition.

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::ui::Bounds;

/// Attribute-based description of an element.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct XmlLocator {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub xpath: Option<String>,
}

impl XmlLocator {
    /// True when an attribute other than the class name is set.
    ///
    /// A class name alone describes a kind of widget, not a particular one,
    /// so it is left to the positional strategies.
    pub fn has_identity(&self) -> bool {
        self.resource_id.is_some()
            || self.content_desc.is_some()
            || self.text.is_some()
            || self.xpath.is_some()
    }

    /// True when no matchable attribute is set.
    pub fn is_blank(&self) -> bool {
        self.resource_id.is_none()
            && self.content_desc.is_none()
            && self.text.is_none()
            && self.class_name.is_none()
            && self.xpath.is_none()
    }
}

/// How to find an element: by template image or by attributes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LocatorDefinition {
    Image { path: String },
    Xml(XmlLocator),
}

/// Alias → definition, as loaded from the project store.
pub type LocatorMap = HashMap<String, LocatorDefinition>;

#[derive(Deserialize)]
#[serde(untagged)]
enum RawBounds {
    Array([i32; 4]),
    Text(String),
}

#[derive(Deserialize)]
struct RawLocator {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    path: Option<String>,
    #[serde(default, alias = "resourceId", alias = "resource-id")]
    resource_id: Option<String>,
    #[serde(default, alias = "contentDesc", alias = "content-desc")]
    content_desc: Option<String>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default, alias = "className", alias = "class")]
    class_name: Option<String>,
    #[serde(default)]
    bounds: Option<RawBounds>,
    #[serde(default)]
    xpath: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

impl TryFrom<RawLocator> for LocatorDefinition {
    type Error = String;

    fn try_from(raw: RawLocator) -> Result<Self, Self::Error> {
        let bounds = match raw.bounds {
            None => None,
            Some(RawBounds::Array([l, t, r, b])) => Some(Bounds::new(l, t, r, b)),
            Some(RawBounds::Text(s)) => Some(
                Bounds::parse_android(&s)
                    .ok_or_else(|| format!("invalid bounds '{}', expected [l,t][r,b]", s))?,
            ),
        };

        let xml = XmlLocator {
            resource_id: non_empty(raw.resource_id),
            content_desc: non_empty(raw.content_desc),
            text: non_empty(raw.text),
            class_name: non_empty(raw.class_name),
            bounds,
            xpath: non_empty(raw.xpath),
        };
        let path = non_empty(raw.path);

        let kind = raw.kind.map(|k| k.to_lowercase());
        match kind.as_deref() {
            Some("image") | Some("img") => path
                .map(|path| LocatorDefinition::Image { path })
                .ok_or_else(|| "image locator requires a 'path'".to_string()),
            Some("xml") | Some("element") => Ok(LocatorDefinition::Xml(xml)),
            Some(other) => Err(format!("unknown locator type '{}'", other)),
            None => match path {
                Some(path) if xml.is_blank() => Ok(LocatorDefinition::Image { path }),
                _ => Ok(LocatorDefinition::Xml(xml)),
            },
        }
    }
}

impl<'de> Deserialize<'de> for LocatorDefinition {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawLocator::deserialize(deserializer)?;
        LocatorDefinition::try_from(raw).map_err(serde::de::Error::custom)
    }
}

/// Parse a locator store document.
pub fn parse_locator_map(json: &str) -> serde_json::Result<LocatorMap> {
    if json.trim().is_empty() {
        return Ok(LocatorMap::new());
    }
    serde_json::from_str(json)
}
