//! Element resolution: selector → on-screen element.
//!
//! Xml definitions and bare aliases go through the attribute strategies in
//! [`droidpilot_core::matching`]. Image references (and aliases whose
//! definition is an image) go through the [`ImageMatcher`]; the current
//! screenshot is written to a device-scoped file first since matchers work
//! on files.
//!
//! Resolution never fails loudly: anything that goes wrong is logged and
//! reported as "not found".

use std::path::{Path, PathBuf};
use std::sync::Arc;

use droidpilot_core::locator::{LocatorDefinition, LocatorMap};
use droidpilot_core::matching::{
    match_alias, MatchStrategy, Resolution, Selector, DEFAULT_POSITION_TOLERANCE,
};
use droidpilot_core::ui::{Bounds, UiElement};
use tracing::{debug, warn};

use crate::device::ImageMatcher;
use crate::paths;
use crate::store::LocatorStore;

pub struct ElementResolver {
    locators: Arc<dyn LocatorStore>,
    matcher: Arc<dyn ImageMatcher>,
    project_dir: PathBuf,
    screenshot_path: PathBuf,
    tolerance: i32,
}

impl ElementResolver {
    pub fn new(
        locators: Arc<dyn LocatorStore>,
        matcher: Arc<dyn ImageMatcher>,
        project_dir: impl Into<PathBuf>,
        screenshot_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            locators,
            matcher,
            project_dir: project_dir.into(),
            screenshot_path: screenshot_path.into(),
            tolerance: DEFAULT_POSITION_TOLERANCE,
        }
    }

    pub fn with_tolerance(mut self, tolerance: i32) -> Self {
        self.tolerance = tolerance;
        self
    }

    /// Fresh definitions; a broken store behaves as an empty one.
    fn load_locators(&self) -> LocatorMap {
        self.locators.load().unwrap_or_else(|e| {
            warn!("Ignoring locator store: {:#}", e);
            LocatorMap::new()
        })
    }

    /// Resolve `selector` against the cached elements and screenshot.
    pub async fn resolve(
        &self,
        selector: &Selector,
        elements: &[UiElement],
        screenshot: &[u8],
    ) -> Option<Resolution> {
        let resolution = match selector {
            Selector::Point { x, y } => Some(Resolution {
                element: UiElement::with_bounds(Bounds::new(*x, *y, *x + 1, *y + 1)),
                strategy: MatchStrategy::Coordinate,
            }),
            Selector::Image { name } => {
                let template = match self.load_locators().get(name) {
                    Some(LocatorDefinition::Image { path }) => self.template_path(path),
                    _ => paths::default_image_path(&self.project_dir, name),
                };
                self.resolve_image(&template, screenshot).await
            }
            Selector::Alias { name } => {
                let locators = self.load_locators();
                match locators.get(name) {
                    Some(LocatorDefinition::Image { path }) => {
                        let template = self.template_path(path);
                        self.resolve_image(&template, screenshot).await
                    }
                    definition => match_alias(name, definition, elements, self.tolerance),
                }
            }
        };

        match &resolution {
            Some(r) => debug!(
                "Resolved {} via {:?} at ({}, {})",
                selector, r.strategy, r.element.center_x, r.element.center_y
            ),
            None => debug!("Could not resolve {}", selector),
        }
        resolution
    }

    /// Relative template paths are relative to the project.
    fn template_path(&self, path: &str) -> PathBuf {
        let path = Path::new(path);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.project_dir.join(path)
        }
    }

    async fn resolve_image(&self, template: &Path, screenshot: &[u8]) -> Option<Resolution> {
        if screenshot.is_empty() {
            warn!(
                "No screenshot available, cannot match {}",
                template.display()
            );
            return None;
        }

        if let Some(parent) = self.screenshot_path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                warn!("Failed to create {}: {}", parent.display(), e);
                return None;
            }
        }
        if let Err(e) = tokio::fs::write(&self.screenshot_path, screenshot).await {
            warn!(
                "Failed to write screenshot to {}: {}",
                self.screenshot_path.display(),
                e
            );
            return None;
        }

        let outcome = self.matcher.locate(&self.screenshot_path, template).await;
        if !outcome.success {
            debug!(
                "Image match failed for {}: {}",
                template.display(),
                outcome.error.as_deref().unwrap_or("no match")
            );
            return None;
        }

        let mut element = UiElement::with_bounds(outcome.bounds());
        element.center_x = outcome.center_x;
        element.center_y = outcome.center_y;
        element.confidence = Some(outcome.confidence);
        Some(Resolution {
            element,
            strategy: MatchStrategy::Image,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use droidpilot_core::locator::XmlLocator;

    use super::*;
    use crate::device::matcher::NullMatcher;
    use crate::device::testing::FixedMatcher;
    use crate::store::FileLocatorStore;

    fn button(id: &str, bounds: Bounds) -> UiElement {
        let mut el = UiElement::with_bounds(bounds);
        el.class_name = "android.widget.Button".into();
        el.resource_id = id.into();
        el
    }

    fn resolver_with(
        locators: LocatorMap,
        matcher: Arc<dyn ImageMatcher>,
        dir: &Path,
    ) -> ElementResolver {
        ElementResolver::new(
            Arc::new(locators),
            matcher,
            dir,
            dir.join("shots").join("device.png"),
        )
    }

    #[tokio::test]
    async fn test_point_resolves_to_itself() {
        let dir = tempfile::tempdir().unwrap();
        let resolver = resolver_with(LocatorMap::new(), Arc::new(NullMatcher), dir.path());
        let res = resolver
            .resolve(&Selector::Point { x: 200, y: 400 }, &[], &[])
            .await
            .unwrap();
        assert_eq!((res.element.center_x, res.element.center_y), (200, 400));
        assert_eq!(res.strategy, MatchStrategy::Coordinate);
    }

    #[tokio::test]
    async fn test_alias_uses_xml_definition() {
        let dir = tempfile::tempdir().unwrap();
        let mut locators = LocatorMap::new();
        locators.insert(
            "登录按钮".into(),
            LocatorDefinition::Xml(XmlLocator {
                resource_id: Some("app:id/login".into()),
                ..XmlLocator::default()
            }),
        );
        let resolver = resolver_with(locators, Arc::new(NullMatcher), dir.path());
        let elements = vec![button("app:id/login", Bounds::new(10, 20, 110, 60))];

        let res = resolver
            .resolve(
                &Selector::Alias {
                    name: "登录按钮".into(),
                },
                &elements,
                &[],
            )
            .await
            .unwrap();
        assert_eq!((res.element.center_x, res.element.center_y), (60, 40));
    }

    #[tokio::test]
    async fn test_image_reference_defaults_to_images_dir() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = Arc::new(FixedMatcher::found(300, 500, 0.91));
        let resolver = resolver_with(LocatorMap::new(), matcher.clone(), dir.path());

        let res = resolver
            .resolve(&Selector::Image { name: "logo".into() }, &[], b"png")
            .await
            .unwrap();

        assert_eq!(res.strategy, MatchStrategy::Image);
        assert_eq!((res.element.center_x, res.element.center_y), (300, 500));
        assert_eq!(res.element.confidence, Some(0.91));
        assert_eq!(
            matcher.templates(),
            vec![dir.path().join("images").join("logo.png")]
        );
        assert_eq!(
            fs::read(dir.path().join("shots").join("device.png")).unwrap(),
            b"png"
        );
    }

    #[tokio::test]
    async fn test_alias_with_image_definition_uses_matcher() {
        let dir = tempfile::tempdir().unwrap();
        let mut locators = LocatorMap::new();
        locators.insert(
            "logo".into(),
            LocatorDefinition::Image {
                path: "templates/logo.png".into(),
            },
        );
        let matcher = Arc::new(FixedMatcher::found(10, 10, 0.8));
        let resolver = resolver_with(locators, matcher.clone(), dir.path());

        let res = resolver
            .resolve(&Selector::Alias { name: "logo".into() }, &[], b"png")
            .await;
        assert!(res.is_some());
        assert_eq!(
            matcher.templates(),
            vec![dir.path().join("templates").join("logo.png")]
        );
    }

    #[tokio::test]
    async fn test_image_without_screenshot_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let matcher = Arc::new(FixedMatcher::found(1, 1, 1.0));
        let resolver = resolver_with(LocatorMap::new(), matcher.clone(), dir.path());

        let res = resolver
            .resolve(&Selector::Image { name: "logo".into() }, &[], &[])
            .await;
        assert!(res.is_none());
        assert!(matcher.templates().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_store_falls_back_to_bare_search() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("locators.json");
        fs::write(&path, "[broken").unwrap();

        let resolver = ElementResolver::new(
            Arc::new(FileLocatorStore::new(&path)),
            Arc::new(NullMatcher),
            dir.path(),
            dir.path().join("shot.png"),
        );
        let mut el = UiElement::with_bounds(Bounds::new(0, 0, 100, 100));
        el.text = "设置".into();

        let res = resolver
            .resolve(&Selector::Alias { name: "设置".into() }, &[el], &[])
            .await
            .unwrap();
        assert_eq!(res.strategy, MatchStrategy::Bare);
    }
}
