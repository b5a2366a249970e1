use std::sync::Arc;

use image::GrayImage;

use crate::library::{ReferenceLibrary, ReferenceTemplate};
use crate::matcher::ImageMatcher;
use crate::types::{Point, StateKind};

/// Confidence a template must reach to count as present.
pub const DEFAULT_THRESHOLD: f32 = 0.90;

/// A template found on the current screen. Lives for one tick.
#[derive(Debug, Clone, Copy)]
pub struct MatchResult<'a> {
    pub template: &'a ReferenceTemplate,
    pub top_left: Point,
    pub confidence: f32,
}

impl MatchResult<'_> {
    pub fn state(&self) -> StateKind {
        self.template.state
    }

    /// Tap point: the middle of the matched region.
    pub fn center(&self) -> Point {
        Point {
            x: self.top_left.x + self.template.image.width() / 2,
            y: self.top_left.y + self.template.image.height() / 2,
        }
    }
}

pub struct Detector {
    library: Arc<ReferenceLibrary>,
    matcher: Arc<dyn ImageMatcher>,
    threshold: f32,
}

impl Detector {
    pub fn new(library: Arc<ReferenceLibrary>, matcher: Arc<dyn ImageMatcher>, threshold: f32) -> Self {
        Self { library, matcher, threshold }
    }

    pub fn library(&self) -> &ReferenceLibrary {
        &self.library
    }

    /// Every PrimaryState present on `screen`, in library priority order.
    /// Empty means nothing was recognized.
    pub fn detect(&self, screen: &GrayImage) -> Vec<MatchResult<'_>> {
        self.library
            .primaries()
            .iter()
            .filter_map(|t| self.check(screen, t))
            .collect()
    }

    /// Look for one of `state`'s sub-targets on the same screen.
    pub fn find_target(&self, screen: &GrayImage, state: StateKind, name: &str) -> Option<MatchResult<'_>> {
        let template = self.library.target(state, name)?;
        self.check(screen, template)
    }

    fn check<'a>(&'a self, screen: &GrayImage, template: &'a ReferenceTemplate) -> Option<MatchResult<'a>> {
        let found = self.matcher.find(screen, template)?;
        (found.confidence >= self.threshold).then_some(MatchResult {
            template,
            top_left: found.top_left,
            confidence: found.confidence,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::library::{ID_LOGIN, SPEEDER_ACTIVE};
    use crate::matcher::{CcoeffMatcher, MatchLocation};
    use crate::testutil::{blank, glyph, paste};

    /// Reports a fixed confidence per template name.
    struct FixedMatcher(HashMap<&'static str, f32>);

    impl ImageMatcher for FixedMatcher {
        fn find(&self, _screen: &GrayImage, t: &ReferenceTemplate) -> Option<MatchLocation> {
            self.0.get(t.name.as_str()).map(|&confidence| MatchLocation {
                top_left: Point { x: 10, y: 20 },
                confidence,
            })
        }
    }

    fn two_state_library() -> Arc<ReferenceLibrary> {
        Arc::new(
            ReferenceLibrary::builder()
                .state(StateKind::Speeder, glyph(16, 16, 1))
                .target(StateKind::Speeder, SPEEDER_ACTIVE, glyph(8, 8, 2))
                .state(StateKind::Home, glyph(16, 16, 3))
                .target(StateKind::Home, ID_LOGIN, glyph(8, 8, 4))
                .build(),
        )
    }

    #[test]
    fn test_below_threshold_is_no_match() {
        let matcher = FixedMatcher(HashMap::from([("home_screen.png", 0.85)]));
        let det = Detector::new(two_state_library(), Arc::new(matcher), DEFAULT_THRESHOLD);
        assert!(det.detect(&blank(64, 64)).is_empty());
    }

    #[test]
    fn test_threshold_is_inclusive() {
        let matcher = FixedMatcher(HashMap::from([("home_screen.png", 0.90)]));
        let det = Detector::new(two_state_library(), Arc::new(matcher), DEFAULT_THRESHOLD);
        let found = det.detect(&blank(64, 64));
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].state(), StateKind::Home);
    }

    #[test]
    fn test_matches_keep_priority_order() {
        let lib = two_state_library();
        let mut screen = blank(96, 64);
        paste(&mut screen, &lib.primaries()[1].image, 60, 30);
        paste(&mut screen, &lib.primaries()[0].image, 4, 4);
        let det = Detector::new(lib, Arc::new(CcoeffMatcher::exhaustive()), DEFAULT_THRESHOLD);
        let states: Vec<StateKind> = det.detect(&screen).iter().map(|m| m.state()).collect();
        assert_eq!(states, vec![StateKind::Speeder, StateKind::Home]);
    }

    #[test]
    fn test_sub_targets_not_searched_at_top_level() {
        let matcher = FixedMatcher(HashMap::from([(ID_LOGIN, 1.0)]));
        let det = Detector::new(two_state_library(), Arc::new(matcher), DEFAULT_THRESHOLD);
        let screen = blank(64, 64);
        assert!(det.detect(&screen).is_empty());
        let sub = det.find_target(&screen, StateKind::Home, ID_LOGIN).unwrap();
        assert_eq!(sub.center(), Point { x: 14, y: 24 });
        assert!(det.find_target(&screen, StateKind::Speeder, ID_LOGIN).is_none());
    }
}
