//! Reference templates and the state → sub-target rule table.
//!
//! Template names are the asset file names. A PrimaryState template
//! identifies a whole screen; its SubTargets are the controls the
//! dispatcher looks for once that screen is recognized, and are never
//! searched at top level.

use std::collections::HashMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use image::GrayImage;

use crate::logger;
use crate::types::{StateKind, TemplateRole};

pub const SPEEDER_ACTIVE: &str = "speeder01_active.png";
pub const CLOSE_UPDATE: &str = "closeupdate.png";
pub const ID_LOGIN: &str = "idlogin.png";
pub const INPUT_ID: &str = "inputid.png";
pub const INPUT_PASSWORD: &str = "inputpass.png";
pub const SUBMIT_LOGIN: &str = "submit_login.png";
pub const VERIFY_LAYER_CLICKED: &str = "verif_layer_clicked.png";
pub const VERIFY_INPUT: &str = "test.png";
pub const VERIFY_INPUT_SECONDARY: &str = "verifinput02.png";

#[derive(Debug, Clone, Copy)]
pub struct Rule {
    pub state: StateKind,
    pub screen: &'static str,
    /// Controls searched for inside this state. A rule is excluded when
    /// any of them fails to load.
    pub targets: &'static [&'static str],
}

/// One rule per PrimaryState, in match priority order.
pub const RULES: [Rule; 6] = [
    Rule { state: StateKind::Speeder, screen: "speeder_screen.png", targets: &[SPEEDER_ACTIVE] },
    Rule { state: StateKind::UpdatePrompt, screen: "update_screen.png", targets: &[CLOSE_UPDATE] },
    Rule { state: StateKind::Home, screen: "home_screen.png", targets: &[ID_LOGIN] },
    Rule {
        state: StateKind::Login,
        screen: "login_screen.png",
        targets: &[INPUT_ID, INPUT_PASSWORD, SUBMIT_LOGIN],
    },
    Rule { state: StateKind::VerificationLayer, screen: "verif_layer_screen.png", targets: &[VERIFY_LAYER_CLICKED] },
    Rule {
        state: StateKind::VerificationInput,
        screen: "verifinput_screen.png",
        targets: &[VERIFY_INPUT, VERIFY_INPUT_SECONDARY],
    },
];

pub fn rule_for(state: StateKind) -> &'static Rule {
    // RULES covers every StateKind, in declaration order
    &RULES[StateKind::ALL.iter().position(|s| *s == state).unwrap_or_default()]
}

#[derive(Debug)]
pub struct ReferenceTemplate {
    pub name: String,
    pub image: GrayImage,
    pub role: TemplateRole,
    /// The state this template identifies (PrimaryState) or lives in (SubTarget).
    pub state: StateKind,
}

impl ReferenceTemplate {
    pub fn parent(&self) -> Option<StateKind> {
        match self.role {
            TemplateRole::PrimaryState => None,
            TemplateRole::SubTarget => Some(self.state),
        }
    }
}

/// Immutable once built; shared read-only by every worker.
#[derive(Debug, Default)]
pub struct ReferenceLibrary {
    primaries: Vec<ReferenceTemplate>,
    /// Sub-targets per state, in rule order.
    targets: HashMap<StateKind, Vec<ReferenceTemplate>>,
    excluded: Vec<(StateKind, String)>,
}

impl ReferenceLibrary {
    /// Load every rule's templates from `dir`. Rules with an unreadable
    /// template are dropped and reported once.
    pub fn load(dir: &Path) -> Result<Self> {
        if !dir.is_dir() {
            bail!("template directory {} not found", dir.display());
        }
        let mut builder = LibraryBuilder::default();
        for rule in &RULES {
            match read_luma(&dir.join(rule.screen)) {
                Ok(img) => builder = builder.state(rule.state, img),
                Err(e) => builder.failures.push((rule.state, format!("{:#}", e))),
            }
            for &name in rule.targets {
                match read_luma(&dir.join(name)) {
                    Ok(img) => builder = builder.target(rule.state, name, img),
                    Err(e) => builder.failures.push((rule.state, format!("{:#}", e))),
                }
            }
        }
        let library = builder.build();
        logger::info(&format!(
            "loaded {} state rule(s) from {}",
            library.primaries.len(),
            dir.display()
        ));
        Ok(library)
    }

    pub fn builder() -> LibraryBuilder {
        LibraryBuilder::default()
    }

    /// PrimaryState templates in priority order.
    pub fn primaries(&self) -> &[ReferenceTemplate] {
        &self.primaries
    }

    pub fn target(&self, state: StateKind, name: &str) -> Option<&ReferenceTemplate> {
        self.targets_of(state).iter().find(|t| t.name == name)
    }

    /// Loaded sub-targets of `state`, in rule order.
    pub fn targets_of(&self, state: StateKind) -> &[ReferenceTemplate] {
        self.targets.get(&state).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn has_rule(&self, state: StateKind) -> bool {
        self.primaries.iter().any(|t| t.state == state)
    }

    /// Rules dropped at build time, with the reason.
    pub fn excluded(&self) -> &[(StateKind, String)] {
        &self.excluded
    }
}

fn read_luma(path: &Path) -> Result<GrayImage> {
    let img = image::open(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(img.to_luma8())
}

/// Assembles a library from in-memory images, applying the same
/// exclusion rules as `ReferenceLibrary::load`.
#[derive(Default)]
pub struct LibraryBuilder {
    states: HashMap<StateKind, GrayImage>,
    targets: HashMap<(StateKind, &'static str), GrayImage>,
    failures: Vec<(StateKind, String)>,
}

impl LibraryBuilder {
    pub fn state(mut self, state: StateKind, image: GrayImage) -> Self {
        self.states.insert(state, image);
        self
    }

    /// `name` must be one of the targets declared for `state` in `RULES`;
    /// anything else is ignored.
    pub fn target(mut self, state: StateKind, name: &str, image: GrayImage) -> Self {
        if let Some(&known) = rule_for(state).targets.iter().find(|t| **t == name) {
            self.targets.insert((state, known), image);
        }
        self
    }

    pub fn build(mut self) -> ReferenceLibrary {
        let mut library = ReferenceLibrary::default();

        for rule in &RULES {
            let reported: Vec<String> = self
                .failures
                .iter()
                .filter(|(s, _)| *s == rule.state)
                .map(|(_, why)| why.clone())
                .collect();
            let Some(screen) = self.states.remove(&rule.state) else {
                // Absent entirely: nothing to exclude unless a load failed
                if !reported.is_empty() {
                    exclude(&mut library, rule.state, reported.join("; "));
                }
                continue;
            };

            let missing: Vec<&str> = rule
                .targets
                .iter()
                .copied()
                .filter(|t| !self.targets.contains_key(&(rule.state, *t)))
                .collect();
            if !missing.is_empty() {
                let why = if reported.is_empty() {
                    format!("missing {}", missing.join(", "))
                } else {
                    reported.join("; ")
                };
                exclude(&mut library, rule.state, why);
                continue;
            }

            library.primaries.push(ReferenceTemplate {
                name: rule.screen.to_string(),
                image: screen,
                role: TemplateRole::PrimaryState,
                state: rule.state,
            });
            let targets = rule
                .targets
                .iter()
                .filter_map(|name| {
                    let image = self.targets.remove(&(rule.state, *name))?;
                    Some(ReferenceTemplate {
                        name: name.to_string(),
                        image,
                        role: TemplateRole::SubTarget,
                        state: rule.state,
                    })
                })
                .collect();
            library.targets.insert(rule.state, targets);
        }
        library
    }
}

fn exclude(library: &mut ReferenceLibrary, state: StateKind, why: String) {
    logger::warn(&format!("rule {:?} excluded: {}", state, why));
    library.excluded.push((state, why));
}

#[cfg(test)]
mod tests {
    use super::*;

    fn img() -> GrayImage {
        GrayImage::from_fn(4, 4, |x, y| image::Luma([(x * 40 + y * 7) as u8]))
    }

    #[test]
    fn test_every_state_has_one_rule() {
        for state in StateKind::ALL {
            assert_eq!(RULES.iter().filter(|r| r.state == state).count(), 1);
            assert_eq!(rule_for(state).state, state);
        }
    }

    #[test]
    fn test_primaries_follow_rule_order() {
        let lib = ReferenceLibrary::builder()
            .state(StateKind::Home, img())
            .target(StateKind::Home, ID_LOGIN, img())
            .state(StateKind::Speeder, img())
            .target(StateKind::Speeder, SPEEDER_ACTIVE, img())
            .build();
        let order: Vec<StateKind> = lib.primaries().iter().map(|t| t.state).collect();
        assert_eq!(order, vec![StateKind::Speeder, StateKind::Home]);
        let sub = lib.target(StateKind::Home, ID_LOGIN).unwrap();
        assert_eq!(sub.role, TemplateRole::SubTarget);
        assert_eq!(sub.parent(), Some(StateKind::Home));
    }

    #[test]
    fn test_rule_missing_target_is_excluded() {
        let lib = ReferenceLibrary::builder()
            .state(StateKind::Login, img())
            .target(StateKind::Login, INPUT_ID, img())
            .build();
        assert!(!lib.has_rule(StateKind::Login));
        assert_eq!(lib.excluded().len(), 1);
        assert!(lib.excluded()[0].1.contains(INPUT_PASSWORD));
    }

    #[test]
    fn test_missing_secondary_verify_input_excludes() {
        let lib = ReferenceLibrary::builder()
            .state(StateKind::VerificationInput, img())
            .target(StateKind::VerificationInput, VERIFY_INPUT, img())
            .build();
        assert!(!lib.has_rule(StateKind::VerificationInput));
        assert!(lib.excluded()[0].1.contains(VERIFY_INPUT_SECONDARY));
    }

    #[test]
    fn test_target_of_other_state_ignored() {
        let lib = ReferenceLibrary::builder()
            .state(StateKind::Home, img())
            .target(StateKind::Home, ID_LOGIN, img())
            .target(StateKind::Home, SUBMIT_LOGIN, img())
            .build();
        assert!(lib.target(StateKind::Home, SUBMIT_LOGIN).is_none());
    }

    fn write_png(dir: &Path, name: &str) {
        img().save(dir.join(name)).unwrap();
    }

    #[test]
    fn test_load_excludes_missing_and_corrupt_rules() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        for rule in &RULES {
            write_png(root, rule.screen);
            for name in rule.targets {
                write_png(root, name);
            }
        }
        std::fs::remove_file(root.join(INPUT_PASSWORD)).unwrap();
        std::fs::write(root.join(CLOSE_UPDATE), b"not a png").unwrap();

        let lib = ReferenceLibrary::load(root).unwrap();
        let kept: Vec<StateKind> = lib.primaries().iter().map(|t| t.state).collect();
        assert_eq!(
            kept,
            vec![StateKind::Speeder, StateKind::Home, StateKind::VerificationLayer, StateKind::VerificationInput]
        );
        let excluded: Vec<StateKind> = lib.excluded().iter().map(|(s, _)| *s).collect();
        assert_eq!(excluded, vec![StateKind::UpdatePrompt, StateKind::Login]);
        assert!(lib.excluded()[0].1.contains(CLOSE_UPDATE));
        assert!(lib.excluded()[1].1.contains(INPUT_PASSWORD));
        assert!(lib.targets_of(StateKind::Login).is_empty());
        assert_eq!(lib.targets_of(StateKind::VerificationInput).len(), 2);
        assert_eq!(lib.target(StateKind::Home, ID_LOGIN).map(|t| t.image.dimensions()), Some((4, 4)));
    }

    #[test]
    fn test_load_missing_dir_fails() {
        assert!(ReferenceLibrary::load(Path::new("/nonexistent/emubot-assets")).is_err());
    }
}
