//! State → action rules.
//!
//! Only the highest-priority recognized state is acted on per tick, and
//! only when its actionable control is itself visible on the capture.

use std::sync::Arc;

use anyhow::Result;
use image::GrayImage;

use crate::credentials::CredentialQueue;
use crate::detector::{Detector, MatchResult};
use crate::device_log::DeviceLog;
use crate::library::*;
use crate::platform::DeviceTransport;
use crate::settings::Timings;
use crate::sleep;
use crate::types::*;

/// Per-device state carried between ticks.
#[derive(Debug, Default)]
pub struct WorkerState {
    pub consecutive_no_match: u32,
    /// Credential taken at login, owned until verification hands it back.
    pub held: Option<Credential>,
}

pub struct Dispatcher {
    detector: Arc<Detector>,
    credentials: Arc<CredentialQueue>,
    timings: Timings,
}

impl Dispatcher {
    pub fn new(detector: Arc<Detector>, credentials: Arc<CredentialQueue>, timings: Timings) -> Self {
        Self { detector, credentials, timings }
    }

    pub fn detector(&self) -> &Detector {
        &self.detector
    }

    pub fn credentials(&self) -> &Arc<CredentialQueue> {
        &self.credentials
    }

    pub fn timings(&self) -> &Timings {
        &self.timings
    }

    /// Act on the first of `matches`. Returns the state acted on.
    ///
    /// A transport error stops the rule where it failed; steps already
    /// taken are not rolled back.
    pub fn dispatch(
        &self,
        device: &mut dyn DeviceTransport,
        screen: &GrayImage,
        matches: &[MatchResult<'_>],
        state: &mut WorkerState,
        log: &DeviceLog,
    ) -> Result<Option<StateKind>> {
        let Some(active) = matches.first() else {
            return Ok(None);
        };
        let kind = active.state();
        let mut ctx = Ctx { device, screen, kind, log };

        match kind {
            StateKind::Speeder => {
                ctx.tap_target(self, SPEEDER_ACTIVE, "Speeder active")?;
            }
            StateKind::UpdatePrompt => {
                ctx.tap_target(self, CLOSE_UPDATE, "Close update action performed")?;
            }
            StateKind::Home => {
                ctx.tap_target(self, ID_LOGIN, "ID login action performed")?;
            }
            StateKind::VerificationLayer => {
                ctx.tap_target(self, VERIFY_LAYER_CLICKED, "Verification layer clicked")?;
            }
            StateKind::Login => self.login(&mut ctx, state)?,
            StateKind::VerificationInput => self.verify_input(&mut ctx, state)?,
        }
        Ok(Some(kind))
    }

    fn login(&self, ctx: &mut Ctx<'_>, state: &mut WorkerState) -> Result<()> {
        if !ctx.tap_target(self, INPUT_ID, "Input ID action performed")? {
            return Ok(());
        }

        if state.held.is_none() {
            state.held = self.credentials.dequeue();
            match &state.held {
                Some(c) => ctx.log.push(format!("Credential {} taken", c.id)),
                None => {
                    ctx.log.warn("Credential pool empty, skipping login input");
                    return Ok(());
                }
            }
        }
        let Some(credential) = state.held.as_ref() else {
            return Ok(());
        };

        ctx.device.inject_text(&credential.id, TextSource::Text)?;
        sleep::sleep_ms(self.timings.login_settle_ms);

        if !ctx.tap_target(self, INPUT_PASSWORD, "Input password action performed")? {
            return Ok(());
        }
        ctx.device.inject_text(&credential.password, TextSource::Text)?;
        ctx.tap_target(self, SUBMIT_LOGIN, "Submit ID & Password")?;
        Ok(())
    }

    fn verify_input(&self, ctx: &mut Ctx<'_>, state: &mut WorkerState) -> Result<()> {
        let Some(field) = self.detector.find_target(ctx.screen, ctx.kind, VERIFY_INPUT) else {
            return Ok(());
        };
        let at = field.center();
        ctx.device.tap(at)?;
        ctx.log.push("Input verif action performed");

        let Some(credential) = state.held.as_ref() else {
            ctx.log.warn("No credential held, skipping verification answer");
            return Ok(());
        };

        // Widgets differ in which primitive they accept; send through both
        // and refocus between them.
        ctx.device.inject_text(&credential.answer, TextSource::Text)?;
        ctx.device.inject_text(&credential.answer, TextSource::Keyboard)?;
        ctx.device.tap(at)?;
        ctx.device.inject_text(&credential.answer, TextSource::Text)?;

        if let Some(credential) = state.held.take() {
            ctx.log.push(format!("Credential {} returned to pool", credential.id));
            self.credentials.enqueue_tail(credential);
        }
        sleep::sleep_ms(self.timings.verify_pause_ms);
        Ok(())
    }
}

struct Ctx<'a> {
    device: &'a mut dyn DeviceTransport,
    screen: &'a GrayImage,
    kind: StateKind,
    log: &'a DeviceLog,
}

impl Ctx<'_> {
    /// Tap `name` if it is visible, logging `done`. Returns whether it was.
    fn tap_target(&mut self, d: &Dispatcher, name: &str, done: &str) -> Result<bool> {
        let Some(found) = d.detector.find_target(self.screen, self.kind, name) else {
            return Ok(false);
        };
        self.device.tap(found.center())?;
        self.log.push(done);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::DEFAULT_THRESHOLD;
    use crate::library::ReferenceLibrary;
    use crate::matcher::CcoeffMatcher;
    use crate::platform::stub::{Action, ScreenScript, StubDevice};
    use crate::testutil::{blank, glyph, paste};

    const PRIMARY: u32 = 16;
    const TARGET: u32 = 10;

    fn primary_img(state: StateKind) -> GrayImage {
        let i = StateKind::ALL.iter().position(|s| *s == state).unwrap() as u32;
        glyph(PRIMARY, PRIMARY, 100 + i)
    }

    fn target_img(name: &str) -> GrayImage {
        let i = RULES
            .iter()
            .flat_map(|r| r.targets.iter())
            .position(|t| *t == name)
            .unwrap() as u32;
        glyph(TARGET, TARGET, 200 + i)
    }

    fn full_library() -> Arc<ReferenceLibrary> {
        let mut b = ReferenceLibrary::builder();
        for rule in &RULES {
            b = b.state(rule.state, primary_img(rule.state));
            for t in rule.targets {
                b = b.target(rule.state, t, target_img(t));
            }
        }
        Arc::new(b.build())
    }

    /// Target `i` of a state sits at (40 + 20*i, 60); tap lands at +5,+5.
    fn target_center(i: u32) -> Point {
        Point { x: 40 + 20 * i + TARGET / 2, y: 60 + TARGET / 2 }
    }

    fn screen_with(state: StateKind, targets: &[&str]) -> GrayImage {
        let mut screen = blank(160, 120);
        paste(&mut screen, &primary_img(state), 4, 4);
        for name in targets {
            let i = rule_for(state).targets.iter().position(|t| t == name).unwrap() as u32;
            paste(&mut screen, &target_img(name), 40 + 20 * i, 60);
        }
        screen
    }

    fn dispatcher(creds: usize) -> Dispatcher {
        let detector = Detector::new(
            full_library(),
            Arc::new(CcoeffMatcher::exhaustive()),
            DEFAULT_THRESHOLD,
        );
        let pool = (1..=creds)
            .map(|i| Credential::new(&format!("id{i}"), &format!("pw{i}"), &format!("ans{i}")))
            .collect();
        Dispatcher::new(Arc::new(detector), Arc::new(CredentialQueue::new(pool)), Timings::immediate())
    }

    struct Run {
        state: Option<StateKind>,
        actions: Vec<Action>,
        log: Vec<String>,
    }

    fn run(d: &Dispatcher, screen: &GrayImage, ws: &mut WorkerState) -> Run {
        let mut dev = StubDevice::new("dev", ScreenScript::default());
        let actions = dev.action_log();
        let log = DeviceLog::new("dev");
        let matches = d.detector().detect(screen);
        let state = d.dispatch(&mut dev, screen, &matches, ws, &log).unwrap();
        Run { state, actions: actions.actions(), log: log.history() }
    }

    #[test]
    fn test_single_tap_rules() {
        let table = [
            (StateKind::Speeder, SPEEDER_ACTIVE, "Speeder active"),
            (StateKind::UpdatePrompt, CLOSE_UPDATE, "Close update action performed"),
            (StateKind::Home, ID_LOGIN, "ID login action performed"),
            (StateKind::VerificationLayer, VERIFY_LAYER_CLICKED, "Verification layer clicked"),
        ];
        let d = dispatcher(1);
        for (state, target, msg) in table {
            let r = run(&d, &screen_with(state, &[target]), &mut WorkerState::default());
            assert_eq!(r.state, Some(state));
            assert_eq!(r.actions, vec![Action::Tap(target_center(0))], "{state:?}");
            assert_eq!(r.log, vec![msg.to_string()]);
        }
    }

    #[test]
    fn test_state_without_visible_target_does_nothing() {
        let d = dispatcher(1);
        let r = run(&d, &screen_with(StateKind::Home, &[]), &mut WorkerState::default());
        assert_eq!(r.state, Some(StateKind::Home));
        assert!(r.actions.is_empty());
    }

    #[test]
    fn test_only_first_state_acts() {
        let d = dispatcher(2);
        let mut screen = screen_with(StateKind::Home, &[ID_LOGIN]);
        paste(&mut screen, &primary_img(StateKind::Login), 100, 4);
        paste(&mut screen, &target_img(INPUT_ID), 40, 90);
        let r = run(&d, &screen, &mut WorkerState::default());
        assert_eq!(d.detector().detect(&screen).len(), 2);
        assert_eq!(r.state, Some(StateKind::Home));
        assert_eq!(r.actions.len(), 1);
        assert_eq!(d.credentials().len(), 2);
    }

    #[test]
    fn test_login_full_sequence() {
        let d = dispatcher(2);
        let mut ws = WorkerState::default();
        let r = run(&d, &screen_with(StateKind::Login, &[INPUT_ID, INPUT_PASSWORD, SUBMIT_LOGIN]), &mut ws);
        assert_eq!(
            r.actions,
            vec![
                Action::Tap(target_center(0)),
                Action::Text("id1".into(), TextSource::Text),
                Action::Tap(target_center(1)),
                Action::Text("pw1".into(), TextSource::Text),
                Action::Tap(target_center(2)),
            ]
        );
        assert_eq!(r.log.last().map(String::as_str), Some("Submit ID & Password"));
        assert_eq!(ws.held.as_ref().map(|c| c.id.as_str()), Some("id1"));
        assert_eq!(d.credentials().len(), 1);
    }

    #[test]
    fn test_login_reuses_held_credential() {
        let d = dispatcher(2);
        let mut ws = WorkerState::default();
        let screen = screen_with(StateKind::Login, &[INPUT_ID]);
        run(&d, &screen, &mut ws);
        let r = run(&d, &screen, &mut ws);
        assert_eq!(r.actions[1], Action::Text("id1".into(), TextSource::Text));
        assert_eq!(d.credentials().len(), 1);
    }

    #[test]
    fn test_login_with_empty_pool_skips_text() {
        let d = dispatcher(0);
        let mut ws = WorkerState::default();
        let r = run(&d, &screen_with(StateKind::Login, &[INPUT_ID, INPUT_PASSWORD]), &mut ws);
        assert_eq!(r.actions, vec![Action::Tap(target_center(0))]);
        assert!(ws.held.is_none());
        assert_eq!(r.log.last().map(String::as_str), Some("Credential pool empty, skipping login input"));
    }

    #[test]
    fn test_verification_answers_and_requeues() {
        let d = dispatcher(2);
        let mut ws = WorkerState { held: d.credentials().dequeue(), ..Default::default() };
        let r = run(&d, &screen_with(StateKind::VerificationInput, &[VERIFY_INPUT, VERIFY_INPUT_SECONDARY]), &mut ws);
        let tap = Action::Tap(target_center(0));
        assert_eq!(
            r.actions,
            vec![
                tap.clone(),
                Action::Text("ans1".into(), TextSource::Text),
                Action::Text("ans1".into(), TextSource::Keyboard),
                tap,
                Action::Text("ans1".into(), TextSource::Text),
            ]
        );
        assert!(ws.held.is_none());
        assert_eq!(d.credentials().ids(), vec!["id2", "id1"]);
        assert_eq!(r.log[0], "Input verif action performed");
    }

    #[test]
    fn test_verification_ignores_secondary_field() {
        let d = dispatcher(1);
        let mut ws = WorkerState { held: d.credentials().dequeue(), ..Default::default() };
        let r = run(&d, &screen_with(StateKind::VerificationInput, &[VERIFY_INPUT_SECONDARY]), &mut ws);
        assert_eq!(r.state, Some(StateKind::VerificationInput));
        assert!(r.actions.is_empty());
        assert!(r.log.is_empty());
        assert!(ws.held.is_some());
        assert_eq!(d.credentials().len(), 0);
    }

    #[test]
    fn test_verification_without_credential_only_taps() {
        let d = dispatcher(1);
        let r = run(&d, &screen_with(StateKind::VerificationInput, &[VERIFY_INPUT]), &mut WorkerState::default());
        assert_eq!(r.actions, vec![Action::Tap(target_center(0))]);
        assert_eq!(r.log.last().map(String::as_str), Some("No credential held, skipping verification answer"));
    }

    #[test]
    fn test_transport_failure_keeps_credential_held() {
        let d = dispatcher(1);
        let mut ws = WorkerState { held: d.credentials().dequeue(), ..Default::default() };
        let mut dev = StubDevice::new("dev", ScreenScript::default()).failing_taps();
        let log = DeviceLog::new("dev");
        let screen = screen_with(StateKind::VerificationInput, &[VERIFY_INPUT]);
        let matches = d.detector().detect(&screen);
        assert!(d.dispatch(&mut dev, &screen, &matches, &mut ws, &log).is_err());
        assert!(ws.held.is_some());
        assert_eq!(d.credentials().len(), 0);
    }

    #[test]
    fn test_no_matches_is_none() {
        let d = dispatcher(1);
        let r = run(&d, &blank(160, 120), &mut WorkerState::default());
        assert_eq!(r.state, None);
        assert!(r.actions.is_empty());
    }
}
