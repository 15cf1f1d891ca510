//! Push button part.
//!
//! Drives a single active-low output line, `BUTTON_OUT`: 1 while idle, 0
//! while pressed. Two modes:
//!
//! - **Momentary** (default): a press pulls the line low and schedules an
//!   automatic release after the hold duration. Pressing again while held
//!   restarts the countdown instead of stacking releases.
//! - **Toggle**: each press flips the line. No release is ever scheduled.
//!
//! Scripts get three actions: `Press` and `Release` produce a single edge
//! each (for holding a button across a script), while `PressAndRelease` runs
//! the momentary cycle. A bound host key also runs the momentary cycle.

use crate::irq::IrqId;
use crate::keys::{Key, KeyBinding, KeyClient};
use crate::scheduler::{PartId, TimerClient, TimerHandle, TimerKind, TimerTarget};
use crate::scripting::{ActionInfo, LineStatus, Scriptable};
use crate::telemetry::TraceCategory;
use crate::SimContext;

/// Index of the output line within the button's IRQ block.
pub const BUTTON_OUT: u32 = 0;
/// Hold duration used by key presses and `PressAndRelease`, in microseconds.
pub const DEFAULT_HOLD_USEC: u32 = 500;
/// Name used when a button is created with an empty one.
const DEFAULT_NAME: &str = "button";

const IRQ_NAMES: [&str; 1] = ["BUTTON_OUT"];

/// Script actions, by id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ButtonAction {
    Press = 0,
    Release = 1,
    PressAndRelease = 2,
}

impl ButtonAction {
    pub fn from_id(id: u32) -> Option<Self> {
        match id {
            0 => Some(ButtonAction::Press),
            1 => Some(ButtonAction::Release),
            2 => Some(ButtonAction::PressAndRelease),
            _ => None,
        }
    }

    pub fn id(self) -> u32 { self as u32 }
}

const ACTIONS: [ActionInfo; 3] = [
    ActionInfo {
        name: "Press",
        description: "Simulate pressing the button",
        id: ButtonAction::Press as u32,
    },
    ActionInfo {
        name: "Release",
        description: "Simulate releasing the button",
        id: ButtonAction::Release as u32,
    },
    ActionInfo {
        name: "PressAndRelease",
        description: "Simulate pressing and then releasing the button",
        id: ButtonAction::PressAndRelease as u32,
    },
];

/// Where the button ended up on the board. Set once by [`Button::init`].
#[derive(Debug, Clone, Copy)]
struct Wiring {
    part: PartId,
    out: IrqId,
}

pub struct Button {
    name: String,
    is_toggle: bool,
    hold_usec: u32,
    bindings: Vec<KeyBinding>,
    wiring: Option<Wiring>,
    /// Scheduled momentary release, if any
    pending_release: Option<TimerHandle>,
    /// Cycle of the last momentary press
    pressed_at: u64,
}

impl Button {
    pub fn new(name: &str) -> Self {
        let name = if name.is_empty() { DEFAULT_NAME } else { name };
        Button {
            name: name.to_string(),
            is_toggle: false,
            hold_usec: DEFAULT_HOLD_USEC,
            bindings: Vec::new(),
            wiring: None,
            pending_release: None,
            pressed_at: 0,
        }
    }

    /// Button that also answers to a host key.
    pub fn with_key(name: &str, key: Key, description: &str) -> Self {
        let mut b = Button::new(name);
        b.bind_key(key, description);
        b
    }

    pub fn from_config(cfg: &crate::config::ButtonConfig) -> Self {
        let mut b = Button::new(&cfg.name);
        b.is_toggle = cfg.toggle;
        b.hold_usec = cfg.hold_usec;
        if let Some(key) = cfg.key {
            let desc = cfg.key_description.clone()
                .unwrap_or_else(|| format!("Press {}", b.name));
            b.bind_key(key, &desc);
        }
        b
    }

    pub fn name(&self) -> &str { &self.name }

    pub fn bind_key(&mut self, key: Key, description: &str) {
        self.bindings.push(KeyBinding { key, description: description.to_string() });
    }

    pub fn bindings(&self) -> &[KeyBinding] { &self.bindings }

    /// Switch between toggle and momentary mode. Leaves the line and any
    /// pending release alone.
    pub fn set_is_toggle(&mut self, toggle: bool) {
        self.is_toggle = toggle;
    }

    pub fn is_toggle(&self) -> bool { self.is_toggle }

    pub fn set_hold_usec(&mut self, usec: u32) {
        self.hold_usec = usec;
    }

    pub fn hold_usec(&self) -> u32 { self.hold_usec }

    /// The `BUTTON_OUT` line, once initialised.
    pub fn out_line(&self) -> Option<IrqId> {
        self.wiring.map(|w| w.out.offset(BUTTON_OUT))
    }

    pub fn part_id(&self) -> Option<PartId> {
        self.wiring.map(|w| w.part)
    }

    pub fn has_pending_release(&self) -> bool {
        self.pending_release.is_some()
    }

    /// Current output level: 1 idle, 0 pressed.
    pub fn value(&self, ctx: &SimContext) -> u8 {
        self.out_line().map_or(1, |line| ctx.irq.value(line))
    }

    /// Allocate the output line and register it for tracing. Must run once,
    /// after the board's context exists and before simulation starts.
    pub fn init(&mut self, ctx: &mut SimContext, part: PartId) {
        if self.wiring.is_some() {
            log::warn!("{}: init called twice", self.name);
            return;
        }
        let out = ctx.irq.alloc(&self.name, &IRQ_NAMES, 1);
        self.wiring = Some(Wiring { part, out });
        let trace_name = format!("{}.{}", self.name, IRQ_NAMES[BUTTON_OUT as usize]);
        ctx.telemetry.add_trace(&self.name, out.offset(BUTTON_OUT), &trace_name,
            &[TraceCategory::InputPin, TraceCategory::Misc]);
    }

    fn set_line(&self, ctx: &mut SimContext, value: u8) {
        match self.out_line() {
            Some(line) => ctx.raise_irq(line, value),
            None => log::warn!("{}: not initialised, ignoring line change", self.name),
        }
    }

    /// Press the button. In momentary mode the line returns to idle `usec`
    /// simulated microseconds later; a previous pending release is dropped.
    pub fn press(&mut self, ctx: &mut SimContext, usec: u32) {
        if let Some(handle) = self.pending_release.take() {
            ctx.scheduler.cancel(handle);
        }
        let Some(wiring) = self.wiring else {
            log::warn!("{}: not initialised, ignoring press", self.name);
            return;
        };
        if self.is_toggle {
            let current = ctx.irq.value(wiring.out.offset(BUTTON_OUT));
            self.set_line(ctx, current ^ 1);
        } else {
            self.set_line(ctx, 0);
            self.pressed_at = ctx.now();
            let target = TimerTarget { part: wiring.part, kind: TimerKind::AutoRelease };
            self.pending_release = Some(ctx.scheduler.register_usec(target, usec));
            log::debug!("{}: auto-release in {} uSec", self.name, usec);
        }
    }

    /// Press with the configured hold duration.
    pub fn press_default(&mut self, ctx: &mut SimContext) {
        self.press(ctx, self.hold_usec);
    }

    /// Drive the line back to idle.
    pub fn release(&mut self, ctx: &mut SimContext) {
        self.set_line(ctx, 1);
    }

    /// Timer callback for the momentary release. Always one-shot.
    pub fn auto_release(&mut self, ctx: &mut SimContext, when: u64) -> u64 {
        self.pending_release = None;
        self.release(ctx);
        let held = ctx.scheduler.cycles_to_usec(when.saturating_sub(self.pressed_at));
        log::info!("{}: released after {} uSec (cycle {})", self.name, held, when);
        0
    }

    fn hold_from_args(&self, args: &[String]) -> u32 {
        match args.first() {
            None => self.hold_usec,
            Some(arg) => arg.parse().unwrap_or_else(|_| {
                log::warn!("{}: bad hold time {:?}, using {} uSec", self.name, arg, self.hold_usec);
                self.hold_usec
            }),
        }
    }
}

impl Scriptable for Button {
    fn script_name(&self) -> &str { &self.name }

    fn actions(&self) -> &[ActionInfo] { &ACTIONS }

    fn process_action(&mut self, ctx: &mut SimContext, id: u32, args: &[String]) -> LineStatus {
        match ButtonAction::from_id(id) {
            Some(ButtonAction::PressAndRelease) => {
                let usec = self.hold_from_args(args);
                self.press(ctx, usec);
            }
            Some(ButtonAction::Press) => self.set_line(ctx, 0),
            Some(ButtonAction::Release) => self.release(ctx),
            None => log::debug!("{}: ignoring unknown action {}", self.name, id),
        }
        LineStatus::Finished
    }
}

impl KeyClient for Button {
    fn on_key_press(&mut self, ctx: &mut SimContext, key: Key) {
        log::info!("Pressed: {} (key {})", self.name, key);
        self.press_default(ctx);
    }
}

impl TimerClient for Button {
    fn on_timer(&mut self, ctx: &mut SimContext, kind: TimerKind, when: u64) -> u64 {
        match kind {
            TimerKind::AutoRelease => self.auto_release(ctx, when),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ButtonConfig;

    fn setup(name: &str) -> (SimContext, Button) {
        let mut ctx = SimContext::new(16_000_000);
        let mut b = Button::new(name);
        b.init(&mut ctx, PartId(0));
        (ctx, b)
    }

    /// Fire whatever is due up to `cycle` straight into the button.
    fn run_to(ctx: &mut SimContext, b: &mut Button, cycle: u64) {
        while let Some(due) = ctx.scheduler.pop_due(cycle) {
            ctx.scheduler.advance_to(due.when);
            let again = b.on_timer(ctx, due.target.kind, due.when);
            ctx.scheduler.finish(due, again);
        }
        ctx.scheduler.advance_to(cycle);
    }

    #[test]
    fn test_idle_high_at_init() {
        let (ctx, b) = setup("BTN1");
        assert_eq!(b.value(&ctx), 1);
        assert_eq!(ctx.irq.name(b.out_line().unwrap()), Some("BTN1.BUTTON_OUT"));
        assert!(ctx.telemetry.is_traced(b.out_line().unwrap()));
        assert_eq!(ctx.telemetry.traces()[0].categories,
            vec![TraceCategory::InputPin, TraceCategory::Misc]);
    }

    #[test]
    fn test_uninitialised_is_idle_and_inert() {
        let mut ctx = SimContext::new(16_000_000);
        let mut b = Button::new("BTN1");
        b.press(&mut ctx, 500);
        assert_eq!(b.value(&ctx), 1);
        assert!(!b.has_pending_release());
        assert_eq!(ctx.scheduler.pending(), 0);
    }

    #[test]
    fn test_default_name() {
        assert_eq!(Button::new("").name(), "button");
    }

    #[test]
    fn test_momentary_press_releases_after_hold() {
        let (mut ctx, mut b) = setup("BTN1");
        b.press(&mut ctx, 500);
        assert_eq!(b.value(&ctx), 0);
        assert!(b.has_pending_release());
        run_to(&mut ctx, &mut b, 7999);
        assert_eq!(b.value(&ctx), 0);
        run_to(&mut ctx, &mut b, 8000);
        assert_eq!(b.value(&ctx), 1);
        assert!(!b.has_pending_release());
        assert_eq!(ctx.scheduler.pending(), 0);
        let line = b.out_line().unwrap();
        let edges: Vec<(u64, u8)> = ctx.telemetry.events_for(line).iter()
            .map(|e| (e.cycle, e.value)).collect();
        assert_eq!(edges, vec![(0, 0), (8000, 1)]);
    }

    #[test]
    fn test_repress_restarts_countdown() {
        let (mut ctx, mut b) = setup("BTN1");
        b.press(&mut ctx, 500);
        run_to(&mut ctx, &mut b, 4000);
        b.press(&mut ctx, 1000);
        assert_eq!(ctx.scheduler.pending(), 1);
        run_to(&mut ctx, &mut b, 8000);
        assert_eq!(b.value(&ctx), 0);
        run_to(&mut ctx, &mut b, 100_000);
        let line = b.out_line().unwrap();
        let releases: Vec<u64> = ctx.telemetry.events_for(line).iter()
            .filter(|e| e.value == 1).map(|e| e.cycle).collect();
        assert_eq!(releases, vec![4000 + 16_000]);
    }

    #[test]
    fn test_toggle_flips_without_timer() {
        let (mut ctx, mut b) = setup("BTN2");
        b.set_is_toggle(true);
        let mut seq = vec![b.value(&ctx)];
        for _ in 0..3 {
            b.press_default(&mut ctx);
            assert_eq!(ctx.scheduler.pending(), 0);
            seq.push(b.value(&ctx));
        }
        assert_eq!(seq, vec![1, 0, 1, 0]);
        assert_eq!(ctx.irq.raise_count(b.out_line().unwrap()), 3);
    }

    #[test]
    fn test_switch_to_toggle_keeps_pending_release() {
        let (mut ctx, mut b) = setup("BTN1");
        b.press(&mut ctx, 500);
        b.set_is_toggle(true);
        assert!(b.has_pending_release());
        assert_eq!(b.value(&ctx), 0);
        // Next press cancels the countdown and flips 0 -> 1
        b.press(&mut ctx, 500);
        assert_eq!(ctx.scheduler.pending(), 0);
        assert_eq!(b.value(&ctx), 1);
    }

    #[test]
    fn test_manual_actions_do_not_schedule() {
        let (mut ctx, mut b) = setup("BTN1");
        let none: Vec<String> = Vec::new();
        assert_eq!(b.process_action(&mut ctx, ButtonAction::Press.id(), &none), LineStatus::Finished);
        assert_eq!(b.value(&ctx), 0);
        assert_eq!(ctx.scheduler.pending(), 0);
        run_to(&mut ctx, &mut b, 1_000_000);
        assert_eq!(b.value(&ctx), 0);
        assert_eq!(b.process_action(&mut ctx, ButtonAction::Release.id(), &none), LineStatus::Finished);
        assert_eq!(b.value(&ctx), 1);
        let values: Vec<u8> = ctx.telemetry.events().iter().map(|e| e.value).collect();
        assert_eq!(values, vec![0, 1]);
    }

    #[test]
    fn test_press_and_release_action_matches_press() {
        let (mut ctx_a, mut a) = setup("BTN1");
        let (mut ctx_b, mut b) = setup("BTN1");
        a.process_action(&mut ctx_a, ButtonAction::PressAndRelease.id(), &[]);
        b.press_default(&mut ctx_b);
        run_to(&mut ctx_a, &mut a, 20_000);
        run_to(&mut ctx_b, &mut b, 20_000);
        assert_eq!(ctx_a.telemetry.events(), ctx_b.telemetry.events());
    }

    #[test]
    fn test_press_and_release_hold_argument() {
        let (mut ctx, mut b) = setup("BTN1");
        b.process_action(&mut ctx, ButtonAction::PressAndRelease.id(), &["1000".to_string()]);
        run_to(&mut ctx, &mut b, 15_999);
        assert_eq!(b.value(&ctx), 0);
        run_to(&mut ctx, &mut b, 16_000);
        assert_eq!(b.value(&ctx), 1);

        // Unparsable argument falls back to the configured hold
        b.process_action(&mut ctx, ButtonAction::PressAndRelease.id(), &["soon".to_string()]);
        run_to(&mut ctx, &mut b, 16_000 + 8000);
        assert_eq!(b.value(&ctx), 1);
    }

    #[test]
    fn test_unknown_action_is_noop() {
        let (mut ctx, mut b) = setup("BTN1");
        assert_eq!(b.process_action(&mut ctx, 99, &[]), LineStatus::Finished);
        assert_eq!(b.value(&ctx), 1);
        assert!(ctx.telemetry.events().is_empty());
    }

    #[test]
    fn test_key_press_uses_hold_setting() {
        let (mut ctx, mut b) = setup("BTN1");
        b.set_hold_usec(2000);
        b.on_key_press(&mut ctx, Key::new('b'));
        assert_eq!(b.value(&ctx), 0);
        run_to(&mut ctx, &mut b, 31_999);
        assert_eq!(b.value(&ctx), 0);
        run_to(&mut ctx, &mut b, 32_000);
        assert_eq!(b.value(&ctx), 1);
    }

    #[test]
    fn test_auto_release_is_one_shot() {
        let (mut ctx, mut b) = setup("BTN1");
        b.press(&mut ctx, 10);
        assert_eq!(b.auto_release(&mut ctx, 160), 0);
    }

    #[test]
    fn test_from_config() {
        let cfg = ButtonConfig {
            name: "RESET".into(),
            toggle: true,
            key: Some(Key::new('r')),
            key_description: None,
            hold_usec: 750,
        };
        let b = Button::from_config(&cfg);
        assert!(b.is_toggle());
        assert_eq!(b.hold_usec(), 750);
        assert_eq!(b.bindings(), &[KeyBinding { key: Key::new('r'), description: "Press RESET".into() }]);
    }

    #[test]
    fn test_action_table() {
        let b = Button::with_key("BTN1", Key::new('x'), "Push");
        let names: Vec<&str> = b.actions().iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Press", "Release", "PressAndRelease"]);
        assert_eq!(ButtonAction::from_id(2), Some(ButtonAction::PressAndRelease));
        assert_eq!(ButtonAction::from_id(3), None);
        assert_eq!(b.bindings().len(), 1);
    }
}
