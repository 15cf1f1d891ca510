//! # avr-parts-core
//!
//! Cycle-accurate board parts for AVR simulation. A part sits next to the
//! simulated microcontroller, drives or samples its pins through signal
//! lines, and schedules its own future events on the board's cycle counter.
//!
//! ## Architecture
//!
//! - [`Board`] — Owns the parts and wires them to the shared services
//! - [`SimContext`] — Services every part operation runs against
//! - [`scheduler`] — Cycle counter and one-shot timers with cancellable handles
//! - [`irq`] — Signal lines and connections between them
//! - [`scripting`] — `Part::Action(args)` script lines and the action registry
//! - [`keys`] — Host key bindings
//! - [`telemetry`] — Traced lines, VCD output, and capture files
//! - [`parts`] — The parts themselves ([`parts::Button`])
//! - [`config`] — Board configuration and `--button` spec parsing
//!
//! Everything runs on one thread. A part operation either changes a line
//! immediately or schedules a timer; nothing blocks. Timers fire in order of
//! due cycle, each at exactly its due cycle, while the board advances.

pub mod scheduler;
pub mod irq;
pub mod scripting;
pub mod keys;
pub mod telemetry;
pub mod parts;
pub mod config;

use config::{BoardConfig, ConfigError};
use irq::{IrqBus, IrqId};
use keys::{Key, KeyClient, KeyController};
use parts::Button;
use scheduler::{PartId, Scheduler, TimerClient};
use scripting::{ActionRegistry, LineStatus, ScriptError, ScriptLine, Scriptable};
use telemetry::TelemetryHost;

/// Default board clock: 16 MHz
pub const CLOCK_HZ: u32 = 16_000_000;

/// Script target handled by the board itself.
const BOARD_TARGET: &str = "Board";

/// Shared services a part works against.
pub struct SimContext {
    pub scheduler: Scheduler,
    pub irq: IrqBus,
    pub telemetry: TelemetryHost,
}

impl SimContext {
    pub fn new(clock_hz: u32) -> Self {
        SimContext {
            scheduler: Scheduler::new(clock_hz),
            irq: IrqBus::new(),
            telemetry: TelemetryHost::new(),
        }
    }

    /// Current cycle.
    pub fn now(&self) -> u64 {
        self.scheduler.now()
    }

    /// Raise a line and record every resulting change with telemetry.
    pub fn raise_irq(&mut self, line: IrqId, value: u8) {
        let now = self.scheduler.now();
        let telemetry = &mut self.telemetry;
        self.irq.raise(line, value, |id, v| {
            log::debug!("[{}] line {} -> {}", now, id.0, v);
            telemetry.record(now, id, v);
        });
    }
}

/// A simulated board: the parts plus the services they share.
pub struct Board {
    pub ctx: SimContext,
    buttons: Vec<Button>,
    actions: ActionRegistry,
    keys: KeyController,
}

impl Board {
    pub fn new(clock_hz: u32) -> Self {
        Board {
            ctx: SimContext::new(clock_hz),
            buttons: Vec::new(),
            actions: ActionRegistry::new(),
            keys: KeyController::new(),
        }
    }

    /// Assemble a board from configuration.
    pub fn from_config(cfg: &BoardConfig) -> Result<Self, ConfigError> {
        let mut board = Board::new(cfg.clock_hz);
        for b in &cfg.buttons {
            board.add_button(Button::from_config(b))?;
        }
        Ok(board)
    }

    /// Initialise `button` on this board and publish its actions and keys.
    /// Names must be unique: they qualify script actions and line names.
    pub fn add_button(&mut self, mut button: Button) -> Result<PartId, ConfigError> {
        if self.button_by_name(button.name()).is_some() {
            return Err(ConfigError::DuplicateName(button.name().to_string()));
        }
        let id = PartId(self.buttons.len());
        button.init(&mut self.ctx, id);
        self.actions.register(id, button.script_name(), button.actions());
        for binding in button.bindings() {
            self.keys.register(binding.key, id, &binding.description);
        }
        log::debug!("Added button {} as part {}", button.name(), id.0);
        self.buttons.push(button);
        Ok(id)
    }

    pub fn button(&self, id: PartId) -> Option<&Button> {
        self.buttons.get(id.0)
    }

    pub fn button_mut(&mut self, id: PartId) -> Option<&mut Button> {
        self.buttons.get_mut(id.0)
    }

    pub fn buttons(&self) -> &[Button] {
        &self.buttons
    }

    pub fn button_by_name(&self, name: &str) -> Option<PartId> {
        self.buttons.iter().position(|b| b.name() == name).map(PartId)
    }

    /// Output level of a button (1 for unknown parts).
    pub fn button_value(&self, id: PartId) -> u8 {
        self.button(id).map_or(1, |b| b.value(&self.ctx))
    }

    /// Press a button with its configured hold duration.
    pub fn press(&mut self, id: PartId) {
        if let Some(b) = self.buttons.get_mut(id.0) {
            b.press_default(&mut self.ctx);
        }
    }

    pub fn now(&self) -> u64 {
        self.ctx.now()
    }

    /// Advance to `cycle`, firing every timer due on the way at its due cycle.
    pub fn run_until(&mut self, cycle: u64) {
        while let Some(due) = self.ctx.scheduler.pop_due(cycle) {
            self.ctx.scheduler.advance_to(due.when);
            let again = match self.buttons.get_mut(due.target.part.0) {
                Some(part) => part.on_timer(&mut self.ctx, due.target.kind, due.when),
                None => {
                    log::warn!("Timer for unknown part {}", due.target.part.0);
                    0
                }
            };
            self.ctx.scheduler.finish(due, again);
        }
        self.ctx.scheduler.advance_to(cycle);
    }

    pub fn run_cycles(&mut self, cycles: u64) {
        let end = self.now().saturating_add(cycles);
        self.run_until(end);
    }

    pub fn run_usec(&mut self, usec: u64) {
        let cycles = self.ctx.scheduler.usec_to_cycles(usec);
        self.run_cycles(cycles);
    }

    /// Route a host key press to every bound part. Returns whether any part
    /// was bound to it.
    pub fn on_key(&mut self, key: Key) -> bool {
        let parts = self.keys.dispatch(key);
        for id in &parts {
            if let Some(b) = self.buttons.get_mut(id.0) {
                b.on_key_press(&mut self.ctx, key);
            }
        }
        !parts.is_empty()
    }

    pub fn key_help(&self) -> String {
        self.keys.help()
    }

    /// Every script action, board built-ins first.
    pub fn menu(&self) -> String {
        let mut menu = String::from(
            "Board::Run(usec) - Advance simulated time\n\
             Board::RunCycles(n) - Advance by clock cycles\n\
             Board::Menu - List actions");
        if !self.actions.is_empty() {
            menu.push('\n');
            menu.push_str(&self.actions.menu());
        }
        menu
    }

    /// Run one script line. Blank lines and comments are `Finished`.
    pub fn execute_line(&mut self, line: &str) -> Result<LineStatus, ScriptError> {
        let Some(cmd) = ScriptLine::parse(line)? else {
            return Ok(LineStatus::Finished);
        };
        if cmd.target == BOARD_TARGET {
            return self.execute_board(&cmd);
        }
        let qualified = cmd.qualified();
        let (part, id) = self.actions.lookup(&qualified)
            .ok_or(ScriptError::UnknownAction(qualified))?;
        match self.buttons.get_mut(part.0) {
            Some(b) => Ok(b.process_action(&mut self.ctx, id, &cmd.args)),
            None => Ok(LineStatus::Unhandled),
        }
    }

    fn execute_board(&mut self, cmd: &ScriptLine) -> Result<LineStatus, ScriptError> {
        let count = |cmd: &ScriptLine| -> Result<u64, ScriptError> {
            let arg = cmd.args.first().map(String::as_str).unwrap_or("");
            arg.parse().map_err(|_| ScriptError::BadArgument {
                action: cmd.qualified(),
                arg: arg.to_string(),
            })
        };
        match cmd.action.as_str() {
            "Run" => self.run_usec(count(cmd)?),
            "RunCycles" => self.run_cycles(count(cmd)?),
            "Menu" => log::info!("Actions:\n{}", self.menu()),
            _ => return Err(ScriptError::UnknownAction(cmd.qualified())),
        }
        Ok(LineStatus::Finished)
    }

    /// Run a whole script, stopping at the first error. Returns the number
    /// of lines executed.
    pub fn run_script(&mut self, text: &str) -> Result<usize, (usize, ScriptError)> {
        let mut executed = 0;
        for (n, line) in text.lines().enumerate() {
            match self.execute_line(line) {
                Ok(_) => executed += 1,
                Err(e) => return Err((n + 1, e)),
            }
        }
        Ok(executed)
    }
}

impl Default for Board {
    fn default() -> Self {
        Self::new(CLOCK_HZ)
    }
}
