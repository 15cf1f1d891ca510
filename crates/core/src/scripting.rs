//! Scriptable actions and the console registry.
//!
//! Parts publish named actions (`BTN1::Press`, `BTN1::Release`, ...) through
//! the [`ActionRegistry`]. Script files and the interactive console issue
//! lines of the form
//!
//! ```text
//! Part::Action
//! Part::Action(arg1, arg2)
//! # comment
//! ```
//!
//! which the board resolves to a part and action id and hands to
//! [`Scriptable::process_action`].

use crate::scheduler::PartId;
use crate::SimContext;
use thiserror::Error;

/// Result of running one script line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// Action completed; continue with the next line
    Finished,
    /// Action still running; re-issue the line on the next step
    Waiting,
    /// Action failed
    Error,
    /// No part claimed the action
    Unhandled,
}

/// An action a part exposes to scripts and menus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActionInfo {
    pub name: &'static str,
    pub description: &'static str,
    pub id: u32,
}

/// Capability of parts that can be driven from scripts.
pub trait Scriptable {
    /// Prefix used in script lines (`<name>::Action`).
    fn script_name(&self) -> &str;

    /// Actions this part exposes.
    fn actions(&self) -> &[ActionInfo];

    /// Run action `id`. Unknown ids must be ignored.
    fn process_action(&mut self, ctx: &mut SimContext, id: u32, args: &[String]) -> LineStatus;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ScriptError {
    #[error("line {0:?} is not of the form Part::Action(args)")]
    Malformed(String),
    #[error("unterminated argument list in {0:?}")]
    Unterminated(String),
    #[error("unknown action {0}")]
    UnknownAction(String),
    #[error("bad argument {arg:?} for {action}")]
    BadArgument { action: String, arg: String },
}

/// A parsed `Part::Action(args)` line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptLine {
    pub target: String,
    pub action: String,
    pub args: Vec<String>,
}

impl ScriptLine {
    /// Parse one line. Blank lines and `#` comments yield `Ok(None)`.
    pub fn parse(line: &str) -> Result<Option<ScriptLine>, ScriptError> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return Ok(None);
        }
        let (head, args) = match line.find('(') {
            Some(open) => {
                let Some(inner) = line[open + 1..].strip_suffix(')') else {
                    return Err(ScriptError::Unterminated(line.to_string()));
                };
                let args: Vec<String> = if inner.trim().is_empty() {
                    Vec::new()
                } else {
                    inner.split(',').map(|a| a.trim().to_string()).collect()
                };
                (&line[..open], args)
            }
            None => (line, Vec::new()),
        };
        let (target, action) = head.split_once("::")
            .ok_or_else(|| ScriptError::Malformed(line.to_string()))?;
        let (target, action) = (target.trim(), action.trim());
        if target.is_empty() || action.is_empty() || action.contains("::") {
            return Err(ScriptError::Malformed(line.to_string()));
        }
        Ok(Some(ScriptLine { target: target.to_string(), action: action.to_string(), args }))
    }

    /// `Part::Action` key used by the registry.
    pub fn qualified(&self) -> String {
        format!("{}::{}", self.target, self.action)
    }
}

struct Entry {
    qualified: String,
    description: &'static str,
    part: PartId,
    id: u32,
}

/// Every action registered on the board, in registration order.
pub struct ActionRegistry {
    entries: Vec<Entry>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        ActionRegistry { entries: Vec::new() }
    }

    /// Publish `actions` of `part` under `script_name`.
    pub fn register(&mut self, part: PartId, script_name: &str, actions: &[ActionInfo]) {
        for a in actions {
            let qualified = format!("{}::{}", script_name, a.name);
            if self.entries.iter().any(|e| e.qualified == qualified) {
                log::warn!("Action {} registered twice, keeping the first", qualified);
                continue;
            }
            log::debug!("Registered action {}", qualified);
            self.entries.push(Entry { qualified, description: a.description, part, id: a.id });
        }
    }

    /// Resolve `Part::Action` to the owning part and action id.
    pub fn lookup(&self, qualified: &str) -> Option<(PartId, u32)> {
        self.entries.iter().find(|e| e.qualified == qualified).map(|e| (e.part, e.id))
    }

    pub fn len(&self) -> usize { self.entries.len() }

    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    /// One `Part::Action - description` line per action.
    pub fn menu(&self) -> String {
        self.entries.iter()
            .map(|e| format!("{} - {}", e.qualified, e.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
