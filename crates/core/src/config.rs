//! Board configuration.
//!
//! A [`BoardConfig`] lists the buttons to assemble and the board clock. The
//! frontend builds one from `--button` options, each in the compact form
//!
//! ```text
//! NAME[:KEY][:toggle][:HOLD_US]
//! ```
//!
//! e.g. `RESET:r`, `MODE:m:toggle`, `FIRE:f:2000`.

use crate::keys::Key;
use crate::parts::DEFAULT_HOLD_USEC;
use crate::CLOCK_HZ;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonConfig {
    pub name: String,
    pub toggle: bool,
    pub key: Option<Key>,
    pub key_description: Option<String>,
    /// Momentary hold duration in microseconds
    pub hold_usec: u32,
}

impl ButtonConfig {
    pub fn new(name: &str) -> Self {
        ButtonConfig {
            name: name.to_string(),
            toggle: false,
            key: None,
            key_description: None,
            hold_usec: DEFAULT_HOLD_USEC,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoardConfig {
    pub clock_hz: u32,
    pub buttons: Vec<ButtonConfig>,
}

impl Default for BoardConfig {
    fn default() -> Self {
        BoardConfig { clock_hz: CLOCK_HZ, buttons: Vec::new() }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("button spec {0:?} has no name")]
    MissingName(String),
    #[error("button spec {spec:?}: unrecognised field {field:?}")]
    BadField { spec: String, field: String },
    #[error("button spec {0:?} binds more than one key")]
    DuplicateKey(String),
    #[error("duplicate button name {0:?}")]
    DuplicateName(String),
}

/// Parse `NAME[:KEY][:toggle][:HOLD_US]`. Fields after the name may appear in
/// any order; a single character is a key, `toggle` sets toggle mode, and a
/// number is the hold duration.
pub fn parse_button_spec(spec: &str) -> Result<ButtonConfig, ConfigError> {
    let mut fields = spec.split(':').map(str::trim);
    let name = fields.next().unwrap_or("");
    if name.is_empty() {
        return Err(ConfigError::MissingName(spec.to_string()));
    }
    let mut cfg = ButtonConfig::new(name);
    for field in fields {
        if field.eq_ignore_ascii_case("toggle") {
            cfg.toggle = true;
        } else if let Ok(usec) = field.parse::<u32>() {
            if field.len() == 1 && cfg.key.is_none() {
                // A lone digit is a key, not a hold time
                cfg.key = field.chars().next().map(Key::new);
            } else {
                cfg.hold_usec = usec;
            }
        } else if field.chars().count() == 1 {
            if cfg.key.is_some() {
                return Err(ConfigError::DuplicateKey(spec.to_string()));
            }
            cfg.key = field.chars().next().map(Key::new);
        } else {
            return Err(ConfigError::BadField { spec: spec.to_string(), field: field.to_string() });
        }
    }
    Ok(cfg)
}

impl BoardConfig {
    /// Add a button, rejecting duplicate names (they would share script actions).
    pub fn push_button(&mut self, cfg: ButtonConfig) -> Result<(), ConfigError> {
        if self.buttons.iter().any(|b| b.name == cfg.name) {
            return Err(ConfigError::DuplicateName(cfg.name));
        }
        self.buttons.push(cfg);
        Ok(())
    }

    /// Apply one hold duration to every button.
    pub fn set_hold_usec(&mut self, usec: u32) {
        for b in &mut self.buttons {
            b.hold_usec = usec;
        }
    }
}
