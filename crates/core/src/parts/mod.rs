//! Simulated board parts.
//!
//! - [`Button`] — momentary or toggle push button driving one active-low line

mod button;

pub use button::{Button, ButtonAction, BUTTON_OUT, DEFAULT_HOLD_USEC};
