//! Host keyboard bindings.
//!
//! Parts ask the [`KeyController`] to route a host key to them; the frontend
//! feeds newly pressed keys to [`crate::Board::on_key`], which calls
//! [`KeyClient::on_key_press`] on every bound part. There is no matching
//! release event, so parts that need one must time it themselves.

use crate::scheduler::PartId;
use crate::SimContext;

/// A host input key. Letters are stored lower-case so `'A'` and `'a'` bind
/// the same key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key(char);

impl Key {
    pub fn new(c: char) -> Self {
        Key(c.to_ascii_lowercase())
    }

    pub fn as_char(self) -> char { self.0 }
}

impl From<char> for Key {
    fn from(c: char) -> Self {
        Key::new(c)
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            ' ' => write!(f, "Space"),
            c => write!(f, "{}", c),
        }
    }
}

/// A key a part wants to receive, with the help text shown to the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyBinding {
    pub key: Key,
    pub description: String,
}

/// Capability of parts that react to host key presses.
pub trait KeyClient {
    fn on_key_press(&mut self, ctx: &mut SimContext, key: Key);
}

struct Registration {
    key: Key,
    part: PartId,
    description: String,
}

/// Routes host keys to parts. A key may be bound to several parts and a part
/// may hold several keys.
pub struct KeyController {
    bindings: Vec<Registration>,
}

impl KeyController {
    pub fn new() -> Self {
        KeyController { bindings: Vec::new() }
    }

    pub fn register(&mut self, key: Key, part: PartId, description: &str) {
        if self.bindings.iter().any(|b| b.key == key && b.part == part) {
            log::warn!("Key '{}' already bound to part {}", key, part.0);
            return;
        }
        self.bindings.push(Registration { key, part, description: description.to_string() });
    }

    /// Parts bound to `key`, in registration order.
    pub fn dispatch(&self, key: Key) -> Vec<PartId> {
        self.bindings.iter().filter(|b| b.key == key).map(|b| b.part).collect()
    }

    pub fn is_bound(&self, key: Key) -> bool {
        self.bindings.iter().any(|b| b.key == key)
    }

    /// One `key - description` line per binding, sorted by key.
    pub fn help(&self) -> String {
        let mut sorted: Vec<&Registration> = self.bindings.iter().collect();
        sorted.sort_by_key(|b| b.key);
        sorted.iter()
            .map(|b| format!("{} - {}", b.key, b.description))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl Default for KeyController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_case_insensitive() {
        assert_eq!(Key::new('A'), Key::new('a'));
        assert_eq!(Key::from('Q').as_char(), 'q');
        assert_eq!(Key::new(' ').to_string(), "Space");
    }

    #[test]
    fn test_dispatch_many_parts() {
        let mut kc = KeyController::new();
        kc.register(Key::new('p'), PartId(0), "Push");
        kc.register(Key::new('p'), PartId(2), "Also push");
        kc.register(Key::new('r'), PartId(1), "Reset");
        assert_eq!(kc.dispatch(Key::new('P')), vec![PartId(0), PartId(2)]);
        assert_eq!(kc.dispatch(Key::new('r')), vec![PartId(1)]);
        assert!(kc.dispatch(Key::new('x')).is_empty());
        assert!(!kc.is_bound(Key::new('x')));
    }

    #[test]
    fn test_duplicate_binding_ignored() {
        let mut kc = KeyController::new();
        kc.register(Key::new('p'), PartId(0), "Push");
        kc.register(Key::new('P'), PartId(0), "Push again");
        assert_eq!(kc.dispatch(Key::new('p')).len(), 1);
    }

    #[test]
    fn test_help() {
        let mut kc = KeyController::new();
        kc.register(Key::new('r'), PartId(1), "Reset");
        kc.register(Key::new('c'), PartId(0), "Encoder push");
        assert_eq!(kc.help(), "c - Encoder push\nr - Reset");
    }
}
