//! Digital signal lines shared between simulated parts.
//!
//! Every part that produces or consumes a pin-level signal allocates one or
//! more lines from the [`IrqBus`]. A raise publishes a new value on a line and
//! propagates it to every line connected downstream, the same way a wire
//! carries a level from a button to a microcontroller pin.
//!
//! Raises are unfiltered by default: raising a line to the value it already
//! holds still counts as an event. Filtered lines drop such no-op raises.

/// Handle to one allocated signal line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct IrqId(pub u32);

impl IrqId {
    /// Address line `n` of a block returned by [`IrqBus::alloc`].
    pub fn offset(self, n: u32) -> IrqId {
        IrqId(self.0 + n)
    }
}

struct Line {
    /// Full name, `<owner>.<line>`
    name: String,
    value: u8,
    filtered: bool,
    raises: u64,
    /// Downstream lines that follow this one
    connections: Vec<IrqId>,
}

/// Pool of signal lines for one simulated board.
pub struct IrqBus {
    lines: Vec<Line>,
}

impl IrqBus {
    pub fn new() -> Self {
        IrqBus { lines: Vec::new() }
    }

    /// Allocate a contiguous block of lines named `<owner>.<name>`, all
    /// starting at `initial`. Returns the id of the first line.
    pub fn alloc(&mut self, owner: &str, names: &[&str], initial: u8) -> IrqId {
        let base = IrqId(self.lines.len() as u32);
        for name in names {
            self.lines.push(Line {
                name: format!("{}.{}", owner, name),
                value: initial,
                filtered: false,
                raises: 0,
                connections: Vec::new(),
            });
        }
        base
    }

    /// Number of allocated lines.
    pub fn len(&self) -> usize { self.lines.len() }

    pub fn is_empty(&self) -> bool { self.lines.is_empty() }

    /// Make `dst` follow every raise of `src`.
    pub fn connect(&mut self, src: IrqId, dst: IrqId) {
        if dst.0 as usize >= self.lines.len() { return; }
        if let Some(line) = self.lines.get_mut(src.0 as usize) {
            if !line.connections.contains(&dst) {
                line.connections.push(dst);
            }
        }
    }

    pub fn set_filtered(&mut self, line: IrqId, filtered: bool) {
        if let Some(l) = self.lines.get_mut(line.0 as usize) {
            l.filtered = filtered;
        }
    }

    /// Publish `value` on `line` and on everything connected to it.
    ///
    /// `observer` is called once for each line that actually took the value,
    /// upstream first. Each line is visited at most once per raise, so
    /// connection loops terminate.
    pub fn raise<F: FnMut(IrqId, u8)>(&mut self, line: IrqId, value: u8, mut observer: F) {
        let mut visited: Vec<IrqId> = Vec::new();
        let mut queue = vec![line];
        while let Some(id) = queue.pop() {
            if visited.contains(&id) { continue; }
            visited.push(id);
            let Some(l) = self.lines.get_mut(id.0 as usize) else { continue };
            if l.filtered && l.value == value { continue; }
            l.value = value;
            l.raises += 1;
            observer(id, value);
            // Reverse so connections are visited in the order they were made
            queue.extend(l.connections.iter().rev().copied());
        }
    }

    /// Current value of a line (0 for unknown ids).
    pub fn value(&self, line: IrqId) -> u8 {
        self.lines.get(line.0 as usize).map_or(0, |l| l.value)
    }

    /// Number of raise events the line has taken.
    pub fn raise_count(&self, line: IrqId) -> u64 {
        self.lines.get(line.0 as usize).map_or(0, |l| l.raises)
    }

    pub fn name(&self, line: IrqId) -> Option<&str> {
        self.lines.get(line.0 as usize).map(|l| l.name.as_str())
    }

    /// Look up a line by its full `<owner>.<line>` name.
    pub fn find(&self, name: &str) -> Option<IrqId> {
        self.lines.iter().position(|l| l.name == name).map(|i| IrqId(i as u32))
    }
}

impl Default for IrqBus {
    fn default() -> Self {
        Self::new()
    }
}
