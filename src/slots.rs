use std::error::Error;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::formula::{compile, CompileError, Formula};

/// Which parameter lists the start and change formulas receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaLayout {
    /// start `(x, y)`, change `(r, g, b, s, x, y)`.
    #[default]
    Full,
    /// start `(x, y)`, change `(x, y, c, s)` where `c` is the channel's own value.
    Positional,
    /// start `(i)`, change `(c, s, i)` where `i` is the flat byte index.
    Indexed,
}

impl FormulaLayout {
    pub const ALL: [Self; 3] = [Self::Full, Self::Positional, Self::Indexed];

    pub fn params(self, kind: SlotKind) -> &'static [&'static str] {
        match (self, kind) {
            (Self::Full | Self::Positional, SlotKind::Start) => &["x", "y"],
            (Self::Indexed, SlotKind::Start) => &["i"],
            (Self::Full, SlotKind::Change) => &["r", "g", "b", "s", "x", "y"],
            (Self::Positional, SlotKind::Change) => &["x", "y", "c", "s"],
            (Self::Indexed, SlotKind::Change) => &["c", "s", "i"],
        }
    }

    pub fn default_text(self, slot: SlotId) -> &'static str {
        match (self, slot.kind, slot.channel) {
            (Self::Indexed, SlotKind::Start, _) => "i",
            (_, SlotKind::Start, _) => "x+y",
            (Self::Full, SlotKind::Change, Channel::Red) => "r+s",
            (Self::Full, SlotKind::Change, Channel::Green) => "g+s",
            (Self::Full, SlotKind::Change, Channel::Blue) => "b+s",
            (_, SlotKind::Change, _) => "c+s",
        }
    }

    /// `(r, g, b, s, x, y)`
    pub fn signature(self, kind: SlotKind) -> String {
        format!("({})", self.params(kind).join(", "))
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Full => "full",
            Self::Positional => "positional",
            Self::Indexed => "indexed",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    Red,
    Green,
    Blue,
}

impl Channel {
    pub const ALL: [Self; 3] = [Self::Red, Self::Green, Self::Blue];

    /// Byte offset within an RGBA pixel.
    pub fn index(self) -> usize {
        match self {
            Self::Red => 0,
            Self::Green => 1,
            Self::Blue => 2,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Self::Red => 'r',
            Self::Green => 'g',
            Self::Blue => 'b',
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Start,
    Change,
}

impl SlotKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Change => "change",
        }
    }
}

/// One of the six formula slots, written `r.start`, `b.change`, ...
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    pub channel: Channel,
    pub kind: SlotKind,
}

impl SlotId {
    pub const ALL: [Self; 6] = [
        Self::start(Channel::Red),
        Self::start(Channel::Green),
        Self::start(Channel::Blue),
        Self::change(Channel::Red),
        Self::change(Channel::Green),
        Self::change(Channel::Blue),
    ];

    pub const fn start(channel: Channel) -> Self {
        Self {
            channel,
            kind: SlotKind::Start,
        }
    }

    pub const fn change(channel: Channel) -> Self {
        Self {
            channel,
            kind: SlotKind::Change,
        }
    }
}

impl Display for SlotId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.channel.letter(), self.kind.label())
    }
}

impl FromStr for SlotId {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let (channel, kind) = raw
            .trim()
            .split_once('.')
            .ok_or_else(|| format!("slot '{raw}' must look like r.start or b.change"))?;
        let channel = match channel.to_ascii_lowercase().as_str() {
            "r" | "red" => Channel::Red,
            "g" | "green" => Channel::Green,
            "b" | "blue" => Channel::Blue,
            other => return Err(format!("unknown channel '{other}' (expected r, g or b)")),
        };
        let kind = match kind.to_ascii_lowercase().as_str() {
            "start" => SlotKind::Start,
            "change" => SlotKind::Change,
            other => return Err(format!("unknown slot kind '{other}' (expected start or change)")),
        };
        Ok(Self { channel, kind })
    }
}

/// A rejected formula, with enough context to tell the user which input was
/// wrong.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotError {
    pub slot: SlotId,
    pub signature: String,
    pub text: String,
    pub source: CompileError,
}

impl Display for SlotError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "invalid {} function for {}: {} => {} ({})",
            self.slot.kind.label(),
            self.slot.channel.letter(),
            self.signature,
            self.text,
            self.source
        )
    }
}

impl Error for SlotError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// The six active formulas plus the layout they were compiled for.
///
/// Slots are replaced wholesale. A rejected formula leaves the previous one
/// in force.
#[derive(Debug, Clone)]
pub struct FormulaSet {
    layout: FormulaLayout,
    start: [Formula; 3],
    change: [Formula; 3],
}

impl FormulaSet {
    pub fn new(layout: FormulaLayout) -> Result<Self, SlotError> {
        let build = |slot: SlotId| compile_slot(layout, slot, layout.default_text(slot));
        Ok(Self {
            layout,
            start: [
                build(SlotId::start(Channel::Red))?,
                build(SlotId::start(Channel::Green))?,
                build(SlotId::start(Channel::Blue))?,
            ],
            change: [
                build(SlotId::change(Channel::Red))?,
                build(SlotId::change(Channel::Green))?,
                build(SlotId::change(Channel::Blue))?,
            ],
        })
    }

    pub fn layout(&self) -> FormulaLayout {
        self.layout
    }

    pub fn get(&self, slot: SlotId) -> &Formula {
        match slot.kind {
            SlotKind::Start => self.start(slot.channel),
            SlotKind::Change => self.change(slot.channel),
        }
    }

    pub fn start(&self, channel: Channel) -> &Formula {
        &self.start[channel.index()]
    }

    pub fn change(&self, channel: Channel) -> &Formula {
        &self.change[channel.index()]
    }

    /// Compile `text` for `slot` and swap it in. Blank text restores the
    /// slot's default.
    pub fn set(&mut self, slot: SlotId, text: &str) -> Result<(), SlotError> {
        let text = if text.trim().is_empty() {
            self.layout.default_text(slot)
        } else {
            text
        };

        let formula = compile_slot(self.layout, slot, text).map_err(|error| {
            warn!("rejected formula: {error}");
            error
        })?;
        let target = match slot.kind {
            SlotKind::Start => &mut self.start[slot.channel.index()],
            SlotKind::Change => &mut self.change[slot.channel.index()],
        };
        *target = formula;
        Ok(())
    }

    /// Apply several edits at once, as a dialog with three inputs does.
    /// Valid edits are applied even when others fail.
    pub fn set_many<'a>(
        &mut self,
        edits: impl IntoIterator<Item = (SlotId, &'a str)>,
    ) -> Vec<SlotError> {
        edits
            .into_iter()
            .filter_map(|(slot, text)| self.set(slot, text).err())
            .collect()
    }

    pub fn reset_slot(&mut self, slot: SlotId) -> Result<(), SlotError> {
        self.set(slot, "")
    }

    /// Switch layouts. Every slot goes back to the new layout's default since
    /// the old formulas were compiled against other parameters.
    pub fn set_layout(&mut self, layout: FormulaLayout) -> Result<(), SlotError> {
        *self = Self::new(layout)?;
        Ok(())
    }
}

fn compile_slot(layout: FormulaLayout, slot: SlotId, text: &str) -> Result<Formula, SlotError> {
    compile(layout.params(slot.kind), text).map_err(|source| SlotError {
        slot,
        signature: layout.signature(slot.kind),
        text: text.to_owned(),
        source,
    })
}
