//! Channel and user modes.
//!
//! Which mode letters take a parameter is declared by the server at runtime
//! (RPL_ISUPPORT `CHANMODES` and `PREFIX`), so mode changes are interpreted
//! against a [`BehaviorTable`] rather than a hard-coded enum. Applying a
//! change is a pure function, see [`apply`].

use std::collections::BTreeMap;

mod parse;

pub use self::parse::apply;

/// How a mode letter consumes parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ModeBehavior {
    /// Boolean flag (`+t`).
    NoParam,
    /// Always takes a parameter (`+o nick`).
    Param,
    /// Takes a parameter only when set (`+l 10`, `-l`).
    ParamOnSet,
    /// Address list; unsigned mentions query the list (`+b mask`).
    List,
}

/// Current value of an applied mode.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ModeValue {
    /// Flag is set.
    Set,
    /// Single parameter of a [`ModeBehavior::ParamOnSet`] mode.
    Param(String),
    /// Ordered, duplicate-free entries of a list or parameter mode.
    List(Vec<String>),
}

/// Applied modes, keyed by mode letter.
pub type ModeMap = BTreeMap<char, ModeValue>;

/// Mode letter to behaviour mapping. Unknown letters are [`ModeBehavior::NoParam`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BehaviorTable {
    modes: BTreeMap<char, ModeBehavior>,
}

impl BehaviorTable {
    /// RFC 1459 channel modes.
    pub fn channel_defaults() -> Self {
        Self::from_groups("b", "ov", "kl", "psitnmr")
    }

    /// RFC 1459 user modes.
    pub fn user_defaults() -> Self {
        Self::from_groups("", "", "", "iwso")
    }

    /// Build from the four `CHANMODES` groups (list, param, param-on-set, flag).
    pub fn from_groups(list: &str, param: &str, param_on_set: &str, flag: &str) -> Self {
        let mut table = BehaviorTable::default();
        let groups = [
            (list, ModeBehavior::List),
            (param, ModeBehavior::Param),
            (param_on_set, ModeBehavior::ParamOnSet),
            (flag, ModeBehavior::NoParam),
        ];
        for (letters, behavior) in groups {
            for mode in letters.chars() {
                table.modes.insert(mode, behavior);
            }
        }
        table
    }

    /// Behaviour of `mode`.
    pub fn behavior(&self, mode: char) -> ModeBehavior {
        self.modes
            .get(&mode)
            .copied()
            .unwrap_or(ModeBehavior::NoParam)
    }

    /// Declare the behaviour of `mode`.
    pub fn set(&mut self, mode: char, behavior: ModeBehavior) {
        self.modes.insert(mode, behavior);
    }

    /// Letters with the given behaviour.
    pub fn modes_with(&self, behavior: ModeBehavior) -> impl Iterator<Item = char> + '_ {
        self.modes
            .iter()
            .filter(move |(_, b)| **b == behavior)
            .map(|(mode, _)| *mode)
    }
}
