//! RPL_ISUPPORT (005) parsing.
//!
//! The tokens a server advertises drive the rest of the engine: `CHANMODES`
//! and `PREFIX` shape the channel [`BehaviorTable`], `CASEMAPPING` decides
//! how targets are keyed, and `NETWORK` names the network. [`ServerInfo`]
//! accumulates them across the several 005 lines a server usually sends.

use std::collections::BTreeMap;

use crate::casemap::CaseMapping;
use crate::message::Message;
use crate::mode::{BehaviorTable, ModeBehavior};

/// Numeric of RPL_ISUPPORT.
pub const RPL_ISUPPORT: u16 = 5;

/// One `KEY[=VALUE]` token; `-KEY` negations have `negated` set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct IsupportEntry<'a> {
    pub key: &'a str,
    pub value: Option<&'a str>,
    pub negated: bool,
}

/// Tokens from a single RPL_ISUPPORT line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Isupport<'a> {
    entries: Vec<IsupportEntry<'a>>,
}

impl<'a> Isupport<'a> {
    pub fn parse_params<I>(params: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let entries = params
            .into_iter()
            .filter(|p| !p.is_empty())
            .map(|p| {
                let (negated, p) = match p.strip_prefix('-') {
                    Some(rest) => (true, rest),
                    None => (false, p),
                };
                let (key, value) = match p.split_once('=') {
                    Some((key, value)) => (key, Some(value)),
                    None => (p, None),
                };
                IsupportEntry { key, value, negated }
            })
            .collect();
        Isupport { entries }
    }

    /// Tokens of a 005 message, skipping the target and the trailing blurb.
    pub fn from_message(msg: &'a Message) -> Option<Self> {
        if msg.command.numeric() != Some(RPL_ISUPPORT) || msg.params.is_empty() {
            return None;
        }
        let mut tokens = &msg.params[1..];
        if tokens.last().is_some_and(|last| last.contains(' ')) {
            tokens = &tokens[..tokens.len() - 1];
        }
        Some(Self::parse_params(tokens.iter().map(String::as_str)))
    }

    pub fn iter(&self) -> impl Iterator<Item = &IsupportEntry<'a>> {
        self.entries.iter()
    }

    pub fn get(&self, key: &str) -> Option<Option<&'a str>> {
        self.entries
            .iter()
            .rfind(|e| !e.negated && e.key.eq_ignore_ascii_case(key))
            .map(|e| e.value)
    }
}

/// `PREFIX=(ov)@+`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PrefixSpec<'a> {
    pub modes: &'a str,
    pub prefixes: &'a str,
}

impl<'a> PrefixSpec<'a> {
    pub fn parse(s: &'a str) -> Option<Self> {
        let rest = s.strip_prefix('(')?;
        let (modes, prefixes) = rest.split_once(')')?;
        if modes.chars().count() != prefixes.chars().count() {
            return None;
        }
        Some(PrefixSpec { modes, prefixes })
    }

    /// `(mode, symbol)` pairs, highest rank first.
    pub fn pairs(&self) -> impl Iterator<Item = (char, char)> + 'a {
        self.modes.chars().zip(self.prefixes.chars())
    }
}

/// `CHANMODES=A,B,C,D`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ChanModes<'a> {
    pub list: &'a str,
    pub param: &'a str,
    pub param_on_set: &'a str,
    pub flag: &'a str,
}

impl<'a> ChanModes<'a> {
    pub fn parse(s: &'a str) -> Option<Self> {
        let mut parts = s.splitn(4, ',');
        let (list, param, param_on_set) = (parts.next()?, parts.next()?, parts.next()?);
        // Extra groups after the fourth are future extensions; keep the flags only.
        let flag = parts.next()?.split(',').next().unwrap_or_default();
        Some(ChanModes {
            list,
            param,
            param_on_set,
            flag,
        })
    }
}

/// Server properties accumulated from RPL_ISUPPORT.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerInfo {
    pub casemapping: CaseMapping,
    pub network: Option<String>,
    pub channel_modes: BehaviorTable,
    /// `(mode, symbol)` pairs for nickname prefixes, highest rank first.
    pub prefixes: Vec<(char, char)>,
    tokens: BTreeMap<String, Option<String>>,
}

impl Default for ServerInfo {
    fn default() -> Self {
        ServerInfo {
            casemapping: CaseMapping::default(),
            network: None,
            channel_modes: BehaviorTable::channel_defaults(),
            prefixes: vec![('o', '@'), ('v', '+')],
            tokens: BTreeMap::new(),
        }
    }
}

impl ServerInfo {
    /// Fold one 005 line into the accumulated state.
    ///
    /// Reconfiguring `PREFIX` or `CHANMODES` only affects changes applied
    /// afterwards; stored mode maps are not reinterpreted.
    pub fn update(&mut self, isupport: &Isupport<'_>) {
        for entry in isupport.iter() {
            let key = entry.key.to_ascii_uppercase();
            if entry.negated {
                self.tokens.remove(&key);
                continue;
            }
            self.tokens.insert(key, entry.value.map(str::to_owned));
        }

        if let Some(mapping) = isupport
            .get("CASEMAPPING")
            .flatten()
            .and_then(CaseMapping::from_name)
        {
            self.casemapping = mapping;
        }
        if let Some(network) = isupport.get("NETWORK").flatten() {
            self.network = Some(network.to_owned());
        }
        if let Some(modes) = isupport.get("CHANMODES").flatten().and_then(ChanModes::parse) {
            self.channel_modes =
                BehaviorTable::from_groups(modes.list, modes.param, modes.param_on_set, modes.flag);
            for (mode, _) in &self.prefixes {
                self.channel_modes.set(*mode, ModeBehavior::Param);
            }
        }
        if let Some(spec) = isupport.get("PREFIX").flatten().and_then(PrefixSpec::parse) {
            self.prefixes = spec.pairs().collect();
            for (mode, _) in &self.prefixes {
                self.channel_modes.set(*mode, ModeBehavior::Param);
            }
        }
        for key in ["EXCEPTS", "INVEX"] {
            if let Some(value) = isupport.get(key) {
                let default = if key == "EXCEPTS" { 'e' } else { 'I' };
                let mode = value.and_then(|v| v.chars().next()).unwrap_or(default);
                self.channel_modes.set(mode, ModeBehavior::List);
            }
        }
    }

    /// Mode letter for a nickname prefix symbol such as `@`.
    pub fn prefix_mode(&self, symbol: char) -> Option<char> {
        self.prefixes
            .iter()
            .find(|(_, s)| *s == symbol)
            .map(|(mode, _)| *mode)
    }

    /// Raw value of any advertised token.
    pub fn token(&self, key: &str) -> Option<Option<&str>> {
        self.tokens
            .get(&key.to_ascii_uppercase())
            .map(Option::as_deref)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn isupport_line(tokens: &str) -> Message {
        let mut params = vec!["me".to_owned()];
        params.extend(tokens.split(' ').map(str::to_owned));
        params.push("are supported by this server".to_owned());
        Message::new(RPL_ISUPPORT, params)
    }

    #[test]
    fn test_parse_entries() {
        let msg = isupport_line("NETWORK=Example EXCEPTS -KNOCK CHANTYPES=#&");
        let isupport = Isupport::from_message(&msg).unwrap();
        assert_eq!(isupport.get("network"), Some(Some("Example")));
        assert_eq!(isupport.get("EXCEPTS"), Some(None));
        assert_eq!(isupport.get("KNOCK"), None);
        assert_eq!(isupport.iter().count(), 4);
    }

    #[test]
    fn test_not_isupport() {
        let msg = Message::new("PRIVMSG", ["#a", "hi"]);
        assert!(Isupport::from_message(&msg).is_none());
    }

    #[test]
    fn test_chanmodes_drive_behavior() {
        let msg = isupport_line("CHANMODES=beI,k,jl,imnpst PREFIX=(qaohv)~&@%+");
        let mut info = ServerInfo::default();
        info.update(&Isupport::from_message(&msg).unwrap());

        let table = &info.channel_modes;
        assert_eq!(table.behavior('I'), ModeBehavior::List);
        assert_eq!(table.behavior('k'), ModeBehavior::Param);
        assert_eq!(table.behavior('j'), ModeBehavior::ParamOnSet);
        assert_eq!(table.behavior('s'), ModeBehavior::NoParam);
        assert_eq!(table.behavior('q'), ModeBehavior::Param);
        assert_eq!(table.behavior('h'), ModeBehavior::Param);
        assert_eq!(info.prefix_mode('%'), Some('h'));
        assert_eq!(info.prefix_mode('@'), Some('o'));
    }

    #[test]
    fn test_casemapping_and_network() {
        let mut info = ServerInfo::default();
        info.update(&Isupport::from_message(&isupport_line("CASEMAPPING=ascii NETWORK=Net")).unwrap());
        assert_eq!(info.casemapping, CaseMapping::Ascii);
        assert_eq!(info.network.as_deref(), Some("Net"));
        assert_eq!(info.token("casemapping"), Some(Some("ascii")));
    }

    #[test]
    fn test_excepts_default_letter() {
        let mut info = ServerInfo::default();
        info.update(&Isupport::from_message(&isupport_line("EXCEPTS INVEX=J")).unwrap());
        assert_eq!(info.channel_modes.behavior('e'), ModeBehavior::List);
        assert_eq!(info.channel_modes.behavior('J'), ModeBehavior::List);
    }

    #[test]
    fn test_prefix_spec() {
        let spec = PrefixSpec::parse("(ov)@+").unwrap();
        assert_eq!(spec.pairs().collect::<Vec<_>>(), [('o', '@'), ('v', '+')]);
        assert!(PrefixSpec::parse("(ov)@").is_none());
        assert!(PrefixSpec::parse("@+").is_none());
    }
}
