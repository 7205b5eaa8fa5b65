//! Applying mode change strings.

use super::{BehaviorTable, ModeBehavior, ModeMap, ModeValue};
use crate::error::{ModeParseError, ProtocolError};

/// Apply mode change tokens to `current`, returning the new map.
///
/// A `+` or `-` sets the sign for the characters that follow, in the same
/// token and in later tokens, until changed; the initial sign is `+`. Mode
/// characters take their parameter from the next unconsumed token when
/// their behaviour is [`ModeBehavior::Param`], [`ModeBehavior::List`], or
/// [`ModeBehavior::ParamOnSet`] while adding. List modes mentioned before any
/// sign are list queries and are skipped without consuming a token.
///
/// ```
/// use slirc_engine::mode::{apply, BehaviorTable, ModeMap, ModeValue};
///
/// let table = BehaviorTable::channel_defaults();
/// let modes = apply(&["+ntl", "25"], &ModeMap::new(), &table).unwrap();
/// assert_eq!(modes[&'l'], ModeValue::Param("25".to_owned()));
/// assert_eq!(modes[&'n'], ModeValue::Set);
/// ```
pub fn apply(
    tokens: &[&str],
    current: &ModeMap,
    table: &BehaviorTable,
) -> Result<ModeMap, ProtocolError> {
    let mut modes = current.clone();
    let mut adding = true;
    let mut signed = false;
    let mut remaining = tokens.iter();

    while let Some(token) = remaining.next() {
        for c in token.chars() {
            match c {
                '+' | '-' => {
                    adding = c == '+';
                    signed = true;
                    continue;
                }
                _ => {}
            }

            let behavior = table.behavior(c);
            if behavior == ModeBehavior::List && !signed {
                continue;
            }

            let takes_param = match behavior {
                ModeBehavior::Param | ModeBehavior::List => true,
                ModeBehavior::ParamOnSet => adding,
                ModeBehavior::NoParam => false,
            };
            let param = if takes_param {
                match remaining.next() {
                    Some(param) => Some(*param),
                    None => {
                        return Err(ProtocolError::InvalidModeString {
                            string: tokens.join(" "),
                            cause: ModeParseError::MissingParameter {
                                sign: if adding { '+' } else { '-' },
                                mode: c,
                            },
                        })
                    }
                }
            } else {
                None
            };

            match (behavior, param) {
                (ModeBehavior::Param | ModeBehavior::List, Some(param)) => {
                    update_list(&mut modes, c, param, adding);
                }
                (ModeBehavior::ParamOnSet, Some(param)) => {
                    modes.insert(c, ModeValue::Param(param.to_owned()));
                }
                _ if adding => {
                    modes.insert(c, ModeValue::Set);
                }
                _ => {
                    modes.remove(&c);
                }
            }
        }
    }

    Ok(modes)
}

fn update_list(modes: &mut ModeMap, mode: char, entry: &str, adding: bool) {
    if adding {
        let value = modes
            .entry(mode)
            .or_insert_with(|| ModeValue::List(Vec::new()));
        match value {
            ModeValue::List(entries) => {
                if !entries.iter().any(|e| e == entry) {
                    entries.push(entry.to_owned());
                }
            }
            other => *other = ModeValue::List(vec![entry.to_owned()]),
        }
        return;
    }

    if let Some(ModeValue::List(entries)) = modes.get_mut(&mode) {
        entries.retain(|e| e != entry);
        if entries.is_empty() {
            modes.remove(&mode);
        }
    }
}
