//! # Caller policy
//!
//! Alias substitution and blacklist/whitelist decisions are consumed by the
//! formatter and the request handler only through [`CallerPolicy`]. The
//! bundled [`ListPolicy`] reads three small text files:
//!
//! ```text
//! # alias file
//! alias 4075551212 = MOM                # number or name
//! alias NMBR 0000000000 = PRIVATE
//! alias NAME "WIRELESS CALLER" = "Cell phone"
//! alias NAME * = Dentist if 3215550000  # any name from this number
//! alias LINE 1234 = HOME
//!
//! # blacklist / whitelist
//! 8005551212 "CARD SERVICES"   #= Telemarketer
//! ```

pub mod alias;
pub mod lists;

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::ListsConfig;
use crate::protocol::NOALIAS;
use alias::AliasTable;
use lists::CallList;

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line}: {message}", path.display())]
    Parse {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// Number, name and line after alias substitution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Aliased {
    pub number: String,
    pub name: String,
    pub line: String,
}

/// Outcome of checking a completed incoming call against the lists.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HangupDecision {
    /// On the blacklist and not on the whitelist.
    pub terminate: bool,
    pub whitelisted: bool,
    /// Display name attached to the matching list entry.
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Membership {
    Neither,
    BlackName,
    WhiteName,
    BlackNumber,
    WhiteNumber,
}

impl Membership {
    pub fn as_str(self) -> &'static str {
        match self {
            Membership::Neither => "neither",
            Membership::BlackName => "black name",
            Membership::WhiteName => "white name",
            Membership::BlackNumber => "black number",
            Membership::WhiteNumber => "white number",
        }
    }
}

pub trait CallerPolicy {
    /// Apply alias substitution to a call's number, name and line.
    fn alias(&self, number: &str, name: &str, line: &str) -> Aliased;

    /// The alias text that would apply to this call, or `NOALIAS`.
    fn find_alias(&self, number: &str, name: &str, line: &str) -> String;

    fn hangup_decision(&self, name: &str, number: &str) -> HangupDecision;

    fn classify(&self, name: &str, number: &str) -> Membership;

    /// Re-read the backing data.
    fn reload(&mut self) -> Result<(), PolicyError>;
}

/// File-backed policy: one alias file plus a blacklist and a whitelist.
#[derive(Debug, Default)]
pub struct ListPolicy {
    paths: Option<ListsConfig>,
    aliases: AliasTable,
    blacklist: CallList,
    whitelist: CallList,
}

impl ListPolicy {
    /// Load all three files. Missing files count as empty.
    pub fn load(config: &ListsConfig) -> Result<Self, PolicyError> {
        let mut policy = ListPolicy {
            paths: Some(config.clone()),
            ..ListPolicy::default()
        };
        policy.reload()?;
        Ok(policy)
    }

    pub fn alias_count(&self) -> usize {
        self.aliases.len()
    }
}

fn read_optional(path: &Path) -> Result<String, PolicyError> {
    match std::fs::read_to_string(path) {
        Ok(text) => Ok(text),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::warn!("{} not found, treating it as empty", path.display());
            Ok(String::new())
        }
        Err(source) => Err(PolicyError::Read {
            path: path.to_path_buf(),
            source,
        }),
    }
}

impl CallerPolicy for ListPolicy {
    fn alias(&self, number: &str, name: &str, line: &str) -> Aliased {
        self.aliases.apply(number, name, line)
    }

    fn find_alias(&self, number: &str, name: &str, line: &str) -> String {
        self.aliases
            .find(number, name, line)
            .unwrap_or_else(|| NOALIAS.to_string())
    }

    fn hangup_decision(&self, name: &str, number: &str) -> HangupDecision {
        if let Some(white) = self.whitelist.find(name, number) {
            return HangupDecision {
                terminate: false,
                whitelisted: true,
                display_name: white.display.clone(),
            };
        }
        match self.blacklist.find(name, number) {
            Some(black) => HangupDecision {
                terminate: true,
                whitelisted: false,
                display_name: black.display.clone(),
            },
            None => HangupDecision::default(),
        }
    }

    fn classify(&self, name: &str, number: &str) -> Membership {
        if self.blacklist.matches_name(name) {
            Membership::BlackName
        } else if self.whitelist.matches_name(name) {
            Membership::WhiteName
        } else if self.blacklist.matches_number(number) {
            Membership::BlackNumber
        } else if self.whitelist.matches_number(number) {
            Membership::WhiteNumber
        } else {
            Membership::Neither
        }
    }

    fn reload(&mut self) -> Result<(), PolicyError> {
        let Some(paths) = &self.paths else {
            return Ok(());
        };
        let ignore1 = paths.ignore1;
        let aliases = AliasTable::parse(&paths.alias, &read_optional(&paths.alias)?, ignore1)?;
        let blacklist = CallList::parse(&read_optional(&paths.blacklist)?, ignore1);
        let whitelist = CallList::parse(&read_optional(&paths.whitelist)?, ignore1);
        log::info!(
            "Read {} aliases, {} blacklist and {} whitelist entries",
            aliases.len(),
            blacklist.len(),
            whitelist.len()
        );
        self.aliases = aliases;
        self.blacklist = blacklist;
        self.whitelist = whitelist;
        Ok(())
    }
}

/// Split on whitespace, keeping double-quoted runs together (quotes removed).
pub fn split_quoted(text: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;
    let mut has_word = false;
    for ch in text.chars() {
        match ch {
            '"' => {
                in_quotes = !in_quotes;
                has_word = true;
            }
            c if c.is_whitespace() && !in_quotes => {
                if has_word {
                    words.push(std::mem::take(&mut current));
                    has_word = false;
                }
            }
            c => {
                current.push(c);
                has_word = true;
            }
        }
    }
    if has_word {
        words.push(current);
    }
    words
}
