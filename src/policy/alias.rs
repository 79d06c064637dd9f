//! Alias file parsing and substitution.

use std::path::Path;

use super::{split_quoted, Aliased, PolicyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Target {
    /// Replace a matching number or a matching name.
    Either,
    Number,
    Name,
    Line,
}

#[derive(Debug, Clone)]
struct AliasRule {
    target: Target,
    from: String,
    to: String,
    /// `if` condition: the other field (name for number rules, number for
    /// name rules) must equal this.
    depend: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    rules: Vec<AliasRule>,
    ignore1: bool,
}

/// Drop the US long-distance prefix so `14075551212` equals `4075551212`.
pub(crate) fn normalize_number(number: &str, ignore1: bool) -> &str {
    if ignore1 {
        number.strip_prefix('1').unwrap_or(number)
    } else {
        number
    }
}

impl AliasTable {
    pub fn parse(path: &Path, text: &str, ignore1: bool) -> Result<Self, PolicyError> {
        let mut rules = Vec::new();
        for (idx, raw) in text.lines().enumerate() {
            let content = raw.split('#').next().unwrap_or("");
            let words = split_quoted(content);
            if words.is_empty() {
                continue;
            }
            let err = |message: &str| PolicyError::Parse {
                path: path.to_path_buf(),
                line: idx + 1,
                message: message.to_string(),
            };
            if words[0] != "alias" {
                return Err(err("expected 'alias'"));
            }
            let mut rest = &words[1..];
            let target = match rest.first().map(String::as_str) {
                Some("NMBR") => Target::Number,
                Some("NAME") => Target::Name,
                Some("LINE") => Target::Line,
                _ => Target::Either,
            };
            if target != Target::Either {
                rest = &rest[1..];
            }
            let (from, to, depend) = match rest {
                [from, eq, to] if eq == "=" => (from, to, None),
                [from, eq, to, kw, dep] if eq == "=" && kw == "if" => (from, to, Some(dep)),
                [_, eq, _, word, ..] if eq == "=" => {
                    return Err(err(&format!("missing 'if' before word: {}", word)))
                }
                _ => return Err(err("expected: alias [NMBR|NAME|LINE] <from> = <to> [if <value>]")),
            };
            if depend.is_some() && !matches!(target, Target::Number | Target::Name) {
                return Err(err("'if' is only allowed with NMBR or NAME"));
            }
            rules.push(AliasRule {
                target,
                from: from.clone(),
                to: to.clone(),
                depend: depend.cloned(),
            });
        }
        Ok(AliasTable { rules, ignore1 })
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn same_number(&self, a: &str, b: &str) -> bool {
        normalize_number(a, self.ignore1) == normalize_number(b, self.ignore1)
    }

    /// Which field a rule would rewrite for this call, if any.
    fn matches(&self, rule: &AliasRule, number: &str, name: &str, line: &str) -> Option<Target> {
        let any = rule.from == "*";
        match rule.target {
            Target::Either => {
                if self.same_number(&rule.from, number) {
                    Some(Target::Number)
                } else if rule.from == name {
                    Some(Target::Name)
                } else {
                    None
                }
            }
            Target::Number => {
                let hit = match &rule.depend {
                    Some(dep) => dep == name && (any || self.same_number(&rule.from, number)),
                    None => self.same_number(&rule.from, number),
                };
                hit.then_some(Target::Number)
            }
            Target::Name => {
                let hit = match &rule.depend {
                    Some(dep) => self.same_number(dep, number) && (any || rule.from == name),
                    None => rule.from == name,
                };
                hit.then_some(Target::Name)
            }
            Target::Line => (rule.from == line).then_some(Target::Line),
        }
    }

    pub fn apply(&self, number: &str, name: &str, line: &str) -> Aliased {
        let mut out = Aliased {
            number: number.to_string(),
            name: name.to_string(),
            line: line.to_string(),
        };
        for rule in &self.rules {
            match self.matches(rule, number, name, line) {
                Some(Target::Number) => out.number = rule.to.clone(),
                Some(Target::Name) => out.name = rule.to.clone(),
                Some(Target::Line) => out.line = rule.to.clone(),
                Some(Target::Either) | None => {}
            }
        }
        out
    }

    pub fn find(&self, number: &str, name: &str, line: &str) -> Option<String> {
        self.rules
            .iter()
            .find(|rule| self.matches(rule, number, name, line).is_some())
            .map(|rule| rule.to.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(text: &str) -> AliasTable {
        AliasTable::parse(Path::new("alias"), text, true).unwrap()
    }

    #[test]
    fn plain_alias_matches_number_or_name() {
        let t = table("alias 4075551212 = MOM\nalias \"WIRELESS CALLER\" = Cell\n");
        let a = t.apply("14075551212", "X", "-");
        assert_eq!(a.number, "MOM");
        let b = t.apply("555", "WIRELESS CALLER", "-");
        assert_eq!(b.name, "Cell");
        assert_eq!(b.number, "555");
    }

    #[test]
    fn dependent_name_alias() {
        let t = table("alias NAME * = Dentist if 3215550000 # office\n");
        assert_eq!(t.apply("3215550000", "ANYTHING", "-").name, "Dentist");
        assert_eq!(t.apply("3215550001", "ANYTHING", "-").name, "ANYTHING");
    }

    #[test]
    fn line_alias_and_find() {
        let t = table("alias LINE 1234 = HOME\n");
        assert_eq!(t.apply("1", "2", "1234").line, "HOME");
        assert_eq!(t.find("1", "2", "1234").as_deref(), Some("HOME"));
        assert_eq!(t.find("1", "2", "9"), None);
    }

    #[test]
    fn rejects_garbage() {
        let err = AliasTable::parse(Path::new("a"), "alias X = Y Z W\n", false).unwrap_err();
        assert!(err.to_string().contains("missing 'if'"));
        assert!(AliasTable::parse(Path::new("a"), "nonsense\n", false).is_err());
    }
}
