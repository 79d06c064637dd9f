//! `MSG:` and `NOT:` lines from clients and gateways.
//!
//! Inbound: `MSG: <text> ###DATE*<d>*TIME*<t>*NAME*<n>*NMBR*<nr>*LINE*<l>*MTYPE*<m>*`,
//! where the `###` block and every field in it are optional.

use chrono::NaiveDateTime;

use super::clock::{date_nosep, time_nosep};
use crate::policy::CallerPolicy;
use crate::protocol::{extract_field, NOLINE, NONAME, NONMBR, NOTYPE};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageRecord {
    /// Label and message text, without the field block.
    pub text: String,
    pub date: String,
    pub time: String,
    pub name: String,
    pub number: String,
    pub line: String,
    pub mtype: String,
}

impl MessageRecord {
    pub fn parse(line: &str, policy: &dyn CallerPolicy, now: &NaiveDateTime) -> Self {
        let (text, block) = match line.find(" ###") {
            Some(pos) => (&line[..pos], Some(&line[pos + 1..])),
            None => (line, None),
        };
        let field = |key: &str, default: &str| -> String {
            block
                .and_then(|b| extract_field(b, key))
                .unwrap_or(default)
                .to_string()
        };

        let mut date = field("DATE", "");
        let mut time = field("TIME", "");
        let aliased = policy.alias(
            &field("NMBR", NONMBR),
            &field("NAME", NONAME),
            &field("LINE", NOLINE),
        );
        if date.is_empty() || time.is_empty() {
            date = date_nosep(now);
            time = time_nosep(now);
        }

        MessageRecord {
            text: text.to_string(),
            date,
            time,
            name: aliased.name,
            number: aliased.number,
            line: aliased.line,
            mtype: field("MTYPE", NOTYPE),
        }
    }

    pub fn render(&self) -> String {
        format!(
            "{} ***DATE*{}*TIME*{}*NAME*{}*NMBR*{}*LINE*{}*MTYPE*{}*",
            self.text, self.date, self.time, self.name, self.number, self.line, self.mtype
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::ListPolicy;
    use chrono::NaiveDate;

    fn now() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 30)
            .unwrap()
            .and_hms_opt(14, 23, 5)
            .unwrap()
    }

    #[test]
    fn bare_message_gets_defaults() {
        let rec = MessageRecord::parse("MSG: dinner is ready", &ListPolicy::default(), &now());
        assert_eq!(
            rec.render(),
            "MSG: dinner is ready ***DATE*03302024*TIME*1423*NAME*NO NAME*NMBR*NO-NUMBER*LINE*NO-LINE*MTYPE*-*"
        );
    }

    #[test]
    fn embedded_fields_are_kept() {
        let rec = MessageRecord::parse(
            "NOT: PHONE RING ###DATE*01022024*TIME*0930*NAME*BOB*NMBR*555*LINE*CELL*MTYPE*IN*",
            &ListPolicy::default(),
            &now(),
        );
        assert_eq!(rec.text, "NOT: PHONE RING");
        assert_eq!(rec.date, "01022024");
        assert_eq!(rec.time, "0930");
        assert_eq!(rec.name, "BOB");
        assert_eq!(rec.number, "555");
        assert_eq!(rec.line, "CELL");
        assert_eq!(rec.mtype, "IN");
    }

    #[test]
    fn missing_time_resynthesizes_both() {
        let rec = MessageRecord::parse(
            "MSG: x ###DATE*01022024*TIME**",
            &ListPolicy::default(),
            &now(),
        );
        assert_eq!(rec.date, "03302024");
        assert_eq!(rec.time, "1423");
    }
}
