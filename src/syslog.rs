//! Syslog interception facade: classify intercepted `syslog(3)` calls against caller-registered
//! rules and decide whether to fail the test, raise a soft event, count, or swallow the call.
//!
//! Grounded on `isyslog.c` in full (`slmatch_t`, `find_slmatch`, `vlogmsg`,
//! `init_syslog_intercepts`). One deliberate scope cut from the original: `syslog()` and
//! `__syslog_chk()` are C variadic functions, and stable Rust can neither define a variadic
//! `extern "C" fn` nor reconstruct an arbitrary caller's `va_list` from the fixed six-register
//! [`crate::intercept::Frame`] view this crate's intercept engine exposes. [`format_call`] expands
//! the common case — a literal message or a single `"%s"` passthrough, which covers the
//! overwhelming majority of real `syslog()` call sites — and passes any other format string
//! through unexpanded rather than guessing at undefined behavior. The classification/dispatch
//! core this module exists for is unaffected by that cut.

use std::sync::Mutex;

use crate::classify::Classifier;
use crate::error::{ClassifierError, Error};

/// The outcome [`SyslogFacade::dispatch`] selected for one intercepted call, ordered
/// `Unknown < Ignore < Count < Fail` exactly as `sldisposition_t` is in the original.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Disposition {
    Unknown = 0,
    Ignore = 1,
    Count = 2,
    Fail = 3,
}

impl Disposition {
    fn from_i32(v: i32) -> Self {
        match v {
            1 => Disposition::Ignore,
            2 => Disposition::Count,
            3 => Disposition::Fail,
            _ => Disposition::Unknown,
        }
    }
}

/// What the caller (the installed mock) should do with one intercepted log call.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Outcome {
    /// Fail the test with this composed message.
    Fail(String),
    /// No rule matched; raise a soft event carrying this composed message.
    Raise(String),
    /// A `Count` or `Ignore` rule matched; the call is swallowed silently.
    Swallowed,
}

struct Rule {
    classifier: Classifier,
    tag: i32,
    count: u32,
}

/// An ordered set of classifier rules plus their match counters, shared across every intercepted
/// `syslog`/`__syslog_chk` call in one test's child process.
#[derive(Default)]
pub struct SyslogFacade {
    rules: Mutex<Vec<Rule>>,
}

impl SyslogFacade {
    pub fn new() -> Self {
        Self::default()
    }

    /// Any message matching `pattern` fails the test.
    pub fn fail(&self, pattern: &str) -> Result<(), ClassifierError> {
        self.add_rule(pattern, Disposition::Fail, 0)
    }

    /// Any message matching `pattern` is swallowed with no test-visible effect.
    pub fn ignore(&self, pattern: &str) -> Result<(), ClassifierError> {
        self.add_rule(pattern, Disposition::Ignore, 0)
    }

    /// Any message matching `pattern` is swallowed but increments `tag`'s counter.
    pub fn count_rule(&self, pattern: &str, tag: i32) -> Result<(), ClassifierError> {
        self.add_rule(pattern, Disposition::Count, tag)
    }

    fn add_rule(&self, pattern: &str, disposition: Disposition, tag: i32) -> Result<(), ClassifierError> {
        let classifier = Classifier::new(pattern, disposition as i32, Disposition::Unknown as i32)?;
        self.rules
            .lock()
            .expect("syslog rule table poisoned")
            .push(Rule {
                classifier,
                tag,
                count: 0,
            });
        Ok(())
    }

    /// Sums the counters of every `Count` rule carrying `tag` (every rule, counted or not, when
    /// `tag < 0`). Fails if no registered rule carries `tag`.
    pub fn count(&self, tag: i32) -> Result<u32, Error> {
        let rules = self.rules.lock().expect("syslog rule table poisoned");
        let mut total = 0u32;
        let mut matched_any = false;
        for rule in rules.iter() {
            if tag < 0 || rule.tag == tag {
                total += rule.count;
                matched_any = true;
            }
        }
        if !matched_any {
            return Err(Error::UnmatchedTag(tag));
        }
        Ok(total)
    }

    /// Composes `"<priority>: <message>"` (trailing whitespace trimmed), runs every rule, and
    /// applies the highest-disposition match (ties keep the earlier-registered rule).
    pub fn dispatch(&self, priority: i32, message: &str) -> Outcome {
        let composed = compose_message(priority, message);
        let mut rules = self.rules.lock().expect("syslog rule table poisoned");

        let mut best: Option<(usize, Disposition)> = None;
        for (index, rule) in rules.iter().enumerate() {
            let dis = Disposition::from_i32(rule.classifier.classify(&composed));
            if dis == Disposition::Unknown {
                continue;
            }
            if best.map(|(_, b)| dis > b).unwrap_or(true) {
                best = Some((index, dis));
            }
        }

        match best {
            None => Outcome::Raise(composed),
            Some((_, Disposition::Fail)) => Outcome::Fail(composed),
            Some((index, Disposition::Count)) => {
                rules[index].count += 1;
                Outcome::Swallowed
            }
            Some((_, Disposition::Ignore)) => Outcome::Swallowed,
            Some((_, Disposition::Unknown)) => unreachable!("Unknown never wins best-so-far"),
        }
    }
}

fn priority_name(priority: i32) -> String {
    const NAMES: &[(i32, &str)] = &[
        (libc::LOG_EMERG, "emerg"),
        (libc::LOG_ALERT, "alert"),
        (libc::LOG_CRIT, "crit"),
        (libc::LOG_ERR, "err"),
        (libc::LOG_WARNING, "warning"),
        (libc::LOG_NOTICE, "notice"),
        (libc::LOG_INFO, "info"),
        (libc::LOG_DEBUG, "debug"),
    ];
    let level = priority & libc::LOG_PRIMASK;
    NAMES
        .iter()
        .find(|(value, _)| *value == level)
        .map(|(_, name)| name.to_string())
        .unwrap_or_else(|| level.to_string())
}

fn compose_message(priority: i32, message: &str) -> String {
    let mut composed = format!("{}: {}", priority_name(priority), message);
    let trimmed_len = composed.trim_end().len();
    composed.truncate(trimmed_len);
    composed
}

/// Expands the message an intercepted `syslog`/`__syslog_chk` call would have logged, for the two
/// call shapes that need no real `va_list` access: a literal format string with no `%` conversions,
/// and the common `syslog(prio, "%s", msg)` passthrough. Any other format string is returned
/// unexpanded (see the module-level note on why full variadic expansion is out of scope).
pub fn format_call(fmt: &str, single_string_arg: Option<&str>) -> String {
    match single_string_arg {
        Some(arg) if fmt.trim() == "%s" => arg.to_string(),
        _ => fmt.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unmatched_message_is_raised() {
        let facade = SyslogFacade::new();
        facade.fail("disk full").unwrap();
        assert_eq!(
            facade.dispatch(libc::LOG_ERR, "connection reset"),
            Outcome::Raise("err: connection reset".to_string())
        );
    }

    #[test]
    fn fail_rule_wins_over_a_weaker_overlapping_match() {
        let facade = SyslogFacade::new();
        facade.ignore("disk").unwrap();
        facade.fail("disk full").unwrap();
        assert_eq!(
            facade.dispatch(libc::LOG_CRIT, "disk full, aborting"),
            Outcome::Fail("crit: disk full, aborting".to_string())
        );
    }

    #[test]
    fn count_rule_increments_its_tag_and_swallows() {
        let facade = SyslogFacade::new();
        facade.count_rule("retry", 7).unwrap();
        assert_eq!(facade.dispatch(libc::LOG_INFO, "retry #1"), Outcome::Swallowed);
        assert_eq!(facade.dispatch(libc::LOG_INFO, "retry #2"), Outcome::Swallowed);
        assert_eq!(facade.count(7).unwrap(), 2);
        assert_eq!(facade.count(-1).unwrap(), 2);
    }

    #[test]
    fn count_on_an_unregistered_tag_is_an_error() {
        let facade = SyslogFacade::new();
        facade.count_rule("retry", 7).unwrap();
        assert!(facade.count(9).is_err());
    }

    #[test]
    fn ties_keep_the_earlier_registered_rule() {
        let facade = SyslogFacade::new();
        facade.count_rule("warn", 1).unwrap();
        facade.count_rule("warn", 2).unwrap();
        facade.dispatch(libc::LOG_WARNING, "warn: something");
        assert_eq!(facade.count(1).unwrap(), 1);
        assert_eq!(facade.count(2).unwrap(), 0);
    }

    #[test]
    fn format_call_expands_the_percent_s_passthrough() {
        assert_eq!(format_call("%s", Some("literal text")), "literal text");
        assert_eq!(format_call("plain message", None), "plain message");
    }
}
