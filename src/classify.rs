//! A single compiled-regex classifier: match some text against one pattern, get back one of two
//! caller-chosen result codes.
//!
//! Grounded on `classifier_t` in `isyslog.c` (`set_regexp`/`set_results`/`classify`), generalized
//! slightly so [`crate::syslog`] is not the only caller: the result codes are plain `i32`s rather
//! than the syslog-specific `sldisposition_t`.

use regex::Regex;

use crate::error::ClassifierError;

/// One compiled rule: a regular expression plus the two result codes it yields.
#[derive(Debug)]
pub struct Classifier {
    regex: Regex,
    match_result: i32,
    no_match_result: i32,
}

impl Classifier {
    /// Compiles `pattern` once. `match_result` is returned by [`Classifier::classify`] when the
    /// pattern matches anywhere in the text; `no_match_result` otherwise.
    pub fn new(pattern: &str, match_result: i32, no_match_result: i32) -> Result<Self, ClassifierError> {
        let regex = Regex::new(pattern).map_err(ClassifierError::new)?;
        Ok(Self {
            regex,
            match_result,
            no_match_result,
        })
    }

    /// Returns `match_result` if `text` matches anywhere, else `no_match_result`.
    pub fn classify(&self, text: &str) -> i32 {
        if self.regex.is_match(text) {
            self.match_result
        } else {
            self.no_match_result
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn returns_match_result_on_a_hit() {
        let c = Classifier::new(r"^ERROR", 1, 0).unwrap();
        assert_eq!(c.classify("ERROR: disk full"), 1);
    }

    #[test]
    fn returns_no_match_result_otherwise() {
        let c = Classifier::new(r"^ERROR", 1, 0).unwrap();
        assert_eq!(c.classify("INFO: all fine"), 0);
    }

    #[test]
    fn rejects_an_invalid_pattern() {
        assert!(Classifier::new("(unclosed", 1, 0).is_err());
    }
}
