//! User-supplied pattern/replacement rules over serialized document text.
//!
//! Rules are written the way Python's `re` module expects them (that is what
//! existing rule files contain), so patterns are compiled with `fancy-regex`
//! and `\1` / `\g<name>` group references in replacements are translated.

use std::borrow::Cow;
use std::fs;
use std::path::Path;

use fancy_regex::Regex;
use log::{debug, warn};

use crate::error::{Error, Result};

const HEADER: &str = "[RegexRules]";

/// One rule as stored in a rule file.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Rule {
    pub pattern: String,
    pub replacement: String,
    pub tooltip: String,
}

impl Rule {
    pub fn new(
        pattern: impl Into<String>,
        replacement: impl Into<String>,
        tooltip: impl Into<String>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            replacement: replacement.into(),
            tooltip: tooltip.into(),
        }
    }
}

/// An ordered list of rules.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

impl RuleSet {
    /// The stock rules, in application order.
    pub fn defaults() -> Self {
        Self {
            rules: vec![
                Rule::new(r"<body\s.*?>", "<body>", "Strip body attributes"),
                Rule::new(r"<div\s.*?>", "<div>", "Strip div attributes"),
                Rule::new(r"<p\s.*?>", "<p>", "Strip p attributes"),
                Rule::new("<p>[ 　\t]", "<p>", "Remove leading space in paragraphs"),
                Rule::new(r#"<span class="tcy">(.*?)</span>"#, r"\1", "Unwrap tate-chu-yoko spans"),
                Rule::new(
                    r"(<ruby>.*?<rt>)([^・].*?)(</rt></ruby>)",
                    r"\1\2\3《\2》",
                    "Append the reading in brackets for readers without ruby support",
                ),
            ],
        }
    }

    /// Read a rule file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read rules {}: {e}", path.display())))?;
        Ok(Self::parse(&text))
    }

    /// Parse the key-block rule format.
    ///
    /// A `rule_N` line opens a block, `key=value` sets a field, and a line
    /// indented with a space or tab continues the previous field.
    pub fn parse(text: &str) -> Self {
        let mut rules = Vec::new();
        let mut current: Option<Rule> = None;
        let mut current_key: Option<String> = None;

        for line in text.lines() {
            if line.trim() == HEADER {
                continue;
            }
            if line.starts_with("rule_") {
                rules.extend(current.take().filter(|r| !r.pattern.is_empty()));
                current = Some(Rule::default());
                current_key = None;
                continue;
            }
            if line.trim().is_empty() {
                continue;
            }

            let indented = line.starts_with(' ') || line.starts_with('\t');
            if indented
                && let (Some(key), Some(rule)) = (current_key.as_deref(), current.as_mut())
                && let Some(field) = field_mut(rule, key)
            {
                field.push('\n');
                field.push_str(line.trim_start());
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim();
                let rule = current.get_or_insert_with(Rule::default);
                if let Some(field) = field_mut(rule, key) {
                    *field = value.trim().to_string();
                }
                current_key = Some(key.to_string());
            }
        }
        rules.extend(current.filter(|r| !r.pattern.is_empty()));

        Self { rules }
    }

    /// Write the rules back in the key-block format.
    pub fn to_text(&self) -> String {
        let mut out = String::from(HEADER);
        out.push('\n');
        for (i, rule) in self.rules.iter().enumerate() {
            out.push_str(&format!(
                "rule_{}\nregex={}\nreplace={}\ntooltip={}\n\n",
                i + 1,
                rule.pattern,
                rule.replacement,
                rule.tooltip.replace('\n', "\n\t"),
            ));
        }
        out.trim_end().to_string() + "\n"
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

fn field_mut<'a>(rule: &'a mut Rule, key: &str) -> Option<&'a mut String> {
    match key {
        "regex" => Some(&mut rule.pattern),
        "replace" => Some(&mut rule.replacement),
        "tooltip" => Some(&mut rule.tooltip),
        _ => None,
    }
}

/// Rules compiled once and reused for every document.
#[derive(Debug, Default)]
pub struct CompiledRules {
    rules: Vec<(Regex, String, String)>,
}

impl CompiledRules {
    /// Compile every rule. Rules that fail to compile are skipped and reported.
    pub fn compile(rules: &[Rule]) -> (Self, Vec<Error>) {
        let mut compiled = Vec::new();
        let mut errors = Vec::new();
        for rule in rules {
            if rule.pattern.trim().is_empty() {
                continue;
            }
            match Regex::new(&rule.pattern) {
                Ok(regex) => compiled.push((
                    regex,
                    translate_replacement(&rule.replacement),
                    rule.pattern.clone(),
                )),
                Err(err) => {
                    warn!("skipping rule `{}`: {err}", rule.pattern);
                    errors.push(Error::Rule {
                        pattern: rule.pattern.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
        (Self { rules: compiled }, errors)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Apply each rule in order. A rule that fails while matching leaves the
    /// text as it was and the remaining rules still run.
    pub fn apply(&self, content: &str) -> (String, Vec<Error>) {
        let mut text = content.to_string();
        let mut errors = Vec::new();
        for (regex, replacement, pattern) in &self.rules {
            let result = regex
                .try_replacen(&text, 0, replacement.as_str())
                .map(|replaced| match replaced {
                    Cow::Owned(new_text) => Some(new_text),
                    Cow::Borrowed(_) => None,
                });
            match result {
                Ok(Some(new_text)) => {
                    debug!("rule `{pattern}` changed the document");
                    text = new_text;
                }
                Ok(None) => {}
                Err(err) => {
                    warn!("rule `{pattern}` failed: {err}");
                    errors.push(Error::Rule {
                        pattern: pattern.clone(),
                        message: err.to_string(),
                    });
                }
            }
        }
        (text, errors)
    }
}

/// Apply `rules` in order to `content`.
///
/// Malformed patterns are reported and skipped; the other rules still apply.
pub fn apply_rules(content: &str, rules: &[Rule]) -> (String, Vec<Error>) {
    let (compiled, mut errors) = CompiledRules::compile(rules);
    let (text, apply_errors) = compiled.apply(content);
    errors.extend(apply_errors);
    (text, errors)
}

/// Translate a Python `re.sub` replacement into `$`-style expansion syntax.
pub fn translate_replacement(python: &str) -> String {
    let mut out = String::with_capacity(python.len());
    let mut chars = python.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '$' => out.push_str("$$"),
            '\\' => match chars.peek().copied() {
                Some(d) if d.is_ascii_digit() => {
                    let mut group = String::new();
                    while let Some(&d) = chars.peek() {
                        if !d.is_ascii_digit() || group.len() == 2 {
                            break;
                        }
                        group.push(d);
                        chars.next();
                    }
                    out.push_str(&format!("${{{group}}}"));
                }
                Some('g') => {
                    chars.next();
                    if chars.peek() == Some(&'<') {
                        chars.next();
                        let name: String = chars.by_ref().take_while(|&ch| ch != '>').collect();
                        out.push_str(&format!("${{{name}}}"));
                    } else {
                        out.push_str("\\g");
                    }
                }
                Some('n') => {
                    chars.next();
                    out.push('\n');
                }
                Some('t') => {
                    chars.next();
                    out.push('\t');
                }
                Some('\\') => {
                    chars.next();
                    out.push('\\');
                }
                _ => out.push('\\'),
            },
            _ => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_translate_replacement() {
        assert_eq!(translate_replacement(r"\1\2\3《\2》"), "${1}${2}${3}《${2}》");
        assert_eq!(translate_replacement(r"\g<word>-\g<1>"), "${word}-${1}");
        assert_eq!(translate_replacement("$5 a\\nb"), "$$5 a\nb");
        assert_eq!(translate_replacement(r"\10"), "${10}");
    }

    #[test]
    fn test_default_rules() {
        let input = r#"<body class="p-text"><p class="x">　本文<span class="tcy">12</span></p><p><ruby>漢<rt>かん</rt></ruby><ruby>点<rt>・</rt></ruby></p></body>"#;
        let (out, errors) = apply_rules(input, &RuleSet::defaults().rules);
        assert!(errors.is_empty());
        assert_eq!(
            out,
            "<body><p>本文12</p><p><ruby>漢<rt>かん</rt></ruby>《かん》<ruby>点<rt>・</rt></ruby></p></body>"
        );
    }

    #[test]
    fn test_malformed_rule_skipped() {
        let rules = vec![
            Rule::new("(unclosed", "x", ""),
            Rule::new("a", "b", ""),
        ];
        let (out, errors) = apply_rules("aaa", &rules);
        assert_eq!(out, "bbb");
        assert_eq!(errors.len(), 1);
        assert!(matches!(&errors[0], Error::Rule { pattern, .. } if pattern == "(unclosed"));
    }

    #[test]
    fn test_lookaround_and_backreference() {
        let rules = vec![Rule::new(r"(\w)\1(?=!)", r"[\1]", "")];
        let (out, _) = apply_rules("aa! bb?", &rules);
        assert_eq!(out, "[a]! bb?");
    }

    #[test]
    fn test_parse_rule_file() {
        let text = "[RegexRules]\nrule_1\nregex=<br\\s*/>\nreplace=\ntooltip=first line\n\tsecond line\n\nrule_2\nregex=\nreplace=x\n\nrule_3\nregex = a=b \nreplace=c\n";
        let set = RuleSet::parse(text);
        assert_eq!(set.len(), 2);
        assert_eq!(set.rules[0].pattern, "<br\\s*/>");
        assert_eq!(set.rules[0].replacement, "");
        assert_eq!(set.rules[0].tooltip, "first line\nsecond line");
        assert_eq!(set.rules[1].pattern, "a=b");
        assert_eq!(set.rules[1].replacement, "c");
    }

    #[test]
    fn test_to_text_parses_back() {
        let mut set = RuleSet::defaults();
        set.rules[0].tooltip = "multi\nline".into();
        let reparsed = RuleSet::parse(&set.to_text());
        assert_eq!(reparsed, set);
    }
}
