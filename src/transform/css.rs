//! Stylesheet scanning with cssparser.
//!
//! Provides utilities for:
//! - Rewriting `url(...)` references
//! - Listing style rules (selector text and declarations)
//! - Pulling class names out of selectors

use std::ops::Range;

use cssparser::{ParseError, Parser, ParserInput, Token};

type CssParseError<'i> = ParseError<'i, ()>;

/// Rewrite URLs in CSS.
///
/// `rewriter` returns the replacement for a URL, or `None` to keep it.
/// Rewritten references are written as `url("...")`. Returns the new text
/// and the number of references replaced.
pub fn rewrite_css_urls<F>(css: &str, mut rewriter: F) -> (String, usize)
where
    F: FnMut(&str) -> Option<String>,
{
    let mut found = Vec::new();
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    collect_urls(&mut parser, &mut found);

    let mut result = css.to_string();
    let mut changed = 0;
    // Apply replacements in reverse order so earlier ranges stay valid
    for (range, url) in found.into_iter().rev() {
        if let Some(new_url) = rewriter(&url)
            && new_url != url
        {
            result.replace_range(range, &format!("url(\"{new_url}\")"));
            changed += 1;
        }
    }
    (result, changed)
}

fn collect_urls(parser: &mut Parser, found: &mut Vec<(Range<usize>, String)>) {
    loop {
        let start = parser.position().byte_index();
        let token = match parser.next_including_whitespace_and_comments() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        match token {
            Token::UnquotedUrl(url) => {
                found.push((start..parser.position().byte_index(), url.to_string()));
            }
            Token::Function(name) if name.eq_ignore_ascii_case("url") => {
                let url = parser
                    .parse_nested_block(|p| {
                        let url = match p.next() {
                            Ok(Token::QuotedString(s)) => Some(s.to_string()),
                            _ => None,
                        };
                        while p.next().is_ok() {}
                        Ok::<_, CssParseError>(url)
                    })
                    .ok()
                    .flatten();
                if let Some(url) = url {
                    found.push((start..parser.position().byte_index(), url));
                }
            }
            Token::Function(_)
            | Token::CurlyBracketBlock
            | Token::ParenthesisBlock
            | Token::SquareBracketBlock => {
                let _ = parser.parse_nested_block(|p| {
                    collect_urls(p, found);
                    Ok::<_, CssParseError>(())
                });
            }
            _ => {}
        }
    }
}

/// One style rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyleRule {
    /// Selector list as written.
    pub selector: String,
    pub declarations: Vec<String>,
}

/// Every style rule in a stylesheet, including those inside conditional
/// group rules such as `@media`. Other at-rules are skipped.
pub fn style_rules(css: &str) -> Vec<StyleRule> {
    let mut rules = Vec::new();
    let mut input = ParserInput::new(css);
    let mut parser = Parser::new(&mut input);
    collect_rules(&mut parser, &mut rules);
    rules
}

fn collect_rules(parser: &mut Parser, rules: &mut Vec<StyleRule>) {
    let mut prelude_start = None;
    let mut at_rule: Option<String> = None;

    loop {
        let before = parser.position();
        let token = match parser.next_including_whitespace() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        match token {
            Token::WhiteSpace(_) => {}
            Token::AtKeyword(name) if prelude_start.is_none() => {
                prelude_start = Some(before);
                at_rule = Some(name.to_ascii_lowercase());
            }
            Token::Semicolon => {
                prelude_start = None;
                at_rule = None;
            }
            Token::CurlyBracketBlock => {
                match at_rule.take().as_deref() {
                    Some("media" | "supports" | "layer" | "document") => {
                        let _ = parser.parse_nested_block(|p| {
                            collect_rules(p, rules);
                            Ok::<_, CssParseError>(())
                        });
                    }
                    Some(_) => {}
                    None => {
                        let selector = prelude_start
                            .map(|start| parser.slice(start..before).trim().to_string())
                            .unwrap_or_default();
                        let declarations = parser
                            .parse_nested_block(|p| Ok::<_, CssParseError>(declarations(p)))
                            .unwrap_or_default();
                        if !selector.is_empty() {
                            rules.push(StyleRule {
                                selector,
                                declarations,
                            });
                        }
                    }
                }
                prelude_start = None;
            }
            _ => {
                if prelude_start.is_none() {
                    prelude_start = Some(before);
                }
            }
        }
    }
}

fn declarations(parser: &mut Parser) -> Vec<String> {
    let mut out = Vec::new();
    let mut start = None;
    let mut end = parser.position();

    loop {
        let before = parser.position();
        let token = match parser.next_including_whitespace() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        match token {
            Token::WhiteSpace(_) => {}
            Token::Semicolon => {
                if let Some(s) = start.take() {
                    out.push(parser.slice(s..end).trim().to_string());
                }
            }
            _ => {
                start.get_or_insert(before);
                end = parser.position();
            }
        }
    }
    if let Some(s) = start {
        out.push(parser.slice(s..end).trim().to_string());
    }
    out.retain(|d| !d.is_empty());
    out
}

/// Split a selector list at its top-level commas.
pub fn split_selectors(selector_list: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut input = ParserInput::new(selector_list);
    let mut parser = Parser::new(&mut input);
    let mut start = parser.position();

    loop {
        let before = parser.position();
        let is_comma = match parser.next_including_whitespace() {
            Ok(token) => matches!(token, Token::Comma),
            Err(_) => break,
        };
        if is_comma {
            out.push(parser.slice(start..before).trim().to_string());
            start = parser.position();
        }
    }
    out.push(parser.slice_from(start).trim().to_string());
    out.retain(|s| !s.is_empty());
    out
}

/// Class names a selector mentions (`.name`), in order.
pub fn selector_classes(selector: &str) -> Vec<String> {
    let mut classes = Vec::new();
    let mut input = ParserInput::new(selector);
    let mut parser = Parser::new(&mut input);
    let mut after_dot = false;

    loop {
        let token = match parser.next_including_whitespace() {
            Ok(token) => token.clone(),
            Err(_) => break,
        };
        match token {
            Token::Delim('.') => after_dot = true,
            Token::Ident(name) if after_dot => {
                classes.push(name.to_string());
                after_dot = false;
            }
            _ => after_dot = false,
        }
    }
    classes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rewrite_urls() {
        let css = "body { background: url('images/bg.png'); }\n.icon { background: url(icon.svg) }";
        let (rewritten, changed) = rewrite_css_urls(css, |url| {
            url.starts_with("images/").then(|| url.replace("images/", "assets/"))
        });
        assert_eq!(changed, 1);
        assert!(rewritten.contains("url(\"assets/bg.png\")"));
        assert!(rewritten.contains("url(icon.svg)"));
    }

    #[test]
    fn test_style_rules() {
        let css = r#"
/* heading */
h1, .title { font-size: 2em; font-weight: bold; }
@import url("base.css");
@font-face { font-family: x; src: url(a.ttf); }
@media screen {
  span.em-sesame { text-emphasis: dot }
}
"#;
        let rules = style_rules(css);
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].selector, "h1, .title");
        assert_eq!(rules[0].declarations, vec!["font-size: 2em", "font-weight: bold"]);
        assert_eq!(rules[1].selector, "span.em-sesame");
        assert_eq!(rules[1].declarations, vec!["text-emphasis: dot"]);
    }

    #[test]
    fn test_selector_helpers() {
        assert_eq!(split_selectors("h1, .a .b,p"), vec!["h1", ".a .b", "p"]);
        assert_eq!(selector_classes("div.illus > img.fit:hover"), vec!["illus", "fit"]);
        assert!(selector_classes("#id p").is_empty());
    }
}
