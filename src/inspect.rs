//! Class inventory: which classes a book uses and where they are styled.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::Path;

use serde::Serialize;
use walkdir::WalkDir;

use crate::dom::Document;
use crate::epub::archive::extract;
use crate::error::{Error, Result};
use crate::transform::css::{selector_classes, split_selectors, style_rules};
use crate::util::{is_content_file, read_text};

/// A CSS rule that mentions a class.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClassRule {
    /// Stylesheet path relative to the package root.
    pub file: String,
    pub selector: String,
    pub declarations: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ClassReport {
    /// Every class used in a content document.
    pub classes: BTreeSet<String>,
    /// Classes used on `span` elements.
    pub span_classes: BTreeSet<String>,
    /// Classes used on `img` elements.
    pub image_classes: BTreeSet<String>,
    /// Rules per class name, in file then source order.
    pub rules: BTreeMap<String, Vec<ClassRule>>,
}

impl ClassReport {
    /// Used classes that no stylesheet mentions.
    pub fn unstyled(&self) -> Vec<&str> {
        self.classes
            .iter()
            .filter(|class| !self.rules.contains_key(*class))
            .map(String::as_str)
            .collect()
    }
}

/// Inventory an extracted package.
pub fn collect_classes(work_dir: &Path) -> Result<ClassReport> {
    let mut report = ClassReport::default();

    for entry in WalkDir::new(work_dir).sort_by_file_name() {
        let entry = entry.map_err(|e| Error::Io(e.into()))?;
        let path = entry.path();
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = path
            .strip_prefix(work_dir)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/");

        if is_stylesheet(path) {
            let css = read_text(path)?;
            for rule in style_rules(&css) {
                for selector in split_selectors(&rule.selector) {
                    for class in selector_classes(&selector) {
                        report.rules.entry(class).or_default().push(ClassRule {
                            file: relative.clone(),
                            selector: selector.clone(),
                            declarations: rule.declarations.clone(),
                        });
                    }
                }
            }
        } else if is_content_file(path) {
            let text = read_text(path)?;
            let doc = Document::parse_content(&text, &relative);
            for node in doc.descendants(doc.root()) {
                let is_span = doc.is_named(node, "span");
                let is_img = doc.is_named(node, "img");
                for class in doc.classes(node) {
                    report.classes.insert(class.to_string());
                    if is_span {
                        report.span_classes.insert(class.to_string());
                    }
                    if is_img {
                        report.image_classes.insert(class.to_string());
                    }
                }
            }
        }
    }

    Ok(report)
}

/// Extract an EPUB to a scratch directory and inventory it.
pub fn inspect_epub<P: AsRef<Path>>(path: P) -> Result<ClassReport> {
    let work = extract(path)?;
    collect_classes(work.path())
}

fn is_stylesheet(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("css"))
}

impl fmt::Display for ClassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let groups = [
            ("Classes", &self.classes),
            ("Span classes", &self.span_classes),
            ("Image classes", &self.image_classes),
        ];
        for (heading, classes) in groups {
            writeln!(f, "{heading} ({}):", classes.len())?;
            for class in classes {
                writeln!(f, "  {class}")?;
            }
        }

        writeln!(f)?;
        for class in &self.classes {
            let Some(rules) = self.rules.get(class) else {
                writeln!(f, ".{class}: no CSS definition")?;
                continue;
            };
            for rule in rules {
                writeln!(f, "{}: {} {{", rule.file, rule.selector)?;
                for declaration in &rule.declarations {
                    writeln!(f, "  {declaration};")?;
                }
                writeln!(f, "}}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_collect_classes() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("OEBPS/Styles")).unwrap();
        fs::write(
            root.join("OEBPS/Styles/style.css"),
            "/* x */ .em-sesame, p.note { font-weight: bold; }\nimg.fit { width: 100% }",
        )
        .unwrap();
        fs::write(
            root.join("OEBPS/ch1.xhtml"),
            r#"<html xmlns="http://www.w3.org/1999/xhtml"><body class="main"><p class="note">a<span class="em-sesame">b</span></p><img class="fit gaiji" src="a.png"/></body></html>"#,
        )
        .unwrap();

        let report = collect_classes(root).unwrap();
        let names = |set: &BTreeSet<String>| set.iter().cloned().collect::<Vec<_>>();
        assert_eq!(names(&report.classes), vec!["em-sesame", "fit", "gaiji", "main", "note"]);
        assert_eq!(names(&report.span_classes), vec!["em-sesame"]);
        assert_eq!(names(&report.image_classes), vec!["fit", "gaiji"]);

        let sesame = &report.rules["em-sesame"];
        assert_eq!(sesame.len(), 1);
        assert_eq!(sesame[0].file, "OEBPS/Styles/style.css");
        assert_eq!(sesame[0].selector, ".em-sesame");
        assert_eq!(sesame[0].declarations, vec!["font-weight: bold"]);
        assert_eq!(report.rules["note"][0].selector, "p.note");
        assert_eq!(report.unstyled(), vec!["gaiji", "main"]);
    }
}
