//! End-to-end pipeline tests: EPUB in, EPUB out.

mod common;

use std::fs;
use std::path::PathBuf;

use sesame::images::{ConversionReport, ImageConverter};
use sesame::{Error, Outcome, Pipeline, RuleSet, Settings};
use tempfile::TempDir;

use common::{entries, entry_names, read_entry, three_chapter_book, write_epub, xhtml};

fn book_with_chapter(body: &str) -> Vec<(String, String)> {
    let mut files = three_chapter_book();
    files[4].1 = xhtml("One", body);
    files
}

fn run(settings: Settings, files: &[(String, String)]) -> (TempDir, PathBuf, sesame::ProcessReport) {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.epub");
    let output = dir.path().join("out.epub");
    write_epub(&input, files);
    let pipeline = Pipeline::new(settings, RuleSet::defaults());
    let report = pipeline.process(&input, &output).unwrap();
    (dir, output, report)
}

// ============================================================================
// Content rewriting
// ============================================================================

#[test]
fn test_ruby_and_marked_spans_rewritten() {
    let files = book_with_chapter(
        r#"<p><ruby>XY<rt>a</rt><rt>b</rt></ruby></p><p><span class="em-sesame bold">AB</span></p>"#,
    );
    let settings = Settings {
        apply_rules: false,
        ..Settings::default()
    };
    let (_dir, output, report) = run(settings, &files);

    assert!(report.documents_rewritten >= 1);
    let ch1 = read_entry(&output, "OEBPS/Text/ch1.xhtml").unwrap();
    assert!(ch1.contains("<ruby>XY<rt>ab</rt></ruby>"));
    assert!(ch1.contains("<ruby>A<rt>・</rt>B<rt>・</rt></ruby>"));
}

#[test]
fn test_default_rules_add_reading_fallback() {
    let files = book_with_chapter(r#"<p class="text"><ruby>漢字<rt>かん</rt><rt>じ</rt></ruby></p>"#);
    let (_dir, output, report) = run(Settings::default(), &files);

    assert!(report.rule_errors.is_empty());
    let ch1 = read_entry(&output, "OEBPS/Text/ch1.xhtml").unwrap();
    assert!(ch1.contains("<p><ruby>漢字<rt>かんじ</rt></ruby>《かんじ》</p>"));
}

#[test]
fn test_bad_rule_reported_not_fatal() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.epub");
    let output = dir.path().join("out.epub");
    write_epub(&input, &book_with_chapter("<p>abc</p>"));

    let rules = RuleSet::parse("[RegexRules]\nrule_1\nregex=(broken\nreplace=x\n\nrule_2\nregex=abc\nreplace=xyz\n");
    let report = Pipeline::new(Settings::default(), rules)
        .process(&input, &output)
        .unwrap();

    assert_eq!(report.rule_errors.len(), 1);
    assert!(matches!(&report.rule_errors[0], Error::Rule { pattern, .. } if pattern == "(broken"));
    let ch1 = read_entry(&output, "OEBPS/Text/ch1.xhtml").unwrap();
    assert!(ch1.contains("<p>xyz</p>"));
}

// ============================================================================
// Package edits
// ============================================================================

#[test]
fn test_merge_keeps_package_consistent() {
    let settings = Settings {
        merge_chapters: true,
        ..Settings::default()
    };
    let (_dir, output, report) = run(settings, &three_chapter_book());

    assert_eq!(report.documents_absorbed, 1);
    let names = entry_names(&output);
    assert!(!names.contains(&"OEBPS/Text/ch1b.xhtml".to_string()));
    assert!(names.contains(&"OEBPS/Text/ch2.xhtml".to_string()));

    let opf = read_entry(&output, "OEBPS/content.opf").unwrap();
    assert!(!opf.contains("ch1b"));
    let ch1 = read_entry(&output, "OEBPS/Text/ch1.xhtml").unwrap();
    assert!(ch1.contains("second part"));
}

#[test]
fn test_downgrade_and_ncx() {
    let settings = Settings {
        generate_ncx: true,
        downgrade_to_epub2: true,
        remove_reading_direction: true,
        ..Settings::default()
    };
    let (_dir, output, report) = run(settings, &three_chapter_book());

    assert!(report.ncx.as_ref().is_some_and(|o| o.ok));
    assert!(report.downgrade.as_ref().is_some_and(|o| o.ok));
    assert!(report.reading_direction_removed);

    let names = entry_names(&output);
    assert!(names.contains(&"OEBPS/toc.ncx".to_string()));
    assert!(!names.contains(&"OEBPS/nav.xhtml".to_string()));

    let opf = read_entry(&output, "OEBPS/content.opf").unwrap();
    assert!(opf.contains(r#"version="2.0""#));
    assert!(!opf.contains("prefix="));
    assert!(!opf.contains("page-progression-direction"));
    assert!(opf.contains(r#"toc="ncx""#));
    assert!(opf.contains(r#"<meta name="cover" content="cover"/>"#));

    let ncx = read_entry(&output, "OEBPS/toc.ncx").unwrap();
    assert!(ncx.contains(r#"<content src="Text/ch1.xhtml"/>"#));
    assert!(ncx.contains(r#"playOrder="2""#));
}

#[test]
fn test_existing_ncx_skipped() {
    let mut files = three_chapter_book();
    files.push(("OEBPS/toc.ncx".to_string(), "<ncx/>".to_string()));
    let settings = Settings {
        generate_ncx: true,
        ..Settings::default()
    };
    let (_dir, output, report) = run(settings, &files);

    assert_eq!(report.ncx, Some(Outcome::success("skipped")));
    assert_eq!(read_entry(&output, "OEBPS/toc.ncx").unwrap(), "<ncx/>");
}

#[test]
fn test_stylesheet_replaced() {
    let dir = TempDir::new().unwrap();
    let css = dir.path().join("custom.css");
    fs::write(&css, "p { text-indent: 1em; }").unwrap();
    let settings = Settings {
        stylesheet: Some(css),
        ..Settings::default()
    };
    let (_out_dir, output, report) = run(settings, &three_chapter_book());

    assert_eq!(report.stylesheets_replaced, 1);
    let names = entry_names(&output);
    assert!(names.contains(&"OEBPS/Styles/custom.css".to_string()));
    assert!(!names.contains(&"OEBPS/Styles/style.css".to_string()));

    let ch2 = read_entry(&output, "OEBPS/Text/ch2.xhtml").unwrap();
    assert!(ch2.contains(r#"<link href="../Styles/custom.css" rel="stylesheet" type="text/css"/>"#));
    assert!(!ch2.contains("style.css"));
    let opf = read_entry(&output, "OEBPS/content.opf").unwrap();
    assert!(opf.contains(r#"href="Styles/custom.css""#));
}

#[test]
fn test_blank_lines_capped() {
    let files = book_with_chapter("<p>a</p><br/><br/><br/><p> </p><p>b</p>");
    let settings = Settings {
        blank_limit_count: Some(1),
        ..Settings::default()
    };
    let (_dir, output, report) = run(settings, &files);

    assert_eq!(report.blank_nodes_removed, 3);
    let ch1 = read_entry(&output, "OEBPS/Text/ch1.xhtml").unwrap();
    assert!(ch1.contains("<p>a</p><br/><p>b</p>"));
}

// ============================================================================
// Images
// ============================================================================

struct RenameToWebp;

impl ImageConverter for RenameToWebp {
    fn convert(&self, paths: &[PathBuf], params: &str) -> sesame::Result<ConversionReport> {
        assert!(params.contains("-f webp"));
        for path in paths {
            fs::rename(path, path.with_extension("webp"))?;
        }
        Ok(ConversionReport {
            succeeded: paths.len(),
            total: paths.len(),
        })
    }
}

#[test]
fn test_image_conversion_relinks() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.epub");
    let output = dir.path().join("out.epub");
    write_epub(&input, &three_chapter_book());

    let settings = Settings::from_toml(
        "[image_conversion]\nencoder = \"unused\"\nparams = \"-f webp -q 85\"\n",
    )
    .unwrap();
    let report = Pipeline::new(settings, RuleSet::default())
        .with_converter(Box::new(RenameToWebp))
        .process(&input, &output)
        .unwrap();

    let images = report.images.unwrap();
    assert_eq!(images.report, ConversionReport { succeeded: 1, total: 1 });
    let names = entry_names(&output);
    assert!(names.contains(&"OEBPS/Images/cover.webp".to_string()));
    assert!(!names.contains(&"OEBPS/Images/cover.jpg".to_string()));
    let ch1b = read_entry(&output, "OEBPS/Text/ch1b.xhtml").unwrap();
    assert!(ch1b.contains(r#"src="../Images/cover.webp""#));
    let opf = read_entry(&output, "OEBPS/content.opf").unwrap();
    assert!(opf.contains(r#"href="Images/cover.webp" media-type="image/webp""#));
}

// ============================================================================
// Archive handling
// ============================================================================

#[test]
fn test_output_layout() {
    let (_dir, output, _) = run(Settings::default(), &three_chapter_book());
    let entries = entries(&output);

    assert_eq!(entries[0].0, "mimetype");
    assert_eq!(entries[0].1, zip::CompressionMethod::Stored);
    assert!(entries[1..].iter().all(|(_, method)| *method == zip::CompressionMethod::Deflated));
    let names: Vec<&String> = entries[1..].iter().map(|(name, _)| name).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[test]
fn test_corrupt_input_leaves_no_output() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("broken.epub");
    let output = dir.path().join("out.epub");
    fs::write(&input, b"this is not a zip archive").unwrap();

    let result = Pipeline::new(Settings::default(), RuleSet::defaults()).process(&input, &output);
    assert!(matches!(result, Err(Error::Archive(_) | Error::ArchiveMessage(_))));
    assert!(!output.exists());
}

#[test]
fn test_missing_container_is_structure_error() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("in.epub");
    let output = dir.path().join("out.epub");
    {
        use std::io::Write;
        let mut zip = zip::ZipWriter::new(fs::File::create(&input).unwrap());
        zip.start_file("mimetype", zip::write::SimpleFileOptions::default())
            .unwrap();
        zip.write_all(b"application/epub+zip").unwrap();
        zip.finish().unwrap();
    }

    let result = Pipeline::new(Settings::default(), RuleSet::defaults()).process(&input, &output);
    assert!(matches!(result, Err(Error::PackageStructure(_))));
    assert!(!output.exists());
}

#[test]
fn test_batch_continues_after_failure() {
    let dir = TempDir::new().unwrap();
    let bad = dir.path().join("bad.epub");
    let good = dir.path().join("good.epub");
    fs::write(&bad, b"nope").unwrap();
    write_epub(&good, &three_chapter_book());

    let jobs = vec![
        (bad, dir.path().join("bad_out.epub")),
        (good, dir.path().join("good_out.epub")),
    ];
    let results = Pipeline::new(Settings::default(), RuleSet::defaults()).process_batch(&jobs);

    assert_eq!(results.len(), 2);
    assert!(results[0].is_err());
    assert!(results[1].is_ok());
    assert!(dir.path().join("good_out.epub").exists());
    assert!(!dir.path().join("bad_out.epub").exists());
}
