//! sesame - EPUB ruby and chapter rewriting

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use sesame::{Pipeline, ProcessReport, RuleSet, Settings, inspect};

#[derive(Parser)]
#[command(name = "sesame")]
#[command(version, about = "EPUB ruby, image and chapter rewriting", long_about = None)]
#[command(after_help = "EXAMPLES:
    sesame process book.epub                  Write book_sesame.epub
    sesame process -c sesame.toml a.epub b.epub -o out/
    sesame classes book.epub --json           List classes and their CSS
    sesame rules --defaults > rules.ini       Start a rule file")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Log every document that is touched
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Only log warnings and errors
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Transform one or more EPUB files
    Process {
        /// Input EPUB files
        #[arg(value_name = "INPUT", required = true)]
        inputs: Vec<PathBuf>,

        /// Output file, or output directory when several inputs are given
        #[arg(short, long, value_name = "OUTPUT")]
        output: Option<PathBuf>,

        /// Settings file (TOML)
        #[arg(short, long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Rule file, overriding the one named in the settings
        #[arg(short, long, value_name = "FILE")]
        rules: Option<PathBuf>,
    },

    /// List the classes a book uses and the CSS rules that style them
    Classes {
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Print a rule file
    Rules {
        /// Print the built-in rules
        #[arg(long, conflicts_with = "rules")]
        defaults: bool,

        /// Rule file to print
        #[arg(short, long, value_name = "FILE")]
        rules: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();

    let result = match cli.command {
        Command::Process {
            inputs,
            output,
            config,
            rules,
        } => process(&inputs, output, config, rules),
        Command::Classes { input, json } => classes(&input, json),
        Command::Rules { defaults, rules } => print_rules(defaults, rules),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

fn process(
    inputs: &[PathBuf],
    output: Option<PathBuf>,
    config: Option<PathBuf>,
    rules: Option<PathBuf>,
) -> Result<ExitCode, String> {
    let mut settings = match config {
        Some(path) => Settings::load(&path).map_err(|e| e.to_string())?,
        None => Settings::default(),
    };
    if rules.is_some() {
        settings.rules_file = rules;
    }
    let pipeline = Pipeline::from_settings(settings).map_err(|e| e.to_string())?;

    let jobs = plan_jobs(inputs, output.as_deref())?;
    let results = pipeline.process_batch(&jobs);

    let mut failed = 0;
    for ((input, output), result) in jobs.iter().zip(&results) {
        match result {
            Ok(report) => print_report(input, output, report),
            Err(e) => {
                eprintln!("{}: {e}", input.display());
                failed += 1;
            }
        }
    }

    if failed > 0 {
        eprintln!("{failed} of {} packages failed", jobs.len());
        Ok(ExitCode::FAILURE)
    } else {
        Ok(ExitCode::SUCCESS)
    }
}

/// Pair every input with its output path.
fn plan_jobs(inputs: &[PathBuf], output: Option<&Path>) -> Result<Vec<(PathBuf, PathBuf)>, String> {
    if let [input] = inputs
        && let Some(output) = output
        && !output.is_dir()
    {
        return Ok(vec![(input.clone(), output.to_path_buf())]);
    }

    if let Some(dir) = output {
        std::fs::create_dir_all(dir).map_err(|e| format!("{}: {e}", dir.display()))?;
    }
    Ok(inputs
        .iter()
        .map(|input| {
            let name = default_output_name(input);
            let target = match output {
                Some(dir) => dir.join(name),
                None => input.with_file_name(name),
            };
            (input.clone(), target)
        })
        .collect())
}

fn default_output_name(input: &Path) -> String {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "book".to_string());
    format!("{stem}_sesame.epub")
}

fn print_report(input: &Path, output: &Path, report: &ProcessReport) {
    println!("{} -> {}", input.display(), output.display());
    println!("  Documents rewritten: {}", report.documents_rewritten);
    if let Some(ncx) = &report.ncx {
        println!("  NCX: {ncx}");
    }
    if let Some(downgrade) = &report.downgrade {
        println!("  EPUB 2: {downgrade}");
    }
    if let Some(images) = &report.images {
        println!(
            "  Images converted: {}/{}",
            images.report.succeeded, images.report.total
        );
    }
    if report.documents_absorbed > 0 {
        println!("  Documents merged: {}", report.documents_absorbed);
    }
    if report.blank_nodes_removed > 0 {
        println!("  Blank lines removed: {}", report.blank_nodes_removed);
    }
    for err in &report.rule_errors {
        println!("  Rule skipped: {err}");
    }
}

fn classes(input: &Path, json: bool) -> Result<ExitCode, String> {
    let report = inspect::inspect_epub(input).map_err(|e| e.to_string())?;
    if json {
        let text = serde_json::to_string_pretty(&report).map_err(|e| e.to_string())?;
        println!("{text}");
    } else {
        print!("{report}");
    }
    Ok(ExitCode::SUCCESS)
}

fn print_rules(defaults: bool, rules: Option<PathBuf>) -> Result<ExitCode, String> {
    let set = match rules {
        Some(path) if !defaults => RuleSet::load(&path).map_err(|e| e.to_string())?,
        _ => RuleSet::defaults(),
    };
    print!("{}", set.to_text());
    Ok(ExitCode::SUCCESS)
}
