use colored::*;
use comfy_table::{Cell, Table};
use logiplan::optimizer::RuleTrace;
use logiplan::{Optimizer, OptimizerConfig, Parser, Translator};
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

fn main() {
    init_logging();

    let args: Vec<String> = std::env::args().skip(1).collect();
    if args.is_empty() {
        repl();
    } else {
        explain(&args.join(" "));
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("logiplan=warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn repl() {
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(e) => {
            eprintln!("{}", format!("Cannot open prompt: {}", e).red().bold());
            return;
        }
    };
    println!("{}", "Enter a SELECT statement, Ctrl-D to quit.".bright_black());

    loop {
        match editor.readline("logiplan> ") {
            Ok(line) => {
                let sql = line.trim();
                if sql.is_empty() {
                    continue;
                }
                let _ = editor.add_history_entry(sql);
                explain(sql);
                println!();
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("{}", format!("Prompt failed: {}", e).red().bold());
                break;
            }
        }
    }
}

fn explain(sql: &str) {
    let total_start = Instant::now();

    println!("{}", "Query:".bright_cyan().bold());
    println!("  {}", sql.bright_white());
    println!();

    println!("{}", "=== PARSING ===".bright_cyan().bold());

    // step 1: parse SQL into a statement
    let parser = Parser::new();
    let parse_start = Instant::now();
    let statement = match parser.parse(sql) {
        Ok(statement) => {
            println!(
                "{} {}",
                "Parse successful".green().bold(),
                format!("({})", format_duration(parse_start.elapsed())).bright_black()
            );
            statement
        }
        Err(e) => {
            eprintln!("{}", format!("Parse failed: {}", e).red().bold());
            return;
        }
    };

    println!();
    println!("{}", "=== TRANSLATION ===".bright_cyan().bold());

    // step 2: build the logical plan
    let translator = Translator::new();
    let translate_start = Instant::now();
    let mut tree = match translator.translate(&statement) {
        Ok(tree) => {
            println!(
                "{} {}",
                "Translation successful".green().bold(),
                format!("({})", format_duration(translate_start.elapsed())).bright_black()
            );
            tree
        }
        Err(e) => {
            eprintln!("{}", format!("Translation failed: {}", e).red().bold());
            return;
        }
    };
    println!("Before optimization:");
    print!("{}", tree);

    println!();
    println!("{}", "=== OPTIMIZATION ===".bright_cyan().bold());

    // step 3: rewrite to a fixpoint, collecting every rule application
    let optimizer = Optimizer::with_config(OptimizerConfig::default());
    let mut traces: Vec<RuleTrace> = Vec::new();
    let opt_start = Instant::now();
    let outcome = match optimizer.optimize_with(&mut tree, &mut traces) {
        Ok(outcome) => outcome,
        Err(e) => {
            eprintln!("{}", format!("Optimization failed: {}", e).red().bold());
            return;
        }
    };

    println!(
        "{} {}",
        "Optimization successful".green().bold(),
        format!("({})", format_duration(opt_start.elapsed())).bright_black()
    );
    if !outcome.converged {
        println!("{}", "Stopped at the pass limit before a fixpoint".yellow());
    }
    println!("{}", rule_table(&traces));
    println!("After optimization:");
    print!("{}", tree);

    println!();
    println!(
        "{} {}",
        "Total time:".bright_magenta().bold(),
        format_duration(total_start.elapsed()).bright_magenta()
    );
}

fn rule_table(traces: &[RuleTrace]) -> Table {
    let mut table = Table::new();
    table
        .load_preset(comfy_table::presets::UTF8_FULL)
        .apply_modifier(comfy_table::modifiers::UTF8_ROUND_CORNERS)
        .set_header(vec!["Pass", "Rule", "Changed"]);
    for trace in traces {
        let changed = if trace.changed { "yes" } else { "no" };
        table.add_row(vec![
            Cell::new(trace.pass),
            Cell::new(trace.rule),
            Cell::new(changed),
        ]);
    }
    table
}

fn format_duration(duration: std::time::Duration) -> String {
    let micros = duration.as_micros();
    if micros < 1000 {
        format!("{}µs", micros)
    } else if micros < 1_000_000 {
        format!("{:.2}ms", micros as f64 / 1000.0)
    } else {
        format!("{:.2}s", micros as f64 / 1_000_000.0)
    }
}
