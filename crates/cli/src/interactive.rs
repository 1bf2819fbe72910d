use anyhow::{Context as AnyhowContext, Result};
use logsift_indexer::{DisplayMode, Pipeline};
use serde_json::json;
use std::io::Write;
use tokio::io::{AsyncBufReadExt, BufReader};

const RULE_WIDTH: usize = 80;
const PROMPT: &str = "Enter search query (or 'exit' to quit): ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryOptions {
    pub query: String,
    pub k: usize,
    pub mode: DisplayMode,
    pub warnings: Vec<String>,
}

/// Split `k=<n>` and `display=<mode>` tokens out of an input line. Bad
/// values fall back to the defaults and leave a warning behind; option
/// tokens never reach the query text.
pub fn parse_query_options(
    line: &str,
    default_k: usize,
    default_mode: DisplayMode,
) -> QueryOptions {
    let mut k = default_k;
    let mut mode = default_mode;
    let mut warnings = Vec::new();
    let mut words = Vec::new();

    for part in line.split_whitespace() {
        if let Some(raw) = part.strip_prefix("k=") {
            match raw.parse::<i64>() {
                Ok(value) if value > 0 => k = usize::try_from(value).unwrap_or(default_k),
                Ok(_) => {
                    warnings.push("k must be positive; using default.".to_string());
                    k = default_k;
                }
                Err(_) => warnings.push("Invalid k value; using default.".to_string()),
            }
        } else if let Some(raw) = part.strip_prefix("display=") {
            match raw.parse::<DisplayMode>() {
                Ok(parsed) => mode = parsed,
                Err(_) => warnings.push(format!(
                    "Invalid display mode '{}'; using {default_mode}.",
                    raw.to_ascii_lowercase()
                )),
            }
        } else {
            words.push(part);
        }
    }

    QueryOptions {
        query: words.join(" "),
        k,
        mode,
        warnings,
    }
}

pub fn is_exit_command(line: &str) -> bool {
    line.eq_ignore_ascii_case("exit") || line.eq_ignore_ascii_case("quit")
}

pub fn render_results(
    out: &mut impl Write,
    k: usize,
    mode: DisplayMode,
    results: &[String],
) -> std::io::Result<()> {
    let rule = "-".repeat(RULE_WIDTH);
    writeln!(out, "{rule}")?;
    writeln!(out, "Top {k} results (display={mode}):")?;
    for result in results {
        writeln!(out, "{result}")?;
    }
    writeln!(out, "{rule}")?;
    writeln!(out)
}

/// Health counters plus the live store size, as pretty JSON.
pub fn stats_json(pipeline: &Pipeline) -> Result<String> {
    let store = pipeline.snapshot().context("Failed to read store snapshot")?;
    let (pending_keys, pending_lines) = pipeline.pending_window()?;
    let body = json!({
        "health": pipeline.health(),
        "store": {
            "vectors": store.vectors,
            "entries": store.entries,
            "max_entries": store.max_entries,
            "evicted": store.evicted,
            "aligned": store.aligned(),
        },
        "pending_window": {
            "keys": pending_keys,
            "lines": pending_lines,
        },
    });
    Ok(serde_json::to_string_pretty(&body)?)
}

pub async fn run_query(pipeline: &Pipeline, line: &str, default_mode: DisplayMode) -> Result<()> {
    let options = parse_query_options(line, pipeline.config().default_k, default_mode);
    for warning in &options.warnings {
        log::warn!("{warning}");
    }

    if options.query.is_empty() {
        println!("Empty query text; please provide a search term.");
        return Ok(());
    }

    let k = i64::try_from(options.k).unwrap_or(i64::MAX);
    let results = pipeline.search(&options.query, k, options.mode).await;
    let mut stdout = std::io::stdout().lock();
    render_results(&mut stdout, options.k, options.mode, &results)?;
    Ok(())
}

/// Read queries from stdin until `exit`, `quit`, end of input or Ctrl-C.
pub async fn run_interactive(pipeline: &Pipeline, default_mode: DisplayMode) -> Result<()> {
    println!("Ready for queries. Type 'exit' or 'quit' to stop.\n");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("{PROMPT}");
        std::io::stdout().flush()?;

        let next = tokio::select! {
            line = lines.next_line() => line.context("Failed to read stdin")?,
            _ = tokio::signal::ctrl_c() => None,
        };
        let Some(line) = next else {
            println!("\nExiting...");
            break;
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if is_exit_command(line) {
            println!("Exiting...");
            break;
        }
        if line.eq_ignore_ascii_case("stats") {
            println!("{}", stats_json(pipeline)?);
            continue;
        }

        run_query(pipeline, line, default_mode).await?;
    }
    Ok(())
}
