use colored::Colorize;
use mailmerge_query::{Dataset, QueryResults, Schema};

/// `column="value"` or `column=<unset>` for every schema column
pub fn dataset_lines(dataset: &Dataset) -> Vec<String> {
    dataset
        .schema()
        .iter()
        .map(|column| match dataset.get(column) {
            Ok(Some(value)) => format!("{}=\"{}\"", column, value),
            _ => format!("{}=<unset>", column),
        })
        .collect()
}

pub fn print_results(results: &QueryResults) {
    for (idx, dataset) in results.iter().enumerate() {
        if idx > 0 {
            println!();
        }
        for line in dataset_lines(dataset) {
            println!("{}", line);
        }
        println!("{} {}", "key:".bright_white().bold(), dataset.key().as_str().bright_cyan());
    }

    let stats = results.stats();
    let summary = format!(
        "{} dataset(s) in {} ms",
        stats.row_count, stats.execution_ms
    );
    if stats.truncated {
        eprintln!("{} {}", summary, "(truncated)".bright_yellow().bold());
    } else {
        eprintln!("{}", summary.bright_green());
    }
}

pub fn print_schema<'a>(schema: &Schema, key_columns: impl IntoIterator<Item = &'a str>) {
    println!("{}", "Schema:".bright_white().bold());
    for column in schema.iter() {
        println!("  {}", column);
    }

    let keys: Vec<&str> = key_columns.into_iter().collect();
    if !keys.is_empty() {
        println!("{} {}", "Key columns:".bright_white().bold(), keys.join(", ").bright_cyan());
    }
}
