use super::{run_query, DatasourceArgs, QueryArgs};
use crate::output::print_results;
use clap::Args;
use mailmerge_query::{Query, QueryPart};

#[derive(Args)]
pub struct FindCommand {
    #[command(flatten)]
    pub datasource: DatasourceArgs,

    #[command(flatten)]
    pub query: QueryArgs,

    /// Conditions as COLUMN=GLOB; '*' matches any run of characters
    #[arg(required = true, value_parser = parse_condition)]
    pub conditions: Vec<QueryPart>,
}

/// Split `COLUMN=GLOB` at the first '='
fn parse_condition(s: &str) -> Result<QueryPart, String> {
    match s.split_once('=') {
        Some((column, pattern)) if !column.is_empty() => Ok(QueryPart::new(column, pattern)),
        _ => Err(format!("expected COLUMN=GLOB, got '{}'", s)),
    }
}

impl FindCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let results = rt.block_on(async {
            let datasource = self.datasource.open().await?;
            run_query(&datasource, Query::Find(self.conditions), &self.query).await
        })?;
        print_results(&results);
        Ok(())
    }
}
