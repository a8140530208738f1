use super::{run_query, DatasourceArgs, QueryArgs};
use crate::output::print_results;
use clap::Args;
use mailmerge_query::{Key, Query};

#[derive(Args)]
pub struct LookupCommand {
    #[command(flatten)]
    pub datasource: DatasourceArgs,

    #[command(flatten)]
    pub query: QueryArgs,

    /// Keys as printed by the other commands, e.g. 'nr#1#'
    #[arg(required = true)]
    pub keys: Vec<String>,
}

impl LookupCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let keys: Vec<Key> = self.keys.into_iter().map(Key::from).collect();

        let rt = tokio::runtime::Runtime::new()?;
        let results = rt.block_on(async {
            let datasource = self.datasource.open().await?;
            run_query(&datasource, Query::ByKey(keys), &self.query).await
        })?;
        print_results(&results);
        Ok(())
    }
}
