use super::{run_query, DatasourceArgs, QueryArgs};
use crate::output::print_results;
use clap::Args;
use mailmerge_query::Query;

#[derive(Args)]
pub struct ContentsCommand {
    #[command(flatten)]
    pub datasource: DatasourceArgs,

    #[command(flatten)]
    pub query: QueryArgs,
}

impl ContentsCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let results = rt.block_on(async {
            let datasource = self.datasource.open().await?;
            run_query(&datasource, Query::Everything, &self.query).await
        })?;
        print_results(&results);
        Ok(())
    }
}
