use super::DatasourceArgs;
use crate::output::print_schema;
use clap::Args;
use mailmerge_query::SqlDatasource;
use tracing::info;

#[derive(Args)]
pub struct SchemaCommand {
    #[command(flatten)]
    pub datasource: DatasourceArgs,
}

impl SchemaCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        let datasource = rt.block_on(self.datasource.open())?;
        info!("Schema of datasource \"{}\"", datasource.name());

        match datasource.downcast_ref::<SqlDatasource>() {
            Some(sql) => print_schema(datasource.schema(), sql.key_columns().iter()),
            None => print_schema(datasource.schema(), std::iter::empty()),
        }
        Ok(())
    }
}
