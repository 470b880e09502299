use revend_cli::{run, summary, telemetry, CliError, RevendConfig};

#[tokio::main]
async fn main() -> Result<(), CliError> {
    let config = RevendConfig::load()?;
    telemetry::init_tracing(config.logging.format, config.migration.debug_logging)?;

    match run(&config).await {
        Ok(reports) => {
            print!("{}", summary(&reports));
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Migration failed");
            Err(e)
        }
    }
}
