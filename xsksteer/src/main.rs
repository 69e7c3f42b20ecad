use tracing::error;
use xsksteer::runtime::{self, Runtime, commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let Runtime { cli, conf } = Runtime::new()?;
    runtime::init_tracing(conf.log_level);

    let result = match &cli.command {
        Some(subcommand) => commands::execute(subcommand, &conf).await,
        None => commands::run::execute(&conf).await,
    };

    if let Err(e) = &result {
        error!(
            event.name = "xsksteer.failed",
            error.message = %e,
            "xsksteer exited with an error"
        );
    }
    result?;
    Ok(())
}
