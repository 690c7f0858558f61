//! Entrypoint of the prodcat binary

use dotenvy::dotenv;
use prodcat_clap_blocks::logging::LoggingConfig;

mod commands {
    pub(crate) mod common;
    pub(crate) mod delete;
    pub(crate) mod migrate;
    pub(crate) mod query;
    pub(crate) mod update;
}

enum ReturnCode {
    Failure = 1,
}

#[derive(Debug, clap::Parser)]
#[clap(
    name = "prodcat",
    version,
    about = "Record, query and migrate the catalog of installed products",
    long_about = r#"Record, query and migrate the catalog of installed products

The catalog is kept in Kubernetes ConfigMaps: an index ConfigMap listing every installed product
version, and one ConfigMap per product holding the data of each of its versions.

Examples:
    # Record version 2.4.0 of sat from a file, and make it the active version
    PRODUCT=sat PRODUCT_VERSION=2.4.0 YAML_CONTENT_FILE=sat.yaml SET_ACTIVE_VERSION=true prodcat update

    # Remove version 2.3.0 of sat from the catalog
    prodcat delete --product sat --product-version 2.3.0

    # Show the latest installed version of sat
    prodcat query sat

    # Split the legacy single-ConfigMap catalog, with debug logging
    prodcat -vv migrate --legacy-config-map cray-product-catalog
"#
)]
struct Config {
    #[clap(flatten)]
    logging_config: LoggingConfig,

    #[clap(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, clap::Parser)]
enum Command {
    /// Add or update a product version
    Update(commands::update::Config),

    /// Remove a product version, or a single key of its data
    Delete(commands::delete::Config),

    /// Show installed products
    Query(commands::query::Config),

    /// Move a legacy catalog to the index/detail layout
    Migrate(commands::migrate::Config),
}

fn main() -> Result<(), std::io::Error> {
    // load all environment variables from .env before doing anything
    load_dotenv();

    let config: Config = clap::Parser::parse();

    if let Err(e) = config.logging_config.install_global_subscriber() {
        eprintln!("Initializing logs failed: {e}");
        std::process::exit(ReturnCode::Failure as _);
    }

    let tokio_runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    tokio_runtime.block_on(async move {
        match config.command {
            None => println!("command required, -h/--help for help"),
            Some(Command::Update(config)) => {
                if let Err(e) = commands::update::command(config).await {
                    eprintln!("Update command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::Delete(config)) => {
                if let Err(e) = commands::delete::command(config).await {
                    eprintln!("Delete command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::Query(config)) => {
                if let Err(e) = commands::query::command(config).await {
                    eprintln!("Query command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
            Some(Command::Migrate(config)) => {
                if let Err(e) = commands::migrate::command(config).await {
                    eprintln!("Migrate command failed: {e}");
                    std::process::exit(ReturnCode::Failure as _)
                }
            }
        }
    });

    Ok(())
}

/// Source the .env file before initialising the Config struct - this sets
/// any envs in the file, which the Config struct then uses.
///
/// Precedence is given to existing env variables.
fn load_dotenv() {
    match dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => {
            // Ignore this - a missing env file is not an error, defaults will
            // be applied when initialising the Config struct.
        }
        Err(e) => {
            eprintln!("FATAL Error loading config from: {e}");
            eprintln!("Aborting");
            std::process::exit(ReturnCode::Failure as _);
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn subcommands_parse() {
        let config = Config::try_parse_from([
            "prodcat",
            "-v",
            "update",
            "--product",
            "sat",
            "--product-version",
            "2.4.0",
            "--yaml-content-string",
            "{}",
        ])
        .unwrap();
        assert_eq!(config.logging_config.log_verbose_count, 1);
        assert!(matches!(config.command, Some(Command::Update(_))));

        let config = Config::try_parse_from(["prodcat", "query", "--shallow"]).unwrap();
        assert!(matches!(config.command, Some(Command::Query(_))));

        assert!(Config::try_parse_from(["prodcat", "frobnicate"]).is_err());
    }
}
