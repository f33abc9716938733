use clap::Parser;
use stac_query_cli::StacQuery;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = StacQuery::parse();
    match args.run(true).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err}");
            if let Some(api_error) = err
                .downcast_ref::<stac_query::Error>()
                .and_then(stac_query::Error::api_error)
                && let Ok(detail) = serde_json::to_string(&api_error.detail)
            {
                eprintln!("{detail}");
            }
            ExitCode::FAILURE
        }
    }
}
