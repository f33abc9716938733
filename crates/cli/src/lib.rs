// The verbosity stuff is cribbed from https://github.com/clap-rs/clap-verbosity-flag/blob/c621a6a8a7c0b6df8f1464a985a5d076b4915693/src/lib.rs and updated for tracing

#![deny(unused_crate_dependencies)]

use anyhow::{Error, Result, anyhow};
use clap::{Args, Parser, Subcommand};
use http::HeaderMap;
use serde::Serialize;
use serde_json::Value;
use stac_query::{Client, Config, Probe, SearchIntent, Sortby};
use std::{path::PathBuf, str::FromStr};
use tokio::io::AsyncWriteExt;
use tracing::metadata::Level;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::{
    fmt::writer::MakeWriterExt, layer::SubscriberExt, util::SubscriberInitExt,
};

/// stac-query: Query STAC APIs from the command line
#[derive(Debug, Parser)]
#[command(name = "stac-query", version)]
pub struct StacQuery {
    #[command(subcommand)]
    command: Command,

    /// A JSON configuration file.
    ///
    /// Possible keys: `headers` (an object), `debounce_ms`, `timeout_secs`, `user_agent`.
    #[arg(long = "config", global = true, verbatim_doc_comment)]
    config: Option<PathBuf>,

    /// Request headers to send with every request.
    ///
    /// Each header should be provided in `KEY=VALUE` format
    /// e.g.: `stac-query search https://stac.test --header "x-my-header=value" --header "x-my-other-header=this"`
    #[arg(long = "header", global = true, verbatim_doc_comment)]
    headers: Vec<KeyValue>,

    /// Whether to print compact JSON output.
    ///
    /// By default, JSON is printed "pretty".
    #[arg(short = 'c', long = "compact-json", global = true)]
    compact_json: Option<bool>,

    #[arg(
        long,
        short = 'v',
        action = clap::ArgAction::Count,
        global = true,
        help = ErrorLevel::verbose_help(),
        long_help = ErrorLevel::verbose_long_help(),
    )]
    verbose: u8,

    #[arg(
        long,
        short = 'q',
        action = clap::ArgAction::Count,
        global = true,
        help = ErrorLevel::quiet_help(),
        long_help = ErrorLevel::quiet_long_help(),
        conflicts_with = "verbose",
    )]
    quiet: u8,
}

/// A stac-query subcommand.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Searches a STAC API.
    ///
    /// The API is probed first to find out whether it wants GET or POST
    /// searches. Then `next` links are followed until there are no more, or
    /// until `--max-items` items have been found.
    Search {
        /// The href of the STAC API.
        href: String,

        /// The maximum number of items to return from the search.
        #[arg(short = 'n', long = "max-items")]
        max_items: Option<usize>,

        #[command(flatten)]
        search: SearchArgs,
    },

    /// Lists a STAC API's collections.
    Collections {
        /// The href of the STAC API.
        href: String,
    },

    /// Gets one collection from a STAC API.
    Collection {
        /// The href of the STAC API.
        href: String,

        /// The collection id.
        id: String,
    },

    /// Gets any url with the headers and error handling of a STAC API.
    Get {
        /// The href of the STAC API.
        href: String,

        /// The url to get, used as-is.
        url: String,
    },
}

/// Search parameters.
#[derive(Debug, Default, Args)]
pub struct SearchArgs {
    /// Comma-delimited list of Item ids to return.
    #[arg(long = "ids")]
    ids: Option<String>,

    /// Comma-delimited list of one or more Collection IDs that each matching Item must be in.
    #[arg(long = "collections")]
    collections: Option<String>,

    /// Requested bounding box, as a comma-delimited string.
    ///
    /// Corners can be in any order.
    #[arg(long = "bbox", allow_hyphen_values = true)]
    bbox: Option<String>,

    /// The start of the date range, as a date (`2023-01-01`) or a datetime.
    #[arg(long = "from")]
    from: Option<String>,

    /// The end of the date range, as a date (`2023-12-31`) or a datetime.
    #[arg(long = "to")]
    to: Option<String>,

    /// Fields by which to sort results, as a comma-delimited string, e.g. `-datetime,+id`.
    #[arg(long = "sortby", allow_hyphen_values = true)]
    sortby: Option<String>,

    /// The page size to be returned from the server.
    #[arg(long = "limit")]
    limit: Option<u64>,
}

#[derive(Debug, Clone)]
struct KeyValue(String, String);

#[derive(Copy, Clone, Debug, Default)]
struct ErrorLevel;

impl StacQuery {
    /// Runs this command.
    ///
    /// If `init_tracing_subscriber` is `false`, it is expected that the caller
    /// is setting up the appropriate logging.
    pub async fn run(self, init_tracing_subscriber: bool) -> Result<()> {
        if init_tracing_subscriber {
            let indicatif_layer = IndicatifLayer::new();
            tracing_subscriber::registry()
                .with(
                    tracing_subscriber::fmt::layer().with_writer(
                        indicatif_layer
                            .get_stderr_writer()
                            .with_max_level(self.log_level().unwrap_or(Level::WARN)),
                    ),
                )
                .with(indicatif_layer)
                .init();
        }
        let config = self.config()?;
        let probe = Probe::from_config(&config)?;
        match self.command {
            Command::Search {
                ref href,
                max_items,
                ref search,
            } => {
                let client = self.client(&probe, href).await?;
                let search = search.intent()?.normalize();
                let item_collection = client.items(search, HeaderMap::new(), max_items).await?;
                self.print(&item_collection).await
            }
            Command::Collections { ref href } => {
                let client = self.client(&probe, href).await?;
                let collections = client.collections().await?;
                self.print(&collections).await
            }
            Command::Collection { ref href, ref id } => {
                let client = self.client(&probe, href).await?;
                let collection = client.collection(id).await?;
                self.print(&collection).await
            }
            Command::Get { ref href, ref url } => {
                let client = self.client(&probe, href).await?;
                let value: Value = client.get(url, &HeaderMap::new()).await?;
                self.print(&value).await
            }
        }
    }

    /// Returns the configuration, with any `--header` values layered on top.
    pub fn config(&self) -> Result<Config> {
        let mut config = if let Some(path) = &self.config {
            Config::from_path(path)?
        } else {
            Config::default()
        };
        for KeyValue(key, value) in &self.headers {
            config = config.header(key, value);
        }
        Ok(config)
    }

    /// Returns the search intent, if this is a search.
    pub fn intent(&self) -> Result<Option<SearchIntent>> {
        if let Command::Search { ref search, .. } = self.command {
            search.intent().map(Some)
        } else {
            Ok(None)
        }
    }

    pub fn log_level(&self) -> Option<Level> {
        level_enum(self.verbosity())
    }

    fn verbosity(&self) -> i8 {
        level_value(ErrorLevel::default()) - (self.quiet as i8) + (self.verbose as i8)
    }

    async fn client(&self, probe: &Probe, href: &str) -> Result<Client> {
        probe.client(href, &HeaderMap::new()).await.map_err(Error::from)
    }

    async fn print<T: Serialize>(&self, value: &T) -> Result<()> {
        let mut bytes = if self.compact_json.unwrap_or_default() {
            serde_json::to_vec(value)?
        } else {
            serde_json::to_vec_pretty(value)?
        };
        bytes.push(b'\n');
        let mut stdout = tokio::io::stdout();
        stdout.write_all(&bytes).await?;
        stdout.flush().await?;
        Ok(())
    }
}

impl SearchArgs {
    /// Builds a search intent from these arguments.
    ///
    /// Nothing is normalized here: bbox corners, empty lists, and dates are
    /// all sorted out by [SearchIntent::normalize].
    pub fn intent(&self) -> Result<SearchIntent> {
        let mut intent = SearchIntent::new();
        if let Some(ids) = &self.ids {
            intent = intent.ids(split(ids));
        }
        if let Some(collections) = &self.collections {
            intent = intent.collections(split(collections));
        }
        if let Some(bbox) = &self.bbox {
            intent = intent.bbox(stac_query::parse_bbox(bbox)?);
        }
        if let Some(from) = &self.from {
            intent = intent.date_range_from(from);
        }
        if let Some(to) = &self.to {
            intent = intent.date_range_to(to);
        }
        if let Some(sortby) = &self.sortby {
            intent = intent.sortby(Sortby::parse_list(sortby)?);
        }
        if let Some(limit) = self.limit {
            intent = intent.limit(limit);
        }
        Ok(intent)
    }
}

impl ErrorLevel {
    fn default() -> Option<Level> {
        Some(Level::ERROR)
    }

    fn verbose_help() -> Option<&'static str> {
        Some("Increase verbosity")
    }

    fn verbose_long_help() -> Option<&'static str> {
        None
    }

    fn quiet_help() -> Option<&'static str> {
        Some("Decrease verbosity")
    }

    fn quiet_long_help() -> Option<&'static str> {
        None
    }
}

impl FromStr for KeyValue {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if let Some((key, value)) = s.split_once('=') {
            Ok(KeyValue(key.to_string(), value.to_string()))
        } else {
            Err(anyhow!("invalid header '{s}', expected format KEY=VALUE"))
        }
    }
}

fn split(s: &str) -> Vec<String> {
    s.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

fn level_enum(verbosity: i8) -> Option<Level> {
    match verbosity {
        i8::MIN..=-1 => None,
        0 => Some(Level::ERROR),
        1 => Some(Level::WARN),
        2 => Some(Level::INFO),
        3 => Some(Level::DEBUG),
        4..=i8::MAX => Some(Level::TRACE),
    }
}

fn level_value(level: Option<Level>) -> i8 {
    match level {
        None => -1,
        Some(Level::ERROR) => 0,
        Some(Level::WARN) => 1,
        Some(Level::INFO) => 2,
        Some(Level::DEBUG) => 3,
        Some(Level::TRACE) => 4,
    }
}

#[cfg(test)]
use {assert_cmd as _, mockito as _, rstest as _, tempfile as _};
