mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use opc_da_browse::{
    BrowseFilter, BrowseLimits, ElementFilter, OpcProvider, PropertiesQuery,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Browse the address space of OPC DA servers.
#[derive(Debug, Parser)]
#[command(name = "opc-browse", version, about)]
struct Cli {
    /// Directory for the daily rolling log file.
    #[arg(long, default_value = "logs", global = true)]
    log_dir: PathBuf,

    /// Seconds to wait for any single server call.
    #[arg(long, default_value_t = 300, global = true)]
    timeout_secs: u64,

    /// Deepest level the identifier search descends to.
    #[arg(long, default_value_t = BrowseLimits::default().max_search_depth, global = true)]
    max_search_depth: usize,

    /// Nodes the identifier search may inspect before giving up.
    #[arg(long, default_value_t = BrowseLimits::default().max_search_nodes, global = true)]
    max_search_nodes: usize,

    /// Page size requested from DA 3.0 servers (0 lets the server decide).
    #[arg(long, default_value_t = 0, global = true)]
    page_size: u32,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List OPC DA servers registered on a host.
    Servers {
        #[arg(long, default_value = "localhost")]
        host: String,
    },
    /// List the children of an item id (the root when omitted).
    Browse {
        /// Server ProgID, e.g. Matrikon.OPC.Simulation.1
        server: String,
        /// Fully qualified item id of the parent branch.
        #[arg(long)]
        parent: Option<String>,
        #[arg(long, value_enum, default_value_t = Kind::All)]
        kind: Kind,
        /// Server-side name wildcard.
        #[arg(long, default_value = "")]
        name: String,
        /// Also fetch properties of every element.
        #[arg(long)]
        properties: bool,
        /// Restrict fetched properties to these ids.
        #[arg(long, value_delimiter = ',')]
        ids: Vec<u32>,
    },
    /// Fetch item properties.
    Props {
        server: String,
        #[arg(required = true)]
        items: Vec<String>,
        /// Restrict to these property ids.
        #[arg(long, value_delimiter = ',')]
        ids: Vec<u32>,
        /// Skip reading property values.
        #[arg(long)]
        no_values: bool,
    },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Kind {
    All,
    Branches,
    Items,
}

impl From<Kind> for BrowseFilter {
    fn from(kind: Kind) -> Self {
        match kind {
            Kind::All => Self::All,
            Kind::Branches => Self::Branches,
            Kind::Items => Self::Items,
        }
    }
}

fn properties_query(ids: Vec<u32>, return_values: bool) -> PropertiesQuery {
    if ids.is_empty() {
        PropertiesQuery {
            return_values,
            ..PropertiesQuery::default()
        }
    } else {
        PropertiesQuery::with_ids(ids, return_values)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let file_appender = tracing_appender::rolling::daily(&cli.log_dir, "opc-browse.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(non_blocking).with_filter(filter))
        .init();

    tracing::info!(command = ?cli.command, "Starting opc-browse");

    let limits = BrowseLimits {
        max_search_depth: cli.max_search_depth,
        max_search_nodes: cli.max_search_nodes,
        max_elements_per_page: cli.page_size,
        ..BrowseLimits::default()
    };
    let provider = connect_provider(limits).await?;
    let timeout = Duration::from_secs(cli.timeout_secs);

    let result = match cli.command {
        Command::Servers { host } => commands::list_servers(provider.as_ref(), &host, timeout).await,
        Command::Browse {
            server,
            parent,
            kind,
            name,
            properties,
            ids,
        } => {
            let filter = ElementFilter {
                name,
                ..ElementFilter::of_kind(kind.into())
            };
            let query = (properties || !ids.is_empty()).then(|| properties_query(ids, true));
            commands::browse(provider.as_ref(), &server, parent, filter, query, timeout).await
        }
        Command::Props {
            server,
            items,
            ids,
            no_values,
        } => {
            let query = properties_query(ids, !no_values);
            commands::properties(provider.as_ref(), &server, items, query, timeout).await
        }
    };

    match result {
        Ok(lines) => {
            for line in lines {
                println!("{line}");
            }
            Ok(())
        }
        Err(e) => {
            tracing::error!(error = %e, "Command failed");
            anyhow::bail!(commands::describe_error(&e))
        }
    }
}

#[cfg(windows)]
async fn connect_provider(limits: BrowseLimits) -> Result<Arc<dyn OpcProvider>> {
    let client = tokio::task::spawn_blocking(move || {
        opc_da_browse::OpcDaClient::with_limits(opc_da_browse::ComConnector, limits)
    })
    .await??;
    Ok(Arc::new(client))
}

#[cfg(not(windows))]
async fn connect_provider(_limits: BrowseLimits) -> Result<Arc<dyn OpcProvider>> {
    anyhow::bail!("OPC DA browsing requires Windows (COM/DCOM)")
}
