#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![warn(clippy::cargo)]
#![warn(clippy::perf)]
#![warn(clippy::complexity)]
#![warn(clippy::style)]
#![allow(clippy::multiple_crate_versions)]

use std::{path::PathBuf, time::Duration};

use anyhow::{Result, bail};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use browser::PageOpener;
use discovery::{DiscoveryPolicy, Validator};
use util::{init_http_client, spawn_ct_watcher};

pub mod browser;
pub mod discovery;
pub mod playlist;
pub mod sites;
pub mod util;

/// Finds live HLS manifests behind streaming-aggregator embed pages
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Show the browser window instead of running headless
    #[arg(long, global = true)]
    headed: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Builds a playlist of every stream listed by ppv.to
    Ppv {
        /// Where the playlist is written
        #[arg(short, long, default_value = "PPVLand.m3u8")]
        output: PathBuf,
    },

    /// Refreshes an existing thetvapp.to playlist in place
    Tvapp {
        /// Playlist to update
        #[arg(short, long, default_value = "TheTVApp.m3u8")]
        playlist: PathBuf,
    },

    /// Prints the manifest found behind a single page
    Resolve {
        /// Page that embeds the player
        url: String,

        /// How long to wait for a manifest, in milliseconds
        #[arg(long)]
        budget_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    dotenvy::dotenv().ok();

    let args = Args::parse();

    let client = init_http_client();
    let ct = CancellationToken::new();

    spawn_ct_watcher(ct.clone());

    let session = browser::launch(!args.headed).await?;
    let res = run(args.command, &session, &client, &ct).await;

    if let Err(e) = session.shutdown().await {
        warn!("{e:#}");
    }

    res
}

async fn run<O>(command: Command, opener: &O, client: &reqwest::Client, ct: &CancellationToken) -> Result<()>
where
    O: PageOpener,
{
    match command {
        Command::Ppv { output } => sites::ppv::run(opener, client, &output, ct).await,
        Command::Tvapp { playlist } => sites::tvapp::run(opener, client, &playlist, ct).await,
        Command::Resolve { url, budget_ms } => {
            let mut policy = DiscoveryPolicy::EMBED;
            if let Some(ms) = budget_ms {
                policy.watch_budget = Duration::from_millis(ms);
            }

            info!("Resolving {url}");
            let validator = Validator::new(client.clone());
            let Some(manifest) =
                discovery::resolve_in_fresh_page(opener, &url, &policy, &validator).await
            else {
                bail!("No manifest found behind {url}");
            };

            println!("{}", manifest.url);
            Ok(())
        }
    }
}
