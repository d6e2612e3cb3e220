use anyhow::Context;
use clap::{Parser, Subcommand};
use std::{path::PathBuf, sync::Arc};

use crate::config::{self, Config};
use crate::domain::{hash::ContentHash, identity::Identity, nft::MintRequest};
use crate::http::{rate_limit::RateLimiter, server::HttpServer};
use crate::ledger::service::Ledger;
use crate::pin::{ContentPinner, LocalPinner};
use crate::storage::db::{self, i64_seconds_to_local_time};
use crate::storage::operations::Storage;
use crate::transfer::{PayoutJournal, ValueTransfer};

#[derive(Parser)]
#[command(name = "tunevault")]
#[command(version = "0.1")]
#[command(about = "Ledger for music projects, tracks and their NFTs")]
pub struct Cli {
    /// Path to the config TOML file
    #[arg(short, long, default_value = "config.toml")]
    pub config: PathBuf,

    /// Identity the command acts as
    #[arg(long = "as", default_value = "anonymous")]
    pub caller: String,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the http server over the restored ledger
    Serve,
    /// Show stored snapshots and ledger totals
    Status,
    /// Create a project owned by the caller
    CreateProject {
        title: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    /// Register a track on a project
    AddTrack {
        project: u64,
        name: String,
        /// Content hash returned by `pin`
        content_hash: String,
    },
    /// Give another identity contributor rights on a project
    AddCollaborator { project: u64, identity: String },
    /// Mint an nft for a project
    Mint {
        project: u64,
        name: String,
        #[arg(long)]
        price: u64,
        #[arg(long, default_value_t = 0)]
        royalty: u8,
        #[arg(short, long, default_value = "")]
        description: String,
        #[arg(long, default_value = "")]
        image: String,
        #[arg(long, default_value = "")]
        category: String,
    },
    /// Buy an nft that is for sale
    Buy { nft: u64 },
    /// Retry the royalty payment of a partially settled purchase
    Reconcile { nft: u64 },
    /// Reprice an nft the caller owns
    SetPrice { nft: u64, price: u64 },
    /// List projects
    ListProjects {
        /// Only projects owned by this identity
        #[arg(long)]
        owner: Option<String>,
    },
    /// List nfts
    ListNfts {
        /// Only nfts owned by this identity
        #[arg(long)]
        owner: Option<String>,
    },
    /// Pin a file and print its content hash
    Pin { file: PathBuf },
    /// Show what the payout journal sent to an identity
    Payouts { identity: String },
}

/// Process-level resources shared by every command.
struct Runtime {
    storage: Storage,
    ledger: Ledger,
    journal: Arc<PayoutJournal>,
}

impl Runtime {
    fn start(cfg: &Config) -> anyhow::Result<Self> {
        let storage = Storage::new(&cfg.database).context("Failed to open snapshot storage")?;
        let journal = db::open(&cfg.database).context("Failed to open payout journal")?;
        let journal = Arc::new(PayoutJournal::new(journal));
        let transfers: Arc<dyn ValueTransfer> = journal.clone();
        let ledger = storage
            .restore_ledger(transfers, cfg.ledger.clone())
            .context("Failed to restore ledger")?;
        Ok(Self {
            storage,
            ledger,
            journal,
        })
    }

    /// Stores the post-operation snapshot, ending the restart cycle.
    fn finish(mut self) -> anyhow::Result<()> {
        self.storage
            .checkpoint(&self.ledger)
            .context("Failed to store snapshot")?;
        Ok(())
    }
}

/// Entrypoint for CLI
pub fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::Config::load(&cli.config.to_string_lossy())?;
    let caller = Identity::from(cli.caller.as_str());

    match cli.command {
        Commands::Serve => {
            let runtime = Runtime::start(&cfg)?;
            let pinner: Arc<dyn ContentPinner> = Arc::new(LocalPinner::new(&cfg.pinning.dir)?);
            let limiter = cfg.rate_limit.as_ref().map(RateLimiter::new);

            let http_server = HttpServer::new(
                Arc::new(runtime.ledger),
                runtime.storage,
                pinner,
                limiter,
                cfg.http,
            );

            println!(
                "HTTP server running at http://{}:{}",
                http_server.config.bind_addr, http_server.config.port
            );
            http_server.run()?;
        }

        Commands::Status => {
            let runtime = Runtime::start(&cfg)?;
            let snapshots = runtime.storage.list_snapshots()?;
            match snapshots.first() {
                Some(latest) => println!(
                    "Latest snapshot #{} (schema v{}) taken {}, {} bytes",
                    latest.snapshot_id,
                    latest.schema_version,
                    i64_seconds_to_local_time(latest.taken_at)?,
                    latest.size
                ),
                None => println!("No snapshots stored yet"),
            }
            println!("{} snapshots stored", snapshots.len());

            let stats = runtime.ledger.marketplace_stats();
            println!(
                "Ledger holds {} projects and {} nfts ({} for sale)",
                runtime.ledger.list_projects().len(),
                stats.total_nfts,
                stats.nfts_for_sale
            );
            println!(
                "{} sales, total volume {}",
                stats.total_sales, stats.total_volume
            );
            let pending = runtime.ledger.list_pending_settlements();
            if !pending.is_empty() {
                println!("Settlements awaiting royalty reconciliation:");
                for p in &pending {
                    println!(
                        "  nft {}: {} owed {} (settlement {})",
                        p.nft_id, p.creator, p.split.royalty_amount, p.settlement_id
                    );
                }
            }
        }

        Commands::CreateProject { title, description } => {
            let runtime = Runtime::start(&cfg)?;
            let id = runtime.ledger.create_project(&caller, title, description)?;
            println!("Created project {id}");
            runtime.finish()?;
        }

        Commands::AddTrack {
            project,
            name,
            content_hash,
        } => {
            let runtime = Runtime::start(&cfg)?;
            let timestamp = chrono::Utc::now().timestamp().max(0) as u64;
            let id = runtime.ledger.add_track(
                &caller,
                project,
                name,
                ContentHash::new(content_hash),
                timestamp,
            )?;
            println!("Added track {id} to project {project}");
            runtime.finish()?;
        }

        Commands::AddCollaborator { project, identity } => {
            let runtime = Runtime::start(&cfg)?;
            runtime
                .ledger
                .add_collaborator(&caller, project, identity.clone().into())?;
            println!("{identity} now contributes to project {project}");
            runtime.finish()?;
        }

        Commands::Mint {
            project,
            name,
            price,
            royalty,
            description,
            image,
            category,
        } => {
            let runtime = Runtime::start(&cfg)?;
            let id = runtime.ledger.mint_nft(
                &caller,
                MintRequest {
                    name,
                    description,
                    image_ref: image,
                    project_id: project,
                    price,
                    royalty_percentage: royalty,
                    for_sale: true,
                    category,
                },
            )?;
            println!("Minted nft {id}");
            runtime.finish()?;
        }

        Commands::Buy { nft } => {
            let runtime = Runtime::start(&cfg)?;
            let result = runtime.ledger.buy_nft(&caller, nft);
            // a partial settlement changed state too, so snapshot before reporting
            let checkpoint = runtime.finish();
            let settlement = result?;
            checkpoint?;
            println!(
                "Bought nft {} from {}: seller got {}, {} got {} royalty",
                settlement.nft_id,
                settlement.seller,
                settlement.split.seller_amount,
                settlement.creator,
                settlement.split.royalty_amount
            );
        }

        Commands::Reconcile { nft } => {
            let runtime = Runtime::start(&cfg)?;
            let result = runtime.ledger.retry_royalty(&caller, nft);
            let checkpoint = runtime.finish();
            let settlement = result?;
            checkpoint?;
            println!(
                "Nft {} reconciled: {} got {} royalty, now owned by {}",
                settlement.nft_id,
                settlement.creator,
                settlement.split.royalty_amount,
                settlement.buyer
            );
        }

        Commands::SetPrice { nft, price } => {
            let runtime = Runtime::start(&cfg)?;
            runtime.ledger.update_nft_price(&caller, nft, price)?;
            println!("Nft {nft} now costs {price}");
            runtime.finish()?;
        }

        Commands::ListProjects { owner } => {
            let runtime = Runtime::start(&cfg)?;
            let projects = match owner {
                Some(owner) => runtime.ledger.list_user_projects(&owner.into()),
                None => runtime.ledger.list_projects(),
            };
            for project in projects {
                println!("Project {}: {}", project.id, project.title);
                println!("  owner: {}", project.owner);
                for contributor in &project.contributors {
                    println!("  contributor: {contributor}");
                }
                for track in &project.tracks {
                    println!("    - track {} {} [{}]", track.id, track.name, track.content_hash);
                }
            }
        }

        Commands::ListNfts { owner } => {
            let runtime = Runtime::start(&cfg)?;
            let nfts = match owner {
                Some(owner) => runtime.ledger.list_user_nfts(&owner.into()),
                None => runtime.ledger.list_nfts(),
            };
            for nft in nfts {
                println!(
                    "Nft {}: {} (project {}), owner {}, price {}, royalty {}%{}",
                    nft.id,
                    nft.name,
                    nft.project_id,
                    nft.owner,
                    nft.price,
                    nft.royalty_percentage,
                    if nft.for_sale { ", for sale" } else { "" }
                );
            }
        }

        Commands::Payouts { identity } => {
            let runtime = Runtime::start(&cfg)?;
            let who = Identity::from(identity.as_str());
            println!(
                "{who} received {} in total",
                runtime.journal.total_paid_to(&who)?
            );
            for payment in runtime.ledger.list_royalty_earnings(&who) {
                println!(
                    "  royalty {} for nft {} (settlement {})",
                    payment.amount, payment.nft_id, payment.settlement_id
                );
            }
        }

        Commands::Pin { file } => {
            let pinner = LocalPinner::new(&cfg.pinning.dir)?;
            let bytes = std::fs::read(&file)
                .with_context(|| format!("Failed to read {}", file.to_string_lossy()))?;
            let name = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let pinned = pinner.pin(&name, &bytes)?;
            println!("{} ({} bytes)", pinned.hash, pinned.size);
        }
    }

    Ok(())
}
