use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use jiranlink::catalog::{parse_choice, Catalog, ItemFilter, DEFAULT_MAX_PRICE, DEFAULT_MIN_PRICE};
use jiranlink::config::Config;
use jiranlink::location::{
    DistrictRegistry, DistrictResolver, LocationProvider, ManualProvider, PlatformProvider, ProviderKind,
};
use jiranlink::server::{self, AppState};

/// JiranLink — find your district and browse what neighbours are sharing.
///
/// Examples:
///   jiranlink nearest
///   jiranlink nearest --lat 1.50 --lon 103.75
///   jiranlink --provider ip nearest
///   jiranlink browse --listings items.json --near --type rent
///   jiranlink serve --port 8080 --listings items.json
#[derive(Parser)]
#[command(name = "jiranlink", version, about, long_about = None)]
struct Cli {
    /// Config file. Defaults to ~/.jiranlink/config.json.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Location provider: auto (gpsd, else IP), gpsd, or ip.
    #[arg(long, global = true, value_enum)]
    provider: Option<ProviderKind>,

    /// JSON district list replacing the built-in Malaysian set.
    #[arg(long, global = true)]
    districts: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the district nearest to the current location.
    Nearest {
        /// Latitude (-90 to 90) of a known fix; skips the provider.
        #[arg(long, allow_hyphen_values = true, requires = "lon")]
        lat: Option<f64>,

        /// Longitude (-180 to 180) of a known fix.
        #[arg(long, allow_hyphen_values = true, requires = "lat")]
        lon: Option<f64>,

        /// Error radius of the supplied fix, in meters.
        #[arg(long, default_value_t = 0.0)]
        accuracy: f64,

        /// Refuse readings less accurate than this many meters.
        #[arg(long)]
        max_accuracy: Option<f64>,
    },

    /// List the registered districts.
    Districts,

    /// Filter listings the way the browse screen does.
    Browse {
        /// JSON listings file.
        #[arg(long)]
        listings: Option<PathBuf>,

        /// Text to look for in titles and descriptions.
        #[arg(long, default_value = "")]
        search: String,

        /// tools, appliances, skills, services, others, or all.
        #[arg(long, default_value = "all")]
        category: String,

        /// District name, or all.
        #[arg(long, default_value = "all")]
        district: String,

        /// rent, borrow, hire, or all.
        #[arg(long = "type", default_value = "all")]
        listing_type: String,

        #[arg(long, default_value_t = DEFAULT_MIN_PRICE)]
        min_price: f64,

        #[arg(long, default_value_t = DEFAULT_MAX_PRICE)]
        max_price: f64,

        /// Only show items that are currently available.
        #[arg(long)]
        available: bool,

        /// Pre-select the district nearest to the current location.
        #[arg(long, conflicts_with = "district")]
        near: bool,
    },

    /// Serve the HTTP API.
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(long, default_value_t = 3000)]
        port: u16,

        /// JSON listings file for /api/items.
        #[arg(long)]
        listings: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    init_logging();
    let cli = Cli::parse();

    let loaded = match cli.config.as_deref() {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    };
    let config = loaded.unwrap_or_else(|e| {
        tracing::warn!("{}; using defaults", e);
        Config::default()
    });

    let registry = load_registry(cli.districts.as_deref().or(config.districts_file.as_deref()));
    let kind = cli.provider.unwrap_or(config.provider);

    match cli.command {
        Command::Nearest { lat, lon, accuracy, max_accuracy } => {
            let provider = match (lat, lon) {
                (Some(lat), Some(lon)) => PlatformProvider::from(ManualProvider::new(lat, lon, accuracy).unwrap_or_else(|e| {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                })),
                _ => PlatformProvider::select(kind, &config.provider_settings()).await,
            };
            let resolver = DistrictResolver::new(provider, registry)
                .with_max_accuracy(max_accuracy.or(config.max_accuracy_m));

            match resolver.find_nearest_district().await {
                Ok(found) => {
                    eprintln!("  {}", found.display_line());
                    print_json(&found);
                }
                Err(e) => {
                    eprintln!("Error: Could not determine nearest district: {}", e);
                    std::process::exit(1);
                }
            }
        }

        Command::Districts => print_json(&registry.district_list()),

        Command::Browse {
            listings,
            search,
            category,
            district,
            listing_type,
            min_price,
            max_price,
            available,
            near,
        } => {
            let catalog = load_catalog(listings.as_deref().or(config.listings_file.as_deref()));

            let mut filter = ItemFilter {
                search,
                category: parse_choice(&category).unwrap_or_else(|e| usage_error("category", &e)),
                listing_type: parse_choice(&listing_type).unwrap_or_else(|e| usage_error("type", &e)),
                min_price,
                max_price,
                available_only: available,
                ..Default::default()
            }
            .with_district(Some(district.as_str()));
            if let Err(e) = filter.validate() {
                usage_error::<()>("min-price", &e);
            }

            if near {
                let provider = PlatformProvider::select(kind, &config.provider_settings()).await;
                let resolver = DistrictResolver::new(provider, registry)
                    .with_max_accuracy(config.max_accuracy_m);
                match resolver.find_nearest_district_name().await {
                    Some(d) => {
                        eprintln!("  Location detected: {}", d);
                        filter = filter.with_district(Some(d.as_str()));
                    }
                    None => eprintln!(
                        "  Warning: Failed to detect location via {}. Showing all districts.",
                        resolver.provider().name()
                    ),
                }
            }

            let found = catalog.filter(&filter);
            eprintln!("  {} of {} listings match", found.len(), catalog.len());
            for item in &found {
                eprintln!("    {}", item);
            }
            print_json(&found);
        }

        Command::Serve { host, port, listings } => {
            let catalog = match listings.as_deref().or(config.listings_file.as_deref()) {
                Some(path) => load_catalog(Some(path)),
                None => {
                    tracing::warn!("no listings file configured; /api/items will be empty");
                    Catalog::default()
                }
            };
            let provider = PlatformProvider::select(kind, &config.provider_settings()).await;
            let resolver = DistrictResolver::new(provider, registry)
                .with_max_accuracy(config.max_accuracy_m);

            server::start(&host, port, AppState { resolver, catalog }).await;
        }
    }
}

/// Initialize logging with tracing. Output goes to stderr; stdout carries JSON.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("jiranlink=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn load_registry(path: Option<&Path>) -> DistrictRegistry {
    match path {
        Some(p) => DistrictRegistry::load_from(p).unwrap_or_else(|e| {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }),
        None => DistrictRegistry::builtin(),
    }
}

fn load_catalog(path: Option<&Path>) -> Catalog {
    let Some(path) = path else {
        eprintln!("Error: No listings file. Use --listings or set listings_file in the config.");
        std::process::exit(1);
    };
    Catalog::load_from(path).unwrap_or_else(|e| {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    })
}

fn usage_error<T>(flag: &str, msg: &str) -> T {
    eprintln!("Error: --{}: {}", flag, msg);
    std::process::exit(1);
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    match serde_json::to_string_pretty(value) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
}
