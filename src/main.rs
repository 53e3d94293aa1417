use clap::{Parser, Subcommand};
use hei_portal::utils::{logger, validation::Validate};
use hei_portal::{BinaryProxy, DocumentOutcome, MemoryCache, PortalConfig, PortalGateway};
use std::io::Write;

#[derive(Debug, Parser)]
#[command(name = "hei-portal")]
#[command(about = "Query the HEI portal directory and permit documents")]
struct PortalCli {
    /// Portal base URL (ignored when --config is given)
    #[arg(long)]
    base_url: Option<String>,

    /// TOML configuration file
    #[arg(long)]
    config: Option<String>,

    #[arg(long, help = "Enable verbose output")]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List all institutions known to the portal
    Institutions,
    /// List program names offered by one institution
    Programs {
        #[arg(long)]
        inst_code: String,
    },
    /// List major names under one program of one institution
    Majors {
        #[arg(long)]
        inst_code: String,
        #[arg(long)]
        program: String,
    },
    /// Fetch a permit document through the caching proxy
    Permit {
        #[arg(long)]
        url: String,
        #[arg(long, help = "Write the document here instead of stdout")]
        output: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = PortalCli::parse();

    // 初始化日誌
    logger::init_cli_logger(cli.verbose);

    let config = match (&cli.config, &cli.base_url) {
        (Some(path), _) => PortalConfig::from_file(path)?,
        (None, Some(base_url)) => PortalConfig::new(base_url.clone()),
        (None, None) => {
            eprintln!("❌ Either --config or --base-url is required");
            std::process::exit(1);
        }
    };

    // 驗證配置
    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }

    let cache = MemoryCache::new();

    match cli.command {
        Command::Institutions => {
            let gateway = PortalGateway::new(config, cache);
            let institutions = gateway.fetch_all_institutions().await;
            for hei in &institutions {
                println!("{}\t{}", hei.inst_code, hei.inst_name);
            }
            println!("✅ {} institutions", institutions.len());
        }
        Command::Programs { inst_code } => {
            let gateway = PortalGateway::new(config, cache);
            let programs = gateway.fetch_programs(&inst_code).await;
            for program in &programs {
                println!("{}", program);
            }
            println!("✅ {} programs for {}", programs.len(), inst_code);
        }
        Command::Majors { inst_code, program } => {
            let gateway = PortalGateway::new(config, cache);
            let majors = gateway.fetch_majors(&inst_code, &program).await;
            for major in &majors {
                println!("{}", major);
            }
            println!("✅ {} majors for {} / {}", majors.len(), inst_code, program);
        }
        Command::Permit { url, output } => {
            let proxy = BinaryProxy::new(config, cache);
            match proxy.fetch_document(&url).await {
                DocumentOutcome::Available(payload) => match output {
                    Some(path) => {
                        std::fs::write(&path, &payload.bytes)?;
                        println!("💾 Saved {} bytes to {}", payload.size, path);
                    }
                    None => {
                        std::io::stdout().write_all(&payload.bytes)?;
                    }
                },
                DocumentOutcome::NotAvailable { url } => {
                    eprintln!("❌ Document not available, try the direct link: {}", url);
                    std::process::exit(1);
                }
            }
        }
    }

    Ok(())
}
