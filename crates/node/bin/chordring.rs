use chordring_node::config::Config;
use chordring_node::config::DEFAULT_CONFIG_PATH;
use chordring_node::logging::init_logging;
use chordring_node::logging::LogLevel;
use chordring_node::processor::Processor;
use chordring_node::util::build_version;
use clap::Args;
use clap::Parser;
use clap::Subcommand;

#[derive(Parser, Debug)]
#[command(about, version, author)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    #[arg(long, value_enum, env, help = "Overrides log_level of the config file")]
    log_level: Option<LogLevel>,
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Command {
    #[command(about = "Writes a default configuration file.")]
    Init(InitCommand),
    #[command(about = "Starts a long-running ring member.")]
    Run(RunCommand),
    #[command(about = "Joins the ring with an ephemeral member, looks a key up and prints the result.")]
    Lookup(LookupCommand),
}

#[derive(Args, Debug)]
struct ConfigArgs {
    #[arg(
        long,
        short = 'c',
        env,
        default_value = DEFAULT_CONFIG_PATH,
        help = "Config file location"
    )]
    pub config: String,
}

#[derive(Args, Debug)]
struct InitCommand {
    #[arg(
        long,
        default_value = DEFAULT_CONFIG_PATH,
        help = "The location of config file"
    )]
    pub location: String,

    #[arg(long, help = "Address of a ring member to join through")]
    pub introducer: Option<String>,
}

#[derive(Args, Debug)]
struct RunCommand {
    #[arg(
        long,
        short = 'b',
        help = "Listen address. If not provided, use bind_addr in config file",
        env
    )]
    pub bind_addr: Option<String>,

    #[arg(long, help = "Address peers reach this node at", env)]
    pub external_addr: Option<String>,

    #[arg(
        long,
        short = 'i',
        help = "Ring member to join through. If not provided, use introducer in config file",
        env
    )]
    pub introducer: Option<String>,

    #[command(flatten)]
    config_args: ConfigArgs,
}

#[derive(Args, Debug)]
struct LookupCommand {
    #[arg(help = "Key to look up, 40 hex digits")]
    pub key: String,

    #[arg(
        long,
        short = 'i',
        help = "Ring member to join through. If not provided, use introducer in config file",
        env
    )]
    pub introducer: Option<String>,

    #[command(flatten)]
    config_args: ConfigArgs,
}

fn load_config(args: &ConfigArgs) -> Config {
    Config::read_fs(args.config.as_str()).unwrap_or_else(|e| {
        tracing::warn!("Using the default config, {} is unusable: {}", args.config, e);
        Config::default()
    })
}

async fn daemon_run(args: RunCommand) -> anyhow::Result<()> {
    let mut c = load_config(&args.config_args);
    if let Some(bind_addr) = args.bind_addr {
        c.bind_addr = bind_addr;
    }
    c.external_addr = args.external_addr.or(c.external_addr);
    c.introducer = args.introducer.or(c.introducer);

    tracing::info!("chordring {}", build_version());
    let processor = Processor::new(c).await?;
    processor
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!("failed to listen for ctrl-c: {}", e);
            }
        })
        .await?;
    Ok(())
}

async fn lookup_run(args: LookupCommand) -> anyhow::Result<()> {
    let mut c = load_config(&args.config_args);
    c.introducer = args.introducer.or(c.introducer);
    if c.introducer.is_none() {
        anyhow::bail!("an introducer is required to look a key up");
    }
    // an ephemeral member on any free port
    c.bind_addr = "127.0.0.1:0".to_string();
    c.external_addr = None;

    let processor = Processor::new(c).await?;
    processor.join().await?;
    let result = processor.lookup_hex(&args.key).await;
    processor.stop();
    println!("{}", serde_json::to_string_pretty(&result?)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    let file_level = match &cli.command {
        Command::Run(RunCommand { config_args, .. })
        | Command::Lookup(LookupCommand { config_args, .. }) => {
            Config::read_fs(config_args.config.as_str())
                .map(|c| c.log_level)
                .unwrap_or_default()
        }
        Command::Init(_) => LogLevel::default(),
    };
    init_logging(cli.log_level.unwrap_or(file_level));

    match cli.command {
        Command::Init(args) => {
            let config = Config {
                introducer: args.introducer,
                ..Config::default()
            };
            let p = config.write_fs(args.location.as_str())?;
            println!("Your config file has saved to: {}", p);
            Ok(())
        }
        Command::Run(args) => daemon_run(args).await,
        Command::Lookup(args) => lookup_run(args).await,
    }
}
