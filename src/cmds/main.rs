use anyhow::{anyhow, Context, Error};
use structopt::StructOpt;
use tracing_subscriber::filter::LevelFilter;

mod mirror;

#[derive(StructOpt)]
enum Command {
    /// Scans a registry index and downloads every (non-yanked, by default)
    /// artifact it describes to a local, sharded output directory
    #[structopt(name = "mirror")]
    Mirror(mirror::Args),
}

fn parse_level(s: &str) -> Result<LevelFilter, Error> {
    s.parse::<LevelFilter>()
        .map_err(|_| anyhow!("failed to parse level '{}'", s))
}

#[derive(StructOpt)]
struct Opts {
    #[structopt(
        short = "L",
        long = "log-level",
        default_value = "info",
        parse(try_from_str = parse_level),
        long_help = "The log level for messages, only log messages at or above the level will be emitted.

Possible values:
* off
* error
* warn
* info (default)
* debug
* trace"
    )]
    log_level: LevelFilter,
    /// Output log messages as json
    #[structopt(long)]
    json: bool,
    #[structopt(subcommand)]
    cmd: Command,
}

async fn real_main() -> Result<(), Error> {
    let args = Opts::from_args();

    let mut env_filter = tracing_subscriber::EnvFilter::from_default_env();
    env_filter = env_filter.add_directive(args.log_level.into());

    let subscriber = tracing_subscriber::FmtSubscriber::builder().with_env_filter(env_filter);

    if args.json {
        tracing::subscriber::set_global_default(subscriber.json().finish())
            .context("failed to set default subscriber")?;
    } else {
        tracing::subscriber::set_global_default(subscriber.finish())
            .context("failed to set default subscriber")?;
    };

    match args.cmd {
        Command::Mirror(margs) => mirror::cmd(margs).await,
    }
}

#[tokio::main]
async fn main() {
    match real_main().await {
        Ok(_) => {}
        Err(e) => {
            tracing::error!("{:#}", e);
            std::process::exit(1);
        }
    }
}
