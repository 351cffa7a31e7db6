use anyhow::Result;
use bowsearch::Opts;
use bowsearch::cli::SubCommandExtend;
use bowsearch::config::SubCommand;
use clap::Parser;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();

    let opts = Opts::parse();

    match &opts.subcmd {
        SubCommand::Train(config) => config.run(&opts).await,
        SubCommand::Add(config) => config.run(&opts).await,
        SubCommand::Search(config) => config.run(&opts).await,
        SubCommand::Show(config) => config.run(&opts).await,
        SubCommand::Eval(config) => config.run(&opts).await,
    }
}
