use clap::Parser;

/// Poly <-> EVM chain relayer service
#[derive(Debug, Parser)]
#[command(name = "relayer", version)]
pub struct Opts {
    /// Log verbosity: 0 = trace, 1 = debug, 2 = info, 3 = warn, 4 = error,
    /// 5 = off
    #[arg(long, default_value_t = 2)]
    pub loglevel: u8,

    /// Path of the service config file
    #[arg(long, default_value = "./config.json")]
    pub cliconfig: String,

    /// Start scanning the EVM chain at this height
    #[arg(long, default_value_t = 0)]
    pub hecostart: u64,

    /// Force the EVM scan back to this height, even before already-handled
    /// blocks
    #[arg(long, default_value_t = 0)]
    pub hecostartforce: u64,

    /// Start scanning the poly chain at this height
    #[arg(long, default_value_t = 0)]
    pub polystart: u32,

    /// Mirror logs into this directory
    #[arg(long)]
    pub logdir: Option<String>,
}
