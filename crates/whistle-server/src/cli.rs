use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "whistle-server", about = "Whistle direct-messaging service")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config/whistle.toml")]
    pub config: String,
}
