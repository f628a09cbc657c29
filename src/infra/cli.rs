use clap::Parser;

/// Demo binary CLI: wires up a `TopicFlow` against a real Kafka cluster
/// using the configuration loaded from `config/`.
#[derive(Parser, Debug)]
#[command(author, version, about)]
pub struct Cli {
    /// Replay the input topic from the beginning instead of resuming from
    /// the committed group offsets.
    #[arg(long)]
    pub reset_offsets: bool,
}
