use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use deckmerge::config::DeckmergeConfig;
use deckmerge::telemetry;
use deckmerge_store::DeckType;

mod cli;

use cli::Commands;

/// Sandbox-based editing of shared tropical-cyclone deck data
///
/// Forecasters check out a deck into a private sandbox, edit records there,
/// and check the sandbox back in. Concurrent checkins are detected and
/// surfaced as conflicts to resolve before the sandbox can be committed.
///
/// WORKFLOW:
///
///   1. Import a deck:      deckmerge -t b import al052024 bdeck.json
///   2. Check it out:       deckmerge -t b checkout al052024 --owner alice
///   3. Edit records:       deckmerge -t b modify 1 7 record.json
///   4. Check mergeability: deckmerge -t b check 1
///   5. Resolve conflicts:  deckmerge -t b resolve 1 resolutions.json
///   6. Check in:           deckmerge -t b checkin 1
///
/// A checkin can be reversed with 'deckmerge -t b rollback <log-id>'.
#[derive(Parser)]
#[command(name = "deckmerge")]
#[command(version, about)]
#[command(propagate_version = true)]
#[command(after_help = "See 'deckmerge <command> --help' for more information on a specific command.")]
pub struct Cli {
    /// Deck type the command works on
    #[arg(
        short = 't',
        long,
        global = true,
        env = "DECKMERGE_DECK_TYPE",
        value_parser = parse_deck_type
    )]
    deck_type: Option<DeckType>,

    /// Path to the configuration file
    #[arg(long, global = true, env = "DECKMERGE_CONFIG", default_value = "deckmerge.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

fn parse_deck_type(s: &str) -> Result<DeckType, String> {
    s.parse::<DeckType>().map_err(|e| e.to_string())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Completions { shell } = cli.command {
        clap_complete::generate(
            shell,
            &mut Cli::command(),
            "deckmerge",
            &mut std::io::stdout(),
        );
        return Ok(());
    }

    let config = DeckmergeConfig::load(&cli.config)?;
    telemetry::init(config.telemetry.format);

    let Some(deck_type) = cli.deck_type else {
        anyhow::bail!(
            "no deck type given.\n  To fix: pass --deck-type (a, b, e, f, track, genesis-b, genesis-e) \
             or set DECKMERGE_DECK_TYPE."
        );
    };
    cli::run(cli.command, deck_type, &config)
}
