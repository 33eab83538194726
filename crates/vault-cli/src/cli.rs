use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "vault",
    about = "Credential vault: inspect, migrate and edit stored accounts",
    version,
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// TOML file naming the data directory and store files
    #[arg(short, long, global = true, default_value = "vault.toml")]
    pub config: PathBuf,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show storage version and what each store holds, without migrating
    Status,
    /// Run the legacy-to-relational migration
    Migrate,
    /// List every identity, mechanism and notification
    List,
    /// Show one node by opaque reference
    Show(RefArgs),
    /// Remove an identity, mechanism or notification
    Remove(RefArgs),
    /// Approve or deny a pending notification
    Respond(RespondArgs),
}

#[derive(Args)]
pub struct RefArgs {
    /// `/`-joined opaque reference, as printed by `list`
    pub reference: String,
}

#[derive(Args)]
pub struct RespondArgs {
    pub reference: String,
    #[arg(long, conflicts_with = "deny", required_unless_present = "deny")]
    pub approve: bool,
    #[arg(long)]
    pub deny: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["vault", "list", "--format", "json", "-v"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.format, OutputFormat::Json);
        assert_eq!(cli.config, PathBuf::from("vault.toml"));
    }

    #[test]
    fn respond_needs_exactly_one_verdict() {
        assert!(Cli::try_parse_from(["vault", "respond", "a/0/1"]).is_err());
        assert!(Cli::try_parse_from(["vault", "respond", "a/0/1", "--approve", "--deny"]).is_err());
        let cli = Cli::try_parse_from(["vault", "respond", "a/0/1", "--deny"]).unwrap();
        match cli.command {
            Command::Respond(args) => assert!(args.deny && !args.approve),
            _ => panic!("expected respond"),
        }
    }
}
