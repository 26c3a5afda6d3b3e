use clap::{Parser, Subcommand};

/// metergate: pay-per-request compute gateway
#[derive(Parser)]
#[command(name = "metergate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the gateway server
    Serve {
        /// Port to bind (overrides METERGATE_PORT)
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Apply pending database migrations and exit
    Migrate,

    /// Manage API keys
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Mint a dashboard session token for a user
    Session {
        #[arg(long)]
        user: String,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Issue a new key with the trial balance
    Create {
        #[arg(long)]
        user: String,
        #[arg(long)]
        name: String,
    },
    /// List a user's live keys
    List {
        #[arg(long)]
        user: String,
    },
    /// Add credits to a key
    Topup {
        #[arg(long)]
        id: i64,
        #[arg(long)]
        amount: String,
    },
    /// Revoke a key
    Revoke {
        #[arg(long)]
        id: i64,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_no_subcommand_means_serve() {
        let cli = Cli::try_parse_from(["metergate"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_topup_parses() {
        let cli = Cli::try_parse_from(["metergate", "key", "topup", "--id", "3", "--amount", "2.5"]).unwrap();
        match cli.command {
            Some(Commands::Key {
                command: KeyCommands::Topup { id, amount },
            }) => {
                assert_eq!(id, 3);
                assert_eq!(amount, "2.5");
            }
            _ => panic!("expected key topup"),
        }
    }
}
