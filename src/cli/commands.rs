use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "conceal-wallet", about = "Conceal wallet core")]
pub struct Opt {
    #[arg(long = "config", global = true, help = "Settings file (toml)")]
    pub config: Option<PathBuf>,
    #[arg(
        long = "wallet",
        global = true,
        help = "Wallet file, overrides the settings and CONCEAL_WALLET_FILE"
    )]
    pub wallet: Option<PathBuf>,
    #[arg(long = "json", global = true, help = "Print JSON instead of text")]
    pub json: bool,
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    #[command(name = "create", about = "Create a wallet file with one address")]
    Create {
        #[arg(long = "password")]
        password: String,
        #[arg(
            long = "view-secret",
            help = "Create a wallet without addresses around this view secret key (hex)"
        )]
        view_secret: Option<String>,
    },
    #[command(name = "addresses", about = "Print the wallet addresses")]
    Addresses {
        #[arg(long = "password")]
        password: String,
    },
    #[command(name = "create-address", about = "Add an address to the wallet")]
    CreateAddress {
        #[arg(long = "password")]
        password: String,
        #[arg(
            long = "spend-secret",
            conflicts_with = "spend_public",
            help = "Import an address from its spend secret key (hex)"
        )]
        spend_secret: Option<String>,
        #[arg(
            long = "spend-public",
            help = "Import a view-only address from its spend public key (hex)"
        )]
        spend_public: Option<String>,
    },
    #[command(name = "balance", about = "Print the cached balance")]
    Balance {
        #[arg(long = "password")]
        password: String,
        #[arg(help = "Only this address")]
        address: Option<String>,
    },
    #[command(name = "export-keys", about = "Print the keys of an address")]
    ExportKeys {
        #[arg(long = "password")]
        password: String,
        #[arg(help = "Address to export, the first one by default")]
        address: Option<String>,
    },
    #[command(name = "decompose", about = "Split an amount into output denominations")]
    Decompose {
        amount: u64,
        #[arg(long = "dust", help = "Dust threshold, the currency default otherwise")]
        dust: Option<u64>,
    },
    #[command(name = "interest", about = "Interest earned by a deposit")]
    Interest {
        amount: u64,
        #[arg(help = "Term in blocks")]
        term: u32,
        #[arg(long = "height", default_value_t = u32::MAX, help = "Height the deposit is confirmed at")]
        height: u32,
    },
    #[command(name = "validate-address", about = "Check an address string")]
    ValidateAddress { address: String },
    #[command(name = "show-config", about = "Print the effective settings")]
    ShowConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_global_flags() {
        let opt = Opt::try_parse_from([
            "conceal-wallet",
            "balance",
            "--password",
            "pw",
            "--json",
            "--wallet",
            "w.ccx",
        ])
        .unwrap();
        assert!(opt.json);
        assert_eq!(opt.wallet, Some(PathBuf::from("w.ccx")));
        assert!(matches!(
            opt.command,
            Command::Balance { ref password, address: None } if password == "pw"
        ));
    }

    #[test]
    fn test_import_keys_conflict() {
        assert!(Opt::try_parse_from([
            "conceal-wallet",
            "create-address",
            "--password",
            "pw",
            "--spend-secret",
            "00",
            "--spend-public",
            "00",
        ])
        .is_err());
    }

    #[test]
    fn test_interest_defaults_to_current_rules() {
        let opt = Opt::try_parse_from(["conceal-wallet", "interest", "1000000", "5040"]).unwrap();
        assert!(matches!(
            opt.command,
            Command::Interest { amount: 1_000_000, term: 5_040, height: u32::MAX }
        ));
    }
}
