// Entry point of the wallet CLI. Every wallet command opens the file
// offline, does its work on the cached state and saves it back.
use clap::Parser;
use conceal_wallet::config::{WalletSettings, GLOBAL_CONFIG};
use conceal_wallet::crypto::{PublicKey, SecretKey};
use conceal_wallet::network::OfflineNode;
use conceal_wallet::storage::SaveLevel;
use conceal_wallet::{Balance, Command, Opt, Result, Wallet};
use log::{error, info, LevelFilter};
use serde_json::json;
use std::process;
use std::sync::Arc;

fn main() {
    let opt = Opt::parse();

    // RUST_LOG wins over the configured level
    let settings = match load_settings(&opt) {
        Ok(settings) => settings,
        Err(e) => {
            env_logger::builder().filter_level(LevelFilter::Info).init();
            error!("Error: {e}");
            process::exit(1);
        }
    };
    let level = settings.log_level.parse().unwrap_or(LevelFilter::Info);
    env_logger::builder()
        .filter_level(level)
        .parse_default_env()
        .init();

    if let Err(e) = run_command(opt.command, settings, opt.json) {
        error!("Error: {e}");
        process::exit(1);
    }
}

fn load_settings(opt: &Opt) -> Result<WalletSettings> {
    let settings = match &opt.config {
        Some(path) => WalletSettings::load(path)?,
        None => WalletSettings::default(),
    };
    let mut settings = settings.with_overrides(&GLOBAL_CONFIG);
    if let Some(wallet) = &opt.wallet {
        settings.wallet_file = wallet.clone();
    }
    settings.validate()?;
    Ok(settings)
}

fn open_wallet(settings: WalletSettings, password: &str) -> Result<Wallet> {
    let path = settings.wallet_file.clone();
    let wallet = Wallet::new(settings, Arc::new(OfflineNode))?;
    wallet.load(&path, password)?;
    Ok(wallet)
}

fn print_balance(label: &str, balance: &Balance) {
    println!("{label}");
    println!("  available:          {}", balance.actual);
    println!("  pending:            {}", balance.pending);
    println!("  locked deposits:    {}", balance.locked_deposit);
    println!("  unlocked deposits:  {}", balance.unlocked_deposit);
}

fn print_json(value: &serde_json::Value) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| conceal_wallet::WalletError::Serialization(e.to_string()))?;
    println!("{text}");
    Ok(())
}

fn run_command(command: Command, settings: WalletSettings, json: bool) -> Result<()> {
    match command {
        Command::Create {
            password,
            view_secret,
        } => {
            let path = settings.wallet_file.clone();
            let wallet = Wallet::new(settings, Arc::new(OfflineNode))?;
            match view_secret {
                Some(hex) => {
                    wallet.initialize_with_view_key(&path, &password, SecretKey::from_hex(&hex)?)?
                }
                None => wallet.initialize(&path, &password)?,
            }
            let addresses = wallet.addresses()?;
            if json {
                print_json(&json!({ "file": path, "addresses": addresses }))?;
            } else {
                println!("Created {}", path.display());
                for address in &addresses {
                    println!("{address}");
                }
            }
            wallet.shutdown()?;
        }
        Command::Addresses { password } => {
            let wallet = open_wallet(settings, &password)?;
            let addresses = wallet.addresses()?;
            if json {
                print_json(&json!(addresses))?;
            } else {
                for address in &addresses {
                    println!("{address}");
                }
            }
            wallet.shutdown()?;
        }
        Command::CreateAddress {
            password,
            spend_secret,
            spend_public,
        } => {
            let wallet = open_wallet(settings, &password)?;
            let address = match (spend_secret, spend_public) {
                (Some(hex), _) => wallet.create_address_from_secret(SecretKey::from_hex(&hex)?)?,
                (None, Some(hex)) => wallet.create_tracking_address(PublicKey::from_hex(&hex)?)?,
                (None, None) => wallet.create_address()?,
            };
            wallet.save(SaveLevel::Full)?;
            info!("Address {address} saved");
            if json {
                print_json(&json!({ "address": address }))?;
            } else {
                println!("{address}");
            }
            wallet.shutdown()?;
        }
        Command::Balance { password, address } => {
            let wallet = open_wallet(settings, &password)?;
            let balance = match &address {
                Some(address) => wallet.address_balance(address)?,
                None => wallet.balance()?,
            };
            if json {
                print_json(&json!({
                    "address": address,
                    "block_count": wallet.block_count()?,
                    "balance": balance,
                }))?;
            } else {
                let label = address.as_deref().unwrap_or("all addresses");
                print_balance(
                    &format!("Balance of {label} at {} blocks", wallet.block_count()?),
                    &balance,
                );
            }
            wallet.shutdown()?;
        }
        Command::ExportKeys { password, address } => {
            let wallet = open_wallet(settings, &password)?;
            let address = match address {
                Some(address) => address,
                None => wallet.addresses()?.into_iter().next().ok_or_else(|| {
                    conceal_wallet::WalletError::ObjectNotFound("address".to_string())
                })?,
            };
            let keys = wallet.account_keys(&address)?;
            let (view_public_key, view_secret_key) = wallet.view_key()?;
            let spend_secret_key = keys.spend_secret_key.as_ref().map(|k| k.to_hex());
            if json {
                print_json(&json!({
                    "address": address,
                    "spend_public_key": keys.address.spend_public_key.to_hex(),
                    "spend_secret_key": spend_secret_key,
                    "view_public_key": view_public_key.to_hex(),
                    "view_secret_key": view_secret_key.to_hex(),
                }))?;
            } else {
                println!("Address:           {address}");
                println!("Spend public key:  {}", keys.address.spend_public_key.to_hex());
                println!(
                    "Spend secret key:  {}",
                    spend_secret_key.as_deref().unwrap_or("(view only)")
                );
                println!("View public key:   {}", view_public_key.to_hex());
                println!("View secret key:   {}", view_secret_key.to_hex());
            }
            wallet.shutdown()?;
        }
        Command::Decompose { amount, dust } => {
            let dust = dust.unwrap_or(settings.currency.default_dust_threshold);
            let chunks = conceal_wallet::core::decompose_amount(amount, dust);
            if json {
                print_json(&json!(chunks))?;
            } else {
                let text: Vec<String> = chunks.iter().map(u64::to_string).collect();
                println!("{}", text.join(" + "));
            }
        }
        Command::Interest {
            amount,
            term,
            height,
        } => {
            settings.currency.validate_deposit(amount, term)?;
            let interest = settings.currency.calculate_interest(amount, term, height);
            if json {
                print_json(&json!({ "amount": amount, "term": term, "interest": interest }))?;
            } else {
                println!("Interest on {amount} for {term} blocks: {interest}");
            }
        }
        Command::ValidateAddress { address } => {
            let result = settings.currency.parse_account_address_string(&address);
            if json {
                print_json(&json!({
                    "address": address,
                    "valid": result.is_ok(),
                    "error": result.as_ref().err().map(ToString::to_string),
                }))?;
            } else {
                match &result {
                    Ok(_) => println!("{address} is valid"),
                    Err(e) => println!("{e}"),
                }
            }
        }
        Command::ShowConfig => {
            if json {
                print_json(&json!(settings))?;
            } else {
                print!("{}", settings.to_toml()?);
            }
        }
    }
    Ok(())
}
