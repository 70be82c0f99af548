use clap::Subcommand;
use serde_json::json;
use tracing::info;

use super::{parse_hex, unix_now, CliResult};
use crate::account::credential::with_validator_prefix;
use crate::account::{Account, Action, Address, Call, Request, MFA_VALIDATOR};
use crate::config::CompassConfig;
use crate::crypto::KeyPair;
use crate::storage::Storage;

#[derive(Subcommand, Debug, Clone)]
pub enum AccountCommands {
    /// Instantiate an account from a deployment payload
    Init {
        #[clap(long)]
        address: Address,
        /// Deployment payload (hex)
        #[clap(long)]
        init_payload: String,
        #[clap(long)]
        now: Option<u64>,
    },
    /// Print a summary of a stored account
    Show {
        #[clap(long)]
        address: Address,
        #[clap(long)]
        now: Option<u64>,
    },
    /// List stored accounts
    List,
    /// Sign a single call with the primary key and run it through the dispatcher
    Call {
        #[clap(long)]
        address: Address,
        /// Primary secp256k1 secret key (hex)
        #[clap(long)]
        secret: String,
        #[clap(long)]
        to: Address,
        #[clap(long, default_value_t = 0)]
        value: u128,
        #[clap(long, default_value = "")]
        data: String,
        /// Deployment payload (hex); instantiates the account on first use
        #[clap(long)]
        init_payload: Option<String>,
        #[clap(long)]
        now: Option<u64>,
    },
    /// Run a JSON-encoded request through the dispatcher
    Submit {
        /// Path to the request file
        #[clap(long)]
        request: String,
        #[clap(long)]
        now: Option<u64>,
    },
    /// Execute every matured credential change, hook removal and recovery
    Crank {
        #[clap(long)]
        address: Address,
        #[clap(long)]
        now: Option<u64>,
    },
}

pub fn handle_account_command(cmd: AccountCommands, config: &CompassConfig) -> CliResult {
    let storage = Storage::open(&config.storage.db_path)?;

    match cmd {
        AccountCommands::Init {
            address,
            init_payload,
            now,
        } => {
            if storage.load_account(&address)?.is_some() {
                return Err(format!("account {} already stored", address).into());
            }
            let mut account = Account::new(address, &config.timelock);
            account.deploy(&parse_hex(&init_payload)?, now.unwrap_or_else(unix_now))?;
            storage.save_account(&account)?;
            println!("initialized {}", address);
        }
        AccountCommands::Show { address, now } => {
            let account = load(&storage, &address)?;
            println!("{}", serde_json::to_string_pretty(&summary(&account, now.unwrap_or_else(unix_now)))?);
        }
        AccountCommands::List => {
            for address in storage.accounts()? {
                println!("{}", address);
            }
        }
        AccountCommands::Call {
            address,
            secret,
            to,
            value,
            data,
            init_payload,
            now,
        } => {
            let key = KeyPair::from_secret_hex(&secret)?;
            let mut account = storage
                .load_account(&address)?
                .unwrap_or_else(|| Account::new(address, &config.timelock));

            let action = Action::Call(Call::new(to, value, parse_hex(&data)?));
            let mut request = Request::new(address, account.nonce(), action);
            if let Some(payload) = init_payload {
                request = request.with_init_payload(parse_hex(&payload)?);
            }
            let signature = key.sign_hash(&request.action_hash())?;
            let request = request.with_credential(with_validator_prefix(*MFA_VALIDATOR, &signature));

            let receipt = account.handle(request, now.unwrap_or_else(unix_now))?;
            storage.save_account(&account)?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        AccountCommands::Submit { request, now } => {
            let raw = std::fs::read_to_string(&request)?;
            let request: Request = serde_json::from_str(&raw)?;
            let mut account = storage
                .load_account(&request.account)?
                .unwrap_or_else(|| Account::new(request.account, &config.timelock));
            let receipt = account.handle(request, now.unwrap_or_else(unix_now))?;
            storage.save_account(&account)?;
            println!("{}", serde_json::to_string_pretty(&receipt)?);
        }
        AccountCommands::Crank { address, now } => {
            let mut account = load(&storage, &address)?;
            let report = account.crank(now.unwrap_or_else(unix_now));
            storage.save_account(&account)?;
            info!(
                account = %address,
                executed = report.executed.len(),
                failed = report.failed.len(),
                "crank finished"
            );
            for (kind, id) in &report.executed {
                println!("executed {} {}", kind, id);
            }
            for (kind, id, err) in &report.failed {
                println!("failed   {} {}: {}", kind, id, err);
            }
        }
    }
    Ok(())
}

fn load(storage: &Storage, address: &Address) -> Result<Account, Box<dyn std::error::Error>> {
    storage
        .load_account(address)?
        .ok_or_else(|| format!("account {} not found", address).into())
}

fn summary(account: &Account, now: u64) -> serde_json::Value {
    let registry = account.registry();
    let credentials: Vec<_> = registry
        .credentials()
        .map(|(id, c)| json!({ "id": id, "tag": c.tag, "active": c.active, "added_at": c.added_at }))
        .collect();
    let grants: Vec<_> = registry
        .grants()
        .map(|g| {
            json!({
                "delegate": g.delegate,
                "valid_after": g.valid_after,
                "valid_until": g.valid_until,
                "spent_total": g.spent_total.to_string(),
                "live": g.is_live(now),
            })
        })
        .collect();
    let changes: Vec<_> = account
        .pending_changes()
        .iter()
        .map(|(id, p)| json!({ "id": id, "change": p.payload.name(), "matures_at": p.matures_at, "status": format!("{:?}", p.status(now)) }))
        .collect();
    let recoveries: Vec<_> = match account.guardians() {
        Some(guardians) => account
            .recoveries()
            .iter()
            .map(|(id, r)| json!({ "id": id, "approvals": r.approvals.len(), "status": format!("{:?}", r.status(guardians, now)) }))
            .collect(),
        None => Vec::new(),
    };
    let modules = account.modules();

    json!({
        "address": account.address(),
        "deployed": account.is_deployed(),
        "nonce": account.nonce(),
        "primary": registry.primary(),
        "dual_factor": registry.dual_factor_enabled(),
        "credentials": credentials,
        "guardians": account.guardians().map(|g| json!({
            "members": g.members().collect::<Vec<_>>(),
            "threshold": g.threshold(),
        })),
        "validators": modules.validators(),
        "executors": modules.executors(),
        "hook": modules.hook().map(|h| h.module),
        "fallbacks": modules
            .fallbacks()
            .into_iter()
            .map(|(selector, handler)| json!({ "selector": hex::encode(selector), "handler": handler }))
            .collect::<Vec<_>>(),
        "grants": grants,
        "pending_changes": changes,
        "recoveries": recoveries,
    })
}
