use clap::Subcommand;
use serde_json::json;

use super::{parse_hex, CliResult};
use crate::account::credential::{split_validator_prefix, Credential, ScopedCredential};
use crate::account::modules::{builtin, BuiltinModule, ValidatorKind};
use crate::account::{action_hash, Action, Address, Call, InitParams};

#[derive(Subcommand, Debug, Clone)]
pub enum InspectCommands {
    /// Digest a single call request must be signed over
    ActionHash {
        #[clap(long)]
        account: Address,
        #[clap(long)]
        nonce: u64,
        #[clap(long)]
        to: Address,
        #[clap(long, default_value_t = 0)]
        value: u128,
        /// Calldata (hex)
        #[clap(long, default_value = "")]
        data: String,
        /// Deployment payload (hex) for a counterfactual first request
        #[clap(long)]
        init_payload: Option<String>,
    },
    /// Decode a validator-routed credential blob
    Credential { blob: String },
    /// Decode a deployment payload
    InitPayload { payload: String },
}

pub fn handle_inspect_command(cmd: InspectCommands) -> CliResult {
    match cmd {
        InspectCommands::ActionHash {
            account,
            nonce,
            to,
            value,
            data,
            init_payload,
        } => {
            let action = Action::Call(Call::new(to, value, parse_hex(&data)?));
            let payload = init_payload.map(|p| parse_hex(&p)).transpose()?;
            println!("{}", action_hash(account, nonce, payload.as_deref(), &action));
        }
        InspectCommands::Credential { blob } => {
            let bytes = parse_hex(&blob)?;
            let (validator, inner) = split_validator_prefix(&bytes)?;
            let decoded = match builtin(&validator) {
                Some(BuiltinModule::Validator(ValidatorKind::MultiFactor)) => {
                    match Credential::decode_mfa(inner)? {
                        Credential::SingleFactor(sig) => json!({
                            "format": "single-factor",
                            "signature": format!("0x{}", hex::encode(sig)),
                        }),
                        Credential::DualFactor(dual) => json!({
                            "format": "dual-factor",
                            "authenticator_data": hex::encode(&dual.assertion.authenticator_data),
                            "client_data": String::from_utf8_lossy(&dual.assertion.client_data_json),
                            "challenge_index": dual.assertion.challenge_index,
                            "type_index": dual.assertion.type_index,
                            "user_verified": dual.assertion.user_verified(),
                            "second_factor_id": dual.second_factor_id,
                            "primary_signature": format!("0x{}", hex::encode(dual.primary_signature)),
                        }),
                        Credential::Scoped(_) => json!({ "format": "scoped" }),
                    }
                }
                Some(BuiltinModule::Validator(ValidatorKind::ScopedDelegation)) => {
                    let scoped = ScopedCredential::decode(inner)?;
                    json!({
                        "format": "scoped-delegation",
                        "delegate": scoped.delegate,
                        "signature": format!("0x{}", hex::encode(scoped.signature)),
                    })
                }
                _ => json!({ "format": "unknown", "inner_len": inner.len() }),
            };
            let out = json!({ "validator": validator, "credential": decoded });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
        InspectCommands::InitPayload { payload } => {
            let params = InitParams::decode(&parse_hex(&payload)?)?;
            let out = json!({
                "primary": params.primary,
                "second_factor": params.second_factor,
                "second_factor_id": params.second_factor_id(),
                "dual_factor": params.dual_factor,
            });
            println!("{}", serde_json::to_string_pretty(&out)?);
        }
    }
    Ok(())
}
