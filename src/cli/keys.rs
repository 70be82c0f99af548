use clap::Subcommand;
use k256::ecdsa::VerifyingKey;

use super::{parse_hex, CliResult};
use crate::crypto::{address_of, KeyPair, PasskeyPair};

#[derive(Subcommand, Debug, Clone)]
pub enum KeysCommands {
    /// Generate a secp256k1 primary/guardian/delegate key, or a P-256 passkey
    Generate {
        #[clap(long)]
        passkey: bool,
    },
    /// Derive the account-style address of a key
    Address {
        /// secp256k1 secret key (hex)
        #[clap(long, conflicts_with = "public_key")]
        secret: Option<String>,
        /// SEC1-encoded secp256k1 public key (hex)
        #[clap(long)]
        public_key: Option<String>,
    },
}

pub fn handle_keys_command(cmd: KeysCommands) -> CliResult {
    match cmd {
        KeysCommands::Generate { passkey: false } => {
            let key = KeyPair::generate();
            println!("secret:  0x{}", key.secret_hex());
            println!("address: {}", key.address());
        }
        KeysCommands::Generate { passkey: true } => {
            let passkey = PasskeyPair::generate();
            let public = passkey.public_key();
            println!("secret: 0x{}", hex::encode(passkey.signing_key.to_bytes()));
            println!("x:      {}", public.x);
            println!("y:      {}", public.y);
            println!("id:     {}", public.id());
        }
        KeysCommands::Address { secret, public_key } => {
            let address = match (secret, public_key) {
                (Some(secret), _) => KeyPair::from_secret_hex(&secret)?.address(),
                (None, Some(public)) => {
                    let bytes = parse_hex(&public)?;
                    let key = VerifyingKey::from_sec1_bytes(&bytes)
                        .map_err(|e| format!("invalid public key: {}", e))?;
                    address_of(&key)
                }
                (None, None) => return Err("pass --secret or --public-key".into()),
            };
            println!("{}", address);
        }
    }
    Ok(())
}
