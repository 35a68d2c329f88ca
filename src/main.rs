// Entry point for the utxo-chain command-line tool
use clap::Parser;
use data_encoding::HEXLOWER;
use log::{error, LevelFilter};
use std::process;
use utxo_chain::{
    address_to_pub_key_hash, validate_address, Blockchain, ChainStore, Command, MiningControl,
    Opt, ProofOfWork, Transaction, Wallets, GLOBAL_CONFIG,
};

fn main() {
    logger_builder().init();

    let opt = Opt::parse();
    if let Err(e) = run_command(opt.command) {
        error!("Error: {e}");
        process::exit(1);
    }
}

/// Info by default; `RUST_LOG` takes precedence when set.
fn logger_builder() -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(LevelFilter::Info).parse_default_env();
    builder
}

fn mining_control() -> Result<MiningControl, Box<dyn std::error::Error>> {
    let control = MiningControl::new();
    Ok(match GLOBAL_CONFIG.get_mining_timeout()? {
        Some(timeout) => control.with_timeout(timeout),
        None => control,
    })
}

fn load_blockchain() -> Result<Blockchain, Box<dyn std::error::Error>> {
    let store = ChainStore::open(GLOBAL_CONFIG.get_data_dir())?;
    Ok(Blockchain::load(store)?.with_mining_control(mining_control()?))
}

fn run_command(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Createblockchain { address } => {
            if !validate_address(&address) {
                return Err(format!("Invalid address: {address}").into());
            }
            let store = ChainStore::open(GLOBAL_CONFIG.get_data_dir())?;
            let blockchain = Blockchain::open_with_control(store, &address, mining_control()?)?;
            println!("Done! Tip: {}", HEXLOWER.encode(&blockchain.get_tip_hash()));
        }
        Command::Createwallet => {
            let mut wallets = Wallets::load_from(GLOBAL_CONFIG.get_wallet_file())?;
            let address = wallets.create_wallet()?;
            println!("Your new address: {address}")
        }
        Command::GetBalance { address } => {
            let pub_key_hash = address_to_pub_key_hash(&address)?;
            let blockchain = load_blockchain()?;
            let balance = blockchain.balance(&pub_key_hash)?;
            println!("Balance of {address}: {balance}");
        }
        Command::ListAddresses => {
            let wallets = Wallets::load_from(GLOBAL_CONFIG.get_wallet_file())?;
            for address in wallets.get_addresses() {
                println!("{address}")
            }
        }
        Command::Send { from, to, amount } => {
            if !validate_address(&from) {
                return Err(format!("Invalid sender address: {from}").into());
            }
            if !validate_address(&to) {
                return Err(format!("Invalid recipient address: {to}").into());
            }

            let wallets = Wallets::load_from(GLOBAL_CONFIG.get_wallet_file())?;
            let blockchain = load_blockchain()?;
            let transaction =
                Transaction::new_utxo_transaction(&from, &to, amount, &wallets, &blockchain)?;
            let block = blockchain.mine_block(&[transaction])?;
            println!("Success! Mined block {}", HEXLOWER.encode(block.get_hash()))
        }
        Command::Printchain => {
            let blockchain = load_blockchain()?;
            for block in blockchain.iterator() {
                let block = block?;
                println!(
                    "============ Block {} ============",
                    HEXLOWER.encode(block.get_hash())
                );
                println!("Prev. block: {}", HEXLOWER.encode(block.get_pre_block_hash()));
                println!("Timestamp: {}", block.get_timestamp());
                println!("Nonce: {}", block.get_nonce());
                println!("PoW: {}", ProofOfWork::validate(&block));
                for tx in block.get_transactions() {
                    print!("{tx}");
                }
                println!()
            }
        }
        Command::Reindexutxo => {
            let blockchain = load_blockchain()?;
            let count = blockchain.reindex_utxo()?;
            println!("Done! There are {count} transactions in the UTXO set.");
        }
    }
    Ok(())
}
