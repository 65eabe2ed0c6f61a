#![cfg(feature = "rpc")]

use std::time::Duration;

use atomicswap::bitcoin::fee::SatPerKvB;
use atomicswap::bitcoin::rpc::{RpcClient, RpcWallet};
use atomicswap::bitcoin::{Bitcoin, ChainProfile};
use atomicswap::blockchain::Network;
use atomicswap::consensus::CanonicalBytes;
use atomicswap::protocol::{Command, Orchestrator, Outcome};
use atomicswap::swap::SwapState;
use atomicswap::syncer::{ChainClient, Deadline};
use atomicswap::wallet::Wallet;
use atomicswap::Error;

use bitcoin::Amount;
use bitcoincore_rpc::RpcApi;

#[macro_use]
mod rpc;

fn setup_wallet() {
    // Keys are exported with dumpprivkey, a legacy wallet is needed
    if rpc::CLIENT
        .create_wallet("swap_wallet", Some(false), None, None, None)
        .is_err()
    {
        let wallets = rpc::CLIENT.list_wallets().unwrap();
        if wallets.is_empty() {
            rpc::CLIENT.load_wallet("swap_wallet").unwrap();
        }
        if wallets.len() > 1 {
            panic!("More than one wallet loaded!");
        }
    }
    mine!(101);
}

fn orchestrator() -> Orchestrator<RpcClient, RpcWallet, Bitcoin> {
    let profile = Bitcoin::new(Network::Local);
    let client = rpc::swap_client();
    let wallet = RpcWallet::new(
        client.clone(),
        profile.bitcoin_network(),
        profile.script_template(),
    );
    Orchestrator::new(
        client,
        wallet,
        profile,
        SatPerKvB::from_sat(2000),
        Duration::from_secs(10),
    )
}

#[test]
#[ignore]
fn chain_tip_follows_the_node() {
    setup_wallet();
    let client = rpc::swap_client();
    let deadline = Deadline::after(Duration::from_secs(10));
    let before = client.latest_block(deadline).unwrap();
    mine!(1);
    let after = client.latest_block(deadline).unwrap();
    assert_eq!(after.height, before.height + 1);
    assert_eq!(
        after.hash,
        rpc::CLIENT.get_best_block_hash().unwrap()
    );
}

#[test]
#[ignore]
fn initiate_audit_and_redeem_on_regtest() {
    setup_wallet();
    let swap = orchestrator();
    let deadline = Deadline::after(Duration::from_secs(10));
    let amount = Amount::from_btc(0.5).unwrap();

    let participant = swap.wallet().new_address(deadline).unwrap();
    let (secret, contract, address) = match swap
        .run(Command::Initiate {
            participant,
            amount,
        })
        .unwrap()
    {
        Outcome::Created {
            secret: Some(secret),
            contract,
            contract_address,
            ..
        } => (secret, contract, contract_address),
        outcome => panic!("unexpected outcome {:?}", outcome),
    };

    // spent while in the mempool, the node finds confirmed transactions only with txindex
    let contract_tx = fund_address!(address, amount);
    match swap
        .run(Command::AuditContract {
            contract: contract.as_canonical_bytes(),
            contract_tx: contract_tx.clone(),
            claimed: Some(amount),
        })
        .unwrap()
    {
        Outcome::Audited {
            result,
            known,
            swap: audited,
        } => {
            assert!(known);
            assert!(audited.is_audited());
            assert!(result.is_well_formed);
            assert_eq!(result.locked_amount, amount);
        }
        outcome => panic!("unexpected outcome {:?}", outcome),
    }

    // the contract cannot be refunded yet
    let res = swap.run(Command::Refund {
        contract: contract.as_canonical_bytes(),
        contract_tx: contract_tx.clone(),
    });
    assert!(matches!(res, Err(Error::LocktimeNotElapsed { .. })));

    let outcome = swap
        .run(Command::Redeem {
            contract: contract.as_canonical_bytes(),
            contract_tx: contract_tx.clone(),
            secret,
        })
        .unwrap();
    assert_eq!(outcome.state(), SwapState::Redeemed);
    let txid = match outcome {
        Outcome::Redeemed { txid, .. } => txid,
        outcome => panic!("unexpected outcome {:?}", outcome),
    };
    let redeem_tx = rpc::CLIENT.get_raw_transaction(&txid, None).unwrap();
    assert_eq!(redeem_tx.input[0].previous_output.txid, contract_tx.txid());

    // the redeem pays back into the node wallet
    mine!(1);
    let info = rpc::CLIENT.get_transaction(&txid, None).unwrap().info;
    assert_eq!(info.confirmations, 1);
}
