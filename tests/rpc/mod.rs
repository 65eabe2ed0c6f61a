#![allow(unused_macros)]

use atomicswap::bitcoin::rpc::RpcClient;
use bitcoincore_rpc::{Auth, Client};
use std::env;
use std::path::PathBuf;

fn host() -> String {
    let host = env::var("RPC_HOST").unwrap_or("127.0.0.1".into());
    let port = env::var("RPC_PORT").unwrap_or("18443".into());
    format!("http://{}:{}", host, port)
}

fn auth() -> Auth {
    let ctx = env::var("CI").unwrap_or("false".into());
    if ctx == "false" {
        let u = env::var("RPC_USER").unwrap();
        let p = env::var("RPC_PASS").unwrap();
        Auth::UserPass(u, p)
    } else {
        let cookie = env::var("RPC_COOKIE").unwrap_or("/data/regtest/.cookie".into());
        Auth::CookieFile(PathBuf::from(cookie))
    }
}

lazy_static::lazy_static! {
    pub static ref CLIENT: Client = Client::new(host().as_str(), auth()).unwrap();
}

/// A swap chain client talking to the same node as [`CLIENT`].
pub fn swap_client() -> RpcClient {
    let (user, pass) = auth().get_user_pass().unwrap();
    RpcClient::new(host(), user, pass)
}

macro_rules! gen_to_add {
    ($num:expr => $add:expr) => (
        rpc::CLIENT.generate_to_address($num, &$add).unwrap()
    );
    ($add:expr) => (
        gen_to_add!(1 => $add)
    );
}

macro_rules! mine {
    () => {{
        mine!(1)
    }};

    ($num:literal) => {{
        gen_to_add!($num => rpc::CLIENT.get_new_address(None, None).unwrap())
    }};
}

macro_rules! fund_address {
    ($add:expr, $amount:expr) => {{
        let txid = rpc::CLIENT
            .send_to_address(&$add, $amount, None, None, None, None, None, None)
            .unwrap();
        rpc::CLIENT
            .get_raw_transaction(&txid, None)
            .unwrap()
    }};
}
