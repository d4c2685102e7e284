#[macro_use]
extern crate afl;
use ratchet_chain::{ChainConfig, Session, X25519Secret};

fn get_session() -> Session {
    let shared_secret = [7u8; 32];

    // The receiving side under attack
    let pair = X25519Secret::generate().expect("Setup failed");
    Session::responder(&shared_secret, pair, ChainConfig::default()).expect("Setup failed")
}

fn main() {
    let mut session = get_session();

    fuzz!(|data: &[u8]| {
        let _ = session.decrypt(data);
    });
}
