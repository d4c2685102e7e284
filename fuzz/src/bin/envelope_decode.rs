#[macro_use]
extern crate afl;
use ratchet_chain::MessageEnvelope;

fn main() {
    fuzz!(|data: &[u8]| {
        let _ = MessageEnvelope::from_bytes(data);
    });
}
