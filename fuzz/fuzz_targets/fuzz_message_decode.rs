#![no_main]

//! Fuzz target for CoAP message decoding.
//!
//! Header layout:
//! - Ver (2 bits, must be 1), Type (2 bits), Token length (4 bits)
//! - Code: 1 byte
//! - Message ID: 2 bytes
//! - Token: 0-8 bytes
//! - Options, delta/length encoded
//! - 0xFF marker followed by payload

use libfuzzer_sys::fuzz_target;

use dcoap::message::Message;

fuzz_target!(|data: &[u8]| {
    // Input as-is exercises header rejection.
    if let Ok(message) = Message::decode(data) {
        // Whatever decodes must encode to something that decodes the same.
        let wire = message.to_vec();
        let again = Message::decode(&wire).expect("re-decode");
        assert_eq!(again, message);
    }

    // With a valid version, type and token length the options get exercised.
    if data.len() >= 3 {
        let tkl = data[0] & 0x0f;
        let mut datagram = Vec::with_capacity(data.len() + 1);
        datagram.push(0x40 | (data[0] & 0x30) | tkl.min(8));
        datagram.extend_from_slice(&data[1..]);
        let _ = Message::decode(&datagram);
    }
});
