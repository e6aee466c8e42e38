#![no_main]
use libfuzzer_sys::fuzz_target;
use sslr_tls::handshake::codec;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let mut reassembler = codec::HandshakeReassembler::new(1 << 16);
    reassembler.push(data);
    while let Ok(Some(_)) = reassembler.next_message() {}

    if data.len() >= 4 {
        let body = &data[4..];
        let tls12 = data[0] & 1 == 1;
        let _ = codec::decode_client_hello(body);
        let _ = codec::decode_server_hello(body);
        let _ = codec::decode_certificate(body);
        let _ = codec::decode_certificate_status(body);
        let _ = codec::decode_certificate_request(body, tls12);
        let _ = codec::decode_client_key_exchange(body, !tls12);
        let _ = codec::decode_next_protocol(body);
        let _ = codec::decode_protocol_list(body);
        let _ = codec::decode_renegotiation_info(body);
    }
});
