#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = sslr_tls::record::Record::parse(data);

    // Feed in uneven chunks to exercise header/body reassembly.
    let mut framer = sslr_tls::record::layer::RecordFramer::new();
    let mut rest = data;
    while !rest.is_empty() {
        let chunk = (rest[0] as usize % 7 + 1).min(rest.len());
        match framer.feed(&rest[..chunk]) {
            Ok((used, _)) if used > 0 => rest = &rest[used..],
            _ => break,
        }
    }
    let _ = sslr_tls::alert::Alert::decode_all(data);
});
