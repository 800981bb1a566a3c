#![no_main]

use libfuzzer_sys::fuzz_target;
use ttt_session_client::stomp;

fuzz_target!(|data: &[u8]| {
    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };
    // Whatever decodes must survive a re-encode.
    if let Ok(frames) = stomp::decode_frames(s) {
        for frame in frames {
            let _ = stomp::decode_frames(&frame.encode());
        }
    }
});
