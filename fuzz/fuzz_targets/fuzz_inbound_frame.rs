#![no_main]

use libfuzzer_sys::fuzz_target;
use ttt_session_client::protocol::InboundFrame;

fuzz_target!(|data: &[u8]| {
    let _ = serde_json::from_slice::<InboundFrame>(data);

    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(frame) = serde_json::from_str::<InboundFrame>(s) {
            if let Some(game) = frame.game_state {
                let _ = game.active_participant();
                let _ = game.is_well_formed();
            }
        }
    }
});
