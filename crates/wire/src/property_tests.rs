// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Codec properties: arbitrary payloads survive framing, and arbitrary
//! events survive the full frame round trip.

use crate::{decode, encode, Frame, Reply};
use proptest::prelude::*;
use rp_core::{ExecutionToken, JobEvent, RunId, TaskId};

fn arb_event() -> impl Strategy<Value = JobEvent> {
    (
        "[a-z0-9-]{1,24}",
        "[a-z0-9-]{1,24}",
        "[a-z./]{1,32}",
        "[a-z.]{1,24}",
        any::<u64>(),
        any::<u64>(),
        proptest::option::of(".{0,64}"),
        proptest::option::of(proptest::collection::vec(any::<u8>(), 0..256)),
    )
        .prop_map(
            |(run, token, event_type, category, sequence, timestamp, summary, binary)| {
                let mut event = JobEvent::new(
                    RunId::from_string(&run),
                    TaskId::from_string("task-prop"),
                    ExecutionToken::from_string(&token),
                    event_type,
                    category,
                );
                event.sequence = sequence;
                event.timestamp = timestamp;
                event.summary = summary;
                event.binary_payload = binary;
                event
            },
        )
}

proptest! {
    #[test]
    fn events_survive_framing(event in arb_event()) {
        let frame = Frame::Event { event: Box::new(event) };
        let buf = encode(&frame).unwrap();
        let decoded: Frame = decode(&buf).unwrap();
        prop_assert_eq!(decoded, frame);
    }

    #[test]
    fn error_replies_survive_framing(message in ".{0,256}") {
        let reply = Reply::Error { message };
        let buf = encode(&reply).unwrap();
        let decoded: Reply = decode(&buf).unwrap();
        prop_assert_eq!(decoded, reply);
    }

    #[test]
    fn length_prefix_matches_payload(message in ".{0,512}") {
        let reply = Reply::Error { message };
        let buf = encode(&reply).unwrap();
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        prop_assert_eq!(len as usize, buf.len() - 4);
    }
}
