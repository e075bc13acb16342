// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use super::*;
use crate::{Reply, Request};
use rp_core::RunId;

#[test]
fn encode_prefixes_payload_length() {
    let buf = encode(&Request::CheckHealth).unwrap();
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
    assert_eq!(len as usize, buf.len() - 4);
}

#[test]
fn encode_decode_round_trip() {
    let request = Request::StopJob { run_id: RunId::from_string("run-1") };
    let buf = encode(&request).unwrap();
    let decoded: Request = decode(&buf).unwrap();
    assert_eq!(decoded, request);
}

#[test]
fn decode_rejects_short_buffer() {
    assert!(matches!(
        decode::<Request>(&[0, 0]),
        Err(ProtocolError::Closed)
    ));
}

#[test]
fn decode_rejects_oversize_length() {
    let mut buf = Vec::new();
    buf.extend_from_slice(&(MAX_FRAME_BYTES + 1).to_be_bytes());
    buf.extend_from_slice(b"{}");
    assert!(matches!(
        decode::<Request>(&buf),
        Err(ProtocolError::FrameTooLarge { .. })
    ));
}

#[tokio::test]
async fn async_frames_round_trip_over_duplex() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    let request = Request::Subscribe { run_ids: vec![RunId::from_string("run-1")] };
    write_frame(&mut client, &request).await.unwrap();
    let received: Request = read_frame(&mut server).await.unwrap();
    assert_eq!(received, request);

    let reply = Reply::Subscribed;
    write_frame(&mut server, &reply).await.unwrap();
    let received: Reply = read_frame(&mut client).await.unwrap();
    assert_eq!(received, reply);
}

#[tokio::test]
async fn eof_at_frame_boundary_reports_closed() {
    let (client, mut server) = tokio::io::duplex(64);
    drop(client);
    assert!(matches!(
        read_frame::<_, Request>(&mut server).await,
        Err(ProtocolError::Closed)
    ));
}

#[tokio::test]
async fn multiple_frames_preserve_order() {
    let (mut client, mut server) = tokio::io::duplex(4096);

    for i in 0..3 {
        let request = Request::StopJob { run_id: RunId::from_string(format!("run-{i}")) };
        write_frame(&mut client, &request).await.unwrap();
    }

    for i in 0..3 {
        let received: Request = read_frame(&mut server).await.unwrap();
        assert_eq!(
            received,
            Request::StopJob { run_id: RunId::from_string(format!("run-{i}")) }
        );
    }
}
