//! Access-unit reconstruction over a real tunnel.

mod common;

use adbcast_core::{AccessUnit, START_CODE, StreamDemuxer, TunnelSocket};
use common::*;
use futures::StreamExt;
use proptest::prelude::*;

async fn demux_all(stream: Vec<u8>) -> Vec<AccessUnit> {
    let (addr, _received) = daemon(move |_| Script::okay(stream.clone(), false)).await;
    let mut socket = TunnelSocket::new("dev", "localabstract:scrcpy").with_addr(addr);
    socket.connect().await.unwrap();

    StreamDemuxer::new(socket)
        .into_stream()
        .map(|unit| unit.unwrap())
        .collect()
        .await
}

#[tokio::test]
async fn units_with_zero_bytes_inside_survive() {
    let payloads: [&[u8]; 3] = [b"\x67\x00\x00\x02", b"\x68\x00", b"\x65\x00\x00\x00\x02"];
    let units = demux_all(annex_b(&payloads)).await;

    let got: Vec<Vec<u8>> = units.iter().map(|u| u.as_ref().to_vec()).collect();
    let want: Vec<Vec<u8>> = payloads.iter().map(|p| unit(p)).collect();
    assert_eq!(got, want);
    assert!(units[0].nal_type() == Some(7) && units[0].is_keyframe());
    assert!(units[2].is_keyframe());
}

#[tokio::test]
async fn empty_stream_yields_nothing() {
    assert!(demux_all(Vec::new()).await.is_empty());
    assert!(demux_all(START_CODE.to_vec()).await.is_empty());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn n_units_in_n_units_out(
        payloads in proptest::collection::vec(proptest::collection::vec(1u8..=255, 1..64), 0..16)
    ) {
        let refs: Vec<&[u8]> = payloads.iter().map(Vec::as_slice).collect();
        let units = tokio_test::block_on(demux_all(annex_b(&refs)));

        prop_assert_eq!(units.len(), payloads.len());
        for (unit, payload) in units.iter().zip(&payloads) {
            prop_assert!(unit.as_ref().starts_with(&START_CODE));
            prop_assert!(!unit.payload().starts_with(&START_CODE));
            prop_assert_eq!(unit.payload(), payload.as_slice());
        }
    }
}
