//! Property-based tests for framing and delivery.
//!
//! Random interleavings of offers, aborts and polls on a single thread must
//! deliver exactly the committed payloads, in order, at increasing positions,
//! without the publisher ever leaving its window.

use proptest::prelude::*;

use dmxp_dispatcher::{Dispatcher, DispatcherError, Position, PositionCodec, Subscription};

const PARTITION_SIZE: usize = 512;

#[derive(Debug, Clone)]
enum Op {
    Offer(usize),
    Abort(usize),
    Poll(usize),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        6 => (0usize..=PARTITION_SIZE - 16).prop_map(Op::Offer),
        1 => (0usize..64).prop_map(Op::Abort),
        3 => (1usize..8).prop_map(Op::Poll),
    ]
}

fn drain(subscription: &Subscription, delivered: &mut Vec<(Position, Vec<u8>)>, max: usize) {
    subscription.poll(|f| delivered.push((f.position, f.payload.to_vec())), max);
}

/// Retry a claim-like operation, draining the subscription on back pressure.
fn with_retry<T>(
    subscription: &Subscription,
    delivered: &mut Vec<(Position, Vec<u8>)>,
    mut attempt: impl FnMut() -> Result<T, DispatcherError>,
) -> T {
    for _ in 0..4 {
        match attempt() {
            Ok(value) => return value,
            Err(DispatcherError::BackPressure) => drain(subscription, delivered, usize::MAX),
            Err(e) => panic!("unexpected error: {e}"),
        }
    }
    panic!("still back-pressured after draining the subscription");
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn committed_payloads_arrive_in_order(
        ops in prop::collection::vec(op_strategy(), 1..200),
        partition_count in 2usize..5,
    ) {
        let dispatcher = Dispatcher::builder()
            .with_partition_count(partition_count)
            .with_partition_size(PARTITION_SIZE)
            .with_subscription("reader")
            .build()
            .unwrap();
        let subscription = dispatcher.get_subscription_by_name("reader").unwrap();
        let window = dispatcher.window_length() as u64;

        let mut offered: Vec<(Position, Vec<u8>)> = Vec::new();
        let mut delivered: Vec<(Position, Vec<u8>)> = Vec::new();

        for (i, op) in ops.iter().enumerate() {
            match *op {
                Op::Offer(len) => {
                    let payload = vec![(i % 251) as u8; len];
                    let position = with_retry(&subscription, &mut delivered, || dispatcher.offer(&payload, 0));
                    offered.push((position, payload));
                }
                Op::Abort(len) => {
                    let claim = with_retry(&subscription, &mut delivered, || dispatcher.claim(len, 0));
                    claim.abort();
                }
                Op::Poll(max) => drain(&subscription, &mut delivered, max),
            }

            let published = dispatcher.publisher_position().value();
            prop_assert!(published <= subscription.position().value() + window);
            prop_assert!(published <= dispatcher.publisher_limit().value());
        }
        drain(&subscription, &mut delivered, usize::MAX);

        prop_assert_eq!(&delivered, &offered);
        for pair in delivered.windows(2) {
            prop_assert!(pair[0].0 < pair[1].0);
        }
        // no frame straddles a partition boundary
        for (position, payload) in &delivered {
            let start = position.value() as usize;
            let end = start + 16 + payload.len();
            prop_assert_eq!(start / PARTITION_SIZE, (end - 1) / PARTITION_SIZE);
        }
    }

    #[test]
    fn position_codec_round_trips(
        partition_count in 2usize..16,
        size_shift in 5u32..20,
        term in 0u32..1_000_000,
        offset_seed in any::<usize>(),
    ) {
        let partition_size = 1usize << size_shift;
        let codec = PositionCodec::new(partition_count, partition_size);
        let offset = offset_seed % partition_size;

        let position = codec.term_position(term, offset);
        prop_assert_eq!(codec.term_of(position), term);
        prop_assert_eq!(codec.offset_of(position), offset);
        prop_assert_eq!(codec.partition_of(position), term as usize % partition_count);
        prop_assert_eq!(
            codec.position(codec.generation_of(position), codec.partition_of(position), offset),
            position
        );
    }
}
