//! Cold-start replay.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::disallowed_methods)]

use ironvault_broker::{
    BrokerError, CleanupPolicy, LogBroker, MemoryBroker, MessageDecoder, MessageEncoder, RecordSigner,
    ReplayOutcome, Replayer, TopicSpec, VerifierSet,
};
use ironvault_types::Envelope;

const TOPIC: &str = "iam-self";

fn setup() -> (MemoryBroker, MessageEncoder, MessageDecoder) {
    let broker = MemoryBroker::new();
    broker.create_topic(&TopicSpec::new(TOPIC, 1)).unwrap();
    let signer = RecordSigner::generate();
    let decoder = MessageDecoder::new(VerifierSet::new([signer.public_key()]).unwrap(), None);
    (broker, MessageEncoder::new(signer, None), decoder)
}

fn publish(broker: &MemoryBroker, encoder: &MessageEncoder, envelope: &Envelope) {
    broker.append(TOPIC, vec![encoder.encode(TOPIC, envelope).unwrap()]).unwrap();
}

#[test]
fn test_empty_topic_returns_immediately() {
    let (broker, _, decoder) = setup();
    let replayer = Replayer::builder().broker(&broker).decoder(&decoder).topic(TOPIC).build();
    let stats = replayer
        .replay(|_, _| -> Result<ReplayOutcome, BrokerError> { panic!("callback must not run") })
        .unwrap();
    assert_eq!((stats.applied, stats.skipped, stats.end_offset), (0, 0, 0));
}

#[test]
fn test_replays_in_order_and_counts() {
    let (broker, encoder, decoder) = setup();
    publish(&broker, &encoder, &Envelope::upsert("entity", "e1", b"{}".to_vec()));
    publish(&broker, &encoder, &Envelope::upsert("unknown", "x", b"{}".to_vec()));
    publish(&broker, &encoder, &Envelope::tombstone("entity", "e1"));

    let mut seen = Vec::new();
    let replayer = Replayer::builder().broker(&broker).decoder(&decoder).topic(TOPIC).batch_size(2).build();
    let stats = replayer
        .replay(|offset, envelope| {
            let outcome =
                if envelope.object_type == "entity" { ReplayOutcome::Applied } else { ReplayOutcome::Skipped };
            seen.push((offset, envelope.deleted));
            Ok::<_, BrokerError>(outcome)
        })
        .unwrap();

    assert_eq!(seen, vec![(0, false), (1, false), (2, true)]);
    assert_eq!((stats.applied, stats.skipped, stats.end_offset), (2, 1, 3));
}

#[test]
fn test_stops_at_end_offset_captured_at_start() {
    let (broker, encoder, decoder) = setup();
    publish(&broker, &encoder, &Envelope::upsert("entity", "e1", b"{}".to_vec()));

    let mut calls = 0;
    let replayer = Replayer::builder().broker(&broker).decoder(&decoder).topic(TOPIC).build();
    let stats = replayer
        .replay(|_, _| {
            calls += 1;
            publish(&broker, &encoder, &Envelope::upsert("entity", "late", b"{}".to_vec()));
            Ok::<_, BrokerError>(ReplayOutcome::Applied)
        })
        .unwrap();

    assert_eq!(calls, 1);
    assert_eq!(stats.end_offset, 1);
    assert_eq!(broker.end_offset(TOPIC).unwrap(), 2);
}

#[test]
fn test_callback_error_aborts_replay() {
    let (broker, encoder, decoder) = setup();
    publish(&broker, &encoder, &Envelope::upsert("entity", "e1", b"{}".to_vec()));
    publish(&broker, &encoder, &Envelope::upsert("entity", "e2", b"{}".to_vec()));

    let mut calls = 0;
    let replayer = Replayer::builder().broker(&broker).decoder(&decoder).topic(TOPIC).build();
    let result = replayer.replay(|_, _| {
        calls += 1;
        Err::<ReplayOutcome, _>(BrokerError::Cancelled { topic: TOPIC.to_string() })
    });
    assert!(result.is_err());
    assert_eq!(calls, 1);
}

#[test]
fn test_untrusted_records_skipped_or_fatal() {
    let (broker, encoder, decoder) = setup();
    let stranger = MessageEncoder::new(RecordSigner::generate(), None);
    publish(&broker, &stranger, &Envelope::upsert("entity", "evil", b"{}".to_vec()));
    publish(&broker, &encoder, &Envelope::upsert("entity", "e1", b"{}".to_vec()));

    let strict = Replayer::builder().broker(&broker).decoder(&decoder).topic(TOPIC).build();
    let err = strict.replay(|_, _| Ok::<_, BrokerError>(ReplayOutcome::Applied)).unwrap_err();
    assert!(matches!(err, BrokerError::Signature { .. }));

    let lenient = Replayer::builder()
        .broker(&broker)
        .decoder(&decoder)
        .topic(TOPIC)
        .skip_on_wrong_signature(true)
        .build();
    let stats = lenient.replay(|_, _| Ok::<_, BrokerError>(ReplayOutcome::Applied)).unwrap();
    assert_eq!((stats.applied, stats.skipped), (1, 1));
}

#[test]
fn test_replay_after_compaction_skips_gaps() {
    let broker = MemoryBroker::new();
    let spec = TopicSpec { cleanup_policy: CleanupPolicy::Compact, ..TopicSpec::new(TOPIC, 1) };
    broker.create_topic(&spec).unwrap();
    let signer = RecordSigner::generate();
    let decoder = MessageDecoder::new(VerifierSet::new([signer.public_key()]).unwrap(), None);
    let encoder = MessageEncoder::new(signer, None);
    for n in 0..3 {
        publish(&broker, &encoder, &Envelope::upsert("gen", "m1", format!("{n}").into_bytes()));
    }
    broker.compact(TOPIC).unwrap();

    let mut payloads = Vec::new();
    let replayer = Replayer::builder().broker(&broker).decoder(&decoder).topic(TOPIC).batch_size(1).build();
    replayer
        .replay(|offset, envelope| {
            payloads.push((offset, envelope.data));
            Ok::<_, BrokerError>(ReplayOutcome::Applied)
        })
        .unwrap();
    assert_eq!(payloads, vec![(2, b"2".to_vec())]);
}
