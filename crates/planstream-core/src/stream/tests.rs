use super::*;
use crate::error::PlanError;

const ALL_PHASES: [Phase; 8] = [
    Phase::Replying,
    Phase::Describing,
    Phase::Building,
    Phase::Finished,
    Phase::Aborted,
    Phase::Revising,
    Phase::Canceled,
    Phase::Error,
];

const ALL_EVENTS: [StreamEvent; 7] = [
    StreamEvent::Describe,
    StreamEvent::Build,
    StreamEvent::Finish,
    StreamEvent::Abort,
    StreamEvent::Revise,
    StreamEvent::Cancel,
    StreamEvent::Error,
];

fn sample_stream() -> Vec<StreamMessage> {
    vec![
        StreamMessage::content("- a.rs:\n```\n"),
        StreamMessage::content("fn a() {}\n```\n"),
        StreamMessage::Describing,
        StreamMessage::Building,
        StreamMessage::BuildInfo(BuildInfo::progress("a.rs", 3)),
        StreamMessage::BuildInfo(BuildInfo::failed("b.rs", 5, "no match")),
        StreamMessage::BuildInfo(BuildInfo::finished("a.rs", 9)),
        StreamMessage::Finished,
    ]
}

#[test]
fn test_happy_path_transitions() {
    let mut state = PlanStreamState::new();
    assert_eq!(state.phase(), Phase::Replying);
    assert_eq!(state.fire(StreamEvent::Describe).unwrap(), Phase::Describing);
    assert_eq!(state.fire(StreamEvent::Build).unwrap(), Phase::Building);
    assert_eq!(state.fire(StreamEvent::Finish).unwrap(), Phase::Finished);
    assert!(state.is_terminal());
}

#[test]
fn test_abort_then_revise_then_finish() {
    let mut state = PlanStreamState::new();
    state.fire(StreamEvent::Abort).unwrap();
    state.fire(StreamEvent::Revise).unwrap();
    state.fire(StreamEvent::Describe).unwrap();
    assert_eq!(state.fire(StreamEvent::Finish).unwrap(), Phase::Finished);
}

#[test]
fn test_building_cannot_return_to_replying() {
    let mut state = PlanStreamState::new();
    state.fire(StreamEvent::Describe).unwrap();
    state.fire(StreamEvent::Build).unwrap();

    let err = state.fire(StreamEvent::Revise).unwrap_err();
    assert!(matches!(
        err,
        PlanError::InvalidTransition {
            from: Phase::Building,
            event: StreamEvent::Revise
        }
    ));
    assert_eq!(state.phase(), Phase::Building);
}

#[test]
fn test_terminal_phases_accept_nothing() {
    for phase in [Phase::Finished, Phase::Canceled, Phase::Error] {
        for event in ALL_EVENTS {
            assert_eq!(state::transition(phase, event), None, "{phase} + {event}");
        }
    }
}

#[test]
fn test_error_reachable_from_every_non_terminal_phase() {
    for phase in ALL_PHASES.into_iter().filter(|p| !p.is_terminal()) {
        assert_eq!(state::transition(phase, StreamEvent::Error), Some(Phase::Error));
    }
}

#[test]
fn test_transition_table_edge_count() {
    let edges = ALL_PHASES
        .iter()
        .flat_map(|p| ALL_EVENTS.iter().map(move |e| (*p, *e)))
        .filter(|(p, e)| state::transition(*p, *e).is_some())
        .count();
    // describe x2, build, finish x2, abort x4, revise, cancel, error x5
    assert_eq!(edges, 16);
}

#[test]
fn test_phase_round_trip() {
    for phase in ALL_PHASES {
        assert_eq!(phase.as_str().parse::<Phase>().unwrap(), phase);
    }
    assert!("paused".parse::<Phase>().is_err());
}

#[test]
fn test_sentinels_are_bit_exact() {
    let fmt = WireFormat::Sentinel;
    assert_eq!(fmt.encode(&StreamMessage::Describing).unwrap(), "@@PXDESC@@@@PX@@");
    assert_eq!(fmt.encode(&StreamMessage::Building).unwrap(), "@@PXBUILD@@@@PX@@");
    assert_eq!(fmt.encode(&StreamMessage::Finished).unwrap(), "@@PXEND@@@@PX@@");
    assert_eq!(fmt.encode(&StreamMessage::Aborted).unwrap(), "@@PXABORT@@@@PX@@");
    assert_eq!(
        fmt.encode(&StreamMessage::error("boom")).unwrap(),
        "@@PXERROR@@boom@@PX@@"
    );
    assert_eq!(fmt.encode(&StreamMessage::content("hi")).unwrap(), "hi@@PX@@");
}

fn encode_all(format: WireFormat, messages: &[StreamMessage]) -> Vec<u8> {
    messages
        .iter()
        .map(|m| format.encode(m).unwrap())
        .collect::<String>()
        .into_bytes()
}

#[test]
fn test_decoders_survive_any_split() {
    let messages = sample_stream();
    for format in [WireFormat::Sentinel, WireFormat::JsonLines] {
        let bytes = encode_all(format, &messages);
        for split in 0..bytes.len() {
            let mut decoder = format.decoder();
            let mut decoded = decoder.push(&bytes[..split]).unwrap();
            decoded.extend(decoder.push(&bytes[split..]).unwrap());
            assert_eq!(decoded, messages, "{format:?} split={split}");
            assert_eq!(decoder.pending(), 0);
        }
    }
}

#[test]
fn test_sentinel_decoder_byte_at_a_time() {
    let messages = sample_stream();
    let bytes = encode_all(WireFormat::Sentinel, &messages);
    let mut decoder = SentinelDecoder::new();

    let decoded: Vec<StreamMessage> = bytes
        .iter()
        .flat_map(|b| decoder.push(std::slice::from_ref(b)).unwrap())
        .collect();
    assert_eq!(decoded, messages);
}

#[test]
fn test_sentinel_decoder_splits_multibyte_characters() {
    let bytes = "héllo → wörld@@PX@@".as_bytes();
    let mut decoder = SentinelDecoder::new();
    let mut decoded = Vec::new();
    for b in bytes {
        decoded.extend(decoder.push(&[*b]).unwrap());
    }
    assert_eq!(decoded, vec![StreamMessage::content("héllo → wörld")]);
}

#[test]
fn test_reader_tracks_phase() {
    let mut reader = PlanStreamReader::new(WireFormat::Sentinel);
    let bytes = encode_all(WireFormat::Sentinel, &sample_stream());

    let messages = reader.feed(&bytes).unwrap();
    assert_eq!(messages.len(), 8);
    assert_eq!(reader.phase(), Phase::Finished);
    assert!(reader.is_done());
}

#[test]
fn test_reader_rejects_out_of_order_marker() {
    let mut reader = PlanStreamReader::new(WireFormat::JsonLines);
    let bytes = encode_all(WireFormat::JsonLines, &[StreamMessage::Building]);

    assert!(matches!(
        reader.feed(&bytes),
        Err(PlanError::InvalidTransition {
            from: Phase::Replying,
            event: StreamEvent::Build
        })
    ));
}

#[test]
fn test_reader_revise_after_abort() {
    let mut reader = PlanStreamReader::new(WireFormat::Sentinel);
    reader.feed(b"partial@@PX@@@@PXABORT@@@@PX@@").unwrap();
    assert!(reader.is_done());

    assert_eq!(reader.revise().unwrap(), Phase::Revising);
    assert!(!reader.is_done());
    reader.feed(b"@@PXDESC@@@@PX@@@@PXEND@@@@PX@@").unwrap();
    assert_eq!(reader.phase(), Phase::Finished);
}

#[test]
fn test_json_line_tags() {
    let line = WireFormat::JsonLines
        .encode(&StreamMessage::BuildInfo(BuildInfo::finished("x.rs", 2)))
        .unwrap();
    assert_eq!(
        line,
        "{\"type\":\"build_info\",\"path\":\"x.rs\",\"num_tokens\":2,\"finished\":true}\n"
    );
}
