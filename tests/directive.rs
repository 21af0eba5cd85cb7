use tessera::core::{Directive, NET_IGNORED, NET_R, NET_RW, NET_UPDATE, NET_W};
use tessera::Interest;

#[test]
fn test_sentinels_round_trip() {
    for raw in [NET_IGNORED, NET_UPDATE, NET_R, NET_W, NET_RW] {
        assert_eq!(Directive::from_raw(raw).into_raw(), raw);
    }

    assert_eq!(Directive::from_raw(NET_UPDATE), Directive::Promote);
    assert_eq!(Directive::from_raw(NET_R), Directive::Rearm(Interest::Read));
    assert_eq!(Directive::from_raw(NET_W), Directive::Rearm(Interest::Write));
    assert_eq!(
        Directive::from_raw(NET_RW),
        Directive::Rearm(Interest::ReadWrite)
    );
}

#[test]
fn test_counts_occupy_the_non_negative_range() {
    assert_eq!(Directive::from_raw(0), Directive::Received(0));
    assert_eq!(Directive::from_raw(1), Directive::Received(1));
    assert_eq!(Directive::from_raw(65536), Directive::Received(65536));
    assert_eq!(Directive::Received(42).into_raw(), 42);
}

#[test]
#[should_panic(expected = "unrecognized directive")]
fn test_unknown_directive_is_fatal() {
    let _ = Directive::from_raw(-99);
}
