use proptest::prelude::*;

use parley_protocol::{Envelope, KNOWN_TYPES, MessageType, Plane, TypeKey};

fn arb_known_type() -> impl Strategy<Value = &'static str> {
    proptest::sample::select(KNOWN_TYPES)
}

fn arb_plane() -> impl Strategy<Value = Plane> {
    prop_oneof![Just(Plane::System), Just(Plane::Control), Just(Plane::Data)]
}

proptest! {
    #[test]
    fn known_types_are_recognized(raw in arb_known_type()) {
        let ty = MessageType::parse(raw);
        prop_assert!(ty.is_recognized());
        prop_assert_eq!(ty.as_str(), raw);
        prop_assert!(ty.plane().is_some());
    }

    #[test]
    fn parse_never_loses_the_string(raw in ".*") {
        let ty = MessageType::parse(&raw);
        prop_assert_eq!(ty.as_str(), raw.as_str());
    }

    #[test]
    fn split_finds_plane_prefix(
        plane in arb_plane(),
        category in "[a-zA-Z]{1,12}",
        action in "[a-zA-Z]{1,12}",
    ) {
        let dotted = format!("{}.{}.{}", plane.as_str(), category, action);
        let key = TypeKey::split(&dotted).unwrap();
        prop_assert_eq!(key.plane, plane);
        prop_assert_eq!(key.category, Some(category.as_str()));
        prop_assert_eq!(key.action, action.as_str());
    }

    #[test]
    fn decode_never_panics(frame in ".*") {
        let _ = Envelope::decode(&frame);
    }

    #[test]
    fn outbound_frames_decode_to_the_same_type(raw in arb_known_type(), text in ".*") {
        let env = Envelope::outbound(
            MessageType::parse(raw),
            serde_json::json!({ "text": text }),
            Some("conv".to_string()),
        );
        let back = Envelope::decode(&env.to_frame().unwrap()).unwrap();
        prop_assert_eq!(back, env);
    }
}
