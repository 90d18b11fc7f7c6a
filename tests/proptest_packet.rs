use std::net::Ipv4Addr;

use proptest::prelude::*;

use dhcpdora::{DhcpOption, HandshakeMessage, HardwareAddress, MessageKind};

const HEADER_SIZE: usize = 26;

fn valid_header(op: u8) -> Vec<u8> {
    let mut packet = vec![0u8; HEADER_SIZE];
    packet[0] = op;
    packet[1] = 6;
    packet
}

fn message_kind() -> impl Strategy<Value = MessageKind> {
    prop_oneof![
        Just(MessageKind::Discover),
        Just(MessageKind::Offer),
        Just(MessageKind::Request),
        Just(MessageKind::Ack),
        Just(MessageKind::Release),
    ]
}

fn option() -> impl Strategy<Value = DhcpOption> {
    (1u8..=254, prop::collection::vec(any::<u8>(), 0..=255))
        .prop_map(|(code, value)| DhcpOption::new(code, value).unwrap())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(10000))]

    #[test]
    fn decode_never_panics_on_arbitrary_bytes(data: Vec<u8>) {
        let _ = HandshakeMessage::decode(&data);
    }

    #[test]
    fn decode_never_panics_on_valid_header_with_random_options(
        options_data in prop::collection::vec(any::<u8>(), 0..512)
    ) {
        let mut packet = valid_header(1);
        packet.extend_from_slice(&options_data);
        let _ = HandshakeMessage::decode(&packet);
    }

    #[test]
    fn decode_never_panics_on_random_option_lengths(
        option_code in 1u8..=254,
        option_length in any::<u8>(),
        option_data in prop::collection::vec(any::<u8>(), 0..256)
    ) {
        let mut packet = valid_header(3);
        packet.push(option_code);
        packet.push(option_length);
        let actual_len = (option_length as usize).min(option_data.len());
        packet.extend_from_slice(&option_data[..actual_len]);
        packet.push(255);

        // A value one byte too long swallows the end marker, which is still
        // a complete option.
        let result = HandshakeMessage::decode(&packet);
        prop_assert_eq!(result.is_ok(), option_length as usize <= actual_len + 1);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(2000))]

    #[test]
    fn encode_decode_preserves_message(
        kind in message_kind(),
        transaction_id in any::<u32>(),
        hardware in prop::collection::vec(any::<u8>(), 0..=16),
        address in any::<[u8; 4]>(),
        options in prop::collection::vec(option(), 0..8),
    ) {
        let message = HandshakeMessage {
            kind,
            transaction_id,
            hardware_address: HardwareAddress::new(&hardware).unwrap(),
            address: Ipv4Addr::from(address),
            options,
        };

        let decoded = HandshakeMessage::decode(&message.encode()).unwrap();
        prop_assert_eq!(decoded, message);
    }

    #[test]
    fn short_packets_always_rejected(
        data in prop::collection::vec(any::<u8>(), 0..HEADER_SIZE)
    ) {
        prop_assert!(HandshakeMessage::decode(&data).is_err());
    }

    #[test]
    fn oversized_hardware_length_always_rejected(
        hlen in 17u8..=255,
        tail in prop::collection::vec(any::<u8>(), 0..64)
    ) {
        let mut packet = valid_header(1);
        packet[1] = hlen;
        packet.extend_from_slice(&tail);
        prop_assert!(HandshakeMessage::decode(&packet).is_err());
    }

    #[test]
    fn unknown_operation_always_rejected(
        op in any::<u8>().prop_filter("known op", |op| ![1, 2, 3, 5, 7].contains(op))
    ) {
        let mut packet = valid_header(op);
        packet.push(255);
        prop_assert!(HandshakeMessage::decode(&packet).is_err());
    }

    #[test]
    fn bytes_after_end_marker_ignored(
        trailing in prop::collection::vec(any::<u8>(), 0..64)
    ) {
        let message = HandshakeMessage::discover(9, HardwareAddress::from_mac([2, 0, 0, 0, 0, 1]))
            .with_option(DhcpOption::lease_time(60));
        let mut packet = message.encode();
        packet.extend_from_slice(&trailing);

        prop_assert_eq!(HandshakeMessage::decode(&packet).unwrap(), message);
    }
}
