/// Largest packet the devices accept, header included.
pub const MTU: usize = 128;

/// Main type for data messages.
pub const MAINTYPE_DATA: u8 = 1;
/// Sub type for custom (model specific) messages.
pub const SUBTYPE_CUSTOM: u8 = 19;

const MAX_PAYLOAD: usize = MTU - 6;
const MORE_FRAGMENTS: u8 = 16;

/// Split `message` into hex encoded packets, numbering each one from
/// `message_id`.
///
/// Every packet but the last carries the more-fragments flag and the total
/// message length.
pub fn generate_message_packets(
    maintype: u8,
    subtype: u8,
    message: &[u8],
    message_id: &mut u8,
) -> Vec<String> {
    let kind = (subtype << 2) | maintype;
    let length = message.len();
    let count = message.chunks(MAX_PAYLOAD).count();

    message
        .chunks(MAX_PAYLOAD)
        .enumerate()
        .map(|(n, payload)| {
            let mut packet = if n + 1 < count {
                vec![
                    kind,
                    MORE_FRAGMENTS,
                    *message_id,
                    (payload.len() + 4) as u8,
                    (length % 256) as u8,
                    (length / 256) as u8,
                ]
            } else {
                vec![kind, 0, *message_id, payload.len() as u8]
            };
            packet.extend_from_slice(payload);
            *message_id = message_id.wrapping_add(1);

            packet.iter().map(|byte| format!("{byte:02x}")).collect()
        })
        .collect()
}
