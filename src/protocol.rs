use crate::Error;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// First byte of every request and response frame.
pub const START_BYTE: u8 = 0xDD;
/// Last byte of every request and response frame.
pub const END_BYTE: u8 = 0x77;
/// Direction marker for host-initiated register reads.
pub const CMD_READ: u8 = 0xA5;
/// Register holding the basic pack telemetry.
pub const CMD_BASIC_INFO: u8 = 0x03;

// Response header: start marker, command echo, status, payload length.
const HEADER_LENGTH: usize = 4;
const CHECKSUM_LENGTH: usize = 2;
/// Smallest well-formed frame: header, checksum and end marker around an
/// empty payload.
pub const MIN_FRAME_LENGTH: usize = HEADER_LENGTH + CHECKSUM_LENGTH + 1;

/// Offset of the first temperature reading inside the basic-info payload.
const TEMPERATURE_BLOCK_OFFSET: usize = 23;
/// Raw temperatures are tenths of a Kelvin; 2731 marks 0 °C.
const KELVIN_OFFSET: u16 = 2731;

/// Frame checksum: `0x10000` minus the byte sum of the checked region,
/// truncated to 16 bits. Both directions checksum the bytes between the
/// command echo and the trailer, `frame[2..4 + length]`.
pub fn checksum(region: &[u8]) -> u16 {
    let mut sum: u16 = 0;
    for b in region {
        sum = sum.wrapping_add(u16::from(*b));
    }
    sum.wrapping_neg()
}

fn frame_extent(declared_len: usize) -> usize {
    HEADER_LENGTH + declared_len + CHECKSUM_LENGTH + 1
}

/// Build the fixed basic-info read request, `DD A5 03 00 FF FD 77`.
pub fn basic_info_request() -> [u8; MIN_FRAME_LENGTH] {
    let mut tx_buffer = [0; MIN_FRAME_LENGTH];
    tx_buffer[0] = START_BYTE;
    tx_buffer[1] = CMD_READ;
    tx_buffer[2] = CMD_BASIC_INFO;
    tx_buffer[3] = 0; // no request payload
    let crc = checksum(&tx_buffer[2..4]).to_be_bytes();
    tx_buffer[4] = crc[0];
    tx_buffer[5] = crc[1];
    tx_buffer[6] = END_BYTE;
    tx_buffer
}

/// Check framing and integrity of a complete frame and return its payload.
pub fn validate(frame: &[u8]) -> std::result::Result<&[u8], Error> {
    if frame.len() < MIN_FRAME_LENGTH {
        log::warn!("Invalid frame size - received={}", frame.len());
        return Err(Error::FrameTooShort(frame.len()));
    }
    if frame[0] != START_BYTE {
        log::warn!("Invalid start marker - received={:#04X}", frame[0]);
        return Err(Error::InvalidStartMarker(frame[0]));
    }
    let declared_len = usize::from(frame[3]);
    let extent = frame_extent(declared_len);
    if frame.len() < extent {
        log::warn!(
            "Invalid frame size - required={} received={}",
            extent,
            frame.len()
        );
        return Err(Error::FrameTooShort(frame.len()));
    }
    if frame[extent - 1] != END_BYTE {
        log::warn!("Invalid end marker - received={:#04X}", frame[extent - 1]);
        return Err(Error::InvalidEndMarker(frame[extent - 1]));
    }
    let calculated = checksum(&frame[2..HEADER_LENGTH + declared_len]);
    let received = u16::from_be_bytes([
        frame[HEADER_LENGTH + declared_len],
        frame[HEADER_LENGTH + declared_len + 1],
    ]);
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={calculated:04X} received={received:04X} frame={frame:02X?}"
        );
        return Err(Error::ChecksumMismatch {
            calculated,
            received,
        });
    }
    Ok(&frame[HEADER_LENGTH..HEADER_LENGTH + declared_len])
}

/// Reassembles notification fragments into one response frame.
///
/// Fragment boundaries carry no meaning; bytes are appended in arrival
/// order until the extent declared in the header is reached, then the
/// frame is emitted trimmed to exactly that extent. A buffer that does not
/// open with the start marker is discarded wholesale so a retransmission
/// can still complete within the caller's timeout.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
}

impl FrameAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment, returning the complete frame once the declared
    /// extent has been reached.
    pub fn push(&mut self, fragment: &[u8]) -> Option<Vec<u8>> {
        self.buffer.extend_from_slice(fragment);
        if self.buffer.len() < HEADER_LENGTH {
            return None;
        }
        if self.buffer[0] != START_BYTE {
            log::debug!(
                "discarding {} buffered bytes without start marker",
                self.buffer.len()
            );
            self.buffer.clear();
            return None;
        }
        let extent = frame_extent(usize::from(self.buffer[3]));
        if self.buffer.len() < extent {
            return None;
        }
        if self.buffer.len() > extent {
            log::debug!(
                "trimming {} bytes past the declared extent",
                self.buffer.len() - extent
            );
            self.buffer.truncate(extent);
        }
        log::trace!("frame complete: {:02X?}", self.buffer);
        Some(std::mem::take(&mut self.buffer))
    }

    /// Bytes buffered towards a not yet complete frame.
    pub fn bytes_received(&self) -> usize {
        self.buffer.len()
    }
}

/// Pack telemetry decoded from a basic-info response payload.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BasicInfo {
    pub voltage: f64, // V
    pub current: f64, // A, positive=charging, negative=discharging
    pub cycle_charge: f64, // Ah remaining
    pub cycles: u16,
    pub battery_level: u8, // %
    pub num_temp: u8,
    pub temperature: f64, // °C, mean across all sensors
}

impl BasicInfo {
    /// Decode the payload of a validated basic-info response.
    ///
    /// Payload layout, offsets relative to the payload start, multi-byte
    /// fields big-endian: voltage `[0..2]` in 10 mV, current `[2..4]`
    /// signed in 10 mA, remaining charge `[4..6]` in 10 mAh, charge
    /// cycles `[8..10]`, state of charge `[19]` in percent, sensor count
    /// `[22]`, then one deci-Kelvin reading per sensor from `[23]`.
    pub fn decode(payload: &[u8]) -> std::result::Result<Self, Error> {
        if payload.len() < TEMPERATURE_BLOCK_OFFSET {
            log::warn!(
                "Invalid payload size - required={} received={}",
                TEMPERATURE_BLOCK_OFFSET,
                payload.len()
            );
            return Err(Error::PayloadTooShort {
                need: TEMPERATURE_BLOCK_OFFSET,
                got: payload.len(),
            });
        }
        let num_temp = payload[22];
        if num_temp == 0 {
            log::warn!("No temperature sensors declared");
            return Err(Error::NoTemperatureSensors);
        }
        let need = TEMPERATURE_BLOCK_OFFSET + 2 * usize::from(num_temp);
        if payload.len() < need {
            log::warn!(
                "Invalid payload size - required={} received={}",
                need,
                payload.len()
            );
            return Err(Error::PayloadTooShort {
                need,
                got: payload.len(),
            });
        }
        // Mean over the raw readings, converted to Celsius once.
        let mut raw_sum: u32 = 0;
        for sensor in 0..usize::from(num_temp) {
            let offset = TEMPERATURE_BLOCK_OFFSET + 2 * sensor;
            raw_sum += u32::from(u16::from_be_bytes([payload[offset], payload[offset + 1]]));
        }
        Ok(Self {
            voltage: u16::from_be_bytes([payload[0], payload[1]]) as f64 / 100.0,
            current: i16::from_be_bytes([payload[2], payload[3]]) as f64 / 100.0,
            cycle_charge: u16::from_be_bytes([payload[4], payload[5]]) as f64 / 100.0,
            cycles: u16::from_be_bytes([payload[8], payload[9]]),
            battery_level: payload[19],
            num_temp,
            temperature: (raw_sum as f64 / num_temp as f64 - KELVIN_OFFSET as f64) / 10.0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Basic-info response captured from a 4s pack: 15.6 V, -2.87 A,
    // 4.98 Ah remaining, 42 cycles, 100 %, three sensors around 22 °C.
    const RESPONSE: [u8; 36] = [
        0xDD, 0x03, 0x00, 0x1D, 0x06, 0x18, 0xFE, 0xE1, 0x01, 0xF2, 0x01, 0xF4, 0x00, 0x2A, 0x2C,
        0x7C, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x80, 0x64, 0x03, 0x04, 0x03, 0x0B, 0x8B, 0x0B,
        0x8A, 0x0B, 0x84, 0xF8, 0x84, 0x77,
    ];

    #[test]
    fn request_is_checksummed() {
        assert_eq!(
            basic_info_request(),
            [0xDD, 0xA5, 0x03, 0x00, 0xFF, 0xFD, 0x77]
        );
    }

    #[test]
    fn checksum_matches_reference_frames() {
        assert_eq!(checksum(&RESPONSE[2..33]), 0xF884);
        let request = basic_info_request();
        assert_eq!(checksum(&request[2..4]), 0xFFFD);
    }

    #[test]
    fn assembler_reassembles_mtu_fragments() {
        let mut assembler = FrameAssembler::new();
        let frame = RESPONSE
            .chunks(20)
            .filter_map(|fragment| assembler.push(fragment))
            .next();
        assert_eq!(frame.as_deref(), Some(&RESPONSE[..]));
        assert_eq!(assembler.bytes_received(), 0);
    }

    #[test]
    fn assembler_is_fragment_size_independent() {
        for chunk_size in [1, 7, 20, RESPONSE.len()] {
            let mut assembler = FrameAssembler::new();
            let frame = RESPONSE
                .chunks(chunk_size)
                .filter_map(|fragment| assembler.push(fragment))
                .next();
            assert_eq!(frame.as_deref(), Some(&RESPONSE[..]), "chunk {chunk_size}");
        }
    }

    #[test]
    fn assembler_trims_past_declared_extent() {
        let mut oversized = RESPONSE.to_vec();
        oversized.extend_from_slice(&[0; 6]);
        let mut assembler = FrameAssembler::new();
        let frame = oversized
            .chunks(20)
            .filter_map(|fragment| assembler.push(fragment))
            .next();
        assert_eq!(frame.as_deref(), Some(&RESPONSE[..]));
    }

    #[test]
    fn assembler_discards_buffer_without_start_marker() {
        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.push(&[0x00, 0x11, 0x22, 0x33]), None);
        assert_eq!(assembler.bytes_received(), 0);
        let frame = RESPONSE
            .chunks(20)
            .filter_map(|fragment| assembler.push(fragment))
            .next();
        assert_eq!(frame.as_deref(), Some(&RESPONSE[..]));
    }

    #[test]
    fn assembler_waits_below_header_length() {
        let mut assembler = FrameAssembler::new();
        assert_eq!(assembler.push(&RESPONSE[..3]), None);
        assert_eq!(assembler.bytes_received(), 3);
    }

    #[test]
    fn validate_returns_payload() {
        let payload = validate(&RESPONSE).unwrap();
        assert_eq!(payload, &RESPONSE[4..33]);
    }

    #[test]
    fn validate_rejects_corrupted_byte() {
        let mut corrupted = RESPONSE;
        corrupted[10] ^= 0x01;
        assert!(matches!(
            validate(&corrupted),
            Err(Error::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn validate_rejects_wrong_end_marker() {
        let mut corrupted = RESPONSE;
        corrupted[35] = 0x00;
        assert!(matches!(
            validate(&corrupted),
            Err(Error::InvalidEndMarker(0x00))
        ));
    }

    #[test]
    fn validate_rejects_short_frame() {
        assert!(matches!(
            validate(&RESPONSE[..5]),
            Err(Error::FrameTooShort(5))
        ));
    }

    #[test]
    fn validate_rejects_foreign_start_marker() {
        let mut corrupted = RESPONSE;
        corrupted[0] = 0xA5;
        assert!(matches!(
            validate(&corrupted),
            Err(Error::InvalidStartMarker(0xA5))
        ));
    }

    #[test]
    fn decode_reference_payload() {
        let info = BasicInfo::decode(&RESPONSE[4..33]).unwrap();
        assert_eq!(info.voltage, 15.6);
        assert_eq!(info.current, -2.87);
        assert_eq!(info.cycle_charge, 4.98);
        assert_eq!(info.cycles, 42);
        assert_eq!(info.battery_level, 100);
        assert_eq!(info.num_temp, 3);
        assert_eq!(info.temperature, 22.133333333333347);
    }

    #[test]
    fn decode_is_deterministic() {
        let first = BasicInfo::decode(&RESPONSE[4..33]).unwrap();
        let second = BasicInfo::decode(&RESPONSE[4..33]).unwrap();
        assert_eq!(first.temperature, second.temperature);
        assert_eq!(first.current, second.current);
    }

    #[test]
    fn decode_fails_closed_on_short_payload() {
        // Declares three sensors but carries readings for fewer.
        assert!(matches!(
            BasicInfo::decode(&RESPONSE[4..32]),
            Err(Error::PayloadTooShort { need: 29, got: 28 })
        ));
        assert!(matches!(
            BasicInfo::decode(&RESPONSE[4..10]),
            Err(Error::PayloadTooShort { .. })
        ));
    }

    #[test]
    fn decode_rejects_zero_sensors() {
        let mut payload = RESPONSE[4..33].to_vec();
        payload[22] = 0;
        assert!(matches!(
            BasicInfo::decode(&payload),
            Err(Error::NoTemperatureSensors)
        ));
    }
}
