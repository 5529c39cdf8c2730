/// Errors raised while validating and decoding JBD response frames.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The frame is shorter than the fixed header/checksum/end-marker overhead.
    #[error("response frame too short: {0} bytes")]
    FrameTooShort(usize),
    /// The first byte of the frame is not the JBD start marker.
    #[error("invalid start marker: {0:#04X}")]
    InvalidStartMarker(u8),
    /// The byte after the declared payload and checksum is not the end marker.
    #[error("invalid end marker: {0:#04X}")]
    InvalidEndMarker(u8),
    /// The checksum in the frame trailer does not match the recomputed one.
    #[error("checksum mismatch: calculated {calculated:#06X}, received {received:#06X}")]
    ChecksumMismatch { calculated: u16, received: u16 },
    /// The payload is shorter than its declared field layout requires.
    #[error("payload too short: {got} bytes, layout requires {need}")]
    PayloadTooShort { need: usize, got: usize },
    /// The payload declares no temperature sensors to average over.
    #[error("payload declares no temperature sensors")]
    NoTemperatureSensors,
}
