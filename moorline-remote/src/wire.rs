//! Stream framing.
//!
//! Frame format: `[length:4][checksum:4][payload:N]`
//!
//! - **length**: total frame size including the header (little-endian u32)
//! - **checksum**: CRC32C of the payload
//! - **payload**: codec-encoded [`MessageBatch`](crate::MessageBatch) on the
//!   outbound direction; empty for the inbound acknowledgment marker

/// Header size: 4 (length) + 4 (checksum).
pub const HEADER_SIZE: usize = 8;

/// Default upper bound for a frame's payload (4MB).
pub const MAX_FRAME_SIZE: usize = 4 * 1024 * 1024;

/// Largest payload the u32 length field can describe.
pub const MAX_ENCODABLE_PAYLOAD: usize = u32::MAX as usize - HEADER_SIZE;

/// Framing errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Not enough bytes for a complete frame.
    #[error("insufficient data: need {needed} bytes, have {have}")]
    InsufficientData {
        /// Bytes required.
        needed: usize,
        /// Bytes available.
        have: usize,
    },

    /// Payload does not match its checksum.
    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch {
        /// Checksum from the header.
        expected: u32,
        /// Checksum of the received payload.
        actual: u32,
    },

    /// Payload exceeds the frame limit.
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Payload size.
        size: usize,
        /// Limit in force.
        max: usize,
    },

    /// Length field smaller than the header.
    #[error("invalid frame length: {length}")]
    InvalidLength {
        /// Length from the header.
        length: u32,
    },
}

/// Frame `payload`.
///
/// # Errors
///
/// Returns `FrameTooLarge` if `payload` exceeds `max_payload`.
pub fn encode_frame(payload: &[u8], max_payload: usize) -> Result<Vec<u8>, WireError> {
    if payload.len() > max_payload {
        return Err(WireError::FrameTooLarge {
            size: payload.len(),
            max: max_payload,
        });
    }

    let total_length = frame_length(payload.len())?;
    let mut frame = Vec::with_capacity(total_length as usize);
    frame.extend_from_slice(&total_length.to_le_bytes());
    frame.extend_from_slice(&crc32c::crc32c(payload).to_le_bytes());
    frame.extend_from_slice(payload);
    Ok(frame)
}

fn frame_length(payload_len: usize) -> Result<u32, WireError> {
    HEADER_SIZE
        .checked_add(payload_len)
        .and_then(|total| u32::try_from(total).ok())
        .ok_or(WireError::FrameTooLarge {
            size: payload_len,
            max: MAX_ENCODABLE_PAYLOAD,
        })
}

/// The acknowledgment marker: a frame with no payload.
pub fn ack_frame() -> Vec<u8> {
    let mut frame = Vec::with_capacity(HEADER_SIZE);
    frame.extend_from_slice(&(HEADER_SIZE as u32).to_le_bytes());
    frame.extend_from_slice(&crc32c::crc32c(&[]).to_le_bytes());
    frame
}

/// Parse one frame from the front of `data`.
///
/// Returns `Ok(Some((payload, consumed)))` for a complete frame and
/// `Ok(None)` when more bytes are needed.
///
/// # Errors
///
/// - `InvalidLength`: length field smaller than the header
/// - `FrameTooLarge`: declared payload exceeds `max_payload`
/// - `ChecksumMismatch`: payload was corrupted
pub fn try_decode_frame(
    data: &[u8],
    max_payload: usize,
) -> Result<Option<(Vec<u8>, usize)>, WireError> {
    if data.len() < HEADER_SIZE {
        return Ok(None);
    }

    let length = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
    let checksum = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);

    if length < HEADER_SIZE as u32 {
        return Err(WireError::InvalidLength { length });
    }
    let total = length as usize;
    if total - HEADER_SIZE > max_payload {
        return Err(WireError::FrameTooLarge {
            size: total - HEADER_SIZE,
            max: max_payload,
        });
    }
    if data.len() < total {
        return Ok(None);
    }

    let payload = &data[HEADER_SIZE..total];
    let computed = crc32c::crc32c(payload);
    if computed != checksum {
        return Err(WireError::ChecksumMismatch {
            expected: checksum,
            actual: computed,
        });
    }

    Ok(Some((payload.to_vec(), total)))
}

/// Parse exactly one complete frame.
///
/// # Errors
///
/// As [`try_decode_frame`], plus `InsufficientData` for a partial frame.
pub fn decode_frame(data: &[u8], max_payload: usize) -> Result<Vec<u8>, WireError> {
    match try_decode_frame(data, max_payload)? {
        Some((payload, _)) => Ok(payload),
        None => {
            let needed = if data.len() < HEADER_SIZE {
                HEADER_SIZE
            } else {
                u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize
            };
            Err(WireError::InsufficientData {
                needed,
                have: data.len(),
            })
        }
    }
}
