use std::fmt::Display;
use thiserror::Error;

use crate::checksum::crc16;

pub const FUNCTION_READ_HOLDING_REGISTERS: u8 = 0x03;
pub const MAX_READ_COUNT: u16 = 125;
pub const REQUEST_LEN: usize = 8;

const EXCEPTION_FLAG: u8 = 0x80;
/// address + function + byte count/exception code + crc, also the exception frame size
pub const MIN_RESPONSE_LEN: usize = 5;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("response frame too short ({0} bytes)")]
    FrameTooShort(usize),
    #[error("response from address {actual}, expected {expected}")]
    AddressMismatch { expected: u8, actual: u8 },
    #[error("unexpected function code {0:#04x} in response")]
    UnexpectedFunction(u8),
    #[error("modbus exception {code:#04x} for function {function:#04x}")]
    ExceptionResponse { function: u8, code: u8 },
    #[error("byte count {declared} does not match expected {expected}")]
    ByteCountMismatch { declared: u8, expected: usize },
    #[error("odd byte count {0} in register payload")]
    OddByteCount(u8),
    #[error("crc mismatch: frame carries {received:#06x}, computed {computed:#06x}")]
    CrcMismatch { received: u16, computed: u16 },
}

/// Modbus slave address, 1..=247.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DeviceAddress(u8);

impl DeviceAddress {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 247;

    pub fn new(address: u8) -> Result<Self, ProtocolError> {
        if (Self::MIN..=Self::MAX).contains(&address) {
            Ok(DeviceAddress(address))
        } else {
            Err(ProtocolError::InvalidRequest(format!(
                "slave address {} outside {}..={}",
                address,
                Self::MIN,
                Self::MAX
            )))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for DeviceAddress {
    fn default() -> Self {
        DeviceAddress(0x01)
    }
}

impl TryFrom<u8> for DeviceAddress {
    type Error = ProtocolError;

    fn try_from(address: u8) -> Result<Self, Self::Error> {
        DeviceAddress::new(address)
    }
}

impl Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// A validated "read holding registers" request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadRequest {
    pub address: DeviceAddress,
    pub start: u16,
    pub count: u16,
}

impl ReadRequest {
    pub fn new(address: DeviceAddress, start: u16, count: u16) -> Result<Self, ProtocolError> {
        if count == 0 || count > MAX_READ_COUNT {
            return Err(ProtocolError::InvalidRequest(format!(
                "register count {} outside 1..={}",
                count, MAX_READ_COUNT
            )));
        }
        Ok(ReadRequest {
            address,
            start,
            count,
        })
    }

    pub fn encode(&self) -> [u8; REQUEST_LEN] {
        let mut frame = [0u8; REQUEST_LEN];
        frame[0] = self.address.get();
        frame[1] = FUNCTION_READ_HOLDING_REGISTERS;
        frame[2..4].copy_from_slice(&self.start.to_be_bytes());
        frame[4..6].copy_from_slice(&self.count.to_be_bytes());
        let crc = crc16(&frame[..6]);
        frame[6..8].copy_from_slice(&crc.to_le_bytes());
        frame
    }

    /// Length of a normal (non-exception) response to this request.
    pub fn response_len(&self) -> usize {
        MIN_RESPONSE_LEN + 2 * self.count as usize
    }
}

pub fn build_read_request(
    address: DeviceAddress,
    start: u16,
    count: u16,
) -> Result<[u8; REQUEST_LEN], ProtocolError> {
    Ok(ReadRequest::new(address, start, count)?.encode())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseFrame {
    pub address: u8,
    pub function: u8,
    pub byte_count: u8,
    pub registers: Vec<u16>,
    pub crc: u16,
}

fn check_crc(frame: &[u8]) -> Result<u16, ProtocolError> {
    let (body, tail) = frame.split_at(frame.len() - 2);
    let received = u16::from_le_bytes([tail[0], tail[1]]);
    let computed = crc16(body);
    if received != computed {
        return Err(ProtocolError::CrcMismatch { received, computed });
    }
    Ok(received)
}

pub fn parse_response(
    buffer: &[u8],
    expected: DeviceAddress,
) -> Result<ResponseFrame, ProtocolError> {
    if buffer.len() < MIN_RESPONSE_LEN {
        return Err(ProtocolError::FrameTooShort(buffer.len()));
    }

    if buffer[0] != expected.get() {
        return Err(ProtocolError::AddressMismatch {
            expected: expected.get(),
            actual: buffer[0],
        });
    }

    let function = buffer[1];
    if function & EXCEPTION_FLAG != 0 {
        check_crc(&buffer[..MIN_RESPONSE_LEN])?;
        return Err(ProtocolError::ExceptionResponse {
            function: function & !EXCEPTION_FLAG,
            code: buffer[2],
        });
    }

    if function != FUNCTION_READ_HOLDING_REGISTERS {
        return Err(ProtocolError::UnexpectedFunction(function));
    }

    let byte_count = buffer[2];
    let payload_len = buffer.len() - MIN_RESPONSE_LEN;
    if byte_count as usize != payload_len {
        return Err(ProtocolError::ByteCountMismatch {
            declared: byte_count,
            expected: payload_len,
        });
    }
    if byte_count % 2 != 0 {
        return Err(ProtocolError::OddByteCount(byte_count));
    }

    let crc = check_crc(buffer)?;

    let registers = buffer[3..3 + payload_len]
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();

    Ok(ResponseFrame {
        address: buffer[0],
        function,
        byte_count,
        registers,
        crc,
    })
}

/// True if `buffer` is an exception frame, judged by its first
/// `MIN_RESPONSE_LEN` bytes. No address or CRC checks.
pub fn is_exception_frame(buffer: &[u8]) -> bool {
    buffer.len() >= MIN_RESPONSE_LEN && buffer[1] & EXCEPTION_FLAG != 0
}

/// True if `buffer` stops before the end its own header announces: shorter
/// than any frame, or a register reply with fewer payload bytes than declared.
pub fn is_truncated(buffer: &[u8]) -> bool {
    if buffer.len() < MIN_RESPONSE_LEN {
        return true;
    }
    buffer[1] == FUNCTION_READ_HOLDING_REGISTERS
        && buffer.len() < MIN_RESPONSE_LEN + buffer[2] as usize
}

/// Slave side of a "read holding registers" exchange.
pub fn build_read_response(
    address: DeviceAddress,
    registers: &[u16],
) -> Result<Vec<u8>, ProtocolError> {
    if registers.is_empty() || registers.len() > MAX_READ_COUNT as usize {
        return Err(ProtocolError::InvalidRequest(format!(
            "register count {} outside 1..={}",
            registers.len(),
            MAX_READ_COUNT
        )));
    }

    let mut frame = Vec::with_capacity(MIN_RESPONSE_LEN + 2 * registers.len());
    frame.push(address.get());
    frame.push(FUNCTION_READ_HOLDING_REGISTERS);
    frame.push((2 * registers.len()) as u8);
    for reg in registers {
        frame.extend_from_slice(&reg.to_be_bytes());
    }
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    Ok(frame)
}

pub fn build_exception_response(address: DeviceAddress, function: u8, code: u8) -> Vec<u8> {
    let mut frame = vec![address.get(), function | EXCEPTION_FLAG, code];
    let crc = crc16(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}
