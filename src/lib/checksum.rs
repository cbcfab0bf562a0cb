use crc::{Crc, CRC_16_MODBUS};

/// Modbus CRC-16 (poly 0xA001 reflected, init 0xFFFF). Goes on the wire low byte first.
pub fn crc16(data: &[u8]) -> u16 {
    let crc = Crc::<u16>::new(&CRC_16_MODBUS);
    crc.checksum(data)
}
