use scursor::WriteCursor;

use crate::common::bits::{num_bytes_for_bits, pack_bits};
use crate::common::function::FunctionCode;
use crate::common::traits::Serialize;
use crate::constants::limits;
use crate::decode::PduDecodeLevel;
use crate::error::{InternalError, RequestError};
use crate::types::{coil_to_u16, AddressRange, Indexed, WriteMultiple};

/// Maximum length of a PDU, function code included
pub(crate) const MAX_PDU_LENGTH: usize = 253;

/// An encoded request PDU: function code and payload
///
/// Instances can only be built through the validating constructors, so a
/// `Request` always fits in a single frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Request {
    function: FunctionCode,
    payload: Vec<u8>,
}

impl Request {
    /// Read coils (0x01), count in `[1, 2000]`
    pub fn read_coils(range: AddressRange) -> Result<Self, RequestError> {
        Self::build(FunctionCode::ReadCoils, &range.of_read_bits()?)
    }

    /// Read discrete inputs (0x02), count in `[1, 2000]`
    pub fn read_discrete_inputs(range: AddressRange) -> Result<Self, RequestError> {
        Self::build(FunctionCode::ReadDiscreteInputs, &range.of_read_bits()?)
    }

    /// Read holding registers (0x03), count in `[1, 125]`
    pub fn read_holding_registers(range: AddressRange) -> Result<Self, RequestError> {
        Self::build(FunctionCode::ReadHoldingRegisters, &range.of_read_registers()?)
    }

    /// Read input registers (0x04), count in `[1, 125]`
    pub fn read_input_registers(range: AddressRange) -> Result<Self, RequestError> {
        Self::build(FunctionCode::ReadInputRegisters, &range.of_read_registers()?)
    }

    /// Write single coil (0x05), the value is encoded as 0xFF00 or 0x0000
    pub fn write_single_coil(value: Indexed<bool>) -> Result<Self, RequestError> {
        Self::build(FunctionCode::WriteSingleCoil, &value)
    }

    /// Write single register (0x06)
    pub fn write_single_register(value: Indexed<u16>) -> Result<Self, RequestError> {
        Self::build(FunctionCode::WriteSingleRegister, &value)
    }

    /// Write multiple coils (0x0F), between 1 and 1968 values
    pub fn write_multiple_coils(value: &WriteMultiple<bool>) -> Result<Self, RequestError> {
        value.limited(limits::MAX_WRITE_COILS_COUNT)?;
        Self::build(FunctionCode::WriteMultipleCoils, value)
    }

    /// Write multiple registers (0x10), between 1 and 123 values
    pub fn write_multiple_registers(value: &WriteMultiple<u16>) -> Result<Self, RequestError> {
        value.limited(limits::MAX_WRITE_REGISTERS_COUNT)?;
        Self::build(FunctionCode::WriteMultipleRegisters, value)
    }

    /// Function code of the request
    pub fn function(&self) -> FunctionCode {
        self.function
    }

    /// Bytes that follow the function code
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// The complete PDU: function code followed by the payload
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut pdu = Vec::with_capacity(self.len());
        pdu.push(self.function.get_value());
        pdu.extend_from_slice(&self.payload);
        pdu
    }

    /// Length of the complete PDU in bytes
    pub fn len(&self) -> usize {
        1 + self.payload.len()
    }

    /// A PDU always contains at least the function code
    pub fn is_empty(&self) -> bool {
        false
    }

    pub(crate) fn display(&self, level: PduDecodeLevel) -> RequestDisplay<'_> {
        RequestDisplay {
            request: self,
            level,
        }
    }

    fn build(function: FunctionCode, body: &dyn Serialize) -> Result<Self, RequestError> {
        let mut buffer = [0; MAX_PDU_LENGTH - 1];
        let mut cursor = WriteCursor::new(&mut buffer);
        body.serialize(&mut cursor)?;
        let length = cursor.position();
        let payload = buffer
            .get(..length)
            .ok_or(InternalError::AduTooBig(length))?
            .to_vec();
        Ok(Self { function, payload })
    }
}

impl Serialize for Request {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), InternalError> {
        cursor.write_u8(self.function.get_value())?;
        for byte in &self.payload {
            cursor.write_u8(*byte)?;
        }
        Ok(())
    }
}

impl Serialize for AddressRange {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), InternalError> {
        cursor.write_u16_be(self.start)?;
        cursor.write_u16_be(self.count)?;
        Ok(())
    }
}

impl Serialize for Indexed<bool> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), InternalError> {
        cursor.write_u16_be(self.index)?;
        cursor.write_u16_be(coil_to_u16(self.value))?;
        Ok(())
    }
}

impl Serialize for Indexed<u16> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), InternalError> {
        cursor.write_u16_be(self.index)?;
        cursor.write_u16_be(self.value)?;
        Ok(())
    }
}

impl Serialize for WriteMultiple<bool> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), InternalError> {
        self.range.serialize(cursor)?;
        let num_bytes = num_bytes_for_bits(self.range.count);
        cursor.write_u8(u8::try_from(num_bytes).map_err(|_| InternalError::AduTooBig(num_bytes))?)?;
        for byte in pack_bits(&self.values) {
            cursor.write_u8(byte)?;
        }
        Ok(())
    }
}

impl Serialize for WriteMultiple<u16> {
    fn serialize(&self, cursor: &mut WriteCursor) -> Result<(), InternalError> {
        self.range.serialize(cursor)?;
        let num_bytes = 2 * self.values.len();
        cursor.write_u8(u8::try_from(num_bytes).map_err(|_| InternalError::AduTooBig(num_bytes))?)?;
        for value in &self.values {
            cursor.write_u16_be(*value)?;
        }
        Ok(())
    }
}

pub(crate) struct RequestDisplay<'a> {
    request: &'a Request,
    level: PduDecodeLevel,
}

impl std::fmt::Display for RequestDisplay<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{}", self.request.function)?;
        if self.level.data_headers() {
            write!(f, " (payload len = {})", self.request.payload.len())?;
        }
        if self.level.data_values() {
            crate::decode::format_bytes(f, &self.request.payload)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{InvalidRange, InvalidRequest};

    fn range(start: u16, count: u16) -> AddressRange {
        AddressRange::try_from(start, count).unwrap()
    }

    #[test]
    fn encodes_read_holding_registers() {
        let request = Request::read_holding_registers(range(0, 2)).unwrap();
        assert_eq!(request.to_bytes(), vec![0x03, 0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn encodes_reads_with_function_codes() {
        let r = range(0x10, 0x13);
        assert_eq!(
            Request::read_coils(r).unwrap().to_bytes(),
            vec![0x01, 0x00, 0x10, 0x00, 0x13]
        );
        assert_eq!(
            Request::read_discrete_inputs(r).unwrap().to_bytes(),
            vec![0x02, 0x00, 0x10, 0x00, 0x13]
        );
        assert_eq!(
            Request::read_input_registers(range(0x10, 3)).unwrap().to_bytes(),
            vec![0x04, 0x00, 0x10, 0x00, 0x03]
        );
    }

    #[test]
    fn read_quantities_are_bounded() {
        assert!(Request::read_coils(range(0, 2000)).is_ok());
        assert_eq!(
            Request::read_coils(range(0, 2001)),
            Err(RequestError::BadRequest(InvalidRequest::BadRange(
                InvalidRange::CountTooLargeForType(2001, 2000)
            )))
        );
        assert!(Request::read_input_registers(range(0, 125)).is_ok());
        assert!(Request::read_holding_registers(range(0, 126)).is_err());
        assert_eq!(
            Request::read_discrete_inputs(AddressRange { start: 0, count: 0 }),
            Err(RequestError::BadRequest(InvalidRequest::BadRange(
                InvalidRange::CountOfZero
            )))
        );
    }

    #[test]
    fn encodes_single_writes() {
        assert_eq!(
            Request::write_single_coil(Indexed::new(0x10, true))
                .unwrap()
                .to_bytes(),
            vec![0x05, 0x00, 0x10, 0xFF, 0x00]
        );
        assert_eq!(
            Request::write_single_coil(Indexed::new(0x10, false))
                .unwrap()
                .payload(),
            &[0x00, 0x10, 0x00, 0x00]
        );
        assert_eq!(
            Request::write_single_register(Indexed::new(0x10, 0x1234))
                .unwrap()
                .to_bytes(),
            vec![0x06, 0x00, 0x10, 0x12, 0x34]
        );
    }

    #[test]
    fn encodes_write_multiple_coils_with_byte_count() {
        let values = vec![
            false, true, false, false, true, false, false, false, false, false,
        ];
        let write = WriteMultiple::from(0x10, values).unwrap();
        assert_eq!(
            Request::write_multiple_coils(&write).unwrap().to_bytes(),
            vec![0x0F, 0x00, 0x10, 0x00, 0x0A, 0x02, 0x12, 0x00]
        );
    }

    #[test]
    fn encodes_write_multiple_registers_with_byte_count() {
        let write = WriteMultiple::from(0x10, vec![0x1234, 0x5678]).unwrap();
        assert_eq!(
            Request::write_multiple_registers(&write).unwrap().to_bytes(),
            vec![0x10, 0x00, 0x10, 0x00, 0x02, 0x04, 0x12, 0x34, 0x56, 0x78]
        );
    }

    #[test]
    fn write_multiple_quantities_are_bounded() {
        let coils = WriteMultiple::from(0, vec![true; 1968]).unwrap();
        assert_eq!(Request::write_multiple_coils(&coils).unwrap().len(), 252);
        let coils = WriteMultiple::from(0, vec![true; 1969]).unwrap();
        assert_eq!(
            Request::write_multiple_coils(&coils),
            Err(RequestError::BadRequest(InvalidRequest::CountTooBigForType(
                1969, 1968
            )))
        );

        let registers = WriteMultiple::from(0, vec![0xFFFF; 123]).unwrap();
        assert_eq!(
            Request::write_multiple_registers(&registers).unwrap().len(),
            252
        );
        let registers = WriteMultiple::from(0, vec![0xFFFF; 124]).unwrap();
        assert!(Request::write_multiple_registers(&registers).is_err());
    }
}
