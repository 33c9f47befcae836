use std::fmt::{Display, Formatter};

mod constants {
    pub(crate) const READ_COILS: u8 = 1;
    pub(crate) const READ_DISCRETE_INPUTS: u8 = 2;
    pub(crate) const READ_HOLDING_REGISTERS: u8 = 3;
    pub(crate) const READ_INPUT_REGISTERS: u8 = 4;
    pub(crate) const WRITE_SINGLE_COIL: u8 = 5;
    pub(crate) const WRITE_SINGLE_REGISTER: u8 = 6;
    pub(crate) const WRITE_MULTIPLE_COILS: u8 = 15;
    pub(crate) const WRITE_MULTIPLE_REGISTERS: u8 = 16;
}

pub(crate) const ERROR_DELIMITER: u8 = 0x80;

/// The function codes supported by the engine
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    /// Read coils (0x01)
    ReadCoils = constants::READ_COILS,
    /// Read discrete inputs (0x02)
    ReadDiscreteInputs = constants::READ_DISCRETE_INPUTS,
    /// Read holding registers (0x03)
    ReadHoldingRegisters = constants::READ_HOLDING_REGISTERS,
    /// Read input registers (0x04)
    ReadInputRegisters = constants::READ_INPUT_REGISTERS,
    /// Write single coil (0x05)
    WriteSingleCoil = constants::WRITE_SINGLE_COIL,
    /// Write single register (0x06)
    WriteSingleRegister = constants::WRITE_SINGLE_REGISTER,
    /// Write multiple coils (0x0F)
    WriteMultipleCoils = constants::WRITE_MULTIPLE_COILS,
    /// Write multiple registers (0x10)
    WriteMultipleRegisters = constants::WRITE_MULTIPLE_REGISTERS,
}

impl Display for FunctionCode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            FunctionCode::ReadCoils => "READ COILS",
            FunctionCode::ReadDiscreteInputs => "READ DISCRETE INPUTS",
            FunctionCode::ReadHoldingRegisters => "READ HOLDING REGISTERS",
            FunctionCode::ReadInputRegisters => "READ INPUT REGISTERS",
            FunctionCode::WriteSingleCoil => "WRITE SINGLE COIL",
            FunctionCode::WriteSingleRegister => "WRITE SINGLE REGISTER",
            FunctionCode::WriteMultipleCoils => "WRITE MULTIPLE COILS",
            FunctionCode::WriteMultipleRegisters => "WRITE MULTIPLE REGISTERS",
        };
        write!(f, "{} ({:#04X})", name, self.get_value())
    }
}

impl FunctionCode {
    /// Raw value of the function code
    pub const fn get_value(self) -> u8 {
        self as u8
    }

    /// Value of the function code in an exception response
    pub const fn as_error(self) -> u8 {
        self.get_value() | ERROR_DELIMITER
    }

    /// Look up a supported function code from its raw value
    pub fn get(value: u8) -> Option<Self> {
        match value {
            constants::READ_COILS => Some(FunctionCode::ReadCoils),
            constants::READ_DISCRETE_INPUTS => Some(FunctionCode::ReadDiscreteInputs),
            constants::READ_HOLDING_REGISTERS => Some(FunctionCode::ReadHoldingRegisters),
            constants::READ_INPUT_REGISTERS => Some(FunctionCode::ReadInputRegisters),
            constants::WRITE_SINGLE_COIL => Some(FunctionCode::WriteSingleCoil),
            constants::WRITE_SINGLE_REGISTER => Some(FunctionCode::WriteSingleRegister),
            constants::WRITE_MULTIPLE_COILS => Some(FunctionCode::WriteMultipleCoils),
            constants::WRITE_MULTIPLE_REGISTERS => Some(FunctionCode::WriteMultipleRegisters),
            _ => None,
        }
    }
}
