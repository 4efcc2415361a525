//! BME688 register map (SPI mode)

/// Chip identity register
pub const CHIP_ID: u8 = 0x50;
/// Identity value of a BME688
pub const EXPECTED_CHIP_ID: u8 = 0x61;

/// Temperature data, MSB first, 3 registers
pub const TEMP_MSB: u8 = 0x22;
pub const TEMP_DATA_LEN: usize = 3;

/// Measurement control register
pub const CTRL_MEAS: u8 = 0x74;
/// Gas sensor control register
pub const CTRL_GAS: u8 = 0x71;

/// Soft reset register and the command that triggers it
pub const RESET: u8 = 0x60;
pub const SOFT_RESET_CMD: u8 = 0xB6;

/// Temperature calibration block
pub const CALIB_DATA: u8 = 0x88;

pub const FORCED_MODE: u8 = 0x01;
/// Temperature oversampling x1
pub const OSRS_T_X1: u8 = 0x20;
pub const CTRL_MEAS_VALUE: u8 = OSRS_T_X1 | FORCED_MODE;
pub const DISABLE_GAS: u8 = 0x00;

/// Address bit selecting a read transaction
pub const READ_FLAG: u8 = 0x80;
/// Mask clearing the read bit for write transactions
pub const WRITE_MASK: u8 = 0x7F;

pub const RESET_DELAY_MS: u32 = 100;
pub const CONVERSION_DELAY_MS: u32 = 200;
pub const SETTLE_DELAY_MS: u32 = 100;
