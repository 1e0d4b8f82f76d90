//! Instruments on the Raspberry Pi I2C bus: an LPS25H barometer and a BNO055
//! 9-DoF IMU running its on-chip sensor fusion.

use anyhow::{anyhow, bail};
use bno055::{BNO055OperationMode, Bno055};
use linux_embedded_hal::Delay;
use nalgebra::{Quaternion, UnitQuaternion};
use rppal::i2c::I2c;

use crate::reading::{EulerAngle, ReadingSource};

const LPS25H_ADDR: u16 = 0x5c;
const LPS25H_ID: u8 = 0xbd;

const WHO_AM_I: u8 = 0x0f;
const CTRL_REG1: u8 = 0x20;
const PRESS_OUT_XL: u8 = 0x28;
const PRESS_OUT_L: u8 = 0x29;
const PRESS_OUT_H: u8 = 0x2a;
const TEMP_OUT_L: u8 = 0x2b;
const TEMP_OUT_H: u8 = 0x2c;

/// Power on, 25 Hz output rate, block data update.
const CTRL_REG1_ACTIVE: u8 = 0b1100_0100;

pub struct Barometer {
    i2c: I2c,
}

impl Barometer {
    pub fn open(bus: u8) -> anyhow::Result<Self> {
        let mut i2c = I2c::with_bus(bus)?;
        i2c.set_slave_address(LPS25H_ADDR)?;

        let id = i2c.smbus_read_byte(WHO_AM_I)?;
        if id != LPS25H_ID {
            bail!("unexpected barometer id {id:#04x} on bus {bus}");
        }
        i2c.smbus_write_byte(CTRL_REG1, CTRL_REG1_ACTIVE)?;
        Ok(Self { i2c })
    }

    /// in hPa
    pub fn pressure(&mut self) -> anyhow::Result<f64> {
        let xl = self.i2c.smbus_read_byte(PRESS_OUT_XL)? as u32;
        let l = self.i2c.smbus_read_byte(PRESS_OUT_L)? as u32;
        let h = self.i2c.smbus_read_byte(PRESS_OUT_H)? as u32;
        // 24-bit two's complement, sign-extended through the top byte
        let raw = (((h << 24) | (l << 16) | (xl << 8)) as i32) >> 8;
        Ok(raw as f64 / 4096.0)
    }

    /// in °C
    pub fn temperature(&mut self) -> anyhow::Result<f64> {
        let l = self.i2c.smbus_read_byte(TEMP_OUT_L)?;
        let h = self.i2c.smbus_read_byte(TEMP_OUT_H)?;
        let raw = i16::from_le_bytes([l, h]);
        Ok(42.5 + raw as f64 / 480.0)
    }
}

pub struct Imu {
    imu: Bno055<I2c>,
}

impl Imu {
    pub fn open(bus: u8) -> anyhow::Result<Self> {
        let i2c = I2c::with_bus(bus)?;
        let mut imu = Bno055::new(i2c);
        let mut delay = Delay;

        imu.init(&mut delay)
            .map_err(|e| anyhow!("BNO055 init failed: {e:?}"))?;
        // 9-degrees-of-freedom fusion, magnetometer included
        imu.set_mode(BNO055OperationMode::NDOF, &mut delay)
            .map_err(|e| anyhow!("BNO055 mode change failed: {e:?}"))?;
        Ok(Self { imu })
    }

    pub fn orientation(&mut self) -> anyhow::Result<EulerAngle> {
        let quat: mint::Quaternion<f32> = self
            .imu
            .quaternion()
            .map_err(|e| anyhow!("BNO055 read failed: {e:?}"))?;
        let quat = UnitQuaternion::new_normalize(Quaternion::new(
            quat.s as f64,
            quat.v.x as f64,
            quat.v.y as f64,
            quat.v.z as f64,
        ));
        Ok(EulerAngle::from_quaternion(quat))
    }
}

/// Barometer plus IMU; the IMU's fused yaw doubles as the magnetic compass.
pub struct SensorBoard {
    barometer: Barometer,
    imu: Imu,
}

impl SensorBoard {
    pub fn open(bus: u8) -> anyhow::Result<Self> {
        Ok(Self {
            barometer: Barometer::open(bus)?,
            imu: Imu::open(bus)?,
        })
    }
}

impl ReadingSource for SensorBoard {
    fn pressure_hpa(&mut self) -> anyhow::Result<f64> {
        self.barometer.pressure()
    }

    fn temperature_from_pressure(&mut self) -> anyhow::Result<f64> {
        self.barometer.temperature()
    }

    fn compass_heading(&mut self) -> anyhow::Result<f64> {
        Ok(self.imu.orientation()?.yaw)
    }

    fn orientation(&mut self) -> anyhow::Result<EulerAngle> {
        self.imu.orientation()
    }
}
