//! Object dictionary records (sub-indices).
//!
//! A [`NodeSubIndex`] is one parameter of a remote node: its declared type,
//! access rights, current and default values, limits, and the outcome of the
//! last transfer that touched it. Records are built when a node's dictionary
//! is populated and then mutated by local staging calls and by the transfer
//! engine.
//!
//! # Example
//!
//! ```
//! use canopen_sdo::{AccessType, DataType, NodeSubIndex, Value};
//!
//! let record = NodeSubIndex::new(0, "Statusword", DataType::Unsigned16, AccessType::READ | AccessType::TPDO)
//!     .with_default_value(Value::U16(0));
//! assert_eq!(record.access_string(), "R TPDO");
//! assert_eq!(record.value(), Some(&Value::U16(0)));
//! assert!(!record.is_writable());
//! ```

use bitflags::bitflags;
use chrono::{DateTime, Local};

use crate::abort::AbortCode;
use crate::data_type::DataType;
use crate::error::{Result, SdoError};
use crate::value::Value;

bitflags! {
    /// Access rights of a record, as an independent bit set.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct AccessType: u8 {
        /// Readable over SDO.
        const READ = 0x01;
        /// Writable over SDO.
        const WRITE = 0x02;
        /// Exposed on periodic read (mappable to a transmit PDO).
        const TPDO = 0x04;
        /// Exposed on periodic write (mappable to a receive PDO).
        const RPDO = 0x08;
    }
}

/// Scale factor of a Q15.16 fixed-point raw value.
const Q1516_SCALE: f64 = 65536.0;

/// One record of a node object dictionary.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSubIndex {
    sub_index: u8,
    name: String,
    access_type: AccessType,
    data_type: DataType,
    value: Option<Value>,
    default_value: Option<Value>,
    low_limit: Option<Value>,
    high_limit: Option<Value>,
    last_modification: Option<DateTime<Local>>,
    error: AbortCode,
    scale: f64,
    unit: String,
    q1516: bool,
}

impl NodeSubIndex {
    /// Creates a record with no value, no limits, scale 1.0 and no error.
    pub fn new(
        sub_index: u8,
        name: impl Into<String>,
        data_type: DataType,
        access_type: AccessType,
    ) -> Self {
        Self {
            sub_index,
            name: name.into(),
            access_type,
            data_type,
            value: None,
            default_value: None,
            low_limit: None,
            high_limit: None,
            last_modification: None,
            error: AbortCode(0),
            scale: 1.0,
            unit: String::new(),
            q1516: false,
        }
    }

    /// Sets the default value and initialises the current value with it.
    ///
    /// A default that does not fit the declared type is ignored.
    pub fn with_default_value(mut self, value: Value) -> Self {
        if value.fits(self.data_type) {
            self.value = Some(value.clone());
            self.default_value = Some(value);
        }
        self
    }

    /// Sets the low and high limits.
    pub fn with_limits(mut self, low: Option<Value>, high: Option<Value>) -> Self {
        self.low_limit = low;
        self.high_limit = high;
        self
    }

    /// Sets the display scale factor.
    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = scale;
        self
    }

    /// Sets the display unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = unit.into();
        self
    }

    /// Marks the raw value as Q15.16 fixed point for display.
    pub fn with_q1516(mut self, q1516: bool) -> Self {
        self.q1516 = q1516;
        self
    }

    /// Sub-index number.
    pub fn sub_index(&self) -> u8 {
        self.sub_index
    }

    /// Record name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Access rights.
    pub fn access_type(&self) -> AccessType {
        self.access_type
    }

    /// Declared element type.
    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Returns whether the record can be read over SDO.
    pub fn is_readable(&self) -> bool {
        self.access_type.contains(AccessType::READ)
    }

    /// Returns whether the record can be written over SDO.
    pub fn is_writable(&self) -> bool {
        self.access_type.contains(AccessType::WRITE)
    }

    /// Returns whether the record can be mapped to a transmit PDO.
    pub fn has_tpdo_access(&self) -> bool {
        self.access_type.contains(AccessType::TPDO)
    }

    /// Returns whether the record can be mapped to a receive PDO.
    pub fn has_rpdo_access(&self) -> bool {
        self.access_type.contains(AccessType::RPDO)
    }

    /// Short access description such as `"RW TPDO"`.
    pub fn access_string(&self) -> String {
        let mut access = String::new();
        if self.is_readable() {
            access.push('R');
        }
        if self.is_writable() {
            access.push('W');
        }
        if self.has_tpdo_access() {
            access.push_str(" TPDO");
        }
        if self.has_rpdo_access() {
            access.push_str(" RPDO");
        }
        access
    }

    /// Current value, if any.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Default value, if any.
    pub fn default_value(&self) -> Option<&Value> {
        self.default_value.as_ref()
    }

    /// Stages a new current value and stamps the modification time.
    ///
    /// # Errors
    ///
    /// Returns `SdoError::InvalidValue` if the value does not fit the declared
    /// type; the record is left untouched.
    pub fn set_value(&mut self, value: Value) -> Result<()> {
        if !value.fits(self.data_type) {
            return Err(SdoError::invalid_value(format!(
                "{:?} is not representable as {}",
                value, self.data_type
            )));
        }
        self.value = Some(value);
        self.last_modification = Some(Local::now());
        Ok(())
    }

    /// Replaces the current value without type checking. Used by transfer
    /// completion, where the value was decoded as the declared type.
    pub(crate) fn store_value(&mut self, value: Option<Value>) {
        self.value = value;
        self.last_modification = Some(Local::now());
    }

    /// Clears the current value.
    pub fn clear_value(&mut self) {
        self.value = None;
        self.last_modification = Some(Local::now());
    }

    /// Restores the current value from the default value.
    pub fn reset_value(&mut self) {
        self.value = self.default_value.clone();
        self.last_modification = Some(Local::now());
    }

    /// Time of the last value change, if any.
    pub fn last_modification(&self) -> Option<DateTime<Local>> {
        self.last_modification
    }

    /// Abort code of the last failed transfer (0 when none).
    pub fn error(&self) -> AbortCode {
        self.error
    }

    /// Returns whether the last transfer on this record failed.
    pub fn has_error(&self) -> bool {
        self.error.0 != 0
    }

    pub(crate) fn set_error(&mut self, error: AbortCode) {
        self.error = error;
    }

    pub(crate) fn clear_error(&mut self) {
        self.error = AbortCode(0);
    }

    /// Low limit, if any.
    pub fn low_limit(&self) -> Option<&Value> {
        self.low_limit.as_ref()
    }

    /// High limit, if any.
    pub fn high_limit(&self) -> Option<&Value> {
        self.high_limit.as_ref()
    }

    /// Returns whether a numeric value lies within the declared limits.
    ///
    /// Non-numeric values and absent limits always pass.
    pub fn is_within_limits(&self, value: &Value) -> bool {
        let Some(v) = value.as_f64() else {
            return true;
        };
        let above_low = self
            .low_limit
            .as_ref()
            .and_then(Value::as_f64)
            .map_or(true, |low| v >= low);
        let below_high = self
            .high_limit
            .as_ref()
            .and_then(Value::as_f64)
            .map_or(true, |high| v <= high);
        above_low && below_high
    }

    /// Display scale factor.
    pub fn scale(&self) -> f64 {
        self.scale
    }

    /// Display unit.
    pub fn unit(&self) -> &str {
        &self.unit
    }

    /// Returns whether the raw value is Q15.16 fixed point.
    pub fn is_q1516(&self) -> bool {
        self.q1516
    }

    /// Current numeric value scaled for display.
    ///
    /// # Example
    ///
    /// ```
    /// use canopen_sdo::{AccessType, DataType, NodeSubIndex, Value};
    ///
    /// let gain = NodeSubIndex::new(1, "Kp", DataType::Integer32, AccessType::READ | AccessType::WRITE)
    ///     .with_q1516(true)
    ///     .with_default_value(Value::I32(0x0001_8000));
    /// assert_eq!(gain.display_value(), Some(1.5));
    /// ```
    pub fn display_value(&self) -> Option<f64> {
        let raw = self.value.as_ref()?.as_f64()?;
        let raw = if self.q1516 { raw / Q1516_SCALE } else { raw };
        Some(raw * self.scale)
    }
}
