use crate::errors::{Error, Result};
use crate::model::{CalibrationRequest, HealthMetrics, NewDevice, NewSensor, ReadingInput};

const PERCENT_MIN: f64 = 0.0;
const PERCENT_MAX: f64 = 100.0;
const TEMP_MIN: f64 = -50.0;
const TEMP_MAX: f64 = 150.0;

fn percent(name: &str, value: f64) -> Result<()> {
    if !(PERCENT_MIN..=PERCENT_MAX).contains(&value) {
        return Err(Error::Validation(format!(
            "{} {} out of range [{}, {}]",
            name, value, PERCENT_MIN, PERCENT_MAX
        )));
    }
    Ok(())
}

fn finite(name: &str, value: f64) -> Result<()> {
    if !value.is_finite() {
        return Err(Error::Validation(format!("{} must be a finite number", name)));
    }
    Ok(())
}

fn non_empty(name: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(Error::Validation(format!("{} cannot be empty", name)));
    }
    Ok(())
}

/// Validates health metrics submitted by a device
pub fn validate_health(metrics: &HealthMetrics) -> Result<()> {
    percent("Battery level", metrics.battery_level)?;
    percent("Signal strength", metrics.signal_strength)?;
    percent("Memory usage", metrics.memory_usage)?;

    if !(TEMP_MIN..=TEMP_MAX).contains(&metrics.temperature) {
        return Err(Error::Validation(format!(
            "Temperature {} out of range [{}, {}]",
            metrics.temperature, TEMP_MIN, TEMP_MAX
        )));
    }

    Ok(())
}

pub fn validate_new_device(device: &NewDevice) -> Result<()> {
    if let Some(id) = &device.device_id {
        non_empty("Device ID", id)?;
    }
    non_empty("Device name", &device.name)?;
    non_empty("Owner", &device.owner)
}

pub fn validate_new_sensor(sensor: &NewSensor) -> Result<()> {
    non_empty("Sensor name", &sensor.name)?;
    for (name, value) in [
        ("Calibration offset", sensor.calibration_offset),
        ("Calibration multiplier", sensor.calibration_multiplier),
        ("Min threshold", sensor.min_threshold),
        ("Max threshold", sensor.max_threshold),
    ] {
        if let Some(v) = value {
            finite(name, v)?;
        }
    }
    if let (Some(min), Some(max)) = (sensor.min_threshold, sensor.max_threshold) {
        if min > max {
            return Err(Error::Validation(format!(
                "Min threshold {} is above max threshold {}",
                min, max
            )));
        }
    }
    Ok(())
}

/// Checks a calibration request and returns `(offset, multiplier, user_id)`
pub fn validate_calibration(request: &CalibrationRequest) -> Result<(f64, f64, &str)> {
    let offset = request
        .offset
        .ok_or_else(|| Error::Validation("Calibration offset is required".to_string()))?;
    let multiplier = request
        .multiplier
        .ok_or_else(|| Error::Validation("Calibration multiplier is required".to_string()))?;
    let user_id = request
        .user_id
        .as_deref()
        .ok_or_else(|| Error::Validation("Calibrating user is required".to_string()))?;

    finite("Calibration offset", offset)?;
    finite("Calibration multiplier", multiplier)?;
    non_empty("Calibrating user", user_id)?;

    Ok((offset, multiplier, user_id))
}

pub fn validate_reading(reading: &ReadingInput) -> Result<()> {
    non_empty("Sensor ID", &reading.sensor_id)?;
    finite("Reading value", reading.value)
}
