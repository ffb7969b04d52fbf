//! Fixed-threshold classification of raw sensor values.
//!
//! Analogue sensors (gas, temperature, humidity) compare against a warning
//! and a danger threshold; fire and vibration are binary switches.

use crate::db::models::{ReadingStatus, SensorType};

/// `(warning_above, danger_above)` for analogue sensors.
pub const GAS_THRESHOLDS: (f64, f64) = (150.0, 300.0);
pub const TEMPERATURE_THRESHOLDS: (f64, f64) = (35.0, 50.0);
pub const HUMIDITY_THRESHOLDS: (f64, f64) = (60.0, 80.0);

/// Classify a raw value. Total over its inputs: an unknown sensor type or a
/// missing value yields `Unknown`.
pub fn classify(sensor_type: Option<SensorType>, value: Option<f64>) -> ReadingStatus {
    let (Some(sensor_type), Some(value)) = (sensor_type, value) else {
        return ReadingStatus::Unknown;
    };
    if value.is_nan() {
        return ReadingStatus::Unknown;
    }

    match sensor_type {
        SensorType::Gas => by_threshold(value, GAS_THRESHOLDS),
        SensorType::Temperature => by_threshold(value, TEMPERATURE_THRESHOLDS),
        SensorType::Humidity => by_threshold(value, HUMIDITY_THRESHOLDS),
        SensorType::Fire if value == 1.0 => ReadingStatus::Danger,
        // Vibration alone never escalates past warning.
        SensorType::Vibration if value == 1.0 => ReadingStatus::Warning,
        SensorType::Fire | SensorType::Vibration => ReadingStatus::Normal,
    }
}

fn by_threshold(value: f64, (warning, danger): (f64, f64)) -> ReadingStatus {
    if value > danger {
        ReadingStatus::Danger
    } else if value > warning {
        ReadingStatus::Warning
    } else {
        ReadingStatus::Normal
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(t: SensorType, v: f64) -> ReadingStatus {
        classify(Some(t), Some(v))
    }

    #[test]
    fn gas_thresholds() {
        assert_eq!(status(SensorType::Gas, 0.0), ReadingStatus::Normal);
        assert_eq!(status(SensorType::Gas, 150.0), ReadingStatus::Normal);
        assert_eq!(status(SensorType::Gas, 150.5), ReadingStatus::Warning);
        assert_eq!(status(SensorType::Gas, 300.0), ReadingStatus::Warning);
        assert_eq!(status(SensorType::Gas, 300.1), ReadingStatus::Danger);
        assert_eq!(status(SensorType::Gas, 350.0), ReadingStatus::Danger);
    }

    #[test]
    fn gas_property_over_a_sweep() {
        for tenth in -100..=5000 {
            let v = f64::from(tenth) / 10.0;
            let expected = if v > 300.0 {
                ReadingStatus::Danger
            } else if v > 150.0 {
                ReadingStatus::Warning
            } else {
                ReadingStatus::Normal
            };
            assert_eq!(status(SensorType::Gas, v), expected, "gas value {v}");
        }
    }

    #[test]
    fn temperature_thresholds() {
        assert_eq!(status(SensorType::Temperature, 21.5), ReadingStatus::Normal);
        assert_eq!(status(SensorType::Temperature, 35.0), ReadingStatus::Normal);
        assert_eq!(status(SensorType::Temperature, 36.0), ReadingStatus::Warning);
        assert_eq!(status(SensorType::Temperature, 50.0), ReadingStatus::Warning);
        assert_eq!(status(SensorType::Temperature, 60.0), ReadingStatus::Danger);
        assert_eq!(status(SensorType::Temperature, -10.0), ReadingStatus::Normal);
    }

    #[test]
    fn humidity_thresholds() {
        assert_eq!(status(SensorType::Humidity, 45.0), ReadingStatus::Normal);
        assert_eq!(status(SensorType::Humidity, 60.0), ReadingStatus::Normal);
        assert_eq!(status(SensorType::Humidity, 70.0), ReadingStatus::Warning);
        assert_eq!(status(SensorType::Humidity, 80.0), ReadingStatus::Warning);
        assert_eq!(status(SensorType::Humidity, 80.5), ReadingStatus::Danger);
    }

    #[test]
    fn fire_is_binary_danger() {
        assert_eq!(status(SensorType::Fire, 1.0), ReadingStatus::Danger);
        assert_eq!(status(SensorType::Fire, 0.0), ReadingStatus::Normal);
        assert_eq!(status(SensorType::Fire, 2.0), ReadingStatus::Normal);
    }

    #[test]
    fn vibration_never_reaches_danger() {
        assert_eq!(status(SensorType::Vibration, 1.0), ReadingStatus::Warning);
        assert_eq!(status(SensorType::Vibration, 0.0), ReadingStatus::Normal);
        assert_eq!(status(SensorType::Vibration, 500.0), ReadingStatus::Normal);
    }

    #[test]
    fn missing_inputs_are_unknown() {
        assert_eq!(classify(None, Some(1.0)), ReadingStatus::Unknown);
        assert_eq!(classify(Some(SensorType::Gas), None), ReadingStatus::Unknown);
        assert_eq!(classify(None, None), ReadingStatus::Unknown);
        assert_eq!(
            classify(Some(SensorType::Gas), Some(f64::NAN)),
            ReadingStatus::Unknown
        );
    }

    #[test]
    fn deterministic() {
        for t in SensorType::ALL {
            assert_eq!(status(t, 42.0), status(t, 42.0));
        }
    }
}
