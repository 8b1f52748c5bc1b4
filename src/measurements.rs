use crate::models::Measure;

const LENGTH_UNIT_TO_INCHES: &[(&str, f64)] = &[
    ("IN", 1.0),
    ("FT", 12.0),
    ("CM", 0.3937007874),
    ("M", 39.37007874),
    ("MM", 0.03937007874),
];

const WEIGHT_UNIT_TO_POUNDS: &[(&str, f64)] = &[
    ("LB", 1.0),
    ("OZ", 0.0625),
    ("KG", 2.20462262),
    ("G", 0.00220462262),
];

pub fn length_to_inches(measure: &Measure) -> Option<f64> {
    convert(measure, LENGTH_UNIT_TO_INCHES, normalize_length_unit)
}

pub fn weight_to_pounds(measure: &Measure) -> Option<f64> {
    convert(measure, WEIGHT_UNIT_TO_POUNDS, normalize_weight_unit)
}

fn convert(
    measure: &Measure,
    table: &[(&str, f64)],
    normalize: fn(&str) -> Option<&'static str>,
) -> Option<f64> {
    let number = measure.value.filter(|value| value.is_finite() && *value > 0.0)?;
    let unit = normalize(measure.unit.as_deref()?)?;
    let factor = table.iter().find(|(key, _)| *key == unit)?.1;
    Some(number * factor)
}

fn normalize_length_unit(raw: &str) -> Option<&'static str> {
    match raw.trim().to_lowercase().as_str() {
        "in" | "inch" | "inches" | "inh" => Some("IN"),
        "ft" | "foot" | "feet" => Some("FT"),
        "cm" | "centimeter" | "centimeters" | "cmt" => Some("CM"),
        "m" | "meter" | "meters" | "mtr" => Some("M"),
        "mm" | "millimeter" | "millimeters" | "mmt" => Some("MM"),
        _ => None,
    }
}

fn normalize_weight_unit(raw: &str) -> Option<&'static str> {
    match raw.trim().to_lowercase().as_str() {
        "lb" | "lbs" | "pound" | "pounds" | "lbr" => Some("LB"),
        "oz" | "ounce" | "ounces" | "onz" => Some("OZ"),
        "kg" | "kilogram" | "kilograms" | "kgm" => Some("KG"),
        "g" | "gram" | "grams" | "grm" => Some("G"),
        _ => None,
    }
}

pub fn round_one(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn round_two(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Price → integer cents, the form used in cache keys.
pub fn to_cents(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measure(value: f64, unit: &str) -> Measure {
        Measure {
            value: Some(value),
            unit: Some(unit.to_string()),
        }
    }

    #[test]
    fn converts_metric_lengths_and_weights() {
        let inches = length_to_inches(&measure(30.48, "cm")).expect("cm converts");
        assert!((inches - 12.0).abs() < 1e-6);
        let pounds = weight_to_pounds(&measure(16.0, "ounces")).expect("oz converts");
        assert!((pounds - 1.0).abs() < 1e-9);
    }

    #[test]
    fn rejects_unknown_units_and_non_positive_values() {
        assert!(length_to_inches(&measure(3.0, "cubits")).is_none());
        assert!(weight_to_pounds(&measure(0.0, "lb")).is_none());
        assert!(
            weight_to_pounds(&Measure {
                value: Some(2.0),
                unit: None
            })
            .is_none()
        );
    }

    #[test]
    fn cents_and_decimal_rounding() {
        assert_eq!(to_cents(19.999), 2000);
        assert_eq!(to_cents(24.99), 2499);
        assert_eq!(round_two(3.14159), 3.14);
        assert_eq!(round_one(4.26), 4.3);
    }
}
