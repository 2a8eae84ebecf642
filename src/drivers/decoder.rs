use serde_json::{Map, Value};

use crate::drivers::DecodeError;
use crate::types::{Event, Record, Sample};

/// Decodes one line of device output. Malformed lines are dropped silently.
pub fn decode_line(line: &str) -> Option<Record> {
    match try_decode(line) {
        Ok(record) => Some(record),
        Err(err) => {
            log::trace!("dropping device line {line:?}: {err}");
            None
        }
    }
}

pub fn try_decode(line: &str) -> Result<Record, DecodeError> {
    let line = line.trim();
    if line.is_empty() {
        return Err(DecodeError::Empty);
    }
    let value: Value = serde_json::from_str(line)?;
    let Value::Object(obj) = value else {
        return Err(DecodeError::NotAnObject);
    };
    let kind = obj.get("type").and_then(Value::as_str).unwrap_or_default();
    let device_timestamp_us = int_field(&obj, "ts_us");
    match kind {
        "sample" => Ok(Record::Sample(Sample {
            device_timestamp_us,
            millivolts: float_field(&obj, "mv"),
            adc: int_field(&obj, "adc"),
        })),
        "event" => Ok(Record::Event(Event {
            device_timestamp_us,
            peak_mv: float_field(&obj, "mv_peak"),
            peak_adc: int_field(&obj, "adc_peak"),
            baseline_adc: int_field(&obj, "baseline_adc"),
            dead_time_us: float_field(&obj, "dead_us"),
        })),
        "hello" => Ok(Record::Hello),
        other => Err(DecodeError::UnknownType(other.to_owned())),
    }
}

/// Numbers and numeric strings are accepted. Anything else reads as absent.
fn float_field(obj: &Map<String, Value>, key: &str) -> Option<f64> {
    match obj.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn int_field(obj: &Map<String, Value>, key: &str) -> Option<i64> {
    match obj.get(key)? {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|v| v.is_finite()).map(|v| v as i64)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v as i64))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_sample_line() {
        let record = decode_line(r#"{"type":"sample","ts_us":1200,"mv":12.5,"adc":511}"#).unwrap();
        assert_eq!(
            record,
            Record::Sample(Sample {
                device_timestamp_us: Some(1200),
                millivolts: Some(12.5),
                adc: Some(511),
            })
        );
    }

    #[test]
    fn decodes_event_line() {
        let line = r#"{"type":"event","ts_us":5000,"mv_peak":143.2,"adc_peak":1780,"baseline_adc":1090,"dead_us":212}"#;
        let Some(Record::Event(event)) = decode_line(line) else {
            panic!("expected an event");
        };
        assert_eq!(event.device_timestamp_us, Some(5000));
        assert_eq!(event.peak_mv, Some(143.2));
        assert_eq!(event.peak_adc, Some(1780));
        assert_eq!(event.baseline_adc, Some(1090));
        assert_eq!(event.dead_time_us, Some(212.0));
    }

    #[test]
    fn hello_is_accepted() {
        assert_eq!(decode_line(r#"{"type":"hello","fw":"1.2"}"#), Some(Record::Hello));
    }

    #[test]
    fn malformed_lines_are_dropped() {
        assert!(decode_line("").is_none());
        assert!(decode_line("   \r").is_none());
        assert!(decode_line("BOOT OK").is_none());
        assert!(decode_line("[1,2,3]").is_none());
        assert!(decode_line(r#"{"mv":3.0}"#).is_none());
        assert!(matches!(
            try_decode(r#"{"type":"status"}"#),
            Err(DecodeError::UnknownType(t)) if t == "status"
        ));
    }

    #[test]
    fn bad_numeric_fields_do_not_reject_the_record() {
        let Some(Record::Event(event)) =
            decode_line(r#"{"type":"event","mv_peak":"n/a","dead_us":"15.5","adc_peak":null}"#)
        else {
            panic!("expected an event");
        };
        assert_eq!(event.peak_mv, None);
        assert_eq!(event.peak_adc, None);
        assert_eq!(event.dead_time_us(), 15.5);
        assert_eq!(event.device_timestamp_us, None);

        let Some(Record::Sample(sample)) = decode_line(r#"{"type":"sample","mv":"oops"}"#) else {
            panic!("expected a sample");
        };
        assert_eq!(sample.millivolts(), 0.0);
    }

    #[test]
    fn float_timestamps_are_truncated() {
        let record = decode_line(r#"{"type":"sample","ts_us":1500.9,"mv":1}"#).unwrap();
        assert_eq!(record.device_timestamp_us(), Some(1500));
    }
}
