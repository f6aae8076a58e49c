use chrono::{DateTime, Datelike, FixedOffset, Utc};

pub fn to_fixed_offset(time: DateTime<Utc>) -> DateTime<FixedOffset> {
    let converted = time.fixed_offset();
    assert_eq!(
        converted.offset().local_minus_utc(),
        0,
        "Offset conversion failed"
    );
    assert!(converted.year() >= 1970, "Timestamp predates Unix epoch");
    converted
}

pub fn fixed_now() -> DateTime<FixedOffset> {
    to_fixed_offset(Utc::now())
}
